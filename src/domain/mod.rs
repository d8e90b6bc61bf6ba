// Domain-specific error types
pub mod errors;

// Port interfaces for external collaborators
pub mod ports;

// Core trading domain
pub mod trading;
