// Portfolio ledger service
pub mod portfolio;

// Order lifecycle service
pub mod trading;
