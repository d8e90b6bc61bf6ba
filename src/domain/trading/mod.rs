// Trade cost and P&L estimation math
pub mod costs;

// Weighted-average position accounting
pub mod position;

// Core trading entities and value objects
pub mod types;
