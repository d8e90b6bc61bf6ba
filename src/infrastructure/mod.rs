pub mod audit;
pub mod instruments;
pub mod market_hours;
pub mod mock;
pub mod persistence;
