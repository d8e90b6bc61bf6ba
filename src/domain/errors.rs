use thiserror::Error;

/// Outcomes of trading operations that are expected business conditions, plus
/// the one variant that is not: `Storage` wraps infrastructure failures
/// (connection loss, aborted transactions) that propagate to the caller
/// unhandled. Callers branch on the business variants; they are not failures
/// worth logging.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("order quantity must be positive")]
    InvalidQuantity,

    #[error("unknown instrument")]
    InvalidStock,

    #[error("limit orders require a positive limit price")]
    InvalidLimitPrice,

    #[error("sell quantity exceeds held quantity")]
    InsufficientHoldings,

    #[error("identical order submitted within the duplicate window")]
    DuplicateOrder,

    #[error("order not found")]
    OrderNotFound,

    #[error("order is no longer actionable")]
    OrderNotCancellable,

    #[error("order notional exceeds the configured per-order limit")]
    ExceedsTradeLimit,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TradingError {
    /// True for the expected business outcomes, false for `Storage`.
    pub fn is_business(&self) -> bool {
        !matches!(self, TradingError::Storage(_))
    }
}

pub type TradingResult<T> = Result<T, TradingError>;
