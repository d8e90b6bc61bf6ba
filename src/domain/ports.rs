//! Collaborator interfaces the trading core consumes. Implementations live in
//! `infrastructure`; tests substitute mocks behind the same traits.

use crate::domain::trading::types::Instrument;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

/// Latest-known prices and instrument identity. The engine does not manage
/// staleness; whatever the source returns is the price.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn instrument(&self, instrument_id: i64) -> Result<Option<Instrument>>;

    async fn current_price(&self, instrument_id: i64) -> Result<Option<Decimal>>;
}

/// Trading-session oracle. `None` timestamps mean "now".
pub trait MarketCalendar: Send + Sync {
    fn is_open(&self, at: Option<DateTime<Utc>>) -> bool;

    /// Start of the next trading session strictly after `from`, if one exists
    /// within the calendar's horizon.
    fn next_open(&self, from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>>;

    /// Whether `date` (exchange-local) is a scheduled holiday.
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Before/after record sink for every state-changing action. Best-effort by
/// contract: implementations swallow their own failures and must never
/// surface an error into the caller's transaction.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: i64,
        before: Option<Value>,
        after: Option<Value>,
    );
}
