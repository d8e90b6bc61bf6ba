//! In-memory collaborators for tests: a price source with settable quotes, a
//! calendar pinned open or closed, and an audit sink that records what it was
//! asked to write.

use crate::domain::ports::{AuditSink, MarketCalendar, PriceSource};
use crate::domain::trading::types::Instrument;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MockPriceSource {
    instruments: Arc<RwLock<HashMap<i64, Instrument>>>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instrument: Instrument) {
        self.instruments
            .write()
            .await
            .insert(instrument.id, instrument);
    }

    pub async fn set_price(&self, instrument_id: i64, price: Decimal) {
        if let Some(instrument) = self.instruments.write().await.get_mut(&instrument_id) {
            instrument.current_price = price;
            instrument.last_updated = Utc::now();
        }
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn instrument(&self, instrument_id: i64) -> Result<Option<Instrument>> {
        Ok(self.instruments.read().await.get(&instrument_id).cloned())
    }

    async fn current_price(&self, instrument_id: i64) -> Result<Option<Decimal>> {
        Ok(self
            .instruments
            .read()
            .await
            .get(&instrument_id)
            .map(|i| i.current_price))
    }
}

/// Calendar frozen to one answer, switchable mid-test.
pub struct MockCalendar {
    open: AtomicBool,
}

impl MockCalendar {
    pub fn new(open: bool) -> Self {
        Self {
            open: AtomicBool::new(open),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl MarketCalendar for MockCalendar {
    fn is_open(&self, _at: Option<DateTime<Utc>>) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn next_open(&self, _from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        None
    }

    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct RecordedAudit {
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

#[derive(Clone, Default)]
pub struct MockAuditSink {
    records: Arc<RwLock<Vec<RecordedAudit>>>,
}

impl MockAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<RecordedAudit> {
        self.records.read().await.clone()
    }

    pub async fn actions(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.action.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for MockAuditSink {
    async fn record(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: i64,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        self.records.write().await.push(RecordedAudit {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            before,
            after,
        });
    }
}
