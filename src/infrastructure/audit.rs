//! Audit trail sink backed by the `audit_logs` table.
//!
//! Writes happen outside the business transaction they describe and are
//! best-effort: a failed insert is logged and swallowed so the trading
//! operation that triggered it is never affected.

use crate::domain::ports::AuditSink;
use crate::infrastructure::persistence::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use tracing::warn;

pub struct SqliteAuditSink {
    database: Database,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SqliteAuditSink {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, entity_type, entity_id, old_value, new_value, created_at
            FROM audit_logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load audit entries")?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: row.try_get("id")?,
                    action: row.try_get("action")?,
                    entity_type: row.try_get("entity_type")?,
                    entity_id: row.try_get("entity_id")?,
                    old_value: row.try_get("old_value")?,
                    new_value: row.try_get("new_value")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: i64,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (action, entity_type, entity_id, old_value, new_value, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action)
        .bind(entity_type)
        .bind(entity_id)
        .bind(before.map(|v| v.to_string()))
        .bind(after.map(|v| v.to_string()))
        .bind(Utc::now())
        .execute(&self.database.pool)
        .await;

        if let Err(err) = result {
            warn!(action, entity_type, entity_id, %err, "audit write failed");
        }
    }
}
