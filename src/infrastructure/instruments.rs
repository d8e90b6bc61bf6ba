//! Instrument catalog and quote store.
//!
//! Serves as the engine's `PriceSource` and owns the price-update broadcast
//! channel: every accepted quote is published to subscribers (the pending
//! order sweep in the binary listens on it). Daily closes are kept in a
//! separate history table for range queries and statistics.

use crate::domain::ports::PriceSource;
use crate::domain::trading::types::{
    DailyClose, Instrument, MarketBoard, NewInstrument, PriceStatistics, Quote,
};
use crate::infrastructure::persistence::Database;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;

/// Published on every accepted quote update.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub instrument_id: i64,
    pub price: Decimal,
}

pub struct InstrumentService {
    database: Database,
    price_events: broadcast::Sender<PriceUpdate>,
}

impl InstrumentService {
    pub fn new(database: Database) -> Self {
        let (price_events, _) = broadcast::channel(256);
        Self {
            database,
            price_events,
        }
    }

    /// Subscribe to quote updates. Slow receivers may observe lagged drops;
    /// the channel carries notifications, not the price of record.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.price_events.subscribe()
    }

    pub async fn add(&self, new: &NewInstrument) -> Result<i64> {
        let now = Utc::now();
        let price = new.initial_price.to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO instruments
                (symbol, name, market, industry, current_price,
                 open_price, high_price, low_price, volume, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&new.symbol)
        .bind(&new.name)
        .bind(new.market.to_string())
        .bind(&new.industry)
        .bind(&price)
        .bind(&price)
        .bind(&price)
        .bind(&price)
        .bind(now)
        .execute(&self.database.pool)
        .await
        .with_context(|| format!("Failed to insert instrument {}", new.symbol))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, instrument_id: i64) -> Result<Option<Instrument>> {
        let row = sqlx::query("SELECT * FROM instruments WHERE id = ?")
            .bind(instrument_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load instrument")?;

        row.as_ref().map(instrument_from_row).transpose()
    }

    pub async fn get_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row = sqlx::query("SELECT * FROM instruments WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load instrument by symbol")?;

        row.as_ref().map(instrument_from_row).transpose()
    }

    /// Keyword search over symbol and name, ordered by symbol.
    pub async fn search(
        &self,
        keyword: Option<&str>,
        market: Option<MarketBoard>,
        industry: Option<&str>,
    ) -> Result<Vec<Instrument>> {
        let mut builder =
            sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM instruments WHERE 1 = 1");

        if let Some(keyword) = keyword.filter(|k| !k.trim().is_empty()) {
            let pattern = format!("%{}%", keyword.to_lowercase());
            builder.push(" AND (LOWER(symbol) LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR LOWER(name) LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        if let Some(market) = market {
            builder.push(" AND market = ");
            builder.push_bind(market.to_string());
        }
        if let Some(industry) = industry.filter(|i| !i.trim().is_empty()) {
            builder.push(" AND industry = ");
            builder.push_bind(industry.to_string());
        }
        builder.push(" ORDER BY symbol");

        let rows = builder
            .build()
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to search instruments")?;

        rows.iter().map(instrument_from_row).collect()
    }

    /// Persist a quote and publish the new price to subscribers.
    pub async fn update_quote(&self, instrument_id: i64, quote: &Quote) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instruments
            SET current_price = ?, open_price = ?, high_price = ?,
                low_price = ?, volume = ?, last_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(quote.current_price.to_string())
        .bind(quote.open_price.to_string())
        .bind(quote.high_price.to_string())
        .bind(quote.low_price.to_string())
        .bind(quote.volume)
        .bind(quote.updated_at)
        .bind(instrument_id)
        .execute(&self.database.pool)
        .await
        .context("Failed to update quote")?;

        if result.rows_affected() == 0 {
            bail!("quote update for unknown instrument {}", instrument_id);
        }

        // No receivers is fine; the send just reports zero deliveries.
        let _ = self.price_events.send(PriceUpdate {
            instrument_id,
            price: quote.current_price,
        });
        debug!(instrument_id, price = %quote.current_price, "quote updated");

        Ok(())
    }

    /// Record a day's close. Idempotent: a date already on file is left as-is.
    pub async fn write_daily_close(&self, close: &DailyClose) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history
                (instrument_id, date, open_price, high_price, low_price, close_price, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (instrument_id, date) DO NOTHING
            "#,
        )
        .bind(close.instrument_id)
        .bind(close.date)
        .bind(close.open_price.to_string())
        .bind(close.high_price.to_string())
        .bind(close.low_price.to_string())
        .bind(close.close_price.to_string())
        .bind(close.volume)
        .execute(&self.database.pool)
        .await
        .context("Failed to write daily close")?;

        Ok(())
    }

    /// Daily closes in `[from, to]`, most recent first.
    pub async fn price_history(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyClose>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM price_history
            WHERE instrument_id = ? AND date >= ? AND date <= ?
            ORDER BY date DESC
            "#,
        )
        .bind(instrument_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load price history")?;

        rows.iter().map(daily_close_from_row).collect()
    }

    /// High/low/average and first-to-last change over `[from, to]`. All-zero
    /// statistics for an empty range.
    pub async fn price_statistics(
        &self,
        instrument_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<PriceStatistics> {
        let mut history = self.price_history(instrument_id, from, to).await?;
        history.reverse(); // chronological

        let Some(first) = history.first() else {
            return Ok(PriceStatistics {
                highest_price: Decimal::ZERO,
                lowest_price: Decimal::ZERO,
                average_price: Decimal::ZERO,
                price_change: Decimal::ZERO,
                change_percent: Decimal::ZERO,
            });
        };
        let last = history.last().unwrap_or(first);

        let highest_price = history.iter().map(|h| h.high_price).max().unwrap_or_default();
        let lowest_price = history.iter().map(|h| h.low_price).min().unwrap_or_default();
        let close_sum: Decimal = history.iter().map(|h| h.close_price).sum();
        let average_price = (close_sum / Decimal::from(history.len() as i64)).round_dp(2);

        let price_change = last.close_price - first.close_price;
        let change_percent = if first.close_price.is_zero() {
            Decimal::ZERO
        } else {
            (price_change / first.close_price * Decimal::ONE_HUNDRED).round_dp(2)
        };

        Ok(PriceStatistics {
            highest_price,
            lowest_price,
            average_price,
            price_change,
            change_percent,
        })
    }
}

#[async_trait]
impl PriceSource for InstrumentService {
    async fn instrument(&self, instrument_id: i64) -> Result<Option<Instrument>> {
        self.get(instrument_id).await
    }

    async fn current_price(&self, instrument_id: i64) -> Result<Option<Decimal>> {
        Ok(self.get(instrument_id).await?.map(|i| i.current_price))
    }
}

fn instrument_from_row(row: &SqliteRow) -> Result<Instrument> {
    Ok(Instrument {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        market: row.try_get::<String, _>("market")?.parse()?,
        industry: row.try_get("industry")?,
        current_price: decimal_column(row, "current_price")?,
        open_price: decimal_column(row, "open_price")?,
        high_price: decimal_column(row, "high_price")?,
        low_price: decimal_column(row, "low_price")?,
        volume: row.try_get("volume")?,
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
    })
}

fn daily_close_from_row(row: &SqliteRow) -> Result<DailyClose> {
    Ok(DailyClose {
        instrument_id: row.try_get("instrument_id")?,
        date: row.try_get("date")?,
        open_price: decimal_column(row, "open_price")?,
        high_price: decimal_column(row, "high_price")?,
        low_price: decimal_column(row, "low_price")?,
        close_price: decimal_column(row, "close_price")?,
        volume: row.try_get("volume")?,
    })
}

pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("Malformed decimal in column {}", column))
}
