//! Portfolio ledger: the single writer of position state.
//!
//! `apply_fill` is the only mutation entry point and runs on the caller's
//! connection so order execution, trade insertion, and the position update
//! commit or roll back as one unit. Reads (`snapshot`/`summary`) price open
//! positions through the `PriceSource` port and net out estimated sell costs.

use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::ports::PriceSource;
use crate::domain::trading::costs;
use crate::domain::trading::position::{PortfolioItem, PortfolioSummary, Position};
use crate::domain::trading::types::OrderSide;
use crate::infrastructure::instruments::decimal_column;
use crate::infrastructure::persistence::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

pub struct PortfolioService {
    database: Database,
    instruments: Arc<dyn PriceSource>,
    discount_rate: Decimal,
}

impl PortfolioService {
    pub fn new(database: Database, instruments: Arc<dyn PriceSource>, discount_rate: Decimal) -> Self {
        Self {
            database,
            instruments,
            discount_rate,
        }
    }

    /// Current position row for an instrument, if one was ever opened.
    pub async fn position(&self, instrument_id: i64) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE instrument_id = ?")
            .bind(instrument_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load position")?;

        row.as_ref().map(position_from_row).transpose()
    }

    /// Apply one fill to the position ledger, inside the caller's transaction.
    ///
    /// This read-modify-write is the authoritative holdings check: a sell
    /// that would drive quantity negative fails here and aborts the whole
    /// transaction, regardless of what any advisory pre-check saw.
    pub async fn apply_fill(
        &self,
        conn: &mut SqliteConnection,
        instrument_id: i64,
        quantity: i64,
        price: Decimal,
        side: OrderSide,
        commission: Decimal,
    ) -> TradingResult<()> {
        let now = Utc::now();

        let row = sqlx::query("SELECT * FROM positions WHERE instrument_id = ?")
            .bind(instrument_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to read position for fill")?;

        let mut position = match row.as_ref() {
            Some(row) => position_from_row(row)?,
            None => Position::opened(instrument_id, now),
        };

        match side {
            OrderSide::Buy => position.apply_buy(price, quantity, commission, now),
            OrderSide::Sell => {
                position
                    .apply_sell(price, quantity, commission, now)
                    .map_err(|_| TradingError::InsufficientHoldings)?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO positions
                (instrument_id, quantity, average_cost, total_cost, realized_pnl, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (instrument_id) DO UPDATE SET
                quantity = excluded.quantity,
                average_cost = excluded.average_cost,
                total_cost = excluded.total_cost,
                realized_pnl = excluded.realized_pnl,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instrument_id)
        .bind(position.quantity)
        .bind(position.average_cost.to_string())
        .bind(position.total_cost.to_string())
        .bind(position.realized_pnl.to_string())
        .bind(position.updated_at)
        .execute(&mut *conn)
        .await
        .context("Failed to write position")?;

        Ok(())
    }

    /// Open positions (quantity > 0) annotated with market value and
    /// unrealized P&L at the latest known price.
    pub async fn snapshot(&self) -> Result<Vec<PortfolioItem>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE quantity > 0")
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load open positions")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let position = position_from_row(row)?;
            let instrument = self
                .instruments
                .instrument(position.instrument_id)
                .await?
                .with_context(|| {
                    format!(
                        "position references unknown instrument {}",
                        position.instrument_id
                    )
                })?;

            let market_value = instrument.current_price * Decimal::from(position.quantity);
            let sell_costs = costs::total_cost(market_value, OrderSide::Sell, self.discount_rate);
            let unrealized_pnl = market_value - position.total_cost - sell_costs.total;
            let return_rate = if position.total_cost > Decimal::ZERO {
                unrealized_pnl / position.total_cost * Decimal::ONE_HUNDRED
            } else {
                Decimal::ZERO
            };

            items.push(PortfolioItem {
                instrument_id: position.instrument_id,
                instrument_symbol: instrument.symbol,
                instrument_name: instrument.name,
                quantity: position.quantity,
                average_cost: position.average_cost,
                current_price: instrument.current_price,
                market_value,
                unrealized_pnl,
                return_rate,
            });
        }

        Ok(items)
    }

    /// Aggregate totals. Realized P&L is summed over every position row,
    /// including positions sold down to zero.
    pub async fn summary(&self) -> Result<PortfolioSummary> {
        let open = self.snapshot().await?;

        let total_market_value: Decimal = open.iter().map(|p| p.market_value).sum();
        let total_cost: Decimal = open
            .iter()
            .map(|p| p.average_cost * Decimal::from(p.quantity))
            .sum();
        let total_unrealized_pnl: Decimal = open.iter().map(|p| p.unrealized_pnl).sum();

        let rows = sqlx::query("SELECT realized_pnl FROM positions")
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to sum realized P&L")?;
        let mut total_realized_pnl = Decimal::ZERO;
        for row in &rows {
            total_realized_pnl += decimal_column(row, "realized_pnl")?;
        }

        let total_return_rate = if total_cost > Decimal::ZERO {
            total_unrealized_pnl / total_cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        Ok(PortfolioSummary {
            total_market_value,
            total_cost,
            total_unrealized_pnl,
            total_realized_pnl,
            total_return_rate,
        })
    }
}

fn position_from_row(row: &SqliteRow) -> Result<Position> {
    Ok(Position {
        instrument_id: row.try_get("instrument_id")?,
        quantity: row.try_get("quantity")?,
        average_cost: decimal_column(row, "average_cost")?,
        total_cost: decimal_column(row, "total_cost")?,
        realized_pnl: decimal_column(row, "realized_pnl")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}
