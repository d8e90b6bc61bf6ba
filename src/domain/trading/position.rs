//! Weighted-average cost accounting for a single-instrument position.
//!
//! The math lives here, storage-free, so the ledger service can load a row,
//! apply a fill, and write it back inside whatever transaction the caller
//! owns. Commission on buys is capitalized into cost basis; commission on
//! sells reduces realized P&L.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Running ledger for one instrument. Created lazily on the first buy and
/// retained forever: a position sold down to zero keeps its realized P&L.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub instrument_id: i64,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("sell of {requested} exceeds held quantity {held}")]
    Oversold { held: i64, requested: i64 },
}

impl Position {
    /// Empty position, as created on the first buy for an instrument.
    pub fn opened(instrument_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            instrument_id,
            quantity: 0,
            average_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Apply a buy fill: fold price and commission into the weighted-average
    /// cost. Total cost is tracked independently so repeated averaging does
    /// not accumulate rounding drift.
    pub fn apply_buy(
        &mut self,
        price: Decimal,
        quantity: i64,
        commission: Decimal,
        now: DateTime<Utc>,
    ) {
        let total_cost = self.total_cost + price * Decimal::from(quantity) + commission;
        let total_quantity = self.quantity + quantity;

        self.average_cost = if total_quantity > 0 {
            total_cost / Decimal::from(total_quantity)
        } else {
            Decimal::ZERO
        };
        self.total_cost = total_cost;
        self.quantity = total_quantity;
        self.updated_at = now;
    }

    /// Apply a sell fill: recognize realized P&L against the average cost and
    /// release the sold basis. The per-unit cost of the remaining shares does
    /// not change. Returns the realized P&L of this fill.
    ///
    /// Overselling is an error, never a clamp; the caller aborts its
    /// transaction so the quantity-never-negative invariant holds even when a
    /// concurrent sell won the race.
    pub fn apply_sell(
        &mut self,
        price: Decimal,
        quantity: i64,
        commission: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, PositionError> {
        if quantity > self.quantity {
            return Err(PositionError::Oversold {
                held: self.quantity,
                requested: quantity,
            });
        }

        let sell_amount = price * Decimal::from(quantity);
        let cost_basis_sold = self.average_cost * Decimal::from(quantity);
        let realized = sell_amount - cost_basis_sold - commission;

        self.realized_pnl += realized;
        self.quantity -= quantity;
        self.total_cost -= cost_basis_sold;
        self.updated_at = now;

        Ok(realized)
    }
}

/// An open position annotated with its current market value, as returned by
/// the portfolio snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioItem {
    pub instrument_id: i64,
    pub instrument_symbol: String,
    pub instrument_name: String,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub return_rate: Decimal,
}

/// Aggregate totals across the whole portfolio. Realized P&L covers every
/// position ever held, including ones sold down to zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_market_value: Decimal,
    pub total_cost: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_return_rate: Decimal,
}
