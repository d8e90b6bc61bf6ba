//! Configuration loading from environment variables (with `.env` support).

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::domain::trading::costs::DEFAULT_DISCOUNT_RATE;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database location.
    pub database_url: String,
    /// Brokerage discount applied to the statutory commission rate, in (0, 1].
    pub commission_discount_rate: Decimal,
    /// Optional per-order notional cap. Unset means uncapped.
    pub max_order_notional: Option<Decimal>,
    /// Seconds between pending-order sweeps in the simulation loop.
    pub sweep_interval_secs: u64,
    /// Milliseconds between simulated quote ticks.
    pub quote_tick_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/stocksim.db".to_string());

        let commission_discount_rate = match env::var("COMMISSION_DISCOUNT_RATE") {
            Ok(raw) => Decimal::from_str(&raw).context("Invalid COMMISSION_DISCOUNT_RATE")?,
            Err(_) => DEFAULT_DISCOUNT_RATE,
        };
        if commission_discount_rate <= Decimal::ZERO || commission_discount_rate > Decimal::ONE {
            bail!(
                "COMMISSION_DISCOUNT_RATE must be in (0, 1], got {}",
                commission_discount_rate
            );
        }

        let max_order_notional = match env::var("MAX_ORDER_NOTIONAL") {
            Ok(raw) => Some(Decimal::from_str(&raw).context("Invalid MAX_ORDER_NOTIONAL")?),
            Err(_) => None,
        };

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid SWEEP_INTERVAL_SECONDS")?;

        let quote_tick_ms = env::var("QUOTE_TICK_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("Invalid QUOTE_TICK_MS")?;

        Ok(Self {
            database_url,
            commission_discount_rate,
            max_order_notional,
            sweep_interval_secs,
            quote_tick_ms,
        })
    }
}
