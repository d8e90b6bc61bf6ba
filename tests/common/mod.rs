#![allow(dead_code)] // not every harness handle is used by every suite

use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;

use stocksim::application::portfolio::PortfolioService;
use stocksim::application::trading::TradingService;
use stocksim::domain::trading::costs::DEFAULT_DISCOUNT_RATE;
use stocksim::domain::trading::types::{MarketBoard, NewInstrument};
use stocksim::infrastructure::instruments::InstrumentService;
use stocksim::infrastructure::mock::{MockAuditSink, MockCalendar};
use stocksim::infrastructure::persistence::Database;

/// Everything a trading-flow test needs, wired over one in-memory database.
pub struct TestHarness {
    pub database: Database,
    pub instruments: Arc<InstrumentService>,
    pub portfolio: Arc<PortfolioService>,
    pub trading: Arc<TradingService>,
    pub calendar: Arc<MockCalendar>,
    pub audit: Arc<MockAuditSink>,
}

impl TestHarness {
    pub async fn new(market_open: bool) -> Result<Self> {
        Self::with_notional_cap(market_open, None).await
    }

    pub async fn with_notional_cap(
        market_open: bool,
        max_order_notional: Option<Decimal>,
    ) -> Result<Self> {
        let database = Database::new("sqlite::memory:").await?;
        let instruments = Arc::new(InstrumentService::new(database.clone()));
        let calendar = Arc::new(MockCalendar::new(market_open));
        let audit = Arc::new(MockAuditSink::new());
        let portfolio = Arc::new(PortfolioService::new(
            database.clone(),
            instruments.clone(),
            DEFAULT_DISCOUNT_RATE,
        ));
        let trading = Arc::new(TradingService::new(
            database.clone(),
            portfolio.clone(),
            instruments.clone(),
            calendar.clone(),
            audit.clone(),
            DEFAULT_DISCOUNT_RATE,
            max_order_notional,
        ));

        Ok(Self {
            database,
            instruments,
            portfolio,
            trading,
            calendar,
            audit,
        })
    }

    /// Register an instrument and return its id.
    pub async fn add_instrument(&self, symbol: &str, price: Decimal) -> Result<i64> {
        self.instruments
            .add(&NewInstrument {
                symbol: symbol.to_string(),
                name: format!("{symbol} Test Co"),
                market: MarketBoard::Listed,
                industry: "Testing".to_string(),
                initial_price: price,
            })
            .await
    }

    /// Give the account an opening position by posting a buy fill straight to
    /// the ledger, without going through the order path.
    pub async fn seed_holding(
        &self,
        instrument_id: i64,
        quantity: i64,
        price: Decimal,
        commission: Decimal,
    ) -> Result<()> {
        use stocksim::domain::trading::types::OrderSide;

        let mut tx = self.database.pool.begin().await?;
        self.portfolio
            .apply_fill(
                &mut tx,
                instrument_id,
                quantity,
                price,
                OrderSide::Buy,
                commission,
            )
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
