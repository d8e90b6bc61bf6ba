use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stocksim::application::portfolio::PortfolioService;
use stocksim::application::trading::TradingService;
use stocksim::config::Config;
use stocksim::domain::ports::{MarketCalendar, PriceSource};
use stocksim::domain::trading::types::{
    CreateOrderRequest, MarketBoard, NewInstrument, OrderFilter, OrderSide, OrderType, Quote,
    TradeFilter,
};
use stocksim::infrastructure::audit::SqliteAuditSink;
use stocksim::infrastructure::instruments::InstrumentService;
use stocksim::infrastructure::market_hours::TaiwanCalendar;
use stocksim::infrastructure::persistence::Database;

#[derive(Parser)]
#[command(name = "stocksim", about = "Single-user equity trading simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the instrument catalog with a demo watch set
    Seed,
    /// Place a buy order (market, or limit with --limit)
    Buy {
        symbol: String,
        quantity: i64,
        #[arg(long)]
        limit: Option<Decimal>,
    },
    /// Place a sell order (market, or limit with --limit)
    Sell {
        symbol: String,
        quantity: i64,
        #[arg(long)]
        limit: Option<Decimal>,
    },
    /// Cancel a pending order
    Cancel { order_id: i64 },
    /// List orders, newest first
    Orders,
    /// List trades, newest first
    Trades,
    /// Show open positions and portfolio totals
    Portfolio,
    /// Run the quote simulator and pending-order sweep
    Run {
        /// Stop after this many quote ticks (runs until interrupted if unset)
        #[arg(long)]
        ticks: Option<u64>,
    },
}

struct Services {
    instruments: Arc<InstrumentService>,
    portfolio: Arc<PortfolioService>,
    trading: Arc<TradingService>,
    calendar: Arc<TaiwanCalendar>,
    config: Config,
}

async fn build_services() -> Result<Services> {
    let config = Config::from_env()?;
    let database = Database::new(&config.database_url).await?;

    let instruments = Arc::new(InstrumentService::new(database.clone()));
    let calendar = Arc::new(TaiwanCalendar::new());
    let audit = Arc::new(SqliteAuditSink::new(database.clone()));
    let portfolio = Arc::new(PortfolioService::new(
        database.clone(),
        instruments.clone(),
        config.commission_discount_rate,
    ));
    let trading = Arc::new(TradingService::new(
        database,
        portfolio.clone(),
        instruments.clone(),
        calendar.clone(),
        audit,
        config.commission_discount_rate,
        config.max_order_notional,
    ));

    Ok(Services {
        instruments,
        portfolio,
        trading,
        calendar,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let services = build_services().await?;

    match cli.command {
        Command::Seed => seed(&services).await?,
        Command::Buy {
            symbol,
            quantity,
            limit,
        } => place_order(&services, &symbol, OrderSide::Buy, quantity, limit).await?,
        Command::Sell {
            symbol,
            quantity,
            limit,
        } => place_order(&services, &symbol, OrderSide::Sell, quantity, limit).await?,
        Command::Cancel { order_id } => match services.trading.cancel_order(order_id).await {
            Ok(order) => println!("order {} cancelled", order.id),
            Err(err) if err.is_business() => println!("cannot cancel: {}", err),
            Err(err) => return Err(err.into()),
        },
        Command::Orders => {
            for order in services.trading.get_orders(&OrderFilter::default()).await? {
                println!(
                    "#{:<5} {:<4} {:<6} qty {:>6}  limit {:<10}  {:<9}  {}",
                    order.id,
                    order.side,
                    order.order_type,
                    order.quantity,
                    order
                        .limit_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    order.status,
                    order.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        Command::Trades => {
            for trade in services.trading.get_trades(&TradeFilter::default()).await? {
                println!(
                    "#{:<5} {:<6} {:<4} qty {:>6} @ {:<10} net {:<12}  {}",
                    trade.id,
                    trade.instrument_symbol,
                    trade.side,
                    trade.quantity,
                    trade.executed_price,
                    trade.net_amount,
                    trade.executed_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        Command::Portfolio => {
            for item in services.portfolio.snapshot().await? {
                println!(
                    "{:<6} {:<24} qty {:>6}  avg {:<10} now {:<10} value {:<12} unrealized {:<12} ({}%)",
                    item.instrument_symbol,
                    item.instrument_name,
                    item.quantity,
                    item.average_cost.round_dp(4),
                    item.current_price,
                    item.market_value,
                    item.unrealized_pnl.round_dp(2),
                    item.return_rate.round_dp(2),
                );
            }
            let summary = services.portfolio.summary().await?;
            println!(
                "total value {}  cost {}  unrealized {}  realized {}",
                summary.total_market_value,
                summary.total_cost.round_dp(2),
                summary.total_unrealized_pnl.round_dp(2),
                summary.total_realized_pnl.round_dp(2),
            );
        }
        Command::Run { ticks } => run_simulation(&services, ticks).await?,
    }

    Ok(())
}

async fn seed(services: &Services) -> Result<()> {
    let demo_set = [
        ("2330", "TSMC", MarketBoard::Listed, "Semiconductors", "580"),
        ("2317", "Hon Hai Precision", MarketBoard::Listed, "Electronics", "105"),
        ("2454", "MediaTek", MarketBoard::Listed, "Semiconductors", "920"),
        ("0050", "Yuanta Taiwan Top 50 ETF", MarketBoard::Listed, "ETF", "140"),
        ("5483", "Sino-American Silicon", MarketBoard::OverTheCounter, "Semiconductors", "178"),
    ];

    for (symbol, name, market, industry, price) in demo_set {
        if services.instruments.get_by_symbol(symbol).await?.is_some() {
            continue;
        }
        services
            .instruments
            .add(&NewInstrument {
                symbol: symbol.to_string(),
                name: name.to_string(),
                market,
                industry: industry.to_string(),
                initial_price: price.parse().context("bad seed price")?,
            })
            .await?;
        info!(symbol, name, "seeded instrument");
    }

    Ok(())
}

async fn place_order(
    services: &Services,
    symbol: &str,
    side: OrderSide,
    quantity: i64,
    limit: Option<Decimal>,
) -> Result<()> {
    let Some(instrument) = services.instruments.get_by_symbol(symbol).await? else {
        bail!("unknown symbol {symbol}, run `stocksim seed` first");
    };

    let request = CreateOrderRequest {
        instrument_id: instrument.id,
        side,
        order_type: if limit.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        },
        quantity,
        limit_price: limit,
    };

    match services.trading.create_order(request).await {
        Ok(order) => println!("order {} accepted, status {}", order.id, order.status),
        Err(err) if err.is_business() => println!("order rejected: {}", err),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

/// Random-walk quote driver. Each accepted quote lands on the broadcast
/// channel; the sweep listens there and re-evaluates pending orders, so fills
/// happen in response to price movement rather than on a blind timer.
async fn run_simulation(services: &Services, ticks: Option<u64>) -> Result<()> {
    let instruments = services.instruments.search(None, None, None).await?;
    if instruments.is_empty() {
        bail!("no instruments to simulate, run `stocksim seed` first");
    }

    if !services.calendar.is_open(None) {
        match services.calendar.next_open(None) {
            Some(next) => info!("market closed, next session opens {}", next),
            None => info!("market closed, no session within the calendar horizon"),
        }
    }

    let mut price_events = services.instruments.subscribe();
    let trading = services.trading.clone();
    let sweeper = tokio::spawn(async move {
        loop {
            match price_events.recv().await {
                Ok(_) => {
                    if let Err(err) = trading.process_pending_orders().await {
                        warn!(%err, "pending order sweep failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "sweep lagged behind quote stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let tick_interval = std::time::Duration::from_millis(services.config.quote_tick_ms);
    let mut tick = 0u64;
    loop {
        if let Some(max_ticks) = ticks
            && tick >= max_ticks
        {
            break;
        }
        tick += 1;
        tokio::time::sleep(tick_interval).await;

        for instrument in &instruments {
            let Some(current) = services
                .instruments
                .current_price(instrument.id)
                .await?
            else {
                continue;
            };

            // +/-0.5% random step per tick
            let step: f64 = rand::random_range(-0.005..0.005);
            let factor = Decimal::ONE + Decimal::from_f64(step).unwrap_or(Decimal::ZERO);
            let price = (current * factor).round_dp(2).max(Decimal::new(1, 2));

            let now = chrono::Utc::now();
            services
                .instruments
                .update_quote(
                    instrument.id,
                    &Quote {
                        current_price: price,
                        open_price: instrument.open_price,
                        high_price: instrument.high_price.max(price),
                        low_price: instrument.low_price.min(price),
                        volume: instrument.volume + 1000,
                        updated_at: now,
                    },
                )
                .await?;
        }

        if tick % 10 == 0 {
            let summary = services.portfolio.summary().await?;
            info!(
                market_value = %summary.total_market_value,
                unrealized = %summary.total_unrealized_pnl.round_dp(2),
                realized = %summary.total_realized_pnl.round_dp(2),
                "portfolio mark"
            );
        }
    }

    sweeper.abort();
    Ok(())
}
