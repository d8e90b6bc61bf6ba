use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => bail!("unrecognized order side: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            _ => bail!("unrecognized order type: {}", s),
        }
    }
}

/// Order lifecycle status. `Pending` is the only non-terminal state:
/// an order moves to `Executed` or `Cancelled` exactly once and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Executed => write!(f, "EXECUTED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "EXECUTED" => Ok(OrderStatus::Executed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => bail!("unrecognized order status: {}", s),
        }
    }
}

/// Exchange board an instrument is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketBoard {
    Listed,
    OverTheCounter,
}

impl fmt::Display for MarketBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketBoard::Listed => write!(f, "LISTED"),
            MarketBoard::OverTheCounter => write!(f, "OTC"),
        }
    }
}

impl FromStr for MarketBoard {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LISTED" => Ok(MarketBoard::Listed),
            "OTC" => Ok(MarketBoard::OverTheCounter),
            _ => bail!("unrecognized market board: {}", s),
        }
    }
}

/// A tradable instrument with its latest quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub market: MarketBoard,
    pub industry: String,
    pub current_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: i64,
    pub last_updated: DateTime<Utc>,
}

/// Fields for registering a new instrument in the catalog.
#[derive(Debug, Clone)]
pub struct NewInstrument {
    pub symbol: String,
    pub name: String,
    pub market: MarketBoard,
    pub industry: String,
    pub initial_price: Decimal,
}

/// A full quote update for an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub current_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: i64,
    pub updated_at: DateTime<Utc>,
}

/// A request to trade a quantity of one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub instrument_id: i64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub instrument_id: i64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub commission: Decimal,
    pub transaction_tax: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether a limit order would fill at `market_price`.
    ///
    /// Buy limits trigger at or below the limit price, sell limits at or
    /// above it. Market orders always trigger. A limit order without a price
    /// never triggers (creation validation rejects that shape up front).
    pub fn limit_triggered(&self, market_price: Decimal) -> bool {
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => match self.limit_price {
                Some(limit) => match self.side {
                    OrderSide::Buy => market_price <= limit,
                    OrderSide::Sell => market_price >= limit,
                },
                None => false,
            },
        }
    }
}

/// Immutable execution record produced when an order fills.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: i64,
    pub order_id: i64,
    pub instrument_symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub executed_price: Decimal,
    pub total_amount: Decimal,
    pub commission: Decimal,
    pub transaction_tax: Decimal,
    pub net_amount: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Conjunctive filter for order queries.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub instrument_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Conjunctive filter for trade queries.
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub instrument_symbol: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// One day of closing prices for an instrument.
#[derive(Debug, Clone, Serialize)]
pub struct DailyClose {
    pub instrument_id: i64,
    pub date: NaiveDate,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: i64,
}

/// Aggregate statistics over a range of daily closes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStatistics {
    pub highest_price: Decimal,
    pub lowest_price: Decimal,
    pub average_price: Decimal,
    pub price_change: Decimal,
    pub change_percent: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_order(side: OrderSide, limit: Decimal) -> Order {
        Order {
            id: 1,
            instrument_id: 1,
            side,
            order_type: OrderType::Limit,
            quantity: 100,
            limit_price: Some(limit),
            status: OrderStatus::Pending,
            commission: Decimal::ZERO,
            transaction_tax: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_buy_limit_triggers_at_or_below_limit() {
        let order = limit_order(OrderSide::Buy, dec!(100));

        assert!(order.limit_triggered(dec!(100)));
        assert!(order.limit_triggered(dec!(99.5)));
        assert!(!order.limit_triggered(dec!(101)));
    }

    #[test]
    fn test_sell_limit_triggers_at_or_above_limit() {
        let order = limit_order(OrderSide::Sell, dec!(100));

        assert!(order.limit_triggered(dec!(100)));
        assert!(order.limit_triggered(dec!(100.5)));
        assert!(!order.limit_triggered(dec!(99)));
    }

    #[test]
    fn test_market_order_always_triggers() {
        let mut order = limit_order(OrderSide::Buy, dec!(100));
        order.order_type = OrderType::Market;
        order.limit_price = None;

        assert!(order.limit_triggered(dec!(1)));
        assert!(order.limit_triggered(dec!(100000)));
    }

    #[test]
    fn test_enum_string_roundtrip() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            assert_eq!(side.to_string().parse::<OrderSide>().unwrap(), side);
        }
        for order_type in [OrderType::Market, OrderType::Limit] {
            assert_eq!(
                order_type.to_string().parse::<OrderType>().unwrap(),
                order_type
            );
        }
        for status in [
            OrderStatus::Pending,
            OrderStatus::Executed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        for market in [MarketBoard::Listed, MarketBoard::OverTheCounter] {
            assert_eq!(market.to_string().parse::<MarketBoard>().unwrap(), market);
        }
    }

    #[test]
    fn test_unknown_enum_strings_rejected() {
        assert!("HOLD".parse::<OrderSide>().is_err());
        assert!("STOP".parse::<OrderType>().is_err());
        assert!("FILLED".parse::<OrderStatus>().is_err());
    }
}
