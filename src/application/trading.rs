//! Order lifecycle: validation, creation, execution, matching, cancellation,
//! the pending-order sweep, and read-only projections over orders and trades.
//!
//! Every state-changing path runs inside one SQLite transaction. The fill
//! path claims the order with `UPDATE ... WHERE status = 'PENDING'`, so an
//! order that left the Pending state between a read and the fill attempt is
//! detected inside the transaction and skipped rather than double-filled.

use crate::domain::errors::{TradingError, TradingResult};
use crate::domain::ports::{AuditSink, MarketCalendar, PriceSource};
use crate::domain::trading::costs;
use crate::domain::trading::types::{
    CreateOrderRequest, Order, OrderFilter, OrderSide, OrderStatus, OrderType, Trade, TradeFilter,
};
use crate::application::portfolio::PortfolioService;
use crate::infrastructure::instruments::decimal_column;
use crate::infrastructure::persistence::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Window within which an identical request shape counts as a double-submit.
const DUPLICATE_WINDOW_SECS: i64 = 5;

/// Per-order outcome tally of one `process_pending_orders` sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub filled: Vec<i64>,
    pub skipped: Vec<i64>,
    pub failed: Vec<(i64, String)>,
}

/// An order together with its execution records.
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: Order,
    pub trades: Vec<Trade>,
}

pub struct TradingService {
    database: Database,
    portfolio: Arc<PortfolioService>,
    instruments: Arc<dyn PriceSource>,
    calendar: Arc<dyn MarketCalendar>,
    audit: Arc<dyn AuditSink>,
    discount_rate: Decimal,
    max_order_notional: Option<Decimal>,
}

impl TradingService {
    pub fn new(
        database: Database,
        portfolio: Arc<PortfolioService>,
        instruments: Arc<dyn PriceSource>,
        calendar: Arc<dyn MarketCalendar>,
        audit: Arc<dyn AuditSink>,
        discount_rate: Decimal,
        max_order_notional: Option<Decimal>,
    ) -> Self {
        Self {
            database,
            portfolio,
            instruments,
            calendar,
            audit,
            discount_rate,
            max_order_notional,
        }
    }

    /// Validate and persist a new order. Market orders placed while the
    /// market is open execute immediately, in the same transaction that
    /// creates them; everything else stays Pending for the sweep.
    pub async fn create_order(&self, request: CreateOrderRequest) -> TradingResult<Order> {
        if request.quantity <= 0 {
            return Err(TradingError::InvalidQuantity);
        }

        let instrument = self
            .instruments
            .instrument(request.instrument_id)
            .await?
            .ok_or(TradingError::InvalidStock)?;

        if request.order_type == OrderType::Limit
            && !request.limit_price.is_some_and(|p| p > Decimal::ZERO)
        {
            return Err(TradingError::InvalidLimitPrice);
        }

        if let Some(cap) = self.max_order_notional {
            // Limit orders are valued at their limit price, market orders at
            // the current quote.
            let reference_price = request.limit_price.unwrap_or(instrument.current_price);
            if reference_price * Decimal::from(request.quantity) > cap {
                return Err(TradingError::ExceedsTradeLimit);
            }
        }

        // Advisory pre-checks: the ledger re-enforces holdings inside the
        // fill transaction, and the duplicate window is a UX guard.
        if request.side == OrderSide::Sell {
            let held = self
                .portfolio
                .position(request.instrument_id)
                .await?
                .map(|p| p.quantity)
                .unwrap_or(0);
            if request.quantity > held {
                return Err(TradingError::InsufficientHoldings);
            }
        }

        if self.is_duplicate(&request).await? {
            return Err(TradingError::DuplicateOrder);
        }

        let now = Utc::now();
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to begin order transaction")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders
                (instrument_id, side, order_type, quantity, limit_price,
                 status, commission, transaction_tax, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, '0', '0', ?, ?)
            "#,
        )
        .bind(request.instrument_id)
        .bind(request.side.to_string())
        .bind(request.order_type.to_string())
        .bind(request.quantity)
        .bind(request.limit_price.map(|p| p.to_string()))
        .bind(OrderStatus::Pending.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert order")?;

        let mut order = Order {
            id: inserted.last_insert_rowid(),
            instrument_id: request.instrument_id,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            status: OrderStatus::Pending,
            commission: Decimal::ZERO,
            transaction_tax: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        let mut executed = None;
        if request.order_type == OrderType::Market && self.calendar.is_open(None) {
            let trade = self
                .fill_order(&mut tx, &mut order, instrument.current_price)
                .await?;
            executed = Some(trade);
        }

        tx.commit()
            .await
            .context("Failed to commit order transaction")?;

        info!(
            order_id = order.id,
            side = %order.side,
            order_type = %order.order_type,
            status = %order.status,
            "order created"
        );

        self.audit
            .record(
                "CreateOrder",
                "Order",
                order.id,
                None,
                Some(json!({
                    "instrumentId": order.instrument_id,
                    "side": order.side.to_string(),
                    "type": order.order_type.to_string(),
                    "quantity": order.quantity,
                    "limitPrice": order.limit_price,
                    "status": order.status.to_string(),
                })),
            )
            .await;
        if let Some(trade) = executed {
            self.audit_trade(&trade).await;
        }

        Ok(order)
    }

    /// Cancel a Pending order. Terminal orders are not cancellable, and a
    /// cancelled order has no portfolio effect to undo.
    pub async fn cancel_order(&self, order_id: i64) -> TradingResult<Order> {
        let mut order = self
            .fetch_order(order_id)
            .await?
            .ok_or(TradingError::OrderNotFound)?;

        if order.status != OrderStatus::Pending {
            return Err(TradingError::OrderNotCancellable);
        }

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(OrderStatus::Cancelled.to_string())
        .bind(now)
        .bind(order_id)
        .bind(OrderStatus::Pending.to_string())
        .execute(&self.database.pool)
        .await
        .context("Failed to cancel order")?;

        // Lost the race against a concurrent fill or cancel.
        if updated.rows_affected() == 0 {
            return Err(TradingError::OrderNotCancellable);
        }

        self.audit
            .record(
                "CancelOrder",
                "Order",
                order_id,
                Some(json!({ "status": order.status.to_string() })),
                Some(json!({ "status": OrderStatus::Cancelled.to_string() })),
            )
            .await;

        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        Ok(order)
    }

    /// Fill one Pending order at the given price, e.g. from an external
    /// matcher. Limit orders must be triggered by the price; an untriggered
    /// match reports `InvalidLimitPrice`, a non-Pending order
    /// `OrderNotCancellable`.
    pub async fn execute_match(&self, order_id: i64, match_price: Decimal) -> TradingResult<Trade> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to begin match transaction")?;

        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to load order for match")?;
        let mut order = match row.as_ref() {
            Some(row) => order_from_row(row)?,
            None => return Err(TradingError::OrderNotFound),
        };

        if order.status != OrderStatus::Pending {
            return Err(TradingError::OrderNotCancellable);
        }
        if order.order_type == OrderType::Limit && !order.limit_triggered(match_price) {
            return Err(TradingError::InvalidLimitPrice);
        }

        let trade = self.fill_order(&mut tx, &mut order, match_price).await?;
        tx.commit()
            .await
            .context("Failed to commit match transaction")?;

        self.audit_trade(&trade).await;
        Ok(trade)
    }

    /// Re-evaluate all Pending orders against current prices. No-op while
    /// the market is closed. Each fill is its own transaction; one order's
    /// failure is reported and does not abort its siblings.
    pub async fn process_pending_orders(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if !self.calendar.is_open(None) {
            debug!("market closed, skipping pending order sweep");
            return Ok(report);
        }

        let rows = sqlx::query("SELECT * FROM orders WHERE status = ? ORDER BY created_at, id")
            .bind(OrderStatus::Pending.to_string())
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load pending orders")?;
        let pending: Vec<Order> = rows
            .iter()
            .map(order_from_row)
            .collect::<Result<_>>()?;

        for order in pending {
            let price = match self.instruments.current_price(order.instrument_id).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    report
                        .failed
                        .push((order.id, "no price for instrument".to_string()));
                    continue;
                }
                Err(err) => {
                    warn!(order_id = order.id, %err, "price lookup failed during sweep");
                    report.failed.push((order.id, err.to_string()));
                    continue;
                }
            };

            if order.order_type == OrderType::Limit && !order.limit_triggered(price) {
                report.skipped.push(order.id);
                continue;
            }

            match self.fill_pending(order.clone(), price).await {
                Ok(_) => report.filled.push(order.id),
                // The order left Pending between our read and the fill claim.
                Err(TradingError::OrderNotCancellable) => report.skipped.push(order.id),
                Err(err) if err.is_business() => {
                    report.failed.push((order.id, err.to_string()));
                }
                Err(err) => {
                    warn!(order_id = order.id, %err, "pending order fill failed");
                    report.failed.push((order.id, err.to_string()));
                }
            }
        }

        if !report.filled.is_empty() || !report.failed.is_empty() {
            info!(
                filled = report.filled.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "pending order sweep finished"
            );
        }

        Ok(report)
    }

    /// Orders matching the filter, newest first, ties broken by insertion
    /// order.
    pub async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM orders WHERE 1 = 1");

        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.to_string());
        }
        if let Some(instrument_id) = filter.instrument_id {
            builder.push(" AND instrument_id = ");
            builder.push_bind(instrument_id);
        }
        if let Some(from) = filter.from {
            builder.push(" AND created_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND created_at <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder
            .build()
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to query orders")?;

        rows.iter().map(order_from_row).collect()
    }

    /// Trades matching the filter, newest first.
    pub async fn get_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>> {
        let mut builder = sqlx::QueryBuilder::<sqlx::Sqlite>::new("SELECT * FROM trades WHERE 1 = 1");

        if let Some(symbol) = filter.instrument_symbol.as_deref() {
            builder.push(" AND instrument_symbol = ");
            builder.push_bind(symbol.to_string());
        }
        if let Some(from) = filter.from {
            builder.push(" AND executed_at >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND executed_at <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY executed_at DESC, id DESC");

        let rows = builder
            .build()
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to query trades")?;

        rows.iter().map(trade_from_row).collect()
    }

    /// One order with its execution records.
    pub async fn get_order(&self, order_id: i64) -> Result<Option<OrderDetail>> {
        let Some(order) = self.fetch_order(order_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query("SELECT * FROM trades WHERE order_id = ? ORDER BY id")
            .bind(order_id)
            .fetch_all(&self.database.pool)
            .await
            .context("Failed to load trades for order")?;
        let trades = rows.iter().map(trade_from_row).collect::<Result<_>>()?;

        Ok(Some(OrderDetail { order, trades }))
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load order")?;

        row.as_ref().map(order_from_row).transpose()
    }

    /// Request-shape duplicate check over the last few seconds. Advisory
    /// only: a race between this read and the insert is acceptable because
    /// the window is a double-submit guard, not a correctness invariant.
    async fn is_duplicate(&self, request: &CreateOrderRequest) -> Result<bool> {
        let cutoff = Utc::now() - chrono::Duration::seconds(DUPLICATE_WINDOW_SECS);

        let row = sqlx::query(
            r#"
            SELECT 1 FROM orders
            WHERE instrument_id = ? AND side = ? AND order_type = ?
              AND quantity = ? AND created_at >= ?
            LIMIT 1
            "#,
        )
        .bind(request.instrument_id)
        .bind(request.side.to_string())
        .bind(request.order_type.to_string())
        .bind(request.quantity)
        .bind(cutoff)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to check for duplicate order")?;

        Ok(row.is_some())
    }

    /// Fill `order` at `execution_price` on the given transaction: claim the
    /// order out of Pending, write the trade, and post the fill to the
    /// portfolio ledger. The claim doubles as the idempotence check; losing
    /// it reports `OrderNotCancellable`.
    async fn fill_order(
        &self,
        conn: &mut SqliteConnection,
        order: &mut Order,
        execution_price: Decimal,
    ) -> TradingResult<Trade> {
        let total_amount = execution_price * Decimal::from(order.quantity);
        let trade_costs = costs::total_cost(total_amount, order.side, self.discount_rate);
        let net_amount = match order.side {
            OrderSide::Buy => total_amount + trade_costs.commission,
            OrderSide::Sell => {
                total_amount - trade_costs.commission - trade_costs.transaction_tax
            }
        };
        let now = Utc::now();

        let claimed = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, commission = ?, transaction_tax = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::Executed.to_string())
        .bind(trade_costs.commission.to_string())
        .bind(trade_costs.transaction_tax.to_string())
        .bind(now)
        .bind(order.id)
        .bind(OrderStatus::Pending.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to claim order for execution")?;

        if claimed.rows_affected() == 0 {
            return Err(TradingError::OrderNotCancellable);
        }

        let symbol: String = sqlx::query("SELECT symbol FROM instruments WHERE id = ?")
            .bind(order.instrument_id)
            .fetch_one(&mut *conn)
            .await
            .context("Failed to resolve instrument symbol for fill")?
            .try_get("symbol")
            .context("Malformed instrument row")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO trades
                (order_id, instrument_symbol, side, quantity, executed_price,
                 total_amount, commission, transaction_tax, net_amount, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.id)
        .bind(&symbol)
        .bind(order.side.to_string())
        .bind(order.quantity)
        .bind(execution_price.to_string())
        .bind(total_amount.to_string())
        .bind(trade_costs.commission.to_string())
        .bind(trade_costs.transaction_tax.to_string())
        .bind(net_amount.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await
        .context("Failed to insert trade")?;

        self.portfolio
            .apply_fill(
                conn,
                order.instrument_id,
                order.quantity,
                execution_price,
                order.side,
                trade_costs.commission,
            )
            .await?;

        order.status = OrderStatus::Executed;
        order.commission = trade_costs.commission;
        order.transaction_tax = trade_costs.transaction_tax;
        order.updated_at = now;

        Ok(Trade {
            id: inserted.last_insert_rowid(),
            order_id: order.id,
            instrument_symbol: symbol,
            side: order.side,
            quantity: order.quantity,
            executed_price: execution_price,
            total_amount,
            commission: trade_costs.commission,
            transaction_tax: trade_costs.transaction_tax,
            net_amount,
            executed_at: now,
        })
    }

    /// One sweep item: fill in a fresh transaction, then audit.
    async fn fill_pending(&self, mut order: Order, price: Decimal) -> TradingResult<Trade> {
        let mut tx = self
            .database
            .pool
            .begin()
            .await
            .context("Failed to begin fill transaction")?;

        let trade = self.fill_order(&mut tx, &mut order, price).await?;
        tx.commit()
            .await
            .context("Failed to commit fill transaction")?;

        self.audit_trade(&trade).await;
        Ok(trade)
    }

    async fn audit_trade(&self, trade: &Trade) {
        self.audit
            .record(
                "ExecuteTrade",
                "Trade",
                trade.id,
                None,
                Some(json!({
                    "orderId": trade.order_id,
                    "instrumentSymbol": trade.instrument_symbol,
                    "side": trade.side.to_string(),
                    "quantity": trade.quantity,
                    "executedPrice": trade.executed_price,
                    "netAmount": trade.net_amount,
                })),
            )
            .await;
    }
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let limit_price = row
        .try_get::<Option<String>, _>("limit_price")?
        .map(|raw| {
            Decimal::from_str(&raw).context("Malformed decimal in column limit_price")
        })
        .transpose()?;

    Ok(Order {
        id: row.try_get("id")?,
        instrument_id: row.try_get("instrument_id")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        order_type: row.try_get::<String, _>("order_type")?.parse()?,
        quantity: row.try_get("quantity")?,
        limit_price,
        status: row.try_get::<String, _>("status")?.parse()?,
        commission: decimal_column(row, "commission")?,
        transaction_tax: decimal_column(row, "transaction_tax")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    Ok(Trade {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        instrument_symbol: row.try_get("instrument_symbol")?,
        side: row.try_get::<String, _>("side")?.parse()?,
        quantity: row.try_get("quantity")?,
        executed_price: decimal_column(row, "executed_price")?,
        total_amount: decimal_column(row, "total_amount")?,
        commission: decimal_column(row, "commission")?,
        transaction_tax: decimal_column(row, "transaction_tax")?,
        net_amount: decimal_column(row, "net_amount")?,
        executed_at: row.try_get::<DateTime<Utc>, _>("executed_at")?,
    })
}
