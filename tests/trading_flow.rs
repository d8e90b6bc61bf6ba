mod common;

use anyhow::Result;
use common::TestHarness;
use rust_decimal_macros::dec;

use stocksim::domain::errors::TradingError;
use stocksim::domain::trading::types::{
    CreateOrderRequest, OrderFilter, OrderSide, OrderStatus, OrderType, TradeFilter,
};

fn market_buy(instrument_id: i64, quantity: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        instrument_id,
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        quantity,
        limit_price: None,
    }
}

fn limit_order(
    instrument_id: i64,
    side: OrderSide,
    quantity: i64,
    limit: rust_decimal::Decimal,
) -> CreateOrderRequest {
    CreateOrderRequest {
        instrument_id,
        side,
        order_type: OrderType::Limit,
        quantity,
        limit_price: Some(limit),
    }
}

#[tokio::test]
async fn test_market_order_executes_immediately_while_open() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness.trading.create_order(market_buy(instrument_id, 10)).await?;

    assert_eq!(order.status, OrderStatus::Executed);
    // 5800 notional keeps the commission at the 20 floor
    assert_eq!(order.commission, dec!(20));
    assert_eq!(order.transaction_tax, dec!(0));

    let trades = harness.trading.get_trades(&TradeFilter::default()).await?;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].order_id, order.id);
    assert_eq!(trades[0].executed_price, dec!(580));
    assert_eq!(trades[0].total_amount, dec!(5800));
    assert_eq!(trades[0].net_amount, dec!(5820)); // notional + commission

    let position = harness.portfolio.position(instrument_id).await?.unwrap();
    assert_eq!(position.quantity, 10);
    assert_eq!(position.total_cost, dec!(5820));
    assert_eq!(position.average_cost, dec!(582));

    Ok(())
}

#[tokio::test]
async fn test_market_order_stays_pending_while_closed() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness.trading.create_order(market_buy(instrument_id, 10)).await?;

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(harness
        .trading
        .get_trades(&TradeFilter::default())
        .await?
        .is_empty());
    assert!(harness.portfolio.position(instrument_id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_limit_order_is_never_filled_at_creation() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    // Marketable limit price, but creation still leaves it for the sweep
    let order = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 10, dec!(600)))
        .await?;

    assert_eq!(order.status, OrderStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_rejects_non_positive_quantities() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    for quantity in [0, -10] {
        let result = harness
            .trading
            .create_order(market_buy(instrument_id, quantity))
            .await;
        assert!(matches!(result, Err(TradingError::InvalidQuantity)));
    }

    Ok(())
}

#[tokio::test]
async fn test_rejects_unknown_instrument() -> Result<()> {
    let harness = TestHarness::new(true).await?;

    let result = harness.trading.create_order(market_buy(999, 10)).await;

    assert!(matches!(result, Err(TradingError::InvalidStock)));
    Ok(())
}

#[tokio::test]
async fn test_rejects_limit_order_without_positive_price() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let missing = CreateOrderRequest {
        instrument_id,
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity: 10,
        limit_price: None,
    };
    assert!(matches!(
        harness.trading.create_order(missing).await,
        Err(TradingError::InvalidLimitPrice)
    ));

    assert!(matches!(
        harness
            .trading
            .create_order(limit_order(instrument_id, OrderSide::Buy, 10, dec!(0)))
            .await,
        Err(TradingError::InvalidLimitPrice)
    ));

    Ok(())
}

#[tokio::test]
async fn test_rejects_sell_beyond_holdings() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;
    harness
        .seed_holding(instrument_id, 50, dec!(500), dec!(20))
        .await?;

    let oversell = CreateOrderRequest {
        instrument_id,
        side: OrderSide::Sell,
        order_type: OrderType::Market,
        quantity: 51,
        limit_price: None,
    };
    assert!(matches!(
        harness.trading.create_order(oversell).await,
        Err(TradingError::InsufficientHoldings)
    ));

    // Selling exactly the held quantity is allowed
    let sell_all = CreateOrderRequest {
        instrument_id,
        side: OrderSide::Sell,
        order_type: OrderType::Market,
        quantity: 50,
        limit_price: None,
    };
    let order = harness.trading.create_order(sell_all).await?;
    assert_eq!(order.status, OrderStatus::Executed);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_submission_window() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let first = harness.trading.create_order(market_buy(instrument_id, 10)).await?;
    assert_eq!(first.status, OrderStatus::Pending);

    // Identical shape inside the window is a double-submit
    assert!(matches!(
        harness.trading.create_order(market_buy(instrument_id, 10)).await,
        Err(TradingError::DuplicateOrder)
    ));

    // A different quantity is a different request
    let second = harness.trading.create_order(market_buy(instrument_id, 20)).await?;
    assert_eq!(second.status, OrderStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_check_matches_shape_not_order_state() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    // Executes immediately, but still counts as a recent identical request
    let first = harness.trading.create_order(market_buy(instrument_id, 10)).await?;
    assert_eq!(first.status, OrderStatus::Executed);

    assert!(matches!(
        harness.trading.create_order(market_buy(instrument_id, 10)).await,
        Err(TradingError::DuplicateOrder)
    ));

    Ok(())
}

#[tokio::test]
async fn test_notional_cap_rejects_large_orders() -> Result<()> {
    let harness = TestHarness::with_notional_cap(true, Some(dec!(100000))).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    // 580 * 200 = 116_000 over the cap
    assert!(matches!(
        harness.trading.create_order(market_buy(instrument_id, 200)).await,
        Err(TradingError::ExceedsTradeLimit)
    ));

    // Limit orders are valued at the limit price: 400 * 200 = 80_000
    let order = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 200, dec!(400)))
        .await?;
    assert_eq!(order.status, OrderStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_cancel_is_terminal_and_idempotence_reports_not_cancellable() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness.trading.create_order(market_buy(instrument_id, 10)).await?;

    let cancelled = harness.trading.cancel_order(order.id).await?;
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    // Second cancel finds a terminal order
    assert!(matches!(
        harness.trading.cancel_order(order.id).await,
        Err(TradingError::OrderNotCancellable)
    ));

    assert!(matches!(
        harness.trading.cancel_order(9999).await,
        Err(TradingError::OrderNotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn test_cancelled_order_never_touches_the_ledger() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness.trading.create_order(market_buy(instrument_id, 10)).await?;
    harness.trading.cancel_order(order.id).await?;

    assert!(harness.portfolio.position(instrument_id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_execute_match_fills_triggered_limit_buy() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 10, dec!(100)))
        .await?;

    // Market price equal to the limit triggers a buy
    let trade = harness.trading.execute_match(order.id, dec!(100)).await?;
    assert_eq!(trade.executed_price, dec!(100));
    assert_eq!(trade.quantity, 10);

    let position = harness.portfolio.position(instrument_id).await?.unwrap();
    assert_eq!(position.quantity, 10);

    Ok(())
}

#[tokio::test]
async fn test_execute_match_rejects_untriggered_limit_buy() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 10, dec!(100)))
        .await?;

    // One tick above the limit does not trigger
    assert!(matches!(
        harness.trading.execute_match(order.id, dec!(101)).await,
        Err(TradingError::InvalidLimitPrice)
    ));

    let detail = harness.trading.get_order(order.id).await?.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert!(detail.trades.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_execute_match_rejects_terminal_orders() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    let order = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 10, dec!(100)))
        .await?;
    harness.trading.cancel_order(order.id).await?;

    assert!(matches!(
        harness.trading.execute_match(order.id, dec!(90)).await,
        Err(TradingError::OrderNotCancellable)
    ));
    assert!(matches!(
        harness.trading.execute_match(9999, dec!(90)).await,
        Err(TradingError::OrderNotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn test_sweep_is_a_noop_while_market_closed() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;
    harness.trading.create_order(market_buy(instrument_id, 10)).await?;

    let report = harness.trading.process_pending_orders().await?;

    assert!(report.filled.is_empty());
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());

    let orders = harness.trading.get_orders(&OrderFilter::default()).await?;
    assert_eq!(orders[0].status, OrderStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_sweep_fills_market_and_triggered_limit_orders() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(100)).await?;

    let market = harness.trading.create_order(market_buy(instrument_id, 10)).await?;
    let triggered = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 20, dec!(100)))
        .await?;
    let untriggered = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 30, dec!(95)))
        .await?;

    harness.calendar.set_open(true);
    let report = harness.trading.process_pending_orders().await?;

    assert_eq!(report.filled, vec![market.id, triggered.id]);
    assert_eq!(report.skipped, vec![untriggered.id]);
    assert!(report.failed.is_empty());

    let detail = harness.trading.get_order(untriggered.id).await?.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);

    let position = harness.portfolio.position(instrument_id).await?.unwrap();
    assert_eq!(position.quantity, 30);

    Ok(())
}

#[tokio::test]
async fn test_sweep_triggers_sell_limit_at_or_above_price() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(100)).await?;
    harness
        .seed_holding(instrument_id, 100, dec!(90), dec!(20))
        .await?;

    let below = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Sell, 40, dec!(100)))
        .await?;
    let above = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Sell, 50, dec!(105)))
        .await?;

    harness.calendar.set_open(true);
    let report = harness.trading.process_pending_orders().await?;

    assert_eq!(report.filled, vec![below.id]);
    assert_eq!(report.skipped, vec![above.id]);

    let position = harness.portfolio.position(instrument_id).await?.unwrap();
    assert_eq!(position.quantity, 60);

    Ok(())
}

#[tokio::test]
async fn test_sweep_continues_after_a_failed_item() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let instrument_id = harness.add_instrument("2330", dec!(100)).await?;
    harness
        .seed_holding(instrument_id, 50, dec!(90), dec!(20))
        .await?;

    // Two sells pass the advisory check together, but only one can fill;
    // the ledger rejects the second inside its own transaction.
    let first = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Sell, 50, dec!(100)))
        .await?;
    let second = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Sell, 40, dec!(100)))
        .await?;
    let last = harness.trading.create_order(market_buy(instrument_id, 10)).await?;

    harness.calendar.set_open(true);
    let report = harness.trading.process_pending_orders().await?;

    assert_eq!(report.filled, vec![first.id, last.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, second.id);

    // The failed sell's transaction rolled back whole: still Pending, no trade
    let detail = harness.trading.get_order(second.id).await?.unwrap();
    assert_eq!(detail.order.status, OrderStatus::Pending);
    assert!(detail.trades.is_empty());

    // 50 seeded - 50 sold + 10 bought
    let position = harness.portfolio.position(instrument_id).await?.unwrap();
    assert_eq!(position.quantity, 10);

    Ok(())
}

#[tokio::test]
async fn test_order_queries_filter_and_sort() -> Result<()> {
    let harness = TestHarness::new(false).await?;
    let first_instrument = harness.add_instrument("2330", dec!(100)).await?;
    let second_instrument = harness.add_instrument("2317", dec!(50)).await?;

    let a = harness.trading.create_order(market_buy(first_instrument, 10)).await?;
    let b = harness.trading.create_order(market_buy(second_instrument, 20)).await?;
    let c = harness
        .trading
        .create_order(limit_order(first_instrument, OrderSide::Buy, 30, dec!(90)))
        .await?;
    harness.trading.cancel_order(a.id).await?;

    // Newest first, insertion order breaking creation-time ties
    let all = harness.trading.get_orders(&OrderFilter::default()).await?;
    assert_eq!(
        all.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![c.id, b.id, a.id]
    );

    let pending_only = harness
        .trading
        .get_orders(&OrderFilter {
            status: Some(OrderStatus::Pending),
            ..OrderFilter::default()
        })
        .await?;
    assert_eq!(
        pending_only.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![c.id, b.id]
    );

    let first_instrument_pending = harness
        .trading
        .get_orders(&OrderFilter {
            status: Some(OrderStatus::Pending),
            instrument_id: Some(first_instrument),
            ..OrderFilter::default()
        })
        .await?;
    assert_eq!(
        first_instrument_pending.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![c.id]
    );

    // Date bounds compose with the other filters
    let now = chrono::Utc::now();
    let everything = harness
        .trading
        .get_orders(&OrderFilter {
            from: Some(now - chrono::Duration::minutes(1)),
            to: Some(now + chrono::Duration::minutes(1)),
            ..OrderFilter::default()
        })
        .await?;
    assert_eq!(everything.len(), 3);

    let before_creation = harness
        .trading
        .get_orders(&OrderFilter {
            to: Some(now - chrono::Duration::minutes(1)),
            ..OrderFilter::default()
        })
        .await?;
    assert!(before_creation.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_trade_queries_filter_by_symbol() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let first_instrument = harness.add_instrument("2330", dec!(100)).await?;
    let second_instrument = harness.add_instrument("2317", dec!(50)).await?;

    harness.trading.create_order(market_buy(first_instrument, 10)).await?;
    harness.trading.create_order(market_buy(second_instrument, 20)).await?;

    let all = harness.trading.get_trades(&TradeFilter::default()).await?;
    assert_eq!(all.len(), 2);

    let tsmc_only = harness
        .trading
        .get_trades(&TradeFilter {
            instrument_symbol: Some("2330".to_string()),
            ..TradeFilter::default()
        })
        .await?;
    assert_eq!(tsmc_only.len(), 1);
    assert_eq!(tsmc_only[0].instrument_symbol, "2330");

    Ok(())
}

#[tokio::test]
async fn test_audit_records_creation_execution_and_cancellation() -> Result<()> {
    let harness = TestHarness::new(true).await?;
    let instrument_id = harness.add_instrument("2330", dec!(580)).await?;

    harness.trading.create_order(market_buy(instrument_id, 10)).await?;
    let pending = harness
        .trading
        .create_order(limit_order(instrument_id, OrderSide::Buy, 20, dec!(500)))
        .await?;
    harness.trading.cancel_order(pending.id).await?;

    let actions = harness.audit.actions().await;
    assert_eq!(
        actions,
        vec!["CreateOrder", "ExecuteTrade", "CreateOrder", "CancelOrder"]
    );

    Ok(())
}
