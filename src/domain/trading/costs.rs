//! Trade cost math for the Taiwan equity market: brokerage commission with a
//! regulatory minimum, sell-side securities transaction tax, and the P&L
//! estimate used for mark-to-market views. All arithmetic stays in
//! `Decimal`; these figures feed reconciliation and must be bit-reproducible.

use crate::domain::trading::types::OrderSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Statutory brokerage commission rate (0.1425%).
const COMMISSION_RATE: Decimal = dec!(0.001425);

/// Minimum commission charged per trade, in currency units.
const MIN_COMMISSION: Decimal = dec!(20);

/// Securities transaction tax rate (0.3%), sell side only.
const TRANSACTION_TAX_RATE: Decimal = dec!(0.003);

/// Brokerage discount applied when no explicit rate is configured.
pub const DEFAULT_DISCOUNT_RATE: Decimal = dec!(0.6);

/// Commission and tax breakdown for one trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeCosts {
    pub commission: Decimal,
    pub transaction_tax: Decimal,
    pub total: Decimal,
}

/// Mark-to-market estimate for a held position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlEstimate {
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
    pub return_rate: Decimal,
}

/// Commission on a trade notional, floored at the exchange minimum.
///
/// The discount rate is taken as given; plumbing it from configuration keeps
/// range validation at the config boundary.
pub fn commission(amount: Decimal, discount_rate: Decimal) -> Decimal {
    let fee = amount * COMMISSION_RATE * discount_rate;
    fee.max(MIN_COMMISSION)
}

/// Securities transaction tax on a trade notional. Sell side only; callers
/// must not invoke this for buys.
pub fn transaction_tax(amount: Decimal) -> Decimal {
    amount * TRANSACTION_TAX_RATE
}

/// Full cost of one trade: commission on both sides, tax on sells.
pub fn total_cost(amount: Decimal, side: OrderSide, discount_rate: Decimal) -> TradeCosts {
    let commission = commission(amount, discount_rate);
    let transaction_tax = match side {
        OrderSide::Buy => Decimal::ZERO,
        OrderSide::Sell => transaction_tax(amount),
    };

    TradeCosts {
        commission,
        transaction_tax,
        total: commission + transaction_tax,
    }
}

/// Unrealized P&L for a position, net of the cost of selling out at the
/// current price. Return rate is 0 (not an error) for a zero cost basis.
pub fn estimate_pnl(
    current_price: Decimal,
    quantity: i64,
    average_cost: Decimal,
    discount_rate: Decimal,
) -> PnlEstimate {
    let quantity = Decimal::from(quantity);
    let market_value = current_price * quantity;
    let cost_basis = average_cost * quantity;

    let estimated_sell_cost = total_cost(market_value, OrderSide::Sell, discount_rate).total;
    let unrealized_pnl = market_value - cost_basis - estimated_sell_cost;

    let return_rate = if cost_basis.is_zero() {
        Decimal::ZERO
    } else {
        unrealized_pnl / cost_basis
    };

    PnlEstimate {
        market_value,
        cost_basis,
        unrealized_pnl,
        return_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commission_floor_applies_to_small_trades() {
        // 5000 * 0.001425 * 0.6 = 4.275, below the 20 minimum
        assert_eq!(commission(dec!(5000), DEFAULT_DISCOUNT_RATE), dec!(20));
        assert_eq!(commission(Decimal::ZERO, DEFAULT_DISCOUNT_RATE), dec!(20));
    }

    #[test]
    fn test_commission_exact_above_floor() {
        // 100_000 * 0.001425 * 0.6 = 85.5
        assert_eq!(commission(dec!(100000), DEFAULT_DISCOUNT_RATE), dec!(85.5));
        // Full rate, no discount: 50_000 * 0.001425 = 71.25
        assert_eq!(commission(dec!(50000), Decimal::ONE), dec!(71.25));
    }

    #[test]
    fn test_commission_monotonic_above_floor() {
        // The floor stops binding near 23_392 at the default discount
        let mut previous = commission(dec!(24000), DEFAULT_DISCOUNT_RATE);
        for amount in [30_000, 50_000, 80_000, 130_000] {
            let next = commission(Decimal::from(amount), DEFAULT_DISCOUNT_RATE);
            assert!(next > previous, "commission must grow with notional");
            previous = next;
        }
    }

    #[test]
    fn test_transaction_tax_rate() {
        assert_eq!(transaction_tax(dec!(100000)), dec!(300));
        assert_eq!(transaction_tax(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_total_cost_buy_has_no_tax() {
        let costs = total_cost(dec!(100000), OrderSide::Buy, DEFAULT_DISCOUNT_RATE);

        assert_eq!(costs.commission, dec!(85.5));
        assert_eq!(costs.transaction_tax, Decimal::ZERO);
        assert_eq!(costs.total, dec!(85.5));
    }

    #[test]
    fn test_total_cost_sell_includes_tax() {
        let costs = total_cost(dec!(100000), OrderSide::Sell, DEFAULT_DISCOUNT_RATE);

        assert_eq!(costs.commission, dec!(85.5));
        assert_eq!(costs.transaction_tax, dec!(300));
        assert_eq!(costs.total, dec!(385.5));
    }

    #[test]
    fn test_estimate_pnl_nets_out_sell_costs() {
        let estimate = estimate_pnl(dec!(110), 1000, dec!(100), DEFAULT_DISCOUNT_RATE);

        assert_eq!(estimate.market_value, dec!(110000));
        assert_eq!(estimate.cost_basis, dec!(100000));
        // sell cost on 110_000 = commission 94.05 + tax 330 = 424.05
        assert_eq!(estimate.unrealized_pnl, dec!(9575.95));
        assert_eq!(estimate.return_rate, dec!(0.0957595));
    }

    #[test]
    fn test_estimate_pnl_zero_cost_basis_has_zero_return() {
        let estimate = estimate_pnl(dec!(50), 0, Decimal::ZERO, DEFAULT_DISCOUNT_RATE);

        assert_eq!(estimate.cost_basis, Decimal::ZERO);
        assert_eq!(estimate.return_rate, Decimal::ZERO);
    }
}
