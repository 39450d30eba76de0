//! Drift-band rebalancing.
//!
//! An asset trades back to its target only when its weight has drifted outside the
//! threshold band; everything inside the band is held. All money arithmetic uses
//! `rust_decimal::Decimal`.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::error::MptError;
use crate::types::{with_decimal_metadata, ComputationOutput, Money};
use crate::MptResult;

/// Allowed deviation of the target weights' sum from one.
const TARGET_SUM_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Per-asset result of a drift check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceInstruction {
    pub asset: String,
    pub current_weight: Decimal,
    pub target_weight: Decimal,
    /// current_weight - target_weight; positive means overweight.
    pub drift: Decimal,
    /// Drift relative to the target weight, in percent. `None` for a zero target.
    pub relative_drift_pct: Option<Decimal>,
    pub action: TradeAction,
    /// Signed cash amount: negative sells, positive buys, zero holds.
    pub trade_amount: Money,
    pub current_value: Money,
    /// Position value after the trade.
    pub target_value: Money,
    /// target_value over the post-trade portfolio total.
    pub post_trade_weight: Decimal,
    /// trade_amount / price, when prices were supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<Decimal>,
    pub transaction_cost: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceInput {
    /// Asset labels; defaults to `asset_1..asset_n`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    pub target_weights: Vec<Decimal>,
    pub current_values: Vec<Money>,
    #[serde(default = "default_threshold")]
    pub drift_threshold: Decimal,
    /// Current price per asset, used to express trades in shares.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prices: Option<Vec<Money>>,
    /// One-way cost applied to the absolute trade amount.
    #[serde(default)]
    pub transaction_cost_bps: Decimal,
}

fn default_threshold() -> Decimal {
    dec!(0.05)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceSummary {
    pub needs_rebalancing: bool,
    pub total_value: Money,
    /// Portfolio total once the trades settle, including the net cash flow.
    pub post_trade_value: Money,
    pub total_buy_value: Money,
    pub total_sell_value: Money,
    /// (buys + sells) / 2 / total value.
    pub turnover: Decimal,
    pub max_drift: Decimal,
    pub max_drift_asset: String,
    pub average_drift: Decimal,
    pub buys: u32,
    pub sells: u32,
    pub holds: u32,
    pub total_transaction_cost: Money,
    /// Cash released (positive) or required (negative) by the proposed trades.
    pub net_cash_flow: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOutput {
    pub instructions: Vec<RebalanceInstruction>,
    pub summary: RebalanceSummary,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compare current positions against target weights.
///
/// An asset whose drift exceeds `drift_threshold` in absolute value is traded to its
/// target weight of the post-trade total; all others are held with a zero trade amount.
/// When only some assets trade, the net cash flow moves the total, so held assets are
/// re-checked at the new total and pulled in if they now breach. Feeding the resulting
/// `target_value`s back in yields all HOLD.
pub fn check(
    target_weights: &[Decimal],
    current_values: &[Money],
    drift_threshold: Decimal,
) -> MptResult<Vec<RebalanceInstruction>> {
    let input = RebalanceInput {
        assets: None,
        target_weights: target_weights.to_vec(),
        current_values: current_values.to_vec(),
        drift_threshold,
        prices: None,
        transaction_cost_bps: Decimal::ZERO,
    };
    Ok(build(&input)?.instructions)
}

/// Drift check with trade sizing, optional share counts and costs, and a summary.
pub fn calculate_rebalance(
    input: &RebalanceInput,
) -> MptResult<ComputationOutput<RebalanceOutput>> {
    let start = Instant::now();
    let output = build(input)?;

    let mut warnings = Vec::new();
    if !output.summary.net_cash_flow.is_zero() {
        warnings.push(format!(
            "Partial rebalance leaves a net cash flow of {} (post-trade value {})",
            output.summary.net_cash_flow.round_dp(2),
            output.summary.post_trade_value.round_dp(2)
        ));
    }
    if output
        .instructions
        .iter()
        .any(|i| i.current_value < Decimal::ZERO)
    {
        warnings.push("Portfolio contains short positions".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_decimal_metadata(
        "Threshold drift rebalancing: trade breaching assets back to target, hold the rest",
        &serde_json::json!({
            "drift_threshold": input.drift_threshold.to_string(),
            "transaction_cost_bps": input.transaction_cost_bps.to_string(),
            "drift_definition": "current_weight - target_weight",
            "trade_amount": "target_weight x post_trade_value - current_value",
            "post_trade_value": "held value / (1 - traded target weight), re-checked until no held asset breaches",
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Convert optimiser weights into Decimal targets, rounded to 10 places.
pub fn decimal_weights(weights: &[f64]) -> MptResult<Vec<Decimal>> {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            Decimal::from_f64(*w)
                .map(|d| d.round_dp(10))
                .ok_or_else(|| MptError::InvalidInput {
                    field: format!("weights[{i}]"),
                    reason: format!("{w} is not representable as a decimal"),
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Calculation
// ---------------------------------------------------------------------------

fn build(input: &RebalanceInput) -> MptResult<RebalanceOutput> {
    validate(input)?;
    let n = input.target_weights.len();
    let names: Vec<String> = match &input.assets {
        Some(a) => a.clone(),
        None => (1..=n).map(|i| format!("asset_{i}")).collect(),
    };

    let total: Money = input.current_values.iter().copied().sum();
    let cost_rate = input.transaction_cost_bps / dec!(10000);
    let (traded, post_total) = settle_traded_set(input, total);

    let mut instructions = Vec::with_capacity(n);
    for i in 0..n {
        let current_value = input.current_values[i];
        let target_weight = input.target_weights[i];
        let current_weight = current_value / total;
        let drift = current_weight - target_weight;

        let trade_amount = if traded[i] {
            target_weight * post_total - current_value
        } else {
            Decimal::ZERO
        };
        let action = if trade_amount > Decimal::ZERO {
            TradeAction::Buy
        } else if trade_amount < Decimal::ZERO {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };
        let shares = match &input.prices {
            Some(prices) => Some(trade_amount / prices[i]),
            None => None,
        };
        let target_value = current_value + trade_amount;

        instructions.push(RebalanceInstruction {
            asset: names[i].clone(),
            current_weight,
            target_weight,
            drift,
            relative_drift_pct: if target_weight.is_zero() {
                None
            } else {
                Some(drift / target_weight * dec!(100))
            },
            action,
            trade_amount,
            current_value,
            target_value,
            post_trade_weight: target_value / post_total,
            shares,
            transaction_cost: trade_amount.abs() * cost_rate,
        });
    }

    let summary = summarise(&instructions, total, post_total);
    Ok(RebalanceOutput {
        instructions,
        summary,
    })
}

/// Choose which assets trade and the portfolio total after trading.
///
/// Traded assets land exactly on target at the post-trade total, held assets keep their
/// value. Because the total moves, a held asset can leave the band; it then joins the
/// traded set and the total is recomputed. The set only grows, so this ends within `n`
/// rounds, and re-checking the result holds everything.
fn settle_traded_set(input: &RebalanceInput, total: Money) -> (Vec<bool>, Money) {
    let n = input.target_weights.len();
    let threshold = input.drift_threshold;
    let values = &input.current_values;
    let targets = &input.target_weights;

    let mut traded: Vec<bool> = (0..n)
        .map(|i| (values[i] / total - targets[i]).abs() > threshold)
        .collect();

    loop {
        if !traded.iter().any(|t| *t) {
            return (traded, total);
        }
        if traded.iter().all(|t| *t) {
            // Full rebalance is self-financing.
            return (traded, total);
        }

        let held_value: Money = (0..n).filter(|&i| !traded[i]).map(|i| values[i]).sum();
        let traded_weight: Decimal = (0..n).filter(|&i| traded[i]).map(|i| targets[i]).sum();
        let held_weight = Decimal::ONE - traded_weight;
        if held_weight <= Decimal::ZERO || held_value <= Decimal::ZERO {
            traded = vec![true; n];
            continue;
        }
        let post_total = held_value / held_weight;

        let mut grew = false;
        for i in 0..n {
            if !traded[i] && (values[i] / post_total - targets[i]).abs() > threshold {
                traded[i] = true;
                grew = true;
            }
        }
        if !grew {
            return (traded, post_total);
        }
    }
}

fn summarise(
    instructions: &[RebalanceInstruction],
    total: Money,
    post_total: Money,
) -> RebalanceSummary {
    let mut buy = Decimal::ZERO;
    let mut sell = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    let (mut buys, mut sells, mut holds) = (0u32, 0u32, 0u32);
    let mut drift_sum = Decimal::ZERO;
    let mut max_drift = Decimal::ZERO;
    let mut max_drift_asset = String::new();

    for ins in instructions {
        match ins.action {
            TradeAction::Buy => {
                buys += 1;
                buy += ins.trade_amount;
            }
            TradeAction::Sell => {
                sells += 1;
                sell += -ins.trade_amount;
            }
            TradeAction::Hold => holds += 1,
        }
        cost += ins.transaction_cost;
        let d = ins.drift.abs();
        drift_sum += d;
        if max_drift_asset.is_empty() || d > max_drift {
            max_drift = d;
            max_drift_asset = ins.asset.clone();
        }
    }

    RebalanceSummary {
        needs_rebalancing: buys + sells > 0,
        total_value: total,
        post_trade_value: post_total,
        total_buy_value: buy,
        total_sell_value: sell,
        turnover: (buy + sell) / dec!(2) / total,
        max_drift,
        max_drift_asset,
        average_drift: drift_sum / Decimal::from(instructions.len()),
        buys,
        sells,
        holds,
        total_transaction_cost: cost,
        net_cash_flow: sell - buy,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(input: &RebalanceInput) -> MptResult<()> {
    let n = input.target_weights.len();
    if n == 0 {
        return Err(MptError::InvalidInput {
            field: "target_weights".into(),
            reason: "At least one asset is required".into(),
        });
    }
    if input.current_values.len() != n {
        return Err(MptError::InvalidInput {
            field: "current_values".into(),
            reason: format!("Expected {n} values, got {}", input.current_values.len()),
        });
    }
    if let Some(assets) = &input.assets {
        if assets.len() != n {
            return Err(MptError::InvalidInput {
                field: "assets".into(),
                reason: format!("Expected {n} asset names, got {}", assets.len()),
            });
        }
    }
    if let Some(prices) = &input.prices {
        if prices.len() != n {
            return Err(MptError::InvalidInput {
                field: "prices".into(),
                reason: format!("Expected {n} prices, got {}", prices.len()),
            });
        }
        if let Some(i) = prices.iter().position(|p| *p <= Decimal::ZERO) {
            return Err(MptError::InvalidInput {
                field: format!("prices[{i}]"),
                reason: "Price must be positive".into(),
            });
        }
    }
    if input.drift_threshold < Decimal::ZERO {
        return Err(MptError::InvalidInput {
            field: "drift_threshold".into(),
            reason: "Threshold must be non-negative".into(),
        });
    }
    if input.transaction_cost_bps < Decimal::ZERO {
        return Err(MptError::InvalidInput {
            field: "transaction_cost_bps".into(),
            reason: "Transaction cost must be non-negative".into(),
        });
    }
    let weight_sum: Decimal = input.target_weights.iter().copied().sum();
    if (weight_sum - Decimal::ONE).abs() > TARGET_SUM_TOLERANCE {
        return Err(MptError::InvalidInput {
            field: "target_weights".into(),
            reason: format!("Target weights sum to {weight_sum}, expected 1"),
        });
    }
    let total: Money = input.current_values.iter().copied().sum();
    if total <= Decimal::ZERO {
        return Err(MptError::DivisionByZero {
            context: "current weights (total portfolio value is not positive)".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> RebalanceInput {
        RebalanceInput {
            assets: Some(vec!["SPY".into(), "AGG".into(), "GLD".into(), "VNQ".into()]),
            target_weights: vec![dec!(0.40), dec!(0.30), dec!(0.20), dec!(0.10)],
            current_values: vec![dec!(46_000), dec!(28_000), dec!(17_000), dec!(9_000)],
            drift_threshold: dec!(0.05),
            prices: Some(vec![dec!(480), dec!(100), dec!(170), dec!(80)]),
            transaction_cost_bps: dec!(10),
        }
    }

    // --- 1. Worked two-asset example ---
    #[test]
    fn test_two_asset_example() {
        let out = check(&[dec!(0.5), dec!(0.5)], &[dec!(600), dec!(400)], dec!(0.05)).unwrap();
        assert_eq!(out[0].action, TradeAction::Sell);
        assert_eq!(out[0].trade_amount, dec!(-100));
        assert_eq!(out[0].drift, dec!(0.1));
        assert_eq!(out[1].action, TradeAction::Buy);
        assert_eq!(out[1].trade_amount, dec!(100));
    }

    // --- 2. On-target portfolio holds ---
    #[test]
    fn test_on_target_all_hold() {
        let out = check(&[dec!(0.5), dec!(0.5)], &[dec!(500), dec!(500)], dec!(0.05)).unwrap();
        assert!(out.iter().all(|i| i.action == TradeAction::Hold));
        assert!(out.iter().all(|i| i.trade_amount.is_zero()));
    }

    // --- 3. Idempotent after applying the trades ---
    #[test]
    fn test_idempotent() {
        let targets = [dec!(0.5), dec!(0.5)];
        let first = check(&targets, &[dec!(600), dec!(400)], dec!(0.05)).unwrap();
        let after: Vec<Money> = first.iter().map(|i| i.target_value).collect();
        let second = check(&targets, &after, dec!(0.05)).unwrap();
        assert!(second.iter().all(|i| i.action == TradeAction::Hold));
    }

    // --- 4. Inside the band: no churn even with non-zero drift ---
    #[test]
    fn test_within_band_holds() {
        let input = base_input();
        let out = calculate_rebalance(&input).unwrap();
        // SPY 0.46 (+0.06) breaches; AGG 0.28, GLD 0.17, VNQ 0.09 stay inside 5%.
        // Held 54000 is 60% of the post-trade total, so SPY sells down to 36000 of 90000.
        let r = &out.result;
        assert_eq!(r.instructions[0].action, TradeAction::Sell);
        assert_eq!(r.instructions[0].trade_amount, dec!(-10_000));
        assert_eq!(r.instructions[0].post_trade_weight, dec!(0.4));
        assert_eq!(r.summary.post_trade_value, dec!(90_000));
        assert!(r.instructions[1..].iter().all(|i| i.action == TradeAction::Hold));
        assert_eq!(r.summary.sells, 1);
        assert_eq!(r.summary.holds, 3);
        assert_eq!(r.summary.max_drift_asset, "SPY");
    }

    // --- 5. Boundary: drift exactly at the threshold holds ---
    #[test]
    fn test_threshold_is_exclusive() {
        let out = check(&[dec!(0.5), dec!(0.5)], &[dec!(550), dec!(450)], dec!(0.05)).unwrap();
        assert!(out.iter().all(|i| i.action == TradeAction::Hold));
    }

    // --- 6. Shares, costs and summary ---
    #[test]
    fn test_shares_and_costs() {
        let out = calculate_rebalance(&base_input()).unwrap();
        let spy = &out.result.instructions[0];
        let shares = spy.shares.unwrap();
        assert!((shares - dec!(-20.833333)).abs() < dec!(0.00001), "shares {shares}");
        // 10000 * 10bps = 10
        assert_eq!(spy.transaction_cost, dec!(10));
        let s = &out.result.summary;
        assert_eq!(s.total_sell_value, dec!(10_000));
        assert_eq!(s.total_buy_value, Decimal::ZERO);
        assert_eq!(s.turnover, dec!(0.05));
        assert_eq!(s.net_cash_flow, dec!(10_000));
        assert!(s.needs_rebalancing);
        assert!(out.warnings.iter().any(|w| w.contains("net cash flow")));
        assert_eq!(out.metadata.precision, "rust_decimal_128bit");
    }

    // --- 7. Held asset pushed out of band by the partial trade ---
    #[test]
    fn test_partial_trade_pulls_in_held_breach() {
        let targets = [dec!(0.4), dec!(0.2), dec!(0.2), dec!(0.2)];
        let values = [dec!(351), dec!(250), dec!(250), dec!(149)];
        let out = check(&targets, &values, dec!(0.05)).unwrap();

        // Only asset_4 breaches at first; buying it lifts the total and asset_1 follows.
        assert_eq!(out[0].action, TradeAction::Buy);
        assert_eq!(out[0].trade_amount, dec!(149));
        assert_eq!(out[1].action, TradeAction::Hold);
        assert_eq!(out[2].action, TradeAction::Hold);
        assert_eq!(out[3].action, TradeAction::Buy);
        assert_eq!(out[3].trade_amount, dec!(101));

        let after: Vec<Money> = out.iter().map(|i| i.target_value).collect();
        assert_eq!(after.iter().copied().sum::<Money>(), dec!(1_250));
        let second = check(&targets, &after, dec!(0.05)).unwrap();
        assert!(
            second.iter().all(|i| i.action == TradeAction::Hold),
            "second pass should hold: {second:?}"
        );
    }

    #[test]
    fn test_post_trade_weights_inside_band() {
        let out = calculate_rebalance(&base_input()).unwrap();
        let weight_sum: Decimal = out
            .result
            .instructions
            .iter()
            .map(|i| i.post_trade_weight)
            .sum();
        assert!((weight_sum - Decimal::ONE).abs() < dec!(0.0000001));
        for ins in &out.result.instructions {
            assert!(
                (ins.post_trade_weight - ins.target_weight).abs() <= dec!(0.05),
                "{} lands at {}",
                ins.asset,
                ins.post_trade_weight
            );
        }
    }

    // --- 8. Relative drift ---
    #[test]
    fn test_relative_drift() {
        let out = check(&[dec!(0.5), dec!(0.5)], &[dec!(600), dec!(400)], dec!(0.05)).unwrap();
        assert_eq!(out[0].relative_drift_pct, Some(dec!(20)));
        assert_eq!(out[1].relative_drift_pct, Some(dec!(-20)));
    }

    // --- 9. Validation ---
    #[test]
    fn test_zero_total_rejected() {
        let err = check(&[dec!(0.5), dec!(0.5)], &[dec!(0), dec!(0)], dec!(0.05)).unwrap_err();
        assert!(matches!(err, MptError::DivisionByZero { .. }));
    }

    #[test]
    fn test_target_sum_rejected() {
        assert!(check(&[dec!(0.5), dec!(0.4)], &[dec!(1), dec!(1)], dec!(0.05)).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        assert!(check(&[dec!(0.5), dec!(0.5)], &[dec!(1)], dec!(0.05)).is_err());
    }

    #[test]
    fn test_decimal_weights() {
        let w = decimal_weights(&[0.25, 0.75]).unwrap();
        assert_eq!(w, vec![dec!(0.25), dec!(0.75)]);
        assert!(decimal_weights(&[f64::NAN]).is_err());
    }
}
