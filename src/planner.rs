use crate::detector::{normalize_leg, round_down_to_step};
use crate::models::{Arbitrage, BalanceMap, MarketAction, Plan, SymbolRequirements};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("actions do not form a closed triangle")]
    NotATriangle,
    #[error("insufficient balance even after reduction")]
    Unexecutable,
    #[error("plan needs {required} parallel legs in step 1, got {actual}")]
    InsufficientParallelism { required: u32, actual: usize },
}

/// Put the three legs of an arbitrage in cycle order, i.e. leg i's gained
/// asset feeds leg (i+1)'s spendable asset. The chain condition is invariant
/// under rotation, so there are really only two distinct orderings to try:
/// the legs as given, and the legs with the second and third swapped
/// (mirroring legs 1/2, the same identity-vs-swap check the python original
/// makes). If neither closes the chain, the actions don't form a cycle.
fn canonicalize(actions: &[MarketAction; 3]) -> Result<[MarketAction; 3], PlanError> {
    let identity = actions.clone();
    let mirrored = [actions[0].clone(), actions[2].clone(), actions[1].clone()];

    for candidate in [identity, mirrored] {
        if candidate[0].gained_asset() == candidate[1].spendable_asset()
            && candidate[1].gained_asset() == candidate[2].spendable_asset()
            && candidate[2].gained_asset() == candidate[0].spendable_asset()
        {
            return Ok(candidate);
        }
    }
    Err(PlanError::NotATriangle)
}

/// `balance_of_spendable / amount_needed`; a leg that needs nothing is never
/// the limiting factor.
fn balance_ratio(action: &MarketAction, balances: &BalanceMap) -> Decimal {
    let needed = action.amount_needed();
    if needed.is_zero() {
        return Decimal::MAX;
    }
    let available = balances.get(action.spendable_asset()).copied().unwrap_or(Decimal::ZERO);
    available / needed
}

/// Scale every leg's amount by `factor` and re-snap it to its symbol's lot
/// size. Each leg keeps its already-committed limit price, so profitability
/// is preserved by construction (uniform scaling is linear in a fixed-price
/// triangle); only the lot-size snap can perturb it, which is why the
/// detector's own `reduce_factor` safety margin is applied on top.
fn reduce_actions(
    actions: &[MarketAction; 3],
    factor: Decimal,
    requirements: &HashMap<String, SymbolRequirements>,
) -> Option<[MarketAction; 3]> {
    let mut reduced = actions.clone();
    for action in reduced.iter_mut() {
        let req = requirements.get(&action.symbol())?;
        let scaled = round_down_to_step(action.amount * factor, req.amount_step);
        action.amount = normalize_leg(scaled, req, action.price)?;
    }
    Some(reduced)
}

/// Build an executable `Plan` for a detected arbitrage given current
/// balances: canonicalize the cycle, rank legs by funding ratio, and pick
/// the cheapest-latency shape that's actually affordable.
pub fn build_plan(
    arbitrage: &Arbitrage,
    balances: &BalanceMap,
    min_parallel_actions: u32,
    reduce_factor: Decimal,
    requirements: &HashMap<String, SymbolRequirements>,
) -> Result<Plan, PlanError> {
    let actions = canonicalize(&arbitrage.actions)?;

    let mut by_ratio: Vec<(usize, Decimal)> = (0..3).map(|i| (i, balance_ratio(&actions[i], balances))).collect();
    by_ratio.sort_by(|a, b| a.1.cmp(&b.1));
    let (min_idx, min_ratio) = by_ratio[0];
    let (mid_idx, mid_ratio) = by_ratio[1];
    let (max_idx, max_ratio) = by_ratio[2];

    let one = Decimal::ONE;

    let plan = if min_ratio >= one {
        debug!("Plan for {}: all legs funded, single parallel step", arbitrage.triangle);
        Plan {
            steps: vec![actions.to_vec()],
        }
    } else if mid_ratio >= one {
        debug!("Plan for {}: 2-step, leg {} funds leg {}", arbitrage.triangle, mid_idx, min_idx);
        Plan {
            steps: vec![
                vec![actions[mid_idx].clone(), actions[max_idx].clone()],
                vec![actions[min_idx].clone()],
            ],
        }
    } else if max_ratio >= one {
        debug!("Plan for {}: 3-step sequential starting at leg {}", arbitrage.triangle, max_idx);
        Plan {
            steps: vec![
                vec![actions[max_idx].clone()],
                vec![actions[mid_idx].clone()],
                vec![actions[min_idx].clone()],
            ],
        }
    } else {
        let factor = min_ratio * reduce_factor;
        let reduced = reduce_actions(&actions, factor, requirements).ok_or(PlanError::Unexecutable)?;
        debug!("Plan for {}: reduced by {} to fit balance", arbitrage.triangle, factor);
        Plan {
            steps: vec![reduced.to_vec()],
        }
    };

    if plan.parallelism() < min_parallel_actions as usize {
        return Err(PlanError::InsufficientParallelism {
            required: min_parallel_actions,
            actual: plan.parallelism(),
        });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CycleDirection, Pair, Side, Triangle};
    use std::str::FromStr;

    fn triangle() -> Triangle {
        Triangle::new(Pair::new("EOS", "BTC"), Pair::new("ETH", "BTC"), Pair::new("ETH", "EOS"))
    }

    fn sample_arbitrage() -> Arbitrage {
        let t = triangle();
        let actions = [
            MarketAction::new(t.yz().clone(), Side::Sell, Decimal::from_str("0.00016").unwrap(), Decimal::from(10)),
            MarketAction::new(t.xz().clone(), Side::Buy, Decimal::from_str("0.06").unwrap(), Decimal::from_str("0.1").unwrap()),
            MarketAction::new(t.xy().clone(), Side::Sell, Decimal::from_str("400").unwrap(), Decimal::from_str("0.1").unwrap()),
        ];
        Arbitrage {
            triangle: t,
            direction: CycleDirection::A,
            actions,
            amount_z_spend: Decimal::from_str("0.006").unwrap(),
            profit_z: Decimal::from_str("0.0001").unwrap(),
            profit_z_rel: Decimal::from_str("0.02").unwrap(),
            profit_x: Decimal::ZERO,
            profit_y: Decimal::ZERO,
            depth: 1,
            detected_at_ms: 0,
        }
    }

    fn reqs() -> HashMap<String, SymbolRequirements> {
        let req = SymbolRequirements {
            min_amount: Decimal::new(1, 4),
            max_amount: Decimal::from(1_000_000),
            amount_step: Decimal::new(1, 4),
            min_notional: Decimal::ZERO,
        };
        ["EOSBTC", "ETHBTC", "ETHEOS"].into_iter().map(|s| (s.to_string(), req)).collect()
    }

    #[test]
    fn test_all_legs_funded_single_step() {
        let arb = sample_arbitrage();
        let mut balances = BalanceMap::new();
        balances.insert("EOS".to_string(), Decimal::from(100));
        balances.insert("BTC".to_string(), Decimal::from(1));
        balances.insert("ETH".to_string(), Decimal::from(100));

        let plan = build_plan(&arb, &balances, 1, Decimal::ONE, &reqs()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].len(), 3);
    }

    #[test]
    fn test_one_leg_underfunded_two_steps() {
        let arb = sample_arbitrage();
        let mut balances = BalanceMap::new();
        // EOS leg (sell 10 EOS) is underfunded; BTC and ETH legs are fine.
        balances.insert("EOS".to_string(), Decimal::from(1));
        balances.insert("BTC".to_string(), Decimal::from(1));
        balances.insert("ETH".to_string(), Decimal::from(100));

        let plan = build_plan(&arb, &balances, 1, Decimal::ONE, &reqs()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].len(), 2);
        assert_eq!(plan.steps[1].len(), 1);
    }

    #[test]
    fn test_all_underfunded_triggers_reduction() {
        let arb = sample_arbitrage();
        let balances = BalanceMap::new(); // nothing funded at all
        let plan = build_plan(&arb, &balances, 1, Decimal::new(95, 2), &reqs());
        // Zero balance cannot be scaled up to meet min_amount; reduction fails.
        assert_eq!(plan.unwrap_err(), PlanError::Unexecutable);
    }

    #[test]
    fn test_min_parallel_actions_rejects_sequential_plan() {
        let arb = sample_arbitrage();
        let mut balances = BalanceMap::new();
        balances.insert("EOS".to_string(), Decimal::from(1));
        balances.insert("BTC".to_string(), Decimal::from(1));
        balances.insert("ETH".to_string(), Decimal::from(100));

        let err = build_plan(&arb, &balances, 3, Decimal::ONE, &reqs()).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientParallelism {
                required: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_mirrored_ordering_still_canonicalizes() {
        // sample_arbitrage's actions are already chained 0 -> 1 -> 2; feed
        // canonicalize the legs with 1 and 2 swapped and confirm it still
        // recovers a valid cycle order instead of rejecting it.
        let arb = sample_arbitrage();
        let mirrored = [arb.actions[0].clone(), arb.actions[2].clone(), arb.actions[1].clone()];
        let canonical = canonicalize(&mirrored).unwrap();
        assert_eq!(canonical[0].gained_asset(), canonical[1].spendable_asset());
        assert_eq!(canonical[1].gained_asset(), canonical[2].spendable_asset());
        assert_eq!(canonical[2].gained_asset(), canonical[0].spendable_asset());
    }

    #[test]
    fn test_non_triangle_actions_rejected() {
        let t = triangle();
        let mut arb = sample_arbitrage();
        // Break the cycle: make every leg spend/gain the same two assets.
        arb.actions = [
            MarketAction::new(t.yz().clone(), Side::Buy, Decimal::ONE, Decimal::ONE),
            MarketAction::new(t.yz().clone(), Side::Buy, Decimal::ONE, Decimal::ONE),
            MarketAction::new(t.yz().clone(), Side::Buy, Decimal::ONE, Decimal::ONE),
        ];
        let balances = BalanceMap::new();
        let err = build_plan(&arb, &balances, 1, Decimal::ONE, &reqs()).unwrap_err();
        assert_eq!(err, PlanError::NotATriangle);
    }
}
