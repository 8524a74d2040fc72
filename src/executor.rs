use crate::client::BybitClient;
use crate::detector::round_down_to_step;
use crate::models::{
    ExecutionResult, MarketAction, OrderBookSnapshot, OrderResult, OrderStatus, OrderType, Pair, Plan, Scenario, Side,
    SymbolRequirements, Timing,
};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// Process-level cooperative stop flag: set by a SIGINT/SIGTERM handler,
/// consulted by fill-wait loops so an in-flight execution can finish its
/// current step instead of being torn down mid-order.
pub type StopFlag = Arc<AtomicBool>;

/// Read-only, adapter-maintained order book cache the executor consults for
/// the "lost in the book" giveup rule. Reads are point-in-time snapshots.
pub type SharedBooks = Arc<RwLock<HashMap<String, OrderBookSnapshot>>>;

/// A placed leg paired with its originating action, carried through the
/// fill-wait so revert/finalize can rebuild a compensating `MarketAction`
/// without having to parse the pair back out of a bare symbol string.
#[derive(Debug, Clone)]
struct Filled {
    pair: Pair,
    order: OrderResult,
}

/// Executes a `Plan` step by step: places each step's legs concurrently,
/// waits for fills with a book-position giveup rule, and falls back to
/// market-order revert/finalize trades when a step doesn't fully fill.
pub struct Executor {
    client: BybitClient,
    books: SharedBooks,
    check_order_interval: Duration,
    min_fill_time: Duration,
    min_fill_time_last: Duration,
    max_fill_time: Duration,
    fee: Decimal,
    stop: StopFlag,
}

impl Executor {
    pub fn new(client: BybitClient, books: SharedBooks, config: &crate::config::Config, stop: StopFlag) -> Self {
        Self {
            client,
            books,
            check_order_interval: Duration::from_secs(config.check_order_interval_secs),
            min_fill_time: Duration::from_secs(config.min_fill_time_secs),
            min_fill_time_last: Duration::from_secs(config.min_fill_time_last_secs),
            max_fill_time: Duration::from_secs(config.max_fill_time_secs),
            fee: config.trade_fee,
            stop,
        }
    }

    fn now_ms() -> i64 {
        BybitClient::get_timestamp_ms() as i64
    }

    pub async fn execute(&self, plan: Plan, requirements: &HashMap<String, SymbolRequirements>) -> ExecutionResult {
        let reference_ms = Self::now_ms();
        let parallelism = plan.parallelism();
        let mut settled: Vec<Filled> = Vec::new();
        let mut timing = Timing::default();
        let num_steps = plan.steps.len();
        let mut scenario = Scenario::Normal;
        let mut reverted = 0u32;

        'steps: for (step_idx, actions) in plan.steps.iter().enumerate() {
            let is_last = step_idx + 1 == num_steps;
            let min_fill_time = if is_last { self.min_fill_time_last } else { self.min_fill_time };

            let placements = join_all(actions.iter().map(|a| self.place(a))).await;
            timing.all_placed_in_ms = Self::now_ms() - reference_ms;
            for placed in &placements {
                if let Some(order) = placed {
                    timing.placed_in_ms.push(order.placed_at_ms - reference_ms);
                }
            }

            let placed_count = placements.iter().filter(|p| p.is_some()).count();
            if placed_count == 0 {
                warn!("Step {}: all legs failed to place", step_idx);
                scenario = if step_idx == 0 {
                    Scenario::Failed
                } else {
                    reverted += self.revert_all(&settled, requirements).await;
                    Scenario::Reverted(reverted)
                };
                break 'steps;
            }

            let waits = join_all(actions.iter().zip(placements.into_iter()).map(|(action, placed)| async move {
                match placed {
                    Some(order) => Some(Filled {
                        pair: action.pair.clone(),
                        order: self.wait_for_fill(action, order, min_fill_time).await,
                    }),
                    None => None,
                }
            }))
            .await;

            let step_start = settled.len();
            for filled in waits.into_iter().flatten() {
                timing.done_in_ms.push(filled.order.done_at_ms - reference_ms);
                settled.push(filled);
            }
            let step_results = &settled[step_start..];

            let fully_placed = placed_count == actions.len();
            let all_filled = step_results.iter().all(|f| f.order.is_fully_filled());
            let any_filled = step_results.iter().any(|f| !f.order.is_unfilled());

            if fully_placed && all_filled {
                continue;
            }

            if is_last {
                let mut finalized_any = false;
                for filled in step_results.iter().filter(|f| !f.order.is_fully_filled()) {
                    self.finalize(filled, requirements).await;
                    finalized_any = true;
                }
                scenario = if finalized_any || any_filled {
                    Scenario::Finalized
                } else {
                    Scenario::Unfilled
                };
            } else {
                for filled in step_results.iter().filter(|f| !f.order.is_unfilled()) {
                    self.revert(filled, requirements).await;
                    reverted += 1;
                }
                if step_idx > 0 {
                    reverted += self.revert_all(&settled[..step_start], requirements).await;
                }
                scenario = if reverted > 0 {
                    Scenario::Reverted(reverted)
                } else {
                    Scenario::Unfilled
                };
            }
            break 'steps;
        }

        timing.completed_in_ms = Self::now_ms() - reference_ms;

        info!(
            "Execution finished: scenario={} legs={} parallelism={} elapsed_ms={}",
            scenario,
            settled.len(),
            parallelism,
            timing.completed_in_ms
        );

        ExecutionResult {
            parallelism,
            scenario,
            orders: settled.into_iter().map(|f| f.order).collect(),
            timing,
        }
    }

    async fn place(&self, action: &MarketAction) -> Option<OrderResult> {
        match self.client.place_action(action, None).await {
            Ok(order) => Some(order),
            Err(e) => {
                warn!("Failed to place {} {}: {}", action.side, action.symbol(), e);
                None
            }
        }
    }

    /// Poll an order until it fills, hits a terminal non-fill state, gets
    /// given up on as lost in the book, or times out at `max_fill_time`.
    async fn wait_for_fill(&self, action: &MarketAction, placed: OrderResult, min_fill_time: Duration) -> OrderResult {
        let start = Instant::now();
        let mut last = placed;

        loop {
            match self.client.get_order("spot", &last.order_id, &last.symbol).await {
                Ok(info) => {
                    last = crate::client::order_info_to_result(&info, last.placed_at_ms, Self::now_ms());
                    if last.status == OrderStatus::Filled || last.status.is_terminal_non_fill() {
                        return last;
                    }
                }
                Err(e) => warn!("Failed to poll order {}: {}", last.order_id, e),
            }

            if start.elapsed() >= min_fill_time {
                if let Some(ahead) = self.volume_ahead(action).await {
                    let remaining = last.amount_original - last.amount_executed;
                    if ahead >= remaining {
                        debug!(
                            "Order {} lost in the book ({} ahead of {} remaining)",
                            last.order_id, ahead, remaining
                        );
                        break;
                    }
                }
            }
            if start.elapsed() >= self.max_fill_time {
                debug!("Order {} hit max_fill_time", last.order_id);
                break;
            }
            if self.stop.load(Ordering::Relaxed) {
                debug!("Order {} abandoned, stop signal received", last.order_id);
                break;
            }

            sleep(self.check_order_interval).await;
        }

        if let Err(e) = self.client.cancel_order(&last.symbol, &last.order_id).await {
            warn!("Failed to cancel unfilled order {}: {}", last.order_id, e);
        }
        last.done_at_ms = Self::now_ms();
        last
    }

    /// Resting volume at or better than our price, on the side we're competing
    /// against (bids for a sell order, asks for a buy order).
    async fn volume_ahead(&self, action: &MarketAction) -> Option<Decimal> {
        let books = self.books.read().await;
        let book = books.get(&action.symbol())?;
        let ladder = match action.side {
            Side::Sell => &book.bids,
            Side::Buy => &book.asks,
        };
        Some(
            ladder
                .iter()
                .filter(|level| match action.side {
                    Side::Sell => level.price >= action.price,
                    Side::Buy => level.price <= action.price,
                })
                .map(|level| level.volume)
                .sum(),
        )
    }

    /// Compensating market order in the opposite direction for whatever
    /// filled, net of fee, snapped down to the lot size.
    async fn revert(&self, filled: &Filled, requirements: &HashMap<String, SymbolRequirements>) {
        let order = &filled.order;
        if order.amount_executed.is_zero() {
            return;
        }
        let Some(req) = requirements.get(&order.symbol) else {
            error!("No requirements cached for {}, cannot revert", order.symbol);
            return;
        };
        let qty = round_down_to_step(order.amount_executed * (Decimal::ONE - self.fee), req.amount_step);
        if qty < req.min_amount {
            warn!("Revert amount for {} below min_amount, leaving dust", order.symbol);
            return;
        }
        let action = MarketAction {
            pair: filled.pair.clone(),
            side: order.side.opposite(),
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            amount: qty,
        };
        self.emergency_trade(&order.symbol, action, req).await;
    }

    /// Compensating market order in the same direction for whatever didn't
    /// fill, snapped down to the lot size.
    async fn finalize(&self, filled: &Filled, requirements: &HashMap<String, SymbolRequirements>) {
        let order = &filled.order;
        let unfilled = order.amount_original - order.amount_executed;
        if unfilled <= Decimal::ZERO {
            return;
        }
        let Some(req) = requirements.get(&order.symbol) else {
            error!("No requirements cached for {}, cannot finalize", order.symbol);
            return;
        };
        let qty = round_down_to_step(unfilled, req.amount_step);
        if qty < req.min_amount {
            warn!("Finalize amount for {} below min_amount, leaving unfilled", order.symbol);
            return;
        }
        let action = MarketAction {
            pair: filled.pair.clone(),
            side: order.side,
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            amount: qty,
        };
        self.emergency_trade(&order.symbol, action, req).await;
    }

    /// Reverts every settled leg that has some fill, returning how many
    /// emergency trades were issued.
    async fn revert_all(&self, settled: &[Filled], requirements: &HashMap<String, SymbolRequirements>) -> u32 {
        let mut count = 0;
        for filled in settled.iter().filter(|f| !f.order.is_unfilled()) {
            self.revert(filled, requirements).await;
            count += 1;
        }
        count
    }

    /// Place the emergency trade, retrying once with a reduced amount if the
    /// venue rejects for insufficient balance, then giving up and logging.
    async fn emergency_trade(&self, symbol: &str, mut action: MarketAction, req: &SymbolRequirements) {
        for attempt in 0..2 {
            match self
                .client
                .place_action(&action, Some(format!("emrg-{symbol}-{attempt}")))
                .await
            {
                Ok(order) => {
                    info!("Emergency {} order placed for {}: {}", action.side, symbol, order.order_id);
                    return;
                }
                Err(e) if attempt == 0 => {
                    warn!("Emergency trade rejected for {} ({}), retrying reduced", symbol, e);
                    let reduced = round_down_to_step(action.amount * Decimal::new(9, 1), req.amount_step);
                    if reduced < req.min_amount {
                        error!("Cannot reduce emergency trade for {} below min_amount, aborting", symbol);
                        return;
                    }
                    action.amount = reduced;
                }
                Err(e) => {
                    error!("Emergency trade failed for {} after retry: {}", symbol, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn order(side: Side, original: &str, executed: &str, status: OrderStatus) -> OrderResult {
        OrderResult {
            symbol: "ETHBTC".to_string(),
            order_id: "1".to_string(),
            side,
            price: Decimal::from_str("0.06").unwrap(),
            amount_original: Decimal::from_str(original).unwrap(),
            amount_executed: Decimal::from_str(executed).unwrap(),
            quote_amount_executed: Decimal::ZERO,
            status,
            placed_at_ms: 0,
            done_at_ms: 10,
        }
    }

    #[test]
    fn test_order_result_fully_filled_detection() {
        let o = order(Side::Buy, "1.0", "1.0", OrderStatus::Filled);
        assert!(o.is_fully_filled());
        let partial = order(Side::Buy, "1.0", "0.4", OrderStatus::PartiallyFilled);
        assert!(!partial.is_fully_filled());
        assert!(!partial.is_unfilled());
        let none = order(Side::Buy, "1.0", "0", OrderStatus::New);
        assert!(none.is_unfilled());
    }

    #[test]
    fn test_round_down_to_step_snaps_revert_amount() {
        let qty = round_down_to_step(Decimal::from_str("1.2345").unwrap(), Decimal::from_str("0.001").unwrap());
        assert_eq!(qty, Decimal::from_str("1.234").unwrap());
    }

    #[test]
    fn test_market_action_pair_roundtrip() {
        let action = MarketAction::new(Pair::new("ETH", "BTC"), Side::Sell, Decimal::ONE, Decimal::ONE);
        assert_eq!(action.symbol(), "ETHBTC");
    }

    #[test]
    fn test_side_opposite_for_revert_direction() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
