use crate::config::Config;
use crate::models::{
    Arbitrage, BookLevel, CycleDirection, MarketAction, OpportunityAge, OrderBookSnapshot, Side, SymbolRequirements,
    Triangle,
};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Three-legged raw amounts accumulated while walking an order book ladder,
/// before exchange lot-size normalisation.
#[derive(Debug, Clone, Copy, Default)]
struct RawAmounts {
    y: Decimal,
    x_buy: Decimal,
    x_sell: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct NormalizedAmounts {
    y: Decimal,
    x_buy: Decimal,
    x_sell: Decimal,
    z_spend: Decimal,
    z_profit: Decimal,
    y_profit: Decimal,
    x_profit: Decimal,
    profit_rel: Decimal,
}

/// Round `amount` down to the nearest multiple of `step` (ROUND_DOWN, as
/// amounts here are always non-negative so this equals round-toward-zero).
pub(crate) fn round_down_to_step(amount: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return amount;
    }
    (amount / step).floor() * step
}

/// Clamp/quantize a single leg amount against its symbol's lot and notional
/// requirements. Returns `None` if the amount can't be normalized at all.
pub(crate) fn normalize_leg(amount: Decimal, req: &SymbolRequirements, price: Decimal) -> Option<Decimal> {
    if amount < req.min_amount {
        return None;
    }
    let clipped = if amount > req.max_amount {
        req.max_amount
    } else {
        round_down_to_step(amount, req.amount_step)
    };
    if clipped * price < req.min_notional {
        return None;
    }
    Some(clipped)
}

/// Walk an order book ladder and return how much counter currency `amount`
/// of the traded currency converts to (fees not included).
fn calculate_counter_amount(amount: Decimal, book: &[BookLevel]) -> Decimal {
    let mut counter = Decimal::ZERO;
    let mut left = amount;
    for level in book {
        let traded = if left > level.volume { level.volume } else { left };
        counter += level.price * traded;
        left -= traded;
        if left <= Decimal::ZERO {
            break;
        }
    }
    counter
}

/// Compute the amounts available on one depth level of the triangle, for one
/// cycle direction.
fn calculate_amounts_on_price_level(
    direction: CycleDirection,
    yz: BookLevel,
    xz: BookLevel,
    xy: BookLevel,
    fee: Decimal,
) -> RawAmounts {
    let one_minus_fee = Decimal::ONE - fee;
    let amount_x = xz.volume.min(xy.volume);
    let mut amount_y = amount_x * xy.price;
    let mut amount_x_sell = amount_x;
    let mut amount_x_buy = amount_x_sell / one_minus_fee;

    match direction {
        CycleDirection::A => {
            if amount_x_buy > xz.volume {
                amount_x_buy = xz.volume;
                amount_x_sell = amount_x_buy * one_minus_fee;
            }
            amount_y = amount_x_sell * xy.price * one_minus_fee;
            if amount_y > yz.volume {
                amount_y = yz.volume;
                amount_x_sell = amount_y / xy.price / one_minus_fee;
                amount_x_buy = amount_x_sell / one_minus_fee;
            }
        }
        CycleDirection::B => {
            if amount_x_buy > xy.volume {
                amount_x_buy = xy.volume;
                amount_x_sell = amount_x_buy * one_minus_fee;
            }
            amount_y = amount_x_buy * xy.price / one_minus_fee;
            if amount_y > yz.volume {
                amount_y = yz.volume;
                amount_x_buy = amount_y * one_minus_fee / xy.price;
                amount_x_sell = amount_x_buy * one_minus_fee;
            }
        }
    }

    RawAmounts {
        y: amount_y,
        x_buy: amount_x_buy,
        x_sell: amount_x_sell,
    }
}

struct TriangleReqs<'a> {
    yz: &'a SymbolRequirements,
    xz: &'a SymbolRequirements,
    xy: &'a SymbolRequirements,
}

struct TriangleBooks<'a> {
    yz: &'a [BookLevel],
    xz: &'a [BookLevel],
    xy: &'a [BookLevel],
}

/// Normalize raw ladder-walk amounts to comply with exchange lot sizes, then
/// back-propagate through the remaining legs to restore non-negative
/// per-currency profit, re-deriving z_spend/z_profit against the
/// untouched (pre-walk) order books.
#[allow(clippy::too_many_arguments)]
fn normalize_amounts_and_recalculate(
    direction: CycleDirection,
    raw: RawAmounts,
    prices: (Decimal, Decimal, Decimal),
    reqs: TriangleReqs,
    books: TriangleBooks,
    fee: Decimal,
    min_profit: Decimal,
) -> Option<NormalizedAmounts> {
    let one_minus_fee = Decimal::ONE - fee;

    match direction {
        CycleDirection::A => {
            let mut y = normalize_leg(raw.y, reqs.yz, prices.0)?;
            let mut x_buy = normalize_leg(raw.x_buy, reqs.xz, prices.1)?;
            let mut x_sell = normalize_leg(raw.x_sell, reqs.xy, prices.2)?;

            let x_profit = loop {
                let profit = x_buy * one_minus_fee - x_sell;
                if profit >= Decimal::ZERO {
                    break profit;
                }
                x_sell -= reqs.xy.amount_step;
                if x_sell < reqs.xy.min_amount {
                    return None;
                }
            };

            let y_profit = loop {
                let y_got = calculate_counter_amount(x_sell, books.xy) * one_minus_fee;
                let profit = y_got - y;
                if profit >= Decimal::ZERO {
                    break profit;
                }
                y -= reqs.yz.amount_step;
                if y < reqs.yz.min_amount {
                    return None;
                }
            };

            let z_got = calculate_counter_amount(y, books.yz) * one_minus_fee;
            let z_spend = calculate_counter_amount(x_buy, books.xz);
            let z_profit = z_got - z_spend;
            let profit_rel = z_profit / z_spend;
            if profit_rel < min_profit {
                return None;
            }

            Some(NormalizedAmounts {
                y,
                x_buy,
                x_sell,
                z_spend,
                z_profit,
                y_profit,
                x_profit,
                profit_rel,
            })
        }
        CycleDirection::B => {
            let mut y = normalize_leg(raw.y, reqs.yz, prices.0)?;
            let mut x_sell = normalize_leg(raw.x_sell, reqs.xz, prices.1)?;
            let mut x_buy = normalize_leg(raw.x_buy, reqs.xy, prices.2)?;

            let y_profit = loop {
                let y_got = y * one_minus_fee;
                let y_spend = calculate_counter_amount(x_buy, books.xy);
                let profit = y_got - y_spend;
                if profit >= Decimal::ZERO {
                    break profit;
                }
                x_buy -= reqs.xy.amount_step;
                if x_buy < reqs.xy.min_amount {
                    return None;
                }
            };

            let x_profit = loop {
                let profit = x_buy * one_minus_fee - x_sell;
                if profit >= Decimal::ZERO {
                    break profit;
                }
                x_sell -= reqs.xz.amount_step;
                if x_sell < reqs.xz.min_amount {
                    return None;
                }
            };

            let z_got = calculate_counter_amount(x_sell, books.xz) * one_minus_fee;
            let z_spend = calculate_counter_amount(y, books.yz);
            let z_profit = z_got - z_spend;
            let profit_rel = z_profit / z_spend;
            if profit_rel < min_profit {
                return None;
            }

            Some(NormalizedAmounts {
                y,
                x_buy,
                x_sell,
                z_spend,
                z_profit,
                y_profit,
                x_profit,
                profit_rel,
            })
        }
    }
}

/// Depth-limited triangular arbitrage detector: scans the current liquid
/// triangle universe against live order books, walking each ladder until it
/// stops being profitable, then normalizing and age/depth-filtering the
/// result.
pub struct ArbitrageDetector {
    fee: Decimal,
    min_profit: Decimal,
    min_depth: u32,
    min_age_ms: i64,
    reduce_factor: Decimal,
}

impl ArbitrageDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            fee: config.trade_fee,
            min_profit: config.min_profit,
            min_depth: config.min_arb_depth,
            min_age_ms: config.min_arb_age_secs as i64 * 1000,
            reduce_factor: config.amount_reduce_factor,
        }
    }

    /// Scan every triangle in both cycle directions, returning opportunities
    /// that pass the min-profit, min-depth and min-age filters. Disappeared
    /// opportunities are evicted from `age` as a side effect.
    pub fn scan(
        &self,
        triangles: &[Triangle],
        books: &HashMap<String, OrderBookSnapshot>,
        requirements: &HashMap<String, SymbolRequirements>,
        age: &mut OpportunityAge,
        now_ms: i64,
    ) -> Vec<Arbitrage> {
        let candidates: Vec<(Triangle, CycleDirection, Arbitrage)> = triangles
            .par_iter()
            .flat_map(|triangle| {
                [CycleDirection::A, CycleDirection::B]
                    .into_iter()
                    .filter_map(|direction| {
                        self.find_arbitrage(triangle, direction, books, requirements, now_ms)
                            .map(|arb| (triangle.clone(), direction, arb))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut found_keys = std::collections::HashSet::new();
        let mut result = Vec::new();

        for (triangle, direction, arb) in candidates {
            let key = (triangle, direction);
            found_keys.insert(key.clone());
            age.mark_seen(key.clone(), now_ms);
            let age_ms = now_ms - age.first_seen(&key);
            if age_ms >= self.min_age_ms && arb.depth >= self.min_depth as usize {
                result.push(arb);
            }
        }

        for triangle in triangles {
            for direction in [CycleDirection::A, CycleDirection::B] {
                let key = (triangle.clone(), direction);
                if !found_keys.contains(&key) && age.reset(&key) {
                    debug!("Arbitrage disappeared: {} {}", triangle, direction);
                }
            }
        }

        result
    }

    fn find_arbitrage(
        &self,
        triangle: &Triangle,
        direction: CycleDirection,
        books: &HashMap<String, OrderBookSnapshot>,
        requirements: &HashMap<String, SymbolRequirements>,
        now_ms: i64,
    ) -> Option<Arbitrage> {
        let [yz_sym, xz_sym, xy_sym] = triangle.symbols();

        let yz_book = books.get(&yz_sym)?;
        let xz_book = books.get(&xz_sym)?;
        let xy_book = books.get(&xy_sym)?;
        if !yz_book.is_usable() || !xz_book.is_usable() || !xy_book.is_usable() {
            return None;
        }

        // Working copies of the ladder side each leg reads, consumed level
        // by level as the walk goes deeper.
        let (mut yz_side, mut xz_side, mut xy_side) = match direction {
            CycleDirection::A => (yz_book.bids.clone(), xz_book.asks.clone(), xy_book.bids.clone()),
            CycleDirection::B => (yz_book.asks.clone(), xz_book.bids.clone(), xy_book.asks.clone()),
        };
        // Untouched ladders, for the normalizer's back-propagation.
        let (yz_full, xz_full, xy_full) = match direction {
            CycleDirection::A => (&yz_book.bids, &xz_book.asks, &xy_book.bids),
            CycleDirection::B => (&yz_book.asks, &xz_book.bids, &xy_book.asks),
        };

        let one_minus_fee = Decimal::ONE - self.fee;
        let fee_cubed = one_minus_fee * one_minus_fee * one_minus_fee;

        let mut totals = RawAmounts::default();
        let mut depth = 0usize;
        let mut last_prices: Option<(Decimal, Decimal, Decimal)> = None;

        loop {
            let (Some(yz0), Some(xz0), Some(xy0)) = (yz_side.first().copied(), xz_side.first().copied(), xy_side.first().copied())
            else {
                break;
            };

            let profit_rel = match direction {
                CycleDirection::A => yz0.price / xz0.price * xy0.price * fee_cubed - Decimal::ONE,
                CycleDirection::B => xz0.price / xy0.price / yz0.price * fee_cubed - Decimal::ONE,
            };
            if profit_rel < self.min_profit {
                break;
            }

            let level = calculate_amounts_on_price_level(direction, yz0, xz0, xy0, self.fee);

            totals.y += level.y;
            totals.x_buy += level.x_buy;
            totals.x_sell += level.x_sell;
            last_prices = Some((yz0.price, xz0.price, xy0.price));

            Self::consume_level(&mut yz_side, level.y);
            Self::consume_level(&mut xz_side, level.x_buy);
            Self::consume_level(&mut xy_side, level.x_sell);
            depth += 1;
        }

        let prices = last_prices?;

        let reqs = TriangleReqs {
            yz: requirements.get(&yz_sym)?,
            xz: requirements.get(&xz_sym)?,
            xy: requirements.get(&xy_sym)?,
        };
        let reduced = RawAmounts {
            y: totals.y * self.reduce_factor,
            x_buy: totals.x_buy * self.reduce_factor,
            x_sell: totals.x_sell * self.reduce_factor,
        };

        let normalized = normalize_amounts_and_recalculate(
            direction,
            reduced,
            prices,
            reqs,
            TriangleBooks {
                yz: yz_full,
                xz: xz_full,
                xy: xy_full,
            },
            self.fee,
            self.min_profit,
        )?;

        trace!(
            "Normalized arbitrage on {} ({}): profit_rel={}",
            triangle, direction, normalized.profit_rel
        );

        let actions = Self::build_actions(triangle, direction, prices, &normalized);

        Some(Arbitrage {
            triangle: triangle.clone(),
            direction,
            actions,
            amount_z_spend: normalized.z_spend,
            profit_z: normalized.z_profit,
            profit_z_rel: normalized.profit_rel,
            profit_x: normalized.x_profit,
            profit_y: normalized.y_profit,
            depth,
            detected_at_ms: now_ms,
        })
    }

    fn consume_level(side: &mut Vec<BookLevel>, amount: Decimal) {
        if let Some(level) = side.first_mut() {
            level.volume -= amount;
            if level.volume <= Decimal::ZERO {
                side.remove(0);
            }
        }
    }

    fn build_actions(
        triangle: &Triangle,
        direction: CycleDirection,
        prices: (Decimal, Decimal, Decimal),
        normalized: &NormalizedAmounts,
    ) -> [MarketAction; 3] {
        let (yz, xz, xy) = (triangle.yz().clone(), triangle.xz().clone(), triangle.xy().clone());
        match direction {
            CycleDirection::A => [
                MarketAction::new(yz, Side::Sell, prices.0, normalized.y),
                MarketAction::new(xz, Side::Buy, prices.1, normalized.x_buy),
                MarketAction::new(xy, Side::Sell, prices.2, normalized.x_sell),
            ],
            CycleDirection::B => [
                MarketAction::new(yz, Side::Buy, prices.0, normalized.y),
                MarketAction::new(xz, Side::Sell, prices.1, normalized.x_sell),
                MarketAction::new(xy, Side::Buy, prices.2, normalized.x_buy),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pair;
    use std::str::FromStr;

    fn level(price: &str, volume: &str) -> BookLevel {
        BookLevel {
            price: Decimal::from_str(price).unwrap(),
            volume: Decimal::from_str(volume).unwrap(),
        }
    }

    fn test_config() -> Config {
        Config {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: String::new(),
            testnet: true,
            request_timeout_secs: 30,
            max_retries: 3,
            trade_fee: Decimal::new(1, 3),
            min_profit: Decimal::new(1, 4),
            min_arb_depth: 1,
            min_arb_age_secs: 0,
            amount_reduce_factor: Decimal::ONE,
            check_order_interval_secs: 1,
            min_fill_time_secs: 5,
            min_fill_time_last_secs: 10,
            max_fill_time_secs: 30,
            min_parallel_actions: 1,
            no_normals_in_a_row: 5,
            order_size: Decimal::from(4),
            min_profit_threshold: 0.05,
            trading_fee_rate: 0.001,
            max_triangles_to_scan: 2000,
            balance_refresh_interval_secs: 60,
            price_refresh_interval_secs: 2,
        }
    }

    #[test]
    fn test_calculate_counter_amount_walks_multiple_levels() {
        let book = vec![level("10", "1"), level("9", "2")];
        let counter = calculate_counter_amount(Decimal::from(2), &book);
        // 1 @ 10 + 1 @ 9 = 19
        assert_eq!(counter, Decimal::from(19));
    }

    #[test]
    fn test_round_down_to_step() {
        assert_eq!(
            round_down_to_step(Decimal::from_str("1.2378").unwrap(), Decimal::from_str("0.001").unwrap()),
            Decimal::from_str("1.237").unwrap()
        );
    }

    #[test]
    fn test_detector_finds_profitable_triangle() {
        // EOS/BTC * ETH/BTC * EOS/ETH hub=BTC, leg=EOS/ETH, x=ETH, y=EOS, z=BTC
        let triangle = Triangle::new(Pair::new("EOS", "BTC"), Pair::new("ETH", "BTC"), Pair::new("ETH", "EOS"));

        let mut books = HashMap::new();
        // direction A: sell EOS/BTC (bids), buy ETH/BTC (asks), sell ETH/EOS (bids)
        books.insert(
            "EOSBTC".to_string(),
            OrderBookSnapshot {
                symbol: "EOSBTC".to_string(),
                valid: true,
                bids: vec![level("0.00016", "1000")],
                asks: vec![level("0.000161", "1000")],
            },
        );
        books.insert(
            "ETHBTC".to_string(),
            OrderBookSnapshot {
                symbol: "ETHBTC".to_string(),
                valid: true,
                bids: vec![level("0.0599", "1000")],
                asks: vec![level("0.06", "1000")],
            },
        );
        books.insert(
            "ETHEOS".to_string(),
            OrderBookSnapshot {
                symbol: "ETHEOS".to_string(),
                valid: true,
                // Intentionally generous so profit_rel (accounting for 0.1% fee
                // per leg, thrice) clears min_profit.
                bids: vec![level("400", "1000")],
                asks: vec![level("401", "1000")],
            },
        );

        let mut requirements = HashMap::new();
        let req = SymbolRequirements {
            min_amount: Decimal::new(1, 4),
            max_amount: Decimal::from(1_000_000),
            amount_step: Decimal::new(1, 4),
            min_notional: Decimal::ZERO,
        };
        requirements.insert("EOSBTC".to_string(), req);
        requirements.insert("ETHBTC".to_string(), req);
        requirements.insert("ETHEOS".to_string(), req);

        let detector = ArbitrageDetector::new(&test_config());
        let mut age = OpportunityAge::new();

        let found = detector.scan(std::slice::from_ref(&triangle), &books, &requirements, &mut age, 1_000);
        assert!(!found.is_empty());
        let arb = &found[0];
        assert!(arb.profit_z_rel > Decimal::ZERO);
        assert!(arb.depth >= 1);
    }
}
