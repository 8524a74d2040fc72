use crate::client::BybitClient;
use crate::config;
use crate::models::{InstrumentInfo, MarketPair, Pair, TickerInfo, Triangle};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Venue metadata and the liquid-pair universe, plus the derived triangle
/// index the detector scans every cycle.
pub struct PairManager {
    pairs: Vec<MarketPair>,
    instruments: HashMap<String, InstrumentInfo>,
    symbol_to_pair: HashMap<String, usize>,
    last_updated: Option<chrono::DateTime<chrono::Utc>>,
    triangles: Vec<Triangle>,
    symbol_to_triangles: HashMap<String, Vec<usize>>,
}

impl Default for PairManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PairManager {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            instruments: HashMap::new(),
            symbol_to_pair: HashMap::new(),
            last_updated: None,
            triangles: Vec::new(),
            symbol_to_triangles: HashMap::new(),
        }
    }

    pub fn get_all_symbols(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.symbol.clone()).collect()
    }

    /// Get only liquid symbols for optimized WebSocket subscription
    pub fn get_liquid_symbols(&self) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|p| p.is_liquid && p.is_active)
            .map(|p| p.symbol.clone())
            .collect()
    }

    /// Fold a single ticker update into the cached `MarketPair`, rebuilding
    /// it from the cached instrument so liquidity flags stay consistent.
    pub fn update_from_ticker(&mut self, ticker: &TickerInfo) {
        let Some(&idx) = self.symbol_to_pair.get(&ticker.symbol) else {
            return;
        };
        let Some(instrument) = self.instruments.get(&ticker.symbol) else {
            return;
        };

        if let Some(updated) = MarketPair::new(instrument, ticker) {
            self.pairs[idx] = updated;
        }
    }

    /// Fetch all trading pairs and their current prices
    pub async fn update_pairs_and_prices(&mut self, client: &BybitClient) -> Result<()> {
        info!("🔄 Updating trading pairs and prices...");

        let instruments = client
            .get_all_spot_instruments()
            .await
            .context("Failed to fetch instruments")?;

        let tickers_result = client.get_tickers("spot").await.context("Failed to fetch tickers")?;

        let mut ticker_map = HashMap::new();
        for ticker in &tickers_result.list {
            ticker_map.insert(ticker.symbol.clone(), ticker);
        }

        let mut pairs = Vec::new();
        let mut symbol_to_pair = HashMap::new();
        let mut instrument_cache = HashMap::new();
        let mut blacklisted_count = 0;

        for instrument in instruments.iter() {
            if config::is_token_blacklisted(&instrument.base_coin) || config::is_token_blacklisted(&instrument.quote_coin)
            {
                blacklisted_count += 1;
                continue;
            }

            if let Some(ticker) = ticker_map.get(&instrument.symbol) {
                if let Some(market_pair) = MarketPair::new(instrument, ticker) {
                    symbol_to_pair.insert(market_pair.symbol.clone(), pairs.len());
                    instrument_cache.insert(instrument.symbol.clone(), instrument.clone());
                    pairs.push(market_pair);
                }
            }
        }

        if blacklisted_count > 0 {
            debug!("🚫 Filtered out {} pairs containing blacklisted tokens", blacklisted_count);
        }

        self.pairs = pairs;
        self.instruments = instrument_cache;
        self.symbol_to_pair = symbol_to_pair;
        self.last_updated = Some(chrono::Utc::now());

        self.rebuild_triangles();

        debug!("✅ Updated {} trading pairs with current prices", self.pairs.len());
        self.log_pair_statistics();
        self.log_bid_ask_analysis();

        Ok(())
    }

    /// Rebuild the canonical triangle index from the current liquid-pair
    /// universe. A triangle exists for currencies X, Y, Z when the venue
    /// lists pairs X/Z, X/Y and Y/Z (i.e. X is the hub base, Z the hub
    /// quote, and Y the leg connecting them) — the closure identity of
    /// `Triangle::is_closed`. Rotation-only trios (no shared hub) are not
    /// representable in canonical form and are skipped.
    fn rebuild_triangles(&mut self) {
        debug!("🔄 Rebuilding triangle index...");

        let liquid: Vec<&MarketPair> = self.pairs.iter().filter(|p| p.is_liquid && p.is_active).collect();

        let mut by_base: HashMap<&str, Vec<(&str, &MarketPair)>> = HashMap::new();
        let mut pair_index: HashMap<(&str, &str), &MarketPair> = HashMap::new();
        for pair in &liquid {
            by_base.entry(pair.base.as_str()).or_default().push((pair.quote.as_str(), pair));
            pair_index.insert((pair.base.as_str(), pair.quote.as_str()), pair);
        }

        let mut triangles = Vec::new();
        let mut seen: HashSet<Triangle> = HashSet::new();

        for (_x, edges) in &by_base {
            for &(z, xz) in edges {
                for &(y, xy) in edges {
                    if y == z {
                        continue;
                    }
                    if let Some(&yz) = pair_index.get(&(y, z)) {
                        let triangle = Triangle::new(
                            Pair::new(yz.base.clone(), yz.quote.clone()),
                            Pair::new(xz.base.clone(), xz.quote.clone()),
                            Pair::new(xy.base.clone(), xy.quote.clone()),
                        );
                        debug_assert!(triangle.is_closed());
                        if seen.insert(triangle.clone()) {
                            triangles.push(triangle);
                        }
                    }
                }
            }
        }

        let mut symbol_to_triangles: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, triangle) in triangles.iter().enumerate() {
            for symbol in triangle.symbols() {
                symbol_to_triangles.entry(symbol).or_default().push(idx);
            }
        }

        debug!("✅ Triangle index rebuilt: {} triangles", triangles.len());
        self.triangles = triangles;
        self.symbol_to_triangles = symbol_to_triangles;
    }

    /// All canonical triangles over the current liquid-pair universe.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Triangles that include the given symbol as one of their three legs.
    pub fn triangles_for_symbol(&self, symbol: &str) -> &[usize] {
        self.symbol_to_triangles.get(symbol).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get_pairs(&self) -> &[MarketPair] {
        &self.pairs
    }

    pub fn get_pair(&self, symbol: &str) -> Option<&MarketPair> {
        self.symbol_to_pair.get(symbol).and_then(|&idx| self.pairs.get(idx))
    }

    pub fn get_pairs_with_currency(&self, currency: &str) -> Vec<&MarketPair> {
        self.pairs.iter().filter(|pair| pair.base == currency || pair.quote == currency).collect()
    }

    pub fn get_all_currencies(&self) -> Vec<String> {
        let mut currencies = HashSet::new();
        for pair in &self.pairs {
            currencies.insert(pair.base.clone());
            currencies.insert(pair.quote.clone());
        }
        let mut result: Vec<String> = currencies.into_iter().collect();
        result.sort();
        result
    }

    pub fn get_statistics(&self) -> PairStatistics {
        if self.pairs.is_empty() {
            return PairStatistics::default();
        }

        let currencies = self.get_all_currencies();
        let sum: Decimal = self.pairs.iter().map(|p| p.last_price).sum();
        let avg_price = sum / Decimal::from(self.pairs.len());

        let min_price = self.pairs.iter().map(|p| p.last_price).min().unwrap_or(Decimal::ZERO);
        let max_price = self.pairs.iter().map(|p| p.last_price).max().unwrap_or(Decimal::ZERO);

        PairStatistics {
            total_pairs: self.pairs.len(),
            total_currencies: currencies.len(),
            active_pairs: self.pairs.iter().filter(|p| p.is_active).count(),
            total_triangles: self.triangles.len(),
            avg_price,
            min_price,
            max_price,
            last_updated: self.last_updated,
        }
    }

    fn log_pair_statistics(&self) {
        let stats = self.get_statistics();
        let liquid_pairs = self.pairs.iter().filter(|p| p.is_liquid).count();

        debug!("📊 Pair Statistics:");
        debug!("  Total pairs: {}", stats.total_pairs);
        debug!("  Active pairs: {}", stats.active_pairs);
        debug!("  Liquid pairs: {}", liquid_pairs);
        debug!("  Total currencies: {}", stats.total_currencies);
        debug!("  Canonical triangles: {}", stats.total_triangles);
        debug!("  Price range: {} - {}", stats.min_price, stats.max_price);

        let total_volume: Decimal = self.pairs.iter().map(|p| p.volume_24h_usd).sum();
        debug!("  Total 24h volume: ${}", total_volume);

        debug!("🧪 Liquidity Filters:");
        debug!("  Min 24h volume: ${}", config::min_volume_24h_usd());
        debug!("  Max spread: {}%", config::max_spread_percent());

        let popular_currencies = ["USDT", "BTC", "ETH", "BNB", "USDC"];
        for currency in &popular_currencies {
            let count = self.get_pairs_with_currency(currency).len();
            let liquid_count = self
                .pairs
                .iter()
                .filter(|p| p.is_liquid && (p.base == *currency || p.quote == *currency))
                .count();
            if count > 0 {
                debug!("  {} pairs: {} (liquid: {})", currency, count, liquid_count);
            }
        }
    }

    fn log_bid_ask_analysis(&self) {
        if self.pairs.is_empty() {
            return;
        }

        let spreads: Vec<Decimal> = self.pairs.iter().map(|p| p.spread_percent).collect();
        let sum: Decimal = spreads.iter().copied().sum();
        let avg_spread = sum / Decimal::from(spreads.len());
        let min_spread = spreads.iter().copied().min().unwrap_or(Decimal::ZERO);
        let max_spread = spreads.iter().copied().max().unwrap_or(Decimal::ZERO);

        debug!("📈 Bid/Ask Spread Analysis:");
        debug!("  Average spread: {}%", avg_spread);
        debug!("  Spread range: {}% - {}%", min_spread, max_spread);
    }
}

#[derive(Debug, Clone, Default)]
pub struct PairStatistics {
    pub total_pairs: usize,
    pub total_currencies: usize,
    pub active_pairs: usize,
    pub total_triangles: usize,
    pub avg_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl PairStatistics {
    pub fn display(&self) -> String {
        let last_update = match self.last_updated {
            Some(dt) => dt.format("%H:%M:%S UTC").to_string(),
            None => "Never".to_string(),
        };

        format!(
            "Pairs: {} total ({} active), {} currencies, {} triangles, avg price: {}, updated: {}",
            self.total_pairs, self.active_pairs, self.total_currencies, self.total_triangles, self.avg_price, last_update
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SymbolRequirements;

    fn test_pair(symbol: &str, base: &str, quote: &str, price: &str) -> MarketPair {
        use std::str::FromStr;
        let price = Decimal::from_str(price).unwrap();
        MarketPair {
            base: base.to_string(),
            quote: quote.to_string(),
            symbol: symbol.to_string(),
            last_price: price,
            bid_price: price,
            ask_price: price,
            bid_size: Decimal::from(100),
            ask_size: Decimal::from(100),
            volume_24h: Decimal::from(1000),
            volume_24h_usd: Decimal::from(1000) * price,
            spread_percent: Decimal::ZERO,
            requirements: SymbolRequirements {
                min_amount: Decimal::new(1, 3),
                max_amount: Decimal::from(1_000_000),
                amount_step: Decimal::new(1, 3),
                min_notional: Decimal::ONE,
            },
            is_active: true,
            is_liquid: true,
        }
    }

    #[test]
    fn test_pair_manager_creation() {
        let manager = PairManager::new();
        assert_eq!(manager.pairs.len(), 0);
        assert!(manager.last_updated.is_none());
    }

    #[test]
    fn test_get_pairs_with_currency() {
        let mut manager = PairManager::new();
        manager.pairs = vec![
            test_pair("BTCUSDT", "BTC", "USDT", "50000"),
            test_pair("ETHUSDT", "ETH", "USDT", "3000"),
            test_pair("ETHBTC", "ETH", "BTC", "0.06"),
        ];

        assert_eq!(manager.get_pairs_with_currency("USDT").len(), 2);
        assert_eq!(manager.get_pairs_with_currency("BTC").len(), 2);
    }

    #[test]
    fn test_get_all_currencies() {
        let mut manager = PairManager::new();
        manager.pairs = vec![
            test_pair("BTCUSDT", "BTC", "USDT", "50000"),
            test_pair("ETHUSDT", "ETH", "USDT", "3000"),
            test_pair("ETHBTC", "ETH", "BTC", "0.06"),
        ];

        let currencies = manager.get_all_currencies();
        assert_eq!(currencies.len(), 3);
        assert!(currencies.contains(&"BTC".to_string()));
        assert!(currencies.contains(&"ETH".to_string()));
        assert!(currencies.contains(&"USDT".to_string()));
    }

    #[test]
    fn test_rebuild_triangles_finds_canonical_hub_triangle() {
        let mut manager = PairManager::new();
        // hub = BTC (quote of both ETHBTC and EOSBTC); leg = EOSETH (base EOS, quote ETH)
        manager.pairs = vec![
            test_pair("ETHBTC", "ETH", "BTC", "0.06"),
            test_pair("EOSBTC", "EOS", "BTC", "0.00015"),
            test_pair("EOSETH", "EOS", "ETH", "0.0025"),
        ];
        manager.rebuild_triangles();

        assert_eq!(manager.triangles().len(), 1);
        let triangle = &manager.triangles()[0];
        assert!(triangle.is_closed());
        assert_eq!(triangle.x(), "ETH");
        assert_eq!(triangle.y(), "EOS");
        assert_eq!(triangle.z(), "BTC");

        assert_eq!(manager.triangles_for_symbol("EOSETH").len(), 1);
        assert_eq!(manager.triangles_for_symbol("BTCUSDT").len(), 0);
    }

    #[test]
    fn test_rebuild_triangles_skips_rotation_only_trio() {
        let mut manager = PairManager::new();
        // A->B, B->C, C->A: no currency is a base in two edges, so no hub exists.
        manager.pairs = vec![
            test_pair("AB", "A", "B", "1"),
            test_pair("BC", "B", "C", "1"),
            test_pair("CA", "C", "A", "1"),
        ];
        manager.rebuild_triangles();

        assert!(manager.triangles().is_empty());
    }
}
