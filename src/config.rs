use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

fn env_decimal(key: &str, default: &str) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or_else(|| Decimal::from_str(default).expect("default decimal literal is valid"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Exchange connection
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub testnet: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,

    // Exchange namespace
    pub trade_fee: Decimal,

    // Arbitrage namespace
    pub min_profit: Decimal,
    pub min_arb_depth: u32,
    pub min_arb_age_secs: u64,
    pub amount_reduce_factor: Decimal,
    pub check_order_interval_secs: u64,
    pub min_fill_time_secs: u64,
    pub min_fill_time_last_secs: u64,
    pub max_fill_time_secs: u64,
    pub min_parallel_actions: u32,

    // CircuitBreaker namespace
    pub no_normals_in_a_row: u32,

    // Carried over from the original bot, still consumed by main/balance.
    pub order_size: Decimal,
    pub min_profit_threshold: f64,
    pub trading_fee_rate: f64,
    pub max_triangles_to_scan: usize,
    pub balance_refresh_interval_secs: u64,
    pub price_refresh_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key =
            env::var("BYBIT_API_KEY").context("BYBIT_API_KEY environment variable is required")?;
        let api_secret = env::var("BYBIT_API_SECRET")
            .context("BYBIT_API_SECRET environment variable is required")?;

        let testnet = env::var("BYBIT_TESTNET")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let base_url = if testnet {
            "https://api-testnet.bybit.com".to_string()
        } else {
            "https://api.bybit.com".to_string()
        };

        let trade_fee = env_decimal("TRADING_FEE_RATE", "0.0015");

        Ok(Config {
            api_key,
            api_secret,
            base_url,
            testnet,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30),
            max_retries: env_u32("MAX_RETRIES", 3),

            trade_fee,

            min_profit: env_decimal("MIN_PROFIT_THRESHOLD", "0.0005"),
            min_arb_depth: env_u32("MIN_ARB_DEPTH", 1),
            min_arb_age_secs: env_u64("MIN_ARB_AGE_SECS", 2),
            amount_reduce_factor: env_decimal("AMOUNT_REDUCE_FACTOR", "0.95"),
            check_order_interval_secs: env_u64("CHECK_ORDER_INTERVAL_SECS", 1),
            min_fill_time_secs: env_u64("MIN_FILL_TIME_SECS", 5),
            min_fill_time_last_secs: env_u64("MIN_FILL_TIME_LAST_SECS", 10),
            max_fill_time_secs: env_u64("MAX_FILL_TIME_SECS", 30),
            min_parallel_actions: env_u32("MIN_PARALLEL_ACTIONS", 1),

            no_normals_in_a_row: env_u32("CIRCUIT_BREAKER_THRESHOLD", 5),

            order_size: env_decimal("ORDER_SIZE", "4.0"),
            min_profit_threshold: env::var("MIN_PROFIT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.05),
            trading_fee_rate: trade_fee.to_string().parse().unwrap_or(0.0015),
            max_triangles_to_scan: MAX_TRIANGLES_TO_SCAN,
            balance_refresh_interval_secs: BALANCE_REFRESH_INTERVAL_SECS,
            price_refresh_interval_secs: PRICE_REFRESH_INTERVAL_SECS,
        })
    }

    pub fn wallet_balance_endpoint(&self) -> String {
        format!("{}/v5/account/wallet-balance", self.base_url)
    }

    pub fn instruments_info_endpoint(&self) -> String {
        format!("{}/v5/market/instruments-info", self.base_url)
    }

    pub fn tickers_endpoint(&self) -> String {
        format!("{}/v5/market/tickers", self.base_url)
    }
}

// Constants for arbitrage calculations
pub const MIN_PROFIT_THRESHOLD: f64 = 0.05;
pub const MAX_TRIANGLES_TO_SCAN: usize = 2000;
pub const BALANCE_REFRESH_INTERVAL_SECS: u64 = 60;
pub const PRICE_REFRESH_INTERVAL_SECS: u64 = 2;
pub const CYCLE_SUMMARY_INTERVAL: usize = 100;

// Realistic trading filters, as decimal helpers (the MarketPair liquidity
// check needs Decimal, not f64, to stay consistent with the rest of the
// domain model).
pub fn min_volume_24h_usd() -> Decimal {
    Decimal::from(10_000)
}
pub fn min_bid_size_usd() -> Decimal {
    Decimal::from(100)
}
pub fn min_ask_size_usd() -> Decimal {
    Decimal::from(100)
}
pub fn max_spread_percent() -> Decimal {
    Decimal::ONE
}

pub const MAX_SLIPPAGE_PERCENT: f64 = 0.5;
pub const VWAP_DEPTH_LEVELS: usize = 5;
pub const MIN_TRADE_AMOUNT_USD: f64 = 10.0;

// Blacklisted tokens that should be excluded from arbitrage (geographical restrictions, etc.)
pub const BLACKLISTED_TOKENS: &[&str] = &[
    "USDR", "BUSD", "UST", "LUNA", "FTT", "CEL", "LUNC", "USTC", "TRY", "BRL", "RDNT", "MOVR",
    "HOOK", "TST", "5IRE", "APTR", "ERTHA", "GUMMY", "PIP", "WWY", "XETA", "VRTX", "FAR", "TAP",
    "KCAL", "VPR", "SON", "COT", "MOJO", "TENET", "SALD", "HVH", "BRAWL", "THN", "PI",
];

/// Check if a token is blacklisted for arbitrage
pub fn is_token_blacklisted(token: &str) -> bool {
    BLACKLISTED_TOKENS.contains(&token.to_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            api_key: "test_key".to_string(),
            api_secret: "test_secret".to_string(),
            base_url: "https://api.bybit.com".to_string(),
            testnet: false,
            request_timeout_secs: 30,
            max_retries: 3,
            trade_fee: Decimal::from_str("0.001").unwrap(),
            min_profit: Decimal::from_str("0.0005").unwrap(),
            min_arb_depth: 1,
            min_arb_age_secs: 2,
            amount_reduce_factor: Decimal::from_str("0.95").unwrap(),
            check_order_interval_secs: 1,
            min_fill_time_secs: 5,
            min_fill_time_last_secs: 10,
            max_fill_time_secs: 30,
            min_parallel_actions: 1,
            no_normals_in_a_row: 5,
            order_size: Decimal::from(4),
            min_profit_threshold: 0.05,
            trading_fee_rate: 0.001,
            max_triangles_to_scan: MAX_TRIANGLES_TO_SCAN,
            balance_refresh_interval_secs: BALANCE_REFRESH_INTERVAL_SECS,
            price_refresh_interval_secs: PRICE_REFRESH_INTERVAL_SECS,
        }
    }

    #[test]
    fn test_config_endpoints() {
        let config = sample_config();

        assert_eq!(
            config.wallet_balance_endpoint(),
            "https://api.bybit.com/v5/account/wallet-balance"
        );
        assert_eq!(
            config.instruments_info_endpoint(),
            "https://api.bybit.com/v5/market/instruments-info"
        );
    }

    #[test]
    fn test_blacklist() {
        assert!(is_token_blacklisted("busd"));
        assert!(!is_token_blacklisted("BTC"));
    }
}
