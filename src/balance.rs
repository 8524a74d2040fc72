use crate::client::BybitClient;
use crate::models::BalanceMap;
use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct BalanceManager {
    balances: BalanceMap,
    last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl BalanceManager {
    pub fn new() -> Self {
        Self {
            balances: HashMap::new(),
            last_updated: None,
        }
    }

    /// Fetch and update account balances
    pub async fn update_balances(&mut self, client: &BybitClient) -> Result<()> {
        info!("Updating account balances...");

        self.balances.clear();

        let account_types = ["UNIFIED", "SPOT", "CONTRACT"];

        for account_type in account_types {
            match client.get_wallet_balance(Some(account_type)).await {
                Ok(wallet_result) => {
                    debug!("Checking {} account type", account_type);

                    for account in &wallet_result.list {
                        debug!(
                            "Processing account type: {}",
                            account.account_type.as_deref().unwrap_or("unknown")
                        );

                        for coin_balance in &account.coin {
                            let balance_sources: [(&str, &Option<String>); 3] = [
                                ("wallet_balance", &coin_balance.wallet_balance),
                                ("available_to_withdraw", &coin_balance.available_to_withdraw),
                                ("equity", &coin_balance.equity),
                            ];

                            let mut found_balance = false;
                            for (field_name, balance_field) in balance_sources {
                                if let Some(raw) = balance_field {
                                    if let Ok(balance) = Decimal::from_str(raw) {
                                        if balance > Decimal::ZERO {
                                            self.balances.insert(coin_balance.coin.clone(), balance);
                                            debug!(
                                                "Added {} balance: {} = {} (from {})",
                                                account_type, coin_balance.coin, balance, field_name
                                            );
                                            found_balance = true;
                                            break;
                                        }
                                    }
                                }
                            }

                            if !found_balance {
                                debug!("No positive balance found for {} in {}", coin_balance.coin, account_type);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to fetch {} balance: {}", account_type, e);
                }
            }
        }

        self.last_updated = Some(chrono::Utc::now());

        info!("✅ Updated balances for {} assets", self.balances.len());
        self.log_balances();

        Ok(())
    }

    /// Get balance for a specific coin
    pub fn get_balance(&self, coin: &str) -> Decimal {
        self.balances.get(coin).copied().unwrap_or(Decimal::ZERO)
    }

    /// Get all balances
    pub fn get_all_balances(&self) -> &BalanceMap {
        &self.balances
    }

    /// Get the list of coins we have balances for
    pub fn get_available_coins(&self) -> Vec<String> {
        self.balances.keys().cloned().collect()
    }

    /// Check if balances need refresh (based on configured interval)
    pub fn needs_refresh(&self, interval_secs: u64) -> bool {
        match self.last_updated {
            None => true,
            Some(last_update) => {
                let now = chrono::Utc::now();
                let duration = now.signed_duration_since(last_update);
                duration.num_seconds() as u64 >= interval_secs
            }
        }
    }

    /// Force a balance refresh on the next update cycle
    pub fn force_refresh(&mut self) {
        self.last_updated = None;
    }

    /// Log current balances for debugging
    pub fn log_balances(&self) {
        if self.balances.is_empty() {
            warn!("No balances available");
            return;
        }

        info!("Current account balances:");
        for (coin, balance) in &self.balances {
            if *balance > Decimal::new(1, 3) {
                info!("  {} = {}", coin, balance);
            }
        }
    }

    /// Log initial account scanning configuration with minimum trade amount filtering
    pub fn log_initial_scanning_info_with_min_amount(&self, min_trade_amount: Decimal) {
        let all_coins = self.get_available_coins();

        if all_coins.is_empty() {
            info!("🔍 Account Scanning: No balances found - will scan popular currencies");
            return;
        }

        let mut sufficient_coins = Vec::new();
        let mut insufficient_coins = Vec::new();

        for coin in &all_coins {
            let balance = self.get_balance(coin);
            if balance >= min_trade_amount {
                sufficient_coins.push((coin.clone(), balance));
            } else {
                insufficient_coins.push((coin.clone(), balance));
            }
        }

        info!(
            "🔍 Account Scanning: Found {} total assets, {} with sufficient balance (>{})",
            all_coins.len(),
            sufficient_coins.len(),
            min_trade_amount
        );

        if !sufficient_coins.is_empty() {
            info!("✅ Assets available for trading:");
            for (coin, balance) in &sufficient_coins {
                info!("   {} (balance: {})", coin, balance);
            }
        }

        if !insufficient_coins.is_empty() {
            info!("❌ Assets with insufficient balance (below {}):", min_trade_amount);
            for (coin, balance) in &insufficient_coins {
                info!("   {} (balance: {})", coin, balance);
            }
        }

        if sufficient_coins.is_empty() {
            info!("⚠️  No assets have sufficient balance for trading!");
        }
    }

    /// Get coins that have sufficient balance for trading
    pub fn get_tradeable_coins(&self, min_trade_amount: Decimal) -> Vec<String> {
        self.balances
            .iter()
            .filter_map(|(coin, &balance)| {
                if balance >= min_trade_amount {
                    Some(coin.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Filter balances above a minimum threshold
    pub fn get_significant_balances(&self, min_threshold: Decimal) -> BalanceMap {
        self.balances
            .iter()
            .filter(|(_, &balance)| balance >= min_threshold)
            .map(|(coin, &balance)| (coin.clone(), balance))
            .collect()
    }

    /// Get balance summary statistics
    pub fn get_balance_summary(&self) -> BalanceSummary {
        let total_coins = self.balances.len();
        let significant_balances = self.get_significant_balances(Decimal::new(1, 3)).len();
        let largest_balance = self.balances.values().max().copied().unwrap_or(Decimal::ZERO);

        BalanceSummary {
            total_coins,
            significant_balances,
            largest_balance,
            last_updated: self.last_updated,
        }
    }
}

impl Default for BalanceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct BalanceSummary {
    pub total_coins: usize,
    pub significant_balances: usize,
    pub largest_balance: Decimal,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl BalanceSummary {
    pub fn display(&self) -> String {
        let last_update = match self.last_updated {
            Some(dt) => dt.format("%H:%M:%S UTC").to_string(),
            None => "Never".to_string(),
        };

        format!(
            "Balances: {} total coins, {} significant, largest: {}, updated: {}",
            self.total_coins, self.significant_balances, self.largest_balance, last_update
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CoinBalance;

    fn create_test_coin_balance(coin: &str, available: &str) -> CoinBalance {
        CoinBalance {
            available_to_borrow: None,
            bonus: None,
            accrued_interest: None,
            available_to_withdraw: Some(available.to_string()),
            total_order_im: None,
            equity: Some(available.to_string()),
            total_position_mm: None,
            usd_value: None,
            unrealised_pnl: None,
            collateral_switch: None,
            spot_hedging_qty: None,
            borrow_amount: None,
            total_position_im: None,
            wallet_balance: Some(available.to_string()),
            cum_realised_pnl: None,
            locked: None,
            margin_collateral: None,
            coin: coin.to_string(),
        }
    }

    #[test]
    fn test_balance_manager_creation() {
        let manager = BalanceManager::new();
        assert_eq!(manager.balances.len(), 0);
        assert!(manager.last_updated.is_none());
    }

    #[test]
    fn test_balance_operations() {
        let mut manager = BalanceManager::new();

        manager.balances.insert("BTC".to_string(), Decimal::new(15, 1));
        manager.balances.insert("USDT".to_string(), Decimal::from(1000));

        assert_eq!(manager.get_balance("BTC"), Decimal::new(15, 1));
        assert_eq!(manager.get_balance("ETH"), Decimal::ZERO);

        let _ = create_test_coin_balance("BTC", "1.5");
    }

    #[test]
    fn test_significant_balances() {
        let mut manager = BalanceManager::new();
        manager.balances.insert("BTC".to_string(), Decimal::new(15, 1));
        manager.balances.insert("ETH".to_string(), Decimal::new(5, 4)); // Below threshold
        manager.balances.insert("USDT".to_string(), Decimal::from(1000));

        let significant = manager.get_significant_balances(Decimal::new(1, 3));
        assert_eq!(significant.len(), 2);
        assert!(significant.contains_key("BTC"));
        assert!(significant.contains_key("USDT"));
        assert!(!significant.contains_key("ETH"));
    }
}
