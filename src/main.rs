mod balance;
mod client;
mod config;
mod detector;
mod executor;
mod logger;
mod models;
mod pairs;
mod planner;
mod websocket;

use anyhow::{Context, Result};
use balance::BalanceManager;
use chrono::Utc;
use client::BybitClient;
use config::Config;
use detector::ArbitrageDetector;
use executor::{Executor, SharedBooks};
use logger::*;
use models::{ArbitrageOpportunity, OpportunityAge, OrderBookSnapshot, Scenario, SymbolRequirements, Timing};
use pairs::PairManager;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use websocket::BybitOrderBookWebsocket;

const SCAN_INTERVAL_MS: u64 = 200;
const EXECUTION_LOG_PATH: &str = "execution_log.jsonl";

#[tokio::main]
async fn main() -> Result<()> {
    init_logger().context("Failed to initialize logger")?;
    log_phase("init", "Loading configuration");
    let config = Config::from_env().context("Failed to load configuration")?;
    log_startup_info(&config);

    let client = BybitClient::new(config.clone()).context("Failed to create Bybit client")?;
    log_success("Initialization", "Bybit client created successfully");

    let mut balance_manager = BalanceManager::new();
    let mut pair_manager = PairManager::new();

    log_phase("pairs", "Performing initial full refresh of trading pairs and prices");
    pair_manager
        .update_pairs_and_prices(&client)
        .await
        .context("Failed to load initial trading pairs")?;
    log_pair_statistics(&pair_manager.get_statistics());

    balance_manager
        .update_balances(&client)
        .await
        .context("Failed to load initial balances")?;
    balance_manager.log_initial_scanning_info_with_min_amount(config.order_size);

    let books: SharedBooks = Arc::new(RwLock::new(HashMap::new()));
    spawn_order_book_feed(&pair_manager, books.clone());

    let stop: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    spawn_shutdown_signal_handler(stop.clone());

    let detector = ArbitrageDetector::new(&config);
    let executor = Executor::new(client.clone(), books.clone(), &config, stop.clone());
    let mut age = OpportunityAge::new();

    let mut cycle_count: u64 = 0;
    let mut no_normals_in_a_row: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        cycle_count += 1;
        let cycle_start = Instant::now();

        if balance_manager.needs_refresh(config.balance_refresh_interval_secs) {
            if let Err(e) = balance_manager.update_balances(&client).await {
                log_error_with_context("Balance refresh", &*e);
            } else {
                log_balance_summary(&balance_manager.get_balance_summary());
            }
        }

        if cycle_count % (config.price_refresh_interval_secs.max(1) * 5) == 0 {
            if let Err(e) = pair_manager.update_pairs_and_prices(&client).await {
                log_error_with_context("Pair refresh", &*e);
            }
        }

        let requirements = requirements_map(&pair_manager);
        let triangles = pair_manager.triangles();
        let now_ms = Utc::now().timestamp_millis();

        let snapshot = books.read().await.clone();
        let arbitrages = detector.scan(triangles, &snapshot, &requirements, &mut age, now_ms);

        for (rank, arb) in arbitrages.iter().enumerate() {
            let age_ms = now_ms - age.first_seen(&arb.key());
            log_arbitrage_detected(arb, age_ms);
            let opportunity = ArbitrageOpportunity { arbitrage: arb.clone() };
            log_arbitrage_opportunity(&opportunity, rank + 1);
        }

        if let Some(best) = arbitrages.first() {
            match planner::build_plan(
                best,
                balance_manager.get_all_balances(),
                config.min_parallel_actions,
                config.amount_reduce_factor,
                &requirements,
            ) {
                Ok(plan) => {
                    info!("🚀 Executing plan for {} dir {} ({} step(s))", best.triangle, best.direction, plan.steps.len());
                    let result = executor.execute(plan, &requirements).await;
                    record_execution_outcome(best, result, &mut no_normals_in_a_row, &config, &stop);
                    balance_manager.force_refresh();
                }
                Err(e) => {
                    warn!("Could not build an executable plan for {}: {}", best.triangle, e);
                    let failed = models::ExecutionResult {
                        parallelism: 0,
                        scenario: Scenario::Failed,
                        orders: Vec::new(),
                        timing: Timing::default(),
                    };
                    record_execution_outcome(best, failed, &mut no_normals_in_a_row, &config, &stop);
                }
            }
        }

        if cycle_count % 300 == 0 {
            info!(
                "📊 Cycle #{} summary: {} opportunities, {} triangles, cycle time {}ms",
                cycle_count,
                arbitrages.len(),
                triangles.len(),
                cycle_start.elapsed().as_millis()
            );
        }

        sleep(Duration::from_millis(SCAN_INTERVAL_MS)).await;
    }

    info!("🛑 Stop signal received, shutting down after in-flight execution finished");
    Ok(())
}

/// Logs and persists an execution outcome, then updates the circuit breaker.
/// Shared by both a completed execution and a refused-to-plan cycle — a plan
/// refusal is recorded as `Scenario::Failed` and folds into the same
/// non-normal-streak bookkeeping as any other non-normal execution.
fn record_execution_outcome(
    arbitrage: &models::Arbitrage,
    result: models::ExecutionResult,
    no_normals_in_a_row: &mut u32,
    config: &Config,
    stop: &Arc<AtomicBool>,
) {
    log_execution_finished(&result);
    if let Err(e) = append_execution_record(arbitrage, &result) {
        warn!("Failed to persist execution record: {}", e);
    }

    if matches!(result.scenario, Scenario::Normal) {
        *no_normals_in_a_row = 0;
    } else {
        *no_normals_in_a_row += 1;
        if *no_normals_in_a_row >= config.no_normals_in_a_row {
            log_circuit_breaker_tripped("too many non-normal executions in a row, stopping", *no_normals_in_a_row);
            stop.store(true, Ordering::Relaxed);
        }
    }
}

/// Spawns a task that waits for a SIGINT (or SIGTERM, on unix) and sets the
/// cooperative stop flag, letting the current in-flight execution finish its
/// step before the main loop exits and the websocket tasks are torn down.
fn spawn_shutdown_signal_handler(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    stop.store(true, Ordering::Relaxed);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("📥 Shutdown signal received");
        stop.store(true, Ordering::Relaxed);
    });
}

fn requirements_map(pair_manager: &PairManager) -> HashMap<String, SymbolRequirements> {
    pair_manager
        .get_pairs()
        .iter()
        .map(|p| (p.symbol.clone(), p.requirements))
        .collect()
}

/// Launches a background task streaming live order books for every liquid
/// symbol and folding updates into the shared `SharedBooks` cache the
/// detector and executor both read from.
fn spawn_order_book_feed(pair_manager: &PairManager, books: SharedBooks) {
    let symbols = pair_manager.get_liquid_symbols();
    let (tx, mut rx) = mpsc::channel::<OrderBookSnapshot>(1024);

    tokio::spawn(async move {
        let feed = BybitOrderBookWebsocket::new(0, symbols, tx);
        feed.run().await;
    });

    tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            books.write().await.insert(snapshot.symbol.clone(), snapshot);
        }
    });
}

/// Append a one-line JSON execution record, in the teacher's local-file
/// persistence idiom (no database dependency).
fn append_execution_record(arbitrage: &models::Arbitrage, result: &models::ExecutionResult) -> Result<()> {
    #[derive(serde::Serialize)]
    struct Record<'a> {
        timestamp: chrono::DateTime<Utc>,
        triangle: String,
        parallelism: usize,
        scenario: String,
        profit_z: Decimal,
        profit_x: Decimal,
        profit_y: Decimal,
        fill_fractions: Vec<Decimal>,
        timing: &'a models::Timing,
    }

    let record = Record {
        timestamp: Utc::now(),
        triangle: arbitrage.triangle.label(),
        parallelism: result.parallelism,
        scenario: result.scenario.to_string(),
        profit_z: arbitrage.profit_z,
        profit_x: arbitrage.profit_x,
        profit_y: arbitrage.profit_y,
        fill_fractions: result.orders.iter().map(|o| o.fill_fraction()).collect(),
        timing: &result.timing,
    };

    let line = serde_json::to_string(&record).context("Failed to serialize execution record")?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(EXECUTION_LOG_PATH)
        .context("Failed to open execution log")?;
    writeln!(file, "{line}").context("Failed to write execution record")?;
    Ok(())
}

/// Create a sample .env file for configuration
pub fn create_sample_env_file() -> Result<()> {
    use std::fs;

    let sample_content = r#"# Bybit API Configuration
# Get your API keys from: https://www.bybit.com/app/user/api-management

# Required: Your Bybit API credentials
BYBIT_API_KEY=your_api_key_here
BYBIT_API_SECRET=your_api_secret_here

# Optional: Use testnet (default: false)
BYBIT_TESTNET=false

# Optional: Request timeout in seconds (default: 30)
REQUEST_TIMEOUT_SECS=30

# Optional: Maximum retries for failed requests (default: 3)
MAX_RETRIES=3

# Optional: Logging level (default: info)
# Options: error, warn, info, debug, trace
RUST_LOG=info
"#;

    fs::write(".env.sample", sample_content).context("Failed to create .env.sample file")?;
    info!("📋 Created .env.sample file with configuration template");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_main_modules() {
        let balance_manager = BalanceManager::new();
        let pair_manager = PairManager::new();

        assert_eq!(balance_manager.get_all_balances().len(), 0);
        assert_eq!(pair_manager.get_pairs().len(), 0);
        assert!(pair_manager.triangles().is_empty());
    }

    #[test]
    fn test_create_sample_env() {
        let result = create_sample_env_file();
        assert!(result.is_ok());
        std::fs::remove_file(".env.sample").ok();
    }
}
