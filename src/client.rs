use crate::config::Config;
use crate::models::*;
use anyhow::{Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bybit's "order not exists or too late to cancel" code.
const RET_CODE_ORDER_NOT_FOUND: i32 = 110001;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transient venue error: {0}")]
    Transient(String),
    #[error("order not found: {symbol}/{order_id}")]
    OrderNotFound { symbol: String, order_id: String },
    #[error("order rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct BybitClient {
    client: Client,
    config: Config,
}

impl BybitClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("X-BAPI-API-KEY", HeaderValue::from_str(&config.api_key)?);

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .tcp_nodelay(true)
            .tcp_keepalive(std::time::Duration::from_secs(60))
            .pool_idle_timeout(None)
            .pool_max_idle_per_host(10)
            .default_headers(headers)
            .build()?;

        Ok(BybitClient { client, config })
    }

    /// Generate HMAC SHA256 signature for Bybit API
    fn generate_signature(
        &self,
        timestamp: u64,
        method: &str,
        _path: &str,
        query_params: &str,
        body: &str,
    ) -> Result<String> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        let recv_window = "5000";

        let param_str = if method == "POST" && !body.is_empty() {
            format!("{}{}{}{}", timestamp, &self.config.api_key, recv_window, body)
        } else if !query_params.is_empty() {
            format!("{}{}{}{}", timestamp, &self.config.api_key, recv_window, query_params)
        } else {
            format!("{}{}{}", timestamp, &self.config.api_key, recv_window)
        };

        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to create HMAC: {}", e))?;

        mac.update(param_str.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub(crate) fn get_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    async fn signed_request<T>(&self, endpoint: &str, query_params: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let timestamp = Self::get_timestamp_ms();
        let signature = self.generate_signature(timestamp, "GET", endpoint, query_params, "")?;

        let mut url = endpoint.to_string();
        if !query_params.is_empty() {
            url.push('?');
            url.push_str(query_params);
        }

        debug!("Making signed request to: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", "5000")
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();

        if !status.is_success() {
            let response_text = response.text().await.unwrap_or_default();
            error!("HTTP error {}: {}", status, response_text);
            return Err(ExchangeError::Transient(format!("HTTP {status}: {response_text}")).into());
        }

        let bytes = response.bytes().await.context("Failed to get response bytes")?;
        let mut buffer = bytes.to_vec();

        let api_response: ApiResponse<T> =
            simd_json::from_slice(&mut buffer).context("Failed to parse API response structure")?;

        api_response
            .into_result()
            .map_err(|e| anyhow::anyhow!("API error: {}", e))
    }

    async fn public_request<T>(&self, endpoint: &str, query_params: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut url = endpoint.to_string();
        if !query_params.is_empty() {
            url.push('?');
            url.push_str(query_params);
        }

        debug!("Making public request to: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();

        if !status.is_success() {
            let response_text = response.text().await.unwrap_or_default();
            error!("HTTP error {}: {}", status, response_text);
            return Err(ExchangeError::Transient(format!("HTTP {status}: {response_text}")).into());
        }

        let bytes = response.bytes().await.context("Failed to get response bytes")?;
        let mut buffer = bytes.to_vec();

        let api_response: ApiResponse<T> =
            simd_json::from_slice(&mut buffer).context("Failed to parse API response structure")?;

        api_response
            .into_result()
            .map_err(|e| anyhow::anyhow!("API error: {}", e))
    }

    /// Execute a signed POST request, returning the raw successful result value.
    async fn signed_post(&self, path: &str, body: &str) -> Result<serde_json::Value> {
        let endpoint = format!("{}{}", self.config.base_url, path);
        let timestamp = Self::get_timestamp_ms();
        let signature = self.generate_signature(timestamp, "POST", path, "", body)?;

        let response = self
            .client
            .post(&endpoint)
            .header("X-BAPI-API-KEY", &self.config.api_key)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-SIGN-TYPE", "2")
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", "5000")
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .context("Failed to send POST request")?;

        let response_text = response.text().await.context("Failed to read POST response body")?;
        debug!("POST {} response: {}", path, response_text);

        let api_response: ApiResponse<serde_json::Value> = serde_json::from_str(&response_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse API response: {}. Body: {}", e, response_text))?;

        if api_response.ret_code == RET_CODE_ORDER_NOT_FOUND {
            return Err(ExchangeError::OrderNotFound {
                symbol: String::new(),
                order_id: String::new(),
            }
            .into());
        }

        if !api_response.is_success() {
            return Err(
                ExchangeError::Rejected(format!("{}: {}", api_response.ret_code, api_response.ret_msg)).into(),
            );
        }

        api_response
            .result
            .ok_or_else(|| anyhow::anyhow!("API response had no result payload"))
    }

    pub async fn get_wallet_balance(&self, account_type: Option<&str>) -> Result<WalletBalanceResult> {
        let acc_type = account_type.unwrap_or("UNIFIED");
        debug!("Fetching wallet balance for account type: {}", acc_type);

        let query_params = format!("accountType={acc_type}");

        let result = self
            .signed_request::<WalletBalanceResult>(&self.config.wallet_balance_endpoint(), &query_params)
            .await?;

        debug!(
            "Successfully fetched wallet balance for {} accounts (type: {})",
            result.list.len(),
            acc_type
        );
        Ok(result)
    }

    pub async fn get_instruments_info(&self, category: &str, limit: Option<u32>) -> Result<InstrumentsInfoResult> {
        debug!("Fetching instruments info for category: {}", category);

        let mut query_params = format!("category={category}");
        if let Some(lmt) = limit {
            query_params.push_str(&format!("&limit={lmt}"));
        }

        let result = self
            .public_request::<InstrumentsInfoResult>(&self.config.instruments_info_endpoint(), &query_params)
            .await?;

        debug!(
            "Successfully fetched {} instruments for category {}",
            result.list.len(),
            category
        );
        Ok(result)
    }

    pub async fn get_all_spot_instruments(&self) -> Result<Vec<InstrumentInfo>> {
        debug!("Fetching all spot instruments...");

        let mut all_instruments = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 1;

        loop {
            let mut query_params = "category=spot&limit=1000".to_string();
            if let Some(ref c) = cursor {
                query_params.push_str(&format!("&cursor={c}"));
            }

            debug!("Fetching page {} of instruments", page);

            let result = self
                .public_request::<InstrumentsInfoResult>(&self.config.instruments_info_endpoint(), &query_params)
                .await?;

            let instruments_count = result.list.len();
            all_instruments.extend(result.list);

            debug!("Fetched {} instruments on page {}", instruments_count, page);

            if result.next_page_cursor.is_none() || instruments_count == 0 {
                break;
            }

            cursor = result.next_page_cursor;
            page += 1;
        }

        debug!(
            "Successfully fetched {} total spot instruments across {} pages",
            all_instruments.len(),
            page
        );

        Ok(all_instruments)
    }

    pub async fn get_tickers(&self, category: &str) -> Result<TickersResult> {
        debug!("Fetching tickers for category: {}", category);

        let query_params = format!("category={category}");

        let result = self
            .public_request::<TickersResult>(&self.config.tickers_endpoint(), &query_params)
            .await?;

        debug!(
            "Successfully fetched {} tickers for category {}",
            result.list.len(),
            category
        );
        Ok(result)
    }

    pub async fn get_ticker(&self, category: &str, symbol: &str) -> Result<TickersResult> {
        debug!("Fetching ticker for symbol: {}", symbol);

        let query_params = format!("category={category}&symbol={symbol}");

        let result = self
            .public_request::<TickersResult>(&self.config.tickers_endpoint(), &query_params)
            .await?;

        Ok(result)
    }

    /// Place a LIMIT or MARKET order for a `MarketAction`.
    pub async fn place_action(&self, action: &MarketAction, order_link_id: Option<String>) -> Result<OrderResult> {
        let side = match action.side {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        };
        let order_type = match action.order_type {
            OrderType::Limit => "Limit",
            OrderType::Market => "Market",
        };
        let time_in_force = match action.order_type {
            OrderType::Limit => Some("GTC".to_string()),
            OrderType::Market => None,
        };
        let price = match action.order_type {
            OrderType::Limit => Some(action.price.to_string()),
            OrderType::Market => None,
        };

        let request = PlaceOrderRequest {
            category: "spot".to_string(),
            symbol: action.symbol(),
            side: side.to_string(),
            order_type: order_type.to_string(),
            qty: action.amount.to_string(),
            price,
            time_in_force,
            order_link_id,
            reduce_only: None,
        };

        let placed_at_ms = Self::get_timestamp_ms() as i64;
        let result = self.place_order(request).await?;

        Ok(OrderResult {
            symbol: action.symbol(),
            order_id: result.order_id,
            side: action.side,
            price: action.price,
            amount_original: action.amount,
            amount_executed: Decimal::ZERO,
            quote_amount_executed: Decimal::ZERO,
            status: OrderStatus::New,
            placed_at_ms,
            done_at_ms: 0,
        })
    }

    /// Place a new order (raw Bybit wire call).
    pub async fn place_order(&self, order_request: PlaceOrderRequest) -> Result<PlaceOrderResult> {
        let body = serde_json::to_string(&order_request)?;
        let value = self.signed_post("/v5/order/create", &body).await?;

        let result: PlaceOrderResult = serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("Failed to parse order result: {}", e))?;

        info!("Order placed successfully: {}", result.order_id);
        Ok(result)
    }

    /// Cancel an order. Returns `Ok(None)` when the venue reports the order
    /// as not found (idempotent cancellation per §4.6).
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<Option<OrderInfo>> {
        let request = CancelOrderRequest {
            category: "spot".to_string(),
            symbol: symbol.to_string(),
            order_id: order_id.to_string(),
        };
        let body = serde_json::to_string(&request)?;

        match self.signed_post("/v5/order/cancel", &body).await {
            Ok(_) => {
                // Bybit's cancel ack doesn't carry fill state; re-query for current status.
                match self.get_order("spot", order_id, symbol).await {
                    Ok(info) => Ok(Some(info)),
                    Err(e) => {
                        warn!("Cancel succeeded but status re-query failed for {}: {}", order_id, e);
                        Ok(None)
                    }
                }
            }
            Err(e) if e.downcast_ref::<ExchangeError>().map(is_order_not_found).unwrap_or(false) => {
                debug!("Cancel({}/{}) reported order not found", symbol, order_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Get order information
    pub async fn get_order(&self, category: &str, order_id: &str, symbol: &str) -> Result<OrderInfo> {
        debug!("Getting order info: {}", order_id);

        let query_params = format!("category={category}&orderId={order_id}&symbol={symbol}");
        let endpoint = format!("{}/v5/order/realtime", self.config.base_url);

        let response = self.signed_request::<serde_json::Value>(&endpoint, &query_params).await?;

        match serde_json::from_value::<OrderListResult>(response.clone()) {
            Ok(parsed) => parsed
                .list
                .into_iter()
                .next()
                .ok_or_else(|| ExchangeError::OrderNotFound {
                    symbol: symbol.to_string(),
                    order_id: order_id.to_string(),
                }
                .into()),
            Err(parse_err) => {
                error!("Failed to parse order response: {}", parse_err);
                Err(anyhow::anyhow!("Failed to parse order response: {}", parse_err))
            }
        }
    }
}

fn is_order_not_found(e: &ExchangeError) -> bool {
    matches!(e, ExchangeError::OrderNotFound { .. })
}

/// Convert a Bybit `OrderInfo` into the domain's venue-agnostic `OrderResult`.
pub fn order_info_to_result(info: &OrderInfo, placed_at_ms: i64, done_at_ms: i64) -> OrderResult {
    let side = if info.side == "Buy" { Side::Buy } else { Side::Sell };
    OrderResult {
        symbol: info.symbol.clone(),
        order_id: info.order_id.clone(),
        side,
        price: Decimal::from_str(&info.price).unwrap_or(Decimal::ZERO),
        amount_original: Decimal::from_str(&info.qty).unwrap_or(Decimal::ZERO),
        amount_executed: Decimal::from_str(&info.cum_exec_qty).unwrap_or(Decimal::ZERO),
        quote_amount_executed: Decimal::from_str(&info.cum_exec_value).unwrap_or(Decimal::ZERO),
        status: OrderStatus::from_bybit(&info.order_status),
        placed_at_ms,
        done_at_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn create_test_config() -> Config {
        Config {
            api_key: "test_key".to_string(),
            api_secret: "test_secret".to_string(),
            base_url: "https://api-testnet.bybit.com".to_string(),
            testnet: true,
            request_timeout_secs: 30,
            max_retries: 3,
            trade_fee: Decimal::new(1, 3),
            min_profit: Decimal::new(5, 4),
            min_arb_depth: 1,
            min_arb_age_secs: 2,
            amount_reduce_factor: Decimal::new(95, 2),
            check_order_interval_secs: 1,
            min_fill_time_secs: 5,
            min_fill_time_last_secs: 10,
            max_fill_time_secs: 30,
            min_parallel_actions: 1,
            no_normals_in_a_row: 5,
            order_size: Decimal::from(100),
            min_profit_threshold: 0.5,
            trading_fee_rate: 0.001,
            max_triangles_to_scan: 2000,
            balance_refresh_interval_secs: 60,
            price_refresh_interval_secs: 2,
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        let config = create_test_config();
        let client = BybitClient::new(config);
        assert!(client.is_ok());
    }

    #[test]
    fn test_timestamp_generation() {
        let ts1 = BybitClient::get_timestamp_ms();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let ts2 = BybitClient::get_timestamp_ms();
        assert!(ts2 > ts1);
    }

    #[test]
    fn test_order_info_to_result_parses_decimals() {
        let info = OrderInfo {
            order_id: "1".to_string(),
            order_link_id: "link1".to_string(),
            symbol: "EOSETH".to_string(),
            order_status: "PartiallyFilled".to_string(),
            side: "Sell".to_string(),
            order_type: "Limit".to_string(),
            qty: "10".to_string(),
            price: "0.015".to_string(),
            avg_price: "0.015".to_string(),
            cum_exec_qty: "4".to_string(),
            cum_exec_value: "0.06".to_string(),
            cum_exec_fee: "0".to_string(),
            created_time: "0".to_string(),
            updated_time: "0".to_string(),
        };

        let result = order_info_to_result(&info, 0, 100);
        assert_eq!(result.amount_executed, Decimal::from(4));
        assert_eq!(result.status, OrderStatus::PartiallyFilled);
    }
}
