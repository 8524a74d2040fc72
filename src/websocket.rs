use crate::models::{BookLevel, OrderBookSnapshot, TickerInfo};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";
const PING_INTERVAL: u64 = 20;
const ORDER_BOOK_DEPTH: u32 = 50;

#[derive(Debug, Deserialize)]
struct WsResponse {
    _topic: Option<String>,
    #[serde(rename = "type")]
    _msg_type: Option<String>,
    data: Option<TickerInfo>,
    success: Option<bool>,
    ret_msg: Option<String>,
    _op: Option<String>,
}

pub struct BybitWebsocket {
    id: usize,
    symbols: Vec<String>,
    sender: mpsc::Sender<TickerInfo>,
}

impl BybitWebsocket {
    pub fn new(id: usize, symbols: Vec<String>, sender: mpsc::Sender<TickerInfo>) -> Self {
        Self { id, symbols, sender }
    }

    pub async fn run(self) {
        let url = Url::parse(BYBIT_WS_URL).expect("Invalid WebSocket URL");

        loop {
            info!("[Conn #{}] Connecting to Bybit WebSocket...", self.id);
            match connect_async(url.to_string()).await {
                Ok((ws_stream, _)) => {
                    info!("[Conn #{}] Connected to Bybit WebSocket", self.id);
                    let (mut write, mut read) = ws_stream.split();

                    // Subscribe to tickers
                    // Bybit allows max 10 args per request. We need to chunk subscriptions.
                    let mut subscribed_count = 0;
                    for chunk in self.symbols.chunks(10) {
                        let args: Vec<String> = chunk.iter().map(|s| format!("tickers.{}", s)).collect();
                        let subscribe_msg = serde_json::json!({
                            "op": "subscribe",
                            "args": args
                        });

                        if let Err(e) = write.send(Message::Text(subscribe_msg.to_string().into())).await {
                            error!("Failed to send subscription: {}", e);
                            break;
                        }
                        subscribed_count += chunk.len();
                    }
                    info!("[Conn #{}] Subscribed to {} symbols", self.id, subscribed_count);

                    // Heartbeat task
                    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL));

                    loop {
                        tokio::select! {
                            _ = ping_interval.tick() => {
                                let ping_msg = serde_json::json!({ "op": "ping" });
                                if let Err(e) = write.send(Message::Text(ping_msg.to_string().into())).await {
                                    error!("Failed to send ping: {}", e);
                                    break;
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match serde_json::from_str::<WsResponse>(&text) {
                                            Ok(response) => {
                                                if let Some(data) = response.data {
                                                    if let Err(e) = self.sender.send(data).await {
                                                        error!("Failed to send ticker update: {}", e);
                                                        break;
                                                    }
                                                } else if let Some(success) = response.success {
                                                    if !success {
                                                        warn!("WebSocket operation failed: {:?}", response.ret_msg);
                                                    }
                                                }
                                            }
                                            Err(e) => {
                                                if !text.contains("pong") && !text.contains("subscribe") {
                                                    warn!("Failed to parse WS message: {} | Text: {}", e, text);
                                                }
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        warn!("WebSocket connection closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("WebSocket error: {}", e);
                                        break;
                                    }
                                    None => {
                                        warn!("WebSocket stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to connect to WebSocket: {}", e);
                }
            }

            warn!("Reconnecting in 5 seconds...");
            sleep(Duration::from_secs(5)).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderBookEnvelope {
    _topic: Option<String>,
    #[serde(rename = "type")]
    msg_type: Option<String>,
    data: Option<OrderBookWireData>,
    success: Option<bool>,
    ret_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderBookWireData {
    s: String,
    #[serde(default)]
    b: Vec<[String; 2]>,
    #[serde(default)]
    a: Vec<[String; 2]>,
}

/// Local ladder state for one symbol, maintained by merging snapshot/delta
/// frames from the venue's `orderbook.{depth}.{symbol}` topic.
#[derive(Debug, Default)]
struct OrderBookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBookState {
    fn apply_snapshot(&mut self, data: &OrderBookWireData) {
        self.bids.clear();
        self.asks.clear();
        self.apply_delta(data);
    }

    fn apply_delta(&mut self, data: &OrderBookWireData) {
        for [price, size] in &data.b {
            Self::upsert(&mut self.bids, price, size);
        }
        for [price, size] in &data.a {
            Self::upsert(&mut self.asks, price, size);
        }
    }

    fn upsert(book: &mut BTreeMap<Decimal, Decimal>, price: &str, size: &str) {
        let (Ok(price), Ok(size)) = (Decimal::from_str(price), Decimal::from_str(size)) else {
            return;
        };
        if size.is_zero() {
            book.remove(&price);
        } else {
            book.insert(price, size);
        }
    }

    fn to_snapshot(&self, symbol: &str) -> OrderBookSnapshot {
        let bids = self
            .bids
            .iter()
            .rev()
            .map(|(&price, &volume)| BookLevel { price, volume })
            .collect();
        let asks = self
            .asks
            .iter()
            .map(|(&price, &volume)| BookLevel { price, volume })
            .collect();

        OrderBookSnapshot {
            symbol: symbol.to_string(),
            valid: true,
            bids,
            asks,
        }
    }
}

/// Streams order book depth for a set of symbols, publishing a fresh
/// `OrderBookSnapshot` every time any level of a tracked symbol changes.
pub struct BybitOrderBookWebsocket {
    id: usize,
    symbols: Vec<String>,
    sender: mpsc::Sender<OrderBookSnapshot>,
    depth: u32,
}

impl BybitOrderBookWebsocket {
    pub fn new(id: usize, symbols: Vec<String>, sender: mpsc::Sender<OrderBookSnapshot>) -> Self {
        Self {
            id,
            symbols,
            sender,
            depth: ORDER_BOOK_DEPTH,
        }
    }

    pub async fn run(self) {
        let url = Url::parse(BYBIT_WS_URL).expect("Invalid WebSocket URL");

        loop {
            info!("[OB Conn #{}] Connecting to Bybit WebSocket...", self.id);
            match connect_async(url.to_string()).await {
                Ok((ws_stream, _)) => {
                    info!("[OB Conn #{}] Connected", self.id);
                    let (mut write, mut read) = ws_stream.split();
                    let mut books: HashMap<String, OrderBookState> = HashMap::new();

                    let mut subscribed_count = 0;
                    for chunk in self.symbols.chunks(10) {
                        let args: Vec<String> =
                            chunk.iter().map(|s| format!("orderbook.{}.{}", self.depth, s)).collect();
                        let subscribe_msg = serde_json::json!({
                            "op": "subscribe",
                            "args": args
                        });

                        if let Err(e) = write.send(Message::Text(subscribe_msg.to_string().into())).await {
                            error!("Failed to send orderbook subscription: {}", e);
                            break;
                        }
                        subscribed_count += chunk.len();
                    }
                    info!("[OB Conn #{}] Subscribed to {} symbols (depth {})", self.id, subscribed_count, self.depth);

                    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL));

                    loop {
                        tokio::select! {
                            _ = ping_interval.tick() => {
                                let ping_msg = serde_json::json!({ "op": "ping" });
                                if let Err(e) = write.send(Message::Text(ping_msg.to_string().into())).await {
                                    error!("Failed to send ping: {}", e);
                                    break;
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match serde_json::from_str::<OrderBookEnvelope>(&text) {
                                            Ok(envelope) => {
                                                if let Some(data) = envelope.data {
                                                    let state = books.entry(data.s.clone()).or_default();
                                                    match envelope.msg_type.as_deref() {
                                                        Some("snapshot") => state.apply_snapshot(&data),
                                                        Some("delta") => state.apply_delta(&data),
                                                        _ => state.apply_delta(&data),
                                                    }
                                                    let snapshot = state.to_snapshot(&data.s);
                                                    if let Err(e) = self.sender.send(snapshot).await {
                                                        error!("Failed to send order book update: {}", e);
                                                        break;
                                                    }
                                                } else if let Some(success) = envelope.success {
                                                    if !success {
                                                        warn!("Order book subscribe failed: {:?}", envelope.ret_msg);
                                                    }
                                                }
                                            }
                                            Err(e) => {
                                                if !text.contains("pong") && !text.contains("subscribe") {
                                                    debug!("Failed to parse order book WS message: {} | Text: {}", e, text);
                                                }
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        warn!("Order book WebSocket connection closed");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("Order book WebSocket error: {}", e);
                                        break;
                                    }
                                    None => {
                                        warn!("Order book WebSocket stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to connect to order book WebSocket: {}", e);
                }
            }

            warn!("Reconnecting order book stream in 5 seconds...");
            sleep(Duration::from_secs(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_book_state_snapshot_then_delta() {
        let mut state = OrderBookState::default();
        let snapshot = OrderBookWireData {
            s: "EOSETH".to_string(),
            b: vec![["0.015".to_string(), "10".to_string()], ["0.014".to_string(), "5".to_string()]],
            a: vec![["0.016".to_string(), "8".to_string()]],
        };
        state.apply_snapshot(&snapshot);

        let book = state.to_snapshot("EOSETH");
        assert_eq!(book.best_bid().unwrap().price, Decimal::new(15, 3));
        assert_eq!(book.best_ask().unwrap().price, Decimal::new(16, 3));

        let delta = OrderBookWireData {
            s: "EOSETH".to_string(),
            b: vec![["0.015".to_string(), "0".to_string()]],
            a: vec![],
        };
        state.apply_delta(&delta);

        let book = state.to_snapshot("EOSETH");
        assert_eq!(book.best_bid().unwrap().price, Decimal::new(14, 3));
    }

    #[test]
    fn test_order_book_state_bids_descending_asks_ascending() {
        let mut state = OrderBookState::default();
        let snapshot = OrderBookWireData {
            s: "ETHBTC".to_string(),
            b: vec![
                ["0.070".to_string(), "1".to_string()],
                ["0.071".to_string(), "1".to_string()],
                ["0.069".to_string(), "1".to_string()],
            ],
            a: vec![
                ["0.073".to_string(), "1".to_string()],
                ["0.072".to_string(), "1".to_string()],
            ],
        };
        state.apply_snapshot(&snapshot);
        let book = state.to_snapshot("ETHBTC");

        let bid_prices: Vec<Decimal> = book.bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![Decimal::new(71, 3), Decimal::new(70, 3), Decimal::new(69, 3)]);

        let ask_prices: Vec<Decimal> = book.asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![Decimal::new(72, 3), Decimal::new(73, 3)]);
    }
}
