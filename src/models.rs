use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i32,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: Option<T>,
    #[serde(rename = "retExtInfo")]
    pub ret_ext_info: Option<serde_json::Value>,
    pub time: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn is_success(&self) -> bool {
        self.ret_code == 0
    }

    pub fn into_result(self) -> Result<T, String> {
        if self.is_success() {
            self.result.ok_or_else(|| "No result data".to_string())
        } else {
            Err(format!("API Error {}: {}", self.ret_code, self.ret_msg))
        }
    }
}

// Wallet Balance Models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceResult {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletAccount {
    #[serde(rename = "totalEquity")]
    pub total_equity: Option<String>,
    #[serde(rename = "accountIMRate")]
    pub account_im_rate: Option<String>,
    #[serde(rename = "totalMarginBalance")]
    pub total_margin_balance: Option<String>,
    #[serde(rename = "totalInitialMargin")]
    pub total_initial_margin: Option<String>,
    #[serde(rename = "accountType")]
    pub account_type: Option<String>,
    #[serde(rename = "totalAvailableBalance")]
    pub total_available_balance: Option<String>,
    #[serde(rename = "accountMMRate")]
    pub account_mm_rate: Option<String>,
    #[serde(rename = "totalPerpUPL")]
    pub total_perp_upl: Option<String>,
    #[serde(rename = "totalWalletBalance")]
    pub total_wallet_balance: Option<String>,
    #[serde(rename = "accountLTV")]
    pub account_ltv: Option<String>,
    #[serde(rename = "totalMaintenanceMargin")]
    pub total_maintenance_margin: Option<String>,
    #[serde(default)]
    pub coin: Vec<CoinBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinBalance {
    #[serde(rename = "availableToBorrow")]
    pub available_to_borrow: Option<String>,
    #[serde(rename = "bonus")]
    pub bonus: Option<String>,
    #[serde(rename = "accruedInterest")]
    pub accrued_interest: Option<String>,
    #[serde(rename = "availableToWithdraw")]
    pub available_to_withdraw: Option<String>,
    #[serde(rename = "totalOrderIM")]
    pub total_order_im: Option<String>,
    #[serde(rename = "equity")]
    pub equity: Option<String>,
    #[serde(rename = "totalPositionMM")]
    pub total_position_mm: Option<String>,
    #[serde(rename = "usdValue")]
    pub usd_value: Option<String>,
    #[serde(rename = "unrealisedPnl")]
    pub unrealised_pnl: Option<String>,
    #[serde(rename = "collateralSwitch")]
    pub collateral_switch: Option<bool>,
    #[serde(rename = "spotHedgingQty")]
    pub spot_hedging_qty: Option<String>,
    #[serde(rename = "borrowAmount")]
    pub borrow_amount: Option<String>,
    #[serde(rename = "totalPositionIM")]
    pub total_position_im: Option<String>,
    #[serde(rename = "walletBalance")]
    pub wallet_balance: Option<String>,
    #[serde(rename = "cumRealisedPnl")]
    pub cum_realised_pnl: Option<String>,
    #[serde(rename = "locked")]
    pub locked: Option<String>,
    #[serde(rename = "marginCollateral")]
    pub margin_collateral: Option<bool>,
    pub coin: String,
}

// Instruments Info Models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsInfoResult {
    pub category: String,
    pub list: Vec<InstrumentInfo>,
    #[serde(rename = "nextPageCursor")]
    pub next_page_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    #[serde(rename = "contractType")]
    pub contract_type: Option<String>,
    pub status: String,
    #[serde(rename = "baseCoin")]
    pub base_coin: String,
    #[serde(rename = "quoteCoin")]
    pub quote_coin: String,
    #[serde(rename = "launchTime")]
    pub launch_time: Option<String>,
    #[serde(rename = "deliveryTime")]
    pub delivery_time: Option<String>,
    #[serde(rename = "deliveryFeeRate")]
    pub delivery_fee_rate: Option<String>,
    #[serde(rename = "priceScale")]
    pub price_scale: Option<String>,
    #[serde(rename = "leverageFilter")]
    pub leverage_filter: Option<LeverageFilter>,
    #[serde(rename = "priceFilter")]
    pub price_filter: Option<PriceFilter>,
    #[serde(rename = "lotSizeFilter")]
    pub lot_size_filter: Option<LotSizeFilter>,
    #[serde(rename = "unifiedMarginTrade")]
    pub unified_margin_trade: Option<bool>,
    #[serde(rename = "fundingInterval")]
    pub funding_interval: Option<i32>,
    #[serde(rename = "settleCoin")]
    pub settle_coin: Option<String>,
    #[serde(rename = "copyTrading")]
    pub copy_trading: Option<String>,
    #[serde(rename = "upperFundingRate")]
    pub upper_funding_rate: Option<String>,
    #[serde(rename = "lowerFundingRate")]
    pub lower_funding_rate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageFilter {
    #[serde(rename = "minLeverage")]
    pub min_leverage: Option<String>,
    #[serde(rename = "maxLeverage")]
    pub max_leverage: Option<String>,
    #[serde(rename = "leverageStep")]
    pub leverage_step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFilter {
    #[serde(rename = "minPrice")]
    pub min_price: Option<String>,
    #[serde(rename = "maxPrice")]
    pub max_price: Option<String>,
    #[serde(rename = "tickSize")]
    pub tick_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotSizeFilter {
    #[serde(rename = "maxOrderQty")]
    pub max_order_qty: String,
    #[serde(rename = "maxMktOrderQty")]
    pub max_mkt_order_qty: Option<String>,
    #[serde(rename = "minOrderQty")]
    pub min_order_qty: String,
    #[serde(rename = "qtyStep")]
    pub qty_step: Option<String>,
    #[serde(rename = "postOnlyMaxOrderQty")]
    pub post_only_max_order_qty: Option<String>,
    #[serde(rename = "minNotionalValue")]
    pub min_notional_value: Option<String>,
}

// Ticker Models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickersResult {
    pub category: String,
    pub list: Vec<TickerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerInfo {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: Option<String>,
    #[serde(rename = "indexPrice")]
    pub index_price: Option<String>,
    #[serde(rename = "markPrice")]
    pub mark_price: Option<String>,
    #[serde(rename = "prevPrice24h")]
    pub prev_price_24h: Option<String>,
    #[serde(rename = "price24hPcnt")]
    pub price_24h_pcnt: Option<String>,
    #[serde(rename = "highPrice24h")]
    pub high_price_24h: Option<String>,
    #[serde(rename = "lowPrice24h")]
    pub low_price_24h: Option<String>,
    #[serde(rename = "prevPrice1h")]
    pub prev_price_1h: Option<String>,
    #[serde(rename = "openInterest")]
    pub open_interest: Option<String>,
    #[serde(rename = "openInterestValue")]
    pub open_interest_value: Option<String>,
    pub turnover24h: Option<String>,
    pub volume24h: Option<String>,
    #[serde(rename = "fundingRate")]
    pub funding_rate: Option<String>,
    #[serde(rename = "nextFundingTime")]
    pub next_funding_time: Option<String>,
    #[serde(rename = "predictedDeliveryPrice")]
    pub predicted_delivery_price: Option<String>,
    #[serde(rename = "basisRate")]
    pub basis_rate: Option<String>,
    #[serde(rename = "deliveryFeeRate")]
    pub delivery_fee_rate: Option<String>,
    #[serde(rename = "deliveryTime")]
    pub delivery_time: Option<String>,
    #[serde(rename = "ask1Size")]
    pub ask1_size: Option<String>,
    #[serde(rename = "bid1Price")]
    pub bid1_price: Option<String>,
    #[serde(rename = "ask1Price")]
    pub ask1_price: Option<String>,
    #[serde(rename = "bid1Size")]
    pub bid1_size: Option<String>,
    pub basis: Option<String>,
}

// Order placement / query models (Bybit wire layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: String, // "Buy" or "Sell"
    #[serde(rename = "orderType")]
    pub order_type: String, // "Market" or "Limit"
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(rename = "timeInForce", skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>, // "GTC", "IOC", "FOK"
    #[serde(rename = "orderLinkId", skip_serializing_if = "Option::is_none")]
    pub order_link_id: Option<String>,
    #[serde(rename = "reduceOnly", skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResult {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId")]
    pub order_link_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub category: String,
    pub symbol: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderListResult {
    pub list: Vec<OrderInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId")]
    pub order_link_id: String,
    pub symbol: String,
    #[serde(rename = "orderStatus")]
    pub order_status: String,
    pub side: String,
    #[serde(rename = "orderType")]
    pub order_type: String,
    pub qty: String,
    pub price: String,
    #[serde(rename = "avgPrice")]
    pub avg_price: String,
    #[serde(rename = "cumExecQty")]
    pub cum_exec_qty: String,
    #[serde(rename = "cumExecValue")]
    pub cum_exec_value: String,
    #[serde(rename = "cumExecFee")]
    pub cum_exec_fee: String,
    #[serde(rename = "createdTime")]
    pub created_time: String,
    #[serde(rename = "updatedTime")]
    pub updated_time: String,
}

// ---------------------------------------------------------------------
// Domain model: decimal-only from here down. No f64/f32 in any of the
// types below; they are the ones that flow through the detector,
// planner and executor.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "Buy"),
            Side::Sell => write!(f, "Sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "Limit"),
            OrderType::Market => write!(f, "Market"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Other,
}

impl OrderStatus {
    pub fn from_bybit(status: &str) -> Self {
        match status {
            "New" | "Untriggered" | "Created" => OrderStatus::New,
            "PartiallyFilled" => OrderStatus::PartiallyFilled,
            "Filled" => OrderStatus::Filled,
            "Cancelled" | "Rejected" | "Deactivated" | "PartiallyFilledCanceled" => {
                OrderStatus::Cancelled
            }
            _ => OrderStatus::Other,
        }
    }

    pub fn is_terminal_non_fill(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Other)
    }
}

/// A base/quote trading pair. Symbol is the venue concatenation of the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A canonical triangle: legs[0] = (Y,Z), legs[1] = (X,Z), legs[2] = (X,Y).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triangle {
    pub legs: [Pair; 3],
}

impl Triangle {
    /// legs already assumed canonical: yz, xz, xy
    pub fn new(yz: Pair, xz: Pair, xy: Pair) -> Self {
        Self {
            legs: [yz, xz, xy],
        }
    }

    pub fn yz(&self) -> &Pair {
        &self.legs[0]
    }
    pub fn xz(&self) -> &Pair {
        &self.legs[1]
    }
    pub fn xy(&self) -> &Pair {
        &self.legs[2]
    }

    /// X: the asset common to xz.base and xy.base
    pub fn x(&self) -> &str {
        &self.legs[1].base
    }
    /// Y: the asset common to yz.base and xy.quote
    pub fn y(&self) -> &str {
        &self.legs[0].base
    }
    /// Z: the asset common to yz.quote and xz.quote
    pub fn z(&self) -> &str {
        &self.legs[0].quote
    }

    /// The closure identity every canonical triangle must satisfy:
    /// yz.quote == xz.quote, yz.base == xy.quote, xz.base == xy.base.
    pub fn is_closed(&self) -> bool {
        let (yz, xz, xy) = (&self.legs[0], &self.legs[1], &self.legs[2]);
        yz.quote == xz.quote && yz.base == xy.quote && xz.base == xy.base
    }

    pub fn symbols(&self) -> [String; 3] {
        [self.legs[0].symbol(), self.legs[1].symbol(), self.legs[2].symbol()]
    }

    pub fn label(&self) -> String {
        let mut assets = vec![self.x().to_string(), self.y().to_string(), self.z().to_string()];
        assets.sort();
        assets.join("-")
    }
}

impl fmt::Display for Triangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}->{}", self.x(), self.y(), self.z())
    }
}

/// Which side of each pair a cycle direction reads/writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleDirection {
    /// "sell Y/Z, buy X/Z, sell X/Y": reads bids(YZ), asks(XZ), bids(XY)
    A,
    /// "buy Y/Z, sell X/Z, buy X/Y": reads asks(YZ), bids(XZ), asks(XY)
    B,
}

impl fmt::Display for CycleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleDirection::A => write!(f, "A"),
            CycleDirection::B => write!(f, "B"),
        }
    }
}

/// Per-symbol exchange lot/notional constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRequirements {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub amount_step: Decimal,
    pub min_notional: Decimal,
}

/// One rung of an order book ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub volume: Decimal,
}

/// A read-only snapshot of one symbol's order book, as materialised by the
/// websocket adapter. Bids are price-descending, asks price-ascending.
#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub valid: bool,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            valid: false,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    pub fn is_usable(&self) -> bool {
        self.valid && !self.bids.is_empty() && !self.asks.is_empty()
    }
}

/// One leg of an arbitrage cycle or a planned/executed order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketAction {
    pub pair: Pair,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub amount: Decimal,
}

impl MarketAction {
    pub fn new(pair: Pair, side: Side, price: Decimal, amount: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Limit,
            price,
            amount,
        }
    }

    pub fn symbol(&self) -> String {
        self.pair.symbol()
    }

    /// Asset debited to place this action: quote on buy, base on sell.
    pub fn spendable_asset(&self) -> &str {
        match self.side {
            Side::Buy => &self.pair.quote,
            Side::Sell => &self.pair.base,
        }
    }

    /// Quantity of the spendable asset needed to place this action.
    pub fn amount_needed(&self) -> Decimal {
        match self.side {
            Side::Buy => self.amount * self.price,
            Side::Sell => self.amount,
        }
    }

    /// Asset credited once this action fills: base on buy, quote on sell.
    pub fn gained_asset(&self) -> &str {
        match self.side {
            Side::Buy => &self.pair.base,
            Side::Sell => &self.pair.quote,
        }
    }
}

/// A fully detected, profitable, normalised arbitrage opportunity.
#[derive(Debug, Clone)]
pub struct Arbitrage {
    pub triangle: Triangle,
    pub direction: CycleDirection,
    /// The three legs in canonical cycle order: yz, xz, xy.
    pub actions: [MarketAction; 3],
    pub amount_z_spend: Decimal,
    pub profit_z: Decimal,
    pub profit_z_rel: Decimal,
    pub profit_x: Decimal,
    pub profit_y: Decimal,
    pub depth: usize,
    pub detected_at_ms: i64,
}

impl Arbitrage {
    pub fn x(&self) -> &str {
        self.triangle.x()
    }
    pub fn y(&self) -> &str {
        self.triangle.y()
    }
    pub fn z(&self) -> &str {
        self.triangle.z()
    }

    pub fn key(&self) -> (Triangle, CycleDirection) {
        (self.triangle.clone(), self.direction)
    }
}

/// Tracks, per (triangle, direction), the timestamp the opportunity was
/// first seen profitable; zero means "not currently profitable".
#[derive(Debug, Default)]
pub struct OpportunityAge {
    first_seen_ms: HashMap<(Triangle, CycleDirection), i64>,
}

impl OpportunityAge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_seen(&self, key: &(Triangle, CycleDirection)) -> i64 {
        self.first_seen_ms.get(key).copied().unwrap_or(0)
    }

    pub fn mark_seen(&mut self, key: (Triangle, CycleDirection), now_ms: i64) {
        self.first_seen_ms.entry(key).or_insert(now_ms);
    }

    pub fn reset(&mut self, key: &(Triangle, CycleDirection)) -> bool {
        self.first_seen_ms.remove(key).is_some()
    }
}

/// An ordered execution plan; each step runs concurrently, steps run in order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Vec<MarketAction>>,
}

impl Plan {
    pub fn total_legs(&self) -> usize {
        self.steps.iter().map(|s| s.len()).sum()
    }

    pub fn parallelism(&self) -> usize {
        self.steps.first().map(|s| s.len()).unwrap_or(0)
    }
}

/// The outcome of a single placed order, as observed from the venue.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub symbol: String,
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub amount_original: Decimal,
    pub amount_executed: Decimal,
    pub quote_amount_executed: Decimal,
    pub status: OrderStatus,
    pub placed_at_ms: i64,
    pub done_at_ms: i64,
}

impl OrderResult {
    pub fn fill_fraction(&self) -> Decimal {
        if self.amount_original.is_zero() {
            return Decimal::ZERO;
        }
        self.amount_executed / self.amount_original
    }

    pub fn is_fully_filled(&self) -> bool {
        self.status == OrderStatus::Filled
            || (self.amount_original > Decimal::ZERO && self.amount_executed >= self.amount_original)
    }

    pub fn is_unfilled(&self) -> bool {
        self.amount_executed.is_zero()
    }
}

/// Final classification of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Normal,
    Unfilled,
    Failed,
    Reverted(u32),
    Finalized,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Normal => write!(f, "normal"),
            Scenario::Unfilled => write!(f, "unfilled"),
            Scenario::Failed => write!(f, "failed"),
            Scenario::Reverted(n) => write!(f, "reverted {n}"),
            Scenario::Finalized => write!(f, "finalized"),
        }
    }
}

/// Per-leg placed/done timings plus the overall completion time, all in ms
/// relative to a single per-Arbitrage reference timestamp.
#[derive(Debug, Clone, Default)]
pub struct Timing {
    pub all_placed_in_ms: i64,
    pub placed_in_ms: Vec<i64>,
    pub done_in_ms: Vec<i64>,
    pub completed_in_ms: i64,
}

/// Summary of one full execution attempt, emitted regardless of outcome.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub parallelism: usize,
    pub scenario: Scenario,
    pub orders: Vec<OrderResult>,
    pub timing: Timing,
}

/// Balance mapping for quick lookups, asset -> available amount.
pub type BalanceMap = HashMap<String, Decimal>;

/// Metadata about a liquid trading pair, as derived from instruments-info
/// and the latest ticker. Used by the triangle indexer and liquidity
/// filtering; the executable book ladders live in `OrderBookSnapshot`.
#[derive(Debug, Clone)]
pub struct MarketPair {
    pub base: String,
    pub quote: String,
    pub symbol: String,
    pub last_price: Decimal,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub volume_24h: Decimal,
    pub volume_24h_usd: Decimal,
    pub spread_percent: Decimal,
    pub requirements: SymbolRequirements,
    pub is_active: bool,
    pub is_liquid: bool,
}

impl MarketPair {
    pub fn new(instrument: &InstrumentInfo, ticker: &TickerInfo) -> Option<Self> {
        use std::str::FromStr;

        if instrument.status != "Trading" {
            return None;
        }

        let lot = instrument.lot_size_filter.as_ref()?;
        let min_amount = Decimal::from_str(&lot.min_order_qty).ok()?;
        let max_amount = lot
            .max_order_qty
            .parse::<Decimal>()
            .unwrap_or_else(|_| Decimal::from(1_000_000_000u64));
        let amount_step = lot
            .qty_step
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or_else(|| Decimal::new(1, 3));
        let min_notional = lot
            .min_notional_value
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        let last_price = ticker.last_price.as_ref().and_then(|s| Decimal::from_str(s).ok())?;
        let bid_price = ticker.bid1_price.as_ref().and_then(|s| Decimal::from_str(s).ok())?;
        let ask_price = ticker.ask1_price.as_ref().and_then(|s| Decimal::from_str(s).ok())?;
        let bid_size = ticker
            .bid1_size
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        let ask_size = ticker
            .ask1_size
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        let volume_24h = ticker
            .volume24h
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        let turnover_24h = ticker
            .turnover24h
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        if last_price <= Decimal::ZERO
            || bid_price <= Decimal::ZERO
            || ask_price <= Decimal::ZERO
            || bid_price >= ask_price
        {
            return None;
        }

        let spread_percent = (ask_price - bid_price) / bid_price * Decimal::from(100);
        let volume_24h_usd = if turnover_24h > Decimal::ZERO {
            turnover_24h
        } else {
            volume_24h * last_price
        };

        let is_liquid = volume_24h_usd >= crate::config::min_volume_24h_usd()
            && spread_percent <= crate::config::max_spread_percent()
            && bid_size * bid_price >= crate::config::min_bid_size_usd()
            && ask_size * ask_price >= crate::config::min_ask_size_usd();

        Some(MarketPair {
            base: instrument.base_coin.clone(),
            quote: instrument.quote_coin.clone(),
            symbol: instrument.symbol.clone(),
            last_price,
            bid_price,
            ask_price,
            bid_size,
            ask_size,
            volume_24h,
            volume_24h_usd,
            spread_percent,
            requirements: SymbolRequirements {
                min_amount,
                max_amount,
                amount_step,
                min_notional,
            },
            is_active: true,
            is_liquid,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrageOpportunity {
    pub arbitrage: Arbitrage,
}

impl ArbitrageOpportunity {
    pub fn display_path(&self) -> String {
        format!(
            "{} -> {} -> {} -> {}",
            self.arbitrage.x(),
            self.arbitrage.y(),
            self.arbitrage.z(),
            self.arbitrage.x()
        )
    }

    pub fn display_pairs(&self) -> String {
        self.arbitrage
            .triangle
            .symbols()
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.arbitrage.detected_at_ms).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse {
            ret_code: 0,
            ret_msg: "OK".to_string(),
            result: Some("test_data".to_string()),
            ret_ext_info: None,
            time: Some(1234567890),
        };

        assert!(response.is_success());
        assert_eq!(response.into_result().unwrap(), "test_data");
    }

    #[test]
    fn test_api_response_error() {
        let response: ApiResponse<String> = ApiResponse {
            ret_code: 10001,
            ret_msg: "Invalid API key".to_string(),
            result: None,
            ret_ext_info: None,
            time: Some(1234567890),
        };

        assert!(!response.is_success());
        assert!(response.into_result().is_err());
    }

    #[test]
    fn test_triangle_closure_identity() {
        let yz = Pair::new("EOS", "ETH");
        let xz = Pair::new("ETH", "BTC");
        let xy = Pair::new("EOS", "BTC");
        // Canonical form requires yz.quote == xz.quote etc; build a properly
        // closed triple: X=ETH, Y=EOS, Z=BTC => yz=(EOS,BTC) xz=(ETH,BTC) xy=(ETH,EOS)... assemble directly
        let triangle = Triangle::new(
            Pair::new("EOS", "BTC"),
            Pair::new("ETH", "BTC"),
            Pair::new("ETH", "EOS"),
        );
        assert!(triangle.is_closed());
        assert_eq!(triangle.x(), "ETH");
        assert_eq!(triangle.y(), "EOS");
        assert_eq!(triangle.z(), "BTC");
        let _ = (yz, xz, xy);
    }

    #[test]
    fn test_market_action_spendable_asset() {
        let buy = MarketAction::new(Pair::new("ETH", "BTC"), Side::Buy, Decimal::new(7, 2), Decimal::ONE);
        assert_eq!(buy.spendable_asset(), "BTC");
        assert_eq!(buy.gained_asset(), "ETH");

        let sell = MarketAction::new(Pair::new("ETH", "BTC"), Side::Sell, Decimal::new(7, 2), Decimal::ONE);
        assert_eq!(sell.spendable_asset(), "ETH");
        assert_eq!(sell.gained_asset(), "BTC");
    }

    #[test]
    fn test_opportunity_age_lifecycle() {
        let triangle = Triangle::new(
            Pair::new("EOS", "BTC"),
            Pair::new("ETH", "BTC"),
            Pair::new("ETH", "EOS"),
        );
        let key = (triangle, CycleDirection::A);
        let mut age = OpportunityAge::new();
        assert_eq!(age.first_seen(&key), 0);
        age.mark_seen(key.clone(), 1000);
        assert_eq!(age.first_seen(&key), 1000);
        // marking again doesn't overwrite
        age.mark_seen(key.clone(), 2000);
        assert_eq!(age.first_seen(&key), 1000);
        assert!(age.reset(&key));
        assert_eq!(age.first_seen(&key), 0);
    }
}
