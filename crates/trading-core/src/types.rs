use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TradingError;

/// OHLCV candle. Series are ordered ascending by `open_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Capital bucket an instrument trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Futures,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Market::Spot),
            "futures" => Ok(Market::Futures),
            other => Err(TradingError::Validation(format!("unknown market '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// +1 for long exposure, -1 for short
    pub fn direction(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(TradingError::Validation(format!("unknown side '{}'", other))),
        }
    }
}

/// Per-candle indicator snapshot.
///
/// Indicator fields are `None` during warm-up. Consumers must treat a missing
/// value as "no signal" rather than as zero. `breakout` is always defined
/// because it is evaluated over a partial window while warming up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub open_time: DateTime<Utc>,
    pub close: f64,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub atr: Option<f64>,
    pub atr_ratio: Option<f64>,
    pub adx: Option<f64>,
    pub breakout: bool,
}

impl FeatureRow {
    /// True once every indicator the scorer reads has left warm-up.
    /// ADX is excluded: an undefined ADX only disables regime weighting.
    pub fn is_warm(&self) -> bool {
        self.ema_fast.is_some()
            && self.ema_slow.is_some()
            && self.rsi.is_some()
            && self.macd.is_some()
            && self.macd_signal.is_some()
            && self.atr.is_some()
    }

    /// EMA spread normalised by 2% of price
    pub fn trend_strength(&self) -> Option<f64> {
        match (self.ema_fast, self.ema_slow) {
            (Some(fast), Some(slow)) => Some((fast - slow) / (0.02 * self.close).max(1e-9)),
            _ => None,
        }
    }
}

/// A feature row tagged with its instrument, for optional persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub row: FeatureRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeLabel {
    Bullish,
    Bearish,
    Sideways,
    /// Reference features were unavailable
    Unknown,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Bullish => "bullish",
            RegimeLabel::Bearish => "bearish",
            RegimeLabel::Sideways => "sideways",
            RegimeLabel::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityBucket {
    Low,
    Med,
    High,
}

impl VolatilityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityBucket::Low => "low",
            VolatilityBucket::Med => "med",
            VolatilityBucket::High => "high",
        }
    }
}

/// Market state computed once per scan cycle from a reference instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regime {
    pub label: RegimeLabel,
    pub trend_strength: f64,
    pub volatility_bucket: VolatilityBucket,
    pub rsi: Option<f64>,
    pub atr_ratio: Option<f64>,
}

impl Regime {
    pub fn neutral() -> Self {
        Self {
            label: RegimeLabel::Unknown,
            trend_strength: 0.0,
            volatility_bucket: VolatilityBucket::Med,
            rsi: None,
            atr_ratio: None,
        }
    }
}

impl Default for Regime {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Scored trade candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub market: Market,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64, // 0.0 to 1.0
    pub expected_return_pct: f64,
    pub suggested_leverage: Option<f64>,
    pub entry: f64,
    pub tp: f64,
    pub sl: f64,
    pub side: Side,
    pub rationale: String,
    pub strategy_tag: String,
}

impl Signal {
    /// Reward-to-risk ratio of the proposed levels, None when risk is not positive
    pub fn risk_reward(&self) -> Option<f64> {
        let (reward, risk) = match self.side {
            Side::Buy => (self.tp - self.entry, self.entry - self.sl),
            Side::Sell => (self.entry - self.tp, self.sl - self.entry),
        };
        (risk > 0.0).then(|| reward / risk)
    }
}

/// Numeric context handed to the risk overlay and the advisor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalFeatures {
    pub price: f64,
    pub tp: f64,
    pub sl: f64,
    pub rr: Option<f64>,
    pub atr: Option<f64>,
    pub atr_ratio: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    /// (ema_fast - ema_slow) normalised by 2% of price
    pub trend_strength: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub breakout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

impl FromStr for OrderType {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(TradingError::Validation(format!("invalid order_type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Partial,
    Filled,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled)
    }

    /// Forward-only transition table. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::New => next != OrderStatus::New,
            OrderStatus::Partial => matches!(next, OrderStatus::Filled | OrderStatus::Canceled),
            OrderStatus::Filled | OrderStatus::Canceled => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(OrderStatus::New),
            "partial" | "partially_filled" => Ok(OrderStatus::Partial),
            "filled" => Ok(OrderStatus::Filled),
            "canceled" | "cancelled" => Ok(OrderStatus::Canceled),
            other => Err(TradingError::Validation(format!("unknown order status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: f64,
    pub status: OrderStatus,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Move the order forward; regressions and re-entry of terminal states are rejected.
    pub fn transition(&mut self, next: OrderStatus, at: DateTime<Utc>) -> Result<(), TradingError> {
        if !self.status.can_transition_to(next) {
            return Err(TradingError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(TradingError::Validation(format!("unknown position status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "TP",
            ExitReason::StopLoss => "SL",
            ExitReason::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitReason {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TP" => Ok(ExitReason::TakeProfit),
            "SL" => Ok(ExitReason::StopLoss),
            "MANUAL" => Ok(ExitReason::Manual),
            other => Err(TradingError::Validation(format!("unknown exit reason '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    pub entry_price: f64,
    pub qty: f64,
    pub leverage: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market pnl at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.qty * self.side.direction()
    }

    /// Side-correct TP/SL check. TP wins if both levels are crossed.
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        let (hit_tp, hit_sl) = match self.side {
            Side::Buy => (
                self.tp.is_some_and(|tp| price >= tp),
                self.sl.is_some_and(|sl| price <= sl),
            ),
            Side::Sell => (
                self.tp.is_some_and(|tp| price <= tp),
                self.sl.is_some_and(|sl| price >= sl),
            ),
        };
        if hit_tp {
            Some(ExitReason::TakeProfit)
        } else if hit_sl {
            Some(ExitReason::StopLoss)
        } else {
            None
        }
    }

    /// Cash taken from the market balance when the position was opened:
    /// full notional on spot, margin on futures.
    pub fn locked_capital(&self) -> f64 {
        let notional = self.entry_price * self.qty;
        match self.market {
            Market::Spot => notional,
            Market::Futures => notional / self.leverage.max(1.0),
        }
    }

    /// Close at `price`. Returns realised pnl; a closed position never reopens.
    pub fn close(
        &mut self,
        price: f64,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Result<f64, TradingError> {
        if !self.is_open() {
            return Err(TradingError::InvalidTransition {
                from: PositionStatus::Closed.as_str().to_string(),
                to: PositionStatus::Closed.as_str().to_string(),
            });
        }
        let pnl = self.pnl_at(price);
        self.realized_pnl = pnl;
        self.unrealized_pnl = 0.0;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(at);
        self.exit_reason = Some(reason);
        Ok(pnl)
    }
}

/// Cash per market bucket
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub spot: f64,
    pub futures: f64,
}

impl Balances {
    pub fn new(spot: f64, futures: f64) -> Self {
        Self { spot, futures }
    }

    pub fn get(&self, market: Market) -> f64 {
        match market {
            Market::Spot => self.spot,
            Market::Futures => self.futures,
        }
    }

    pub fn get_mut(&mut self, market: Market) -> &mut f64 {
        match market {
            Market::Spot => &mut self.spot,
            Market::Futures => &mut self.futures,
        }
    }

    pub fn total(&self) -> f64 {
        self.spot + self.futures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash_by_market: Balances,
    pub margin_used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warn,
    Error,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warn => "WARN",
            AlertLevel::Error => "ERROR",
        }
    }
}

impl FromStr for AlertLevel {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(AlertLevel::Info),
            "WARN" | "WARNING" => Ok(AlertLevel::Warn),
            "ERROR" => Ok(AlertLevel::Error),
            other => Err(TradingError::Validation(format!("unknown alert level '{}'", other))),
        }
    }
}

/// Audit trail entry for state-changing events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub message: String,
    pub context: serde_json::Value,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        }
    }

    pub fn info(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(AlertLevel::Info, message, context)
    }

    pub fn warn(message: impl Into<String>, context: serde_json::Value) -> Self {
        Self::new(AlertLevel::Warn, message, context)
    }
}
