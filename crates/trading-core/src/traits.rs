use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Alert, Balances, Candle, FeatureSnapshot, Market, Order, OrderStatus, OrderType,
    PortfolioSnapshot, Position, Side, Signal, TradingResult,
};

/// Source of candles and last prices
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Most recent `limit` candles, ascending by open time
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> TradingResult<Vec<Candle>>;

    /// Latest traded price, `None` when the source has nothing for the symbol
    async fn get_last_price(&self, symbol: &str) -> TradingResult<Option<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: Option<f64>,
    pub leverage: Option<f64>,
    pub client_id: String,
}

/// What a venue reports back after accepting an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayAck {
    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,
    pub avg_price: Option<f64>,
}

/// Live order routing. Paper mode never touches an implementation of this.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> TradingResult<GatewayAck>;

    fn gateway_name(&self) -> &str;
}

/// Durable store for market data, signals and trading state.
///
/// `commit_fill` and `commit_close` must apply all of their writes atomically.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_candles(&self, candles: &[Candle]) -> TradingResult<()>;

    async fn save_feature_snapshot(&self, snapshot: &FeatureSnapshot) -> TradingResult<()>;

    async fn save_signals(&self, signals: &[Signal]) -> TradingResult<()>;

    async fn upsert_order(&self, order: &Order) -> TradingResult<()>;

    async fn upsert_position(&self, position: &Position) -> TradingResult<()>;

    /// Order, new position and balance debit in one transaction
    async fn commit_fill(
        &self,
        order: &Order,
        position: &Position,
        balances: &Balances,
    ) -> TradingResult<()>;

    /// Closed position and balance credit in one transaction
    async fn commit_close(&self, position: &Position, balances: &Balances) -> TradingResult<()>;

    async fn get_position(&self, id: &str) -> TradingResult<Option<Position>>;

    async fn open_positions(&self) -> TradingResult<Vec<Position>>;

    async fn recent_orders(&self, limit: usize) -> TradingResult<Vec<Order>>;

    async fn append_snapshot(&self, snapshot: &PortfolioSnapshot) -> TradingResult<()>;

    /// Snapshots ascending by timestamp, newest `limit`
    async fn snapshots(&self, limit: usize) -> TradingResult<Vec<PortfolioSnapshot>>;

    async fn append_alert(&self, alert: &Alert) -> TradingResult<()>;

    /// Alerts newest first
    async fn recent_alerts(&self, limit: usize) -> TradingResult<Vec<Alert>>;

    async fn load_balances(&self) -> TradingResult<Option<Balances>>;

    async fn save_balances(&self, balances: &Balances) -> TradingResult<()>;
}
