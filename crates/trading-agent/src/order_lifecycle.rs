use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portfolio_manager::PortfolioLedger;
use serde_json::json;
use tracing::{error, info, warn};
use trading_core::{
    Alert, AlertLevel, Market, Order, OrderGateway, OrderRequest, OrderStatus, OrderType, Position,
    PositionStatus, Side, Signal, TradingError, TradingResult,
};
use uuid::Uuid;

use crate::config::Mode;

/// Result of pushing one order through the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Order filled and a position was opened
    Filled { order: Order, position: Position },
    /// Accepted but not (fully) filled; `partial` orders await reconciliation
    Pending(Order),
    Canceled(Order),
}

impl ExecutionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ExecutionOutcome::Filled { order, .. } => order,
            ExecutionOutcome::Pending(order) | ExecutionOutcome::Canceled(order) => order,
        }
    }
}

/// Turns an allocation decision into an order and, on fill, a position
pub struct OrderLifecycle {
    mode: Mode,
    gateway: Option<Arc<dyn OrderGateway>>,
    ledger: Arc<PortfolioLedger>,
    max_leverage: f64,
    timeout: Duration,
}

fn client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("cli-{}", &id[..10])
}

impl OrderLifecycle {
    pub fn new(mode: Mode, ledger: Arc<PortfolioLedger>, max_leverage: f64, timeout: Duration) -> Self {
        Self {
            mode,
            gateway: None,
            ledger,
            max_leverage: max_leverage.max(1.0),
            timeout,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn OrderGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn leverage_for(&self, signal: &Signal) -> f64 {
        match signal.market {
            Market::Spot => 1.0,
            Market::Futures => signal
                .suggested_leverage
                .unwrap_or(self.max_leverage)
                .clamp(1.0, self.max_leverage),
        }
    }

    /// Place `qty` units of `signal`. Futures multiply `qty` by leverage so
    /// that the capital debited stays `qty * entry`.
    pub async fn execute(&self, signal: &Signal, qty: f64) -> TradingResult<ExecutionOutcome> {
        if qty <= 0.0 || !qty.is_finite() {
            return Err(TradingError::Validation(format!(
                "{}: quantity must be positive, got {}",
                signal.symbol, qty
            )));
        }
        if signal.entry <= 0.0 || !signal.entry.is_finite() {
            return Err(TradingError::Validation(format!(
                "{}: entry must be positive",
                signal.symbol
            )));
        }

        let leverage = self.leverage_for(signal);
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            exchange_order_id: None,
            symbol: signal.symbol.clone(),
            market: signal.market,
            side: signal.side,
            order_type: match signal.market {
                Market::Spot => OrderType::Market,
                Market::Futures => OrderType::Limit,
            },
            qty: qty * leverage,
            price: signal.entry,
            status: OrderStatus::New,
            tp_price: Some(signal.tp),
            sl_price: Some(signal.sl),
            client_id: client_id(),
            created_at: now,
            updated_at: now,
        };

        match (&self.gateway, self.mode.is_simulated()) {
            (Some(gateway), false) => self.execute_live(gateway.as_ref(), order, leverage).await,
            (None, false) => Err(TradingError::Config(
                "live mode requires an order gateway".to_string(),
            )),
            (_, true) => self.execute_simulated(order, leverage).await,
        }
    }

    async fn execute_simulated(&self, mut order: Order, leverage: f64) -> TradingResult<ExecutionOutcome> {
        order.transition(OrderStatus::Filled, Utc::now())?;
        let position = self.open_position(&order, leverage).await?;

        let tag = match order.market {
            Market::Spot => "SPOT",
            Market::Futures => "FUT",
        };
        let message = format!(
            "SIM {} {} {} qty={:.6} lev={} @ {:.6}",
            tag, order.side, order.symbol, order.qty, leverage, order.price
        );
        info!("{}", message);
        self.alert(Alert::info(
            message,
            json!({"order_id": order.id, "position_id": position.id, "client_id": order.client_id}),
        ))
        .await;

        Ok(ExecutionOutcome::Filled { order, position })
    }

    async fn execute_live(
        &self,
        gateway: &dyn OrderGateway,
        mut order: Order,
        leverage: f64,
    ) -> TradingResult<ExecutionOutcome> {
        // The venue must never fill an order the ledger cannot book
        let required = order.qty * order.price / leverage;
        let available = self.ledger.balances().await.get(order.market);
        if required > available + 1e-9 {
            return Err(TradingError::Validation(format!(
                "insufficient {} balance for {}: need {:.2}, have {:.2}",
                order.market, order.symbol, required, available
            )));
        }

        let request = OrderRequest {
            symbol: order.symbol.clone(),
            market: order.market,
            side: order.side,
            order_type: order.order_type,
            qty: order.qty,
            price: (order.order_type == OrderType::Limit).then_some(order.price),
            leverage: (order.market == Market::Futures).then_some(leverage),
            client_id: order.client_id.clone(),
        };

        let ack = match tokio::time::timeout(self.timeout, gateway.place_order(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TradingError::Timeout(format!(
                    "{} place_order {}",
                    gateway.gateway_name(),
                    order.symbol
                )))
            }
        };

        order.exchange_order_id = ack.exchange_order_id;
        if let Some(avg) = ack.avg_price.filter(|p| *p > 0.0) {
            order.price = avg;
        }
        if ack.status != OrderStatus::New {
            order.transition(ack.status, Utc::now())?;
        }

        let context = json!({
            "order_id": order.id,
            "exchange_order_id": order.exchange_order_id,
            "client_id": order.client_id,
            "gateway": gateway.gateway_name(),
        });

        match order.status {
            OrderStatus::Filled => {
                let position = match self.open_position(&order, leverage).await {
                    Ok(position) => position,
                    Err(e) => {
                        self.record_unbooked_fill(&order, context, &e).await;
                        return Err(e);
                    }
                };
                let message = format!(
                    "LIVE {} {} {} qty={:.6} @ {:.6}",
                    order.market, order.side, order.symbol, order.qty, order.price
                );
                info!("{}", message);
                self.alert(Alert::info(message, context)).await;
                Ok(ExecutionOutcome::Filled { order, position })
            }
            OrderStatus::Partial => {
                self.ledger.repository().upsert_order(&order).await?;
                let message = format!(
                    "Partial fill {} {} qty={:.6}, awaiting reconciliation",
                    order.side, order.symbol, order.qty
                );
                warn!("{}", message);
                self.alert(Alert::warn(message, context)).await;
                Ok(ExecutionOutcome::Pending(order))
            }
            OrderStatus::New => {
                self.ledger.repository().upsert_order(&order).await?;
                info!("Order {} for {} accepted, not yet filled", order.id, order.symbol);
                Ok(ExecutionOutcome::Pending(order))
            }
            OrderStatus::Canceled => {
                self.ledger.repository().upsert_order(&order).await?;
                let message = format!("Order canceled {} {}", order.side, order.symbol);
                warn!("{}", message);
                self.alert(Alert::warn(message, context)).await;
                Ok(ExecutionOutcome::Canceled(order))
            }
        }
    }

    /// Create the position for a filled order and commit it with the
    /// balance debit
    async fn open_position(&self, order: &Order, leverage: f64) -> TradingResult<Position> {
        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol: order.symbol.clone(),
            market: order.market,
            side: order.side,
            entry_price: order.price,
            qty: order.qty,
            leverage,
            sl: order.sl_price,
            tp: order.tp_price,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: order.updated_at,
            closed_at: None,
            exit_reason: None,
        };
        self.ledger.apply_fill(order, &position).await?;
        Ok(position)
    }

    /// A fill the venue confirmed but the ledger rejected. The order row and
    /// an ERROR alert keep it visible for reconciliation.
    async fn record_unbooked_fill(&self, order: &Order, context: serde_json::Value, cause: &TradingError) {
        if let Err(e) = self.ledger.repository().upsert_order(order).await {
            error!("Failed to persist filled order {}: {}", order.id, e);
        }
        let message = format!(
            "Filled {} {} qty={:.6} @ {:.6} on venue but not booked: {}",
            order.side, order.symbol, order.qty, order.price, cause
        );
        error!("{}", message);
        self.alert(Alert::new(AlertLevel::Error, message, context)).await;
    }

    async fn alert(&self, alert: Alert) {
        if let Err(e) = self.ledger.repository().append_alert(&alert).await {
            warn!("Failed to record alert '{}': {}", alert.message, e);
        }
    }
}

/// Signal for an operator-entered order; bypasses scoring and allocation
pub fn manual_signal(
    symbol: &str,
    market: Market,
    side: Side,
    entry: f64,
    tp: f64,
    sl: f64,
) -> TradingResult<Signal> {
    if symbol.trim().is_empty() {
        return Err(TradingError::Validation("symbol is required".to_string()));
    }
    if entry <= 0.0 || !entry.is_finite() {
        return Err(TradingError::Validation("entry must be positive".to_string()));
    }
    let (tp_ok, sl_ok) = match side {
        Side::Buy => (tp > entry, sl < entry),
        Side::Sell => (tp < entry, sl > entry),
    };
    if !tp_ok || !sl_ok {
        return Err(TradingError::Validation(format!(
            "tp {} / sl {} are on the wrong side of entry {} for {}",
            tp, sl, entry, side
        )));
    }

    Ok(Signal {
        symbol: symbol.trim().to_uppercase(),
        market,
        timeframe: "manual".to_string(),
        timestamp: Utc::now(),
        confidence: 1.0,
        expected_return_pct: (tp - entry) / entry * 100.0 * side.direction(),
        suggested_leverage: None,
        entry,
        tp,
        sl,
        side,
        rationale: "Manual order".to_string(),
        strategy_tag: "manual".to_string(),
    })
}
