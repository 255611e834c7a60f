use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portfolio_manager::PortfolioLedger;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use trading_core::{
    Alert, ExitReason, MarketDataSource, PortfolioSnapshot, Position, TradingError, TradingResult,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
    pub position_id: String,
    pub symbol: String,
    pub reason: ExitReason,
    pub price: f64,
    pub pnl: f64,
}

/// What one monitor tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorReport {
    pub checked: usize,
    /// No last price this tick; retried next tick
    pub skipped: Vec<String>,
    pub closed: Vec<ClosedPosition>,
    pub errors: Vec<(String, String)>,
    pub snapshot: Option<PortfolioSnapshot>,
}

/// Close `position` at `price` and settle it against the ledger
pub async fn settle_close(
    ledger: &PortfolioLedger,
    mut position: Position,
    price: f64,
    reason: ExitReason,
) -> TradingResult<Position> {
    position.close(price, reason, Utc::now())?;
    ledger.apply_close(&position).await?;

    let message = format!(
        "Exit {} {} @ {:.6} pnl={:.2}",
        position.symbol, reason, price, position.realized_pnl
    );
    info!("{}", message);
    let alert = Alert::info(
        message,
        json!({"position_id": position.id, "market": position.market, "reason": reason}),
    );
    if let Err(e) = ledger.repository().append_alert(&alert).await {
        warn!("Failed to record exit alert for {}: {}", position.symbol, e);
    }
    Ok(position)
}

/// Marks open positions to market and enforces TP/SL
pub struct PositionMonitor {
    source: Arc<dyn MarketDataSource>,
    ledger: Arc<PortfolioLedger>,
    timeout: Duration,
}

impl PositionMonitor {
    pub fn new(source: Arc<dyn MarketDataSource>, ledger: Arc<PortfolioLedger>, timeout: Duration) -> Self {
        Self {
            source,
            ledger,
            timeout,
        }
    }

    async fn last_price(&self, symbol: &str) -> TradingResult<Option<f64>> {
        match tokio::time::timeout(self.timeout, self.source.get_last_price(symbol)).await {
            Ok(result) => Ok(result?.filter(|p| p.is_finite() && *p > 0.0)),
            Err(_) => Err(TradingError::Timeout(format!("last price for {}", symbol))),
        }
    }

    /// One pass over all open positions, then a portfolio snapshot.
    ///
    /// Per-position failures are collected in the report; only failing to
    /// read the open set or to write the snapshot is an error.
    pub async fn monitor_once(&self) -> TradingResult<MonitorReport> {
        let repo = self.ledger.repository();
        let positions = repo.open_positions().await?;
        let mut report = MonitorReport {
            checked: positions.len(),
            ..Default::default()
        };

        let mut still_open = Vec::with_capacity(positions.len());
        for mut position in positions {
            let price = match self.last_price(&position.symbol).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    debug!(symbol = %position.symbol, "no last price, skipping");
                    report.skipped.push(position.symbol.clone());
                    still_open.push(position);
                    continue;
                }
                Err(e) => {
                    warn!("Price lookup failed for {}: {}", position.symbol, e);
                    report.skipped.push(position.symbol.clone());
                    still_open.push(position);
                    continue;
                }
            };

            position.unrealized_pnl = position.pnl_at(price);

            let Some(reason) = position.exit_trigger(price) else {
                match repo.upsert_position(&position).await {
                    Ok(()) => still_open.push(position),
                    Err(TradingError::InvalidTransition { .. }) => {
                        debug!(symbol = %position.symbol, "closed during this tick")
                    }
                    Err(e) => {
                        report.errors.push((position.symbol.clone(), e.to_string()));
                        still_open.push(position);
                    }
                }
                continue;
            };

            let symbol = position.symbol.clone();
            match settle_close(&self.ledger, position.clone(), price, reason).await {
                Ok(closed) => report.closed.push(ClosedPosition {
                    position_id: closed.id,
                    symbol,
                    reason,
                    price,
                    pnl: closed.realized_pnl,
                }),
                Err(TradingError::InvalidTransition { .. }) => {
                    debug!(symbol = %symbol, "already closed elsewhere, no second settlement");
                }
                Err(e) => {
                    warn!("Failed to close {}: {}", symbol, e);
                    report.errors.push((symbol, e.to_string()));
                    still_open.push(position);
                }
            }
        }

        let snapshot = self.ledger.valuation(&still_open).await;
        repo.append_snapshot(&snapshot).await?;
        report.snapshot = Some(snapshot);

        Ok(report)
    }
}
