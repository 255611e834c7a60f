use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use advisor::Advisor;
use portfolio_manager::{AllocationConfig, AllocationContext, AllocationEngine, PortfolioLedger};
use serde::Serialize;
use serde_json::json;
use signal_engine::{
    quick_backtest, BacktestResult, ScannerConfig, SignalEnricher, SignalScanner, StrategyParams,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use trading_core::{
    Alert, AlertLevel, ExitReason, Market, MarketDataSource, OrderGateway, PortfolioSnapshot,
    Position, Regime, Repository, Side, Signal, TradingError, TradingResult,
};

use crate::config::AgentConfig;
use crate::metrics::{AgentMetrics, ExecutionSummary};
use crate::order_lifecycle::{manual_signal, ExecutionOutcome, OrderLifecycle};
use crate::position_monitor::{settle_close, MonitorReport, PositionMonitor};
use crate::scheduler::{JobRun, SingleFlight};

/// Operator-controlled switches
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Controls {
    pub kill_switch: bool,
    pub auto_trade: bool,
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    /// Executes only when auto trade is on
    Scheduled,
    Manual { execute: bool },
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub timeframe: String,
    pub regime: Regime,
    pub signals: Vec<Signal>,
    pub scored: usize,
    pub no_signal: usize,
    pub failed: usize,
    pub execution: Option<ExecutionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualOrder {
    pub symbol: String,
    pub market: Market,
    pub side: Side,
    pub qty: f64,
    pub entry: f64,
    pub tp: f64,
    pub sl: f64,
}

/// The scan, allocation and monitor loop plus its manual controls.
///
/// Built once at start and shared behind an `Arc`; every piece of mutable
/// state has exactly one owner (balances in the ledger, switches in
/// `controls`, positions and orders in the repository).
pub struct TradingAgent {
    config: AgentConfig,
    source: Arc<dyn MarketDataSource>,
    ledger: Arc<PortfolioLedger>,
    scanner: SignalScanner,
    enricher: SignalEnricher,
    allocation: AllocationEngine,
    lifecycle: OrderLifecycle,
    monitor: PositionMonitor,
    controls: RwLock<Controls>,
    metrics: Mutex<AgentMetrics>,
    scan_flight: SingleFlight,
    monitor_flight: SingleFlight,
}

impl TradingAgent {
    pub fn new(config: AgentConfig, source: Arc<dyn MarketDataSource>, ledger: Arc<PortfolioLedger>) -> Self {
        let timeout = config.external_timeout();
        let scanner_config = ScannerConfig {
            futures_symbols: config.futures_set(),
            max_leverage: config.max_leverage,
            candle_limit: config.candle_limit,
            timeout,
            regime_symbol: config.regime_symbol.clone(),
            regime_timeframe: config.regime_timeframe.clone(),
            persist_market_data: config.persist_market_data,
        };
        let mut scanner = SignalScanner::new(source.clone(), config.strategy.clone(), scanner_config);
        if config.persist_market_data {
            scanner = scanner.with_repository(ledger.repository().clone());
        }

        let allocation = AllocationEngine::new(AllocationConfig {
            spot_pct: config.spot_allocation_pct,
            futures_pct: config.futures_allocation_pct,
            max_positions: config.max_positions,
            min_confidence: config.confidence_threshold,
        });

        Self {
            scanner,
            enricher: SignalEnricher::new(None, timeout),
            allocation,
            lifecycle: OrderLifecycle::new(config.mode, ledger.clone(), config.max_leverage, timeout),
            monitor: PositionMonitor::new(source.clone(), ledger.clone(), timeout),
            controls: RwLock::new(Controls {
                kill_switch: false,
                auto_trade: config.auto_trade,
                confidence_threshold: config.confidence_threshold,
            }),
            metrics: Mutex::new(AgentMetrics::new(config.metrics_log_interval_cycles)),
            scan_flight: SingleFlight::new("scan"),
            monitor_flight: SingleFlight::new("monitor"),
            source,
            ledger,
            config,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.enricher = SignalEnricher::new(Some(advisor), self.config.external_timeout());
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn OrderGateway>) -> Self {
        self.lifecycle = self.lifecycle.with_gateway(gateway);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn repo(&self) -> &Arc<dyn Repository> {
        self.ledger.repository()
    }

    pub fn advisor_name(&self) -> &'static str {
        self.enricher.advisor_name()
    }

    pub async fn controls(&self) -> Controls {
        *self.controls.read().await
    }

    pub async fn metrics(&self) -> AgentMetrics {
        self.metrics.lock().await.clone()
    }

    async fn record_alert(&self, alert: Alert) {
        if let Err(e) = self.repo().append_alert(&alert).await {
            warn!("Failed to record alert '{}': {}", alert.message, e);
        }
    }

    /// Scan the universe, enrich, persist signals and, when the trigger
    /// asks for it, allocate. Scheduled and manual scans share one guard.
    pub async fn run_scan(&self, trigger: ScanTrigger) -> JobRun<TradingResult<ScanSummary>> {
        self.scan_flight.run(|| self.scan_inner(trigger)).await
    }

    async fn scan_inner(&self, trigger: ScanTrigger) -> TradingResult<ScanSummary> {
        let start = AgentMetrics::start_timer();
        let report = self
            .scanner
            .scan_and_score(&self.config.universe, &self.config.scan_timeframe)
            .await;
        let (scored, no_signal, failed) = (report.scored(), report.no_signal(), report.failed());

        let candidates = self.enricher.enrich_signals(report.candidates, &report.regime).await;
        let signals: Vec<Signal> = candidates.into_iter().map(|c| c.signal).collect();
        if !signals.is_empty() {
            self.repo().save_signals(&signals).await?;
        }

        let execute = match trigger {
            ScanTrigger::Scheduled => self.controls.read().await.auto_trade,
            ScanTrigger::Manual { execute } => execute,
        };
        let execution = if execute {
            let summary = self.allocate_and_execute(&signals).await?;
            self.metrics.lock().await.record_execution(&summary);
            Some(summary)
        } else {
            None
        };

        self.metrics.lock().await.record_scan(start, signals.len(), failed);
        info!(
            regime = report.regime.label.as_str(),
            scored,
            no_signal,
            failed,
            "Scan finished with {} signals{}",
            signals.len(),
            execution
                .map(|e| format!(" ({} placed, {} skipped, {} errors)", e.placed, e.skipped, e.errors))
                .unwrap_or_default()
        );

        Ok(ScanSummary {
            timeframe: report.timeframe,
            regime: report.regime,
            signals,
            scored,
            no_signal,
            failed,
            execution,
        })
    }

    /// Allocate across `signals` and push each allocation through the order
    /// lifecycle. Gateway failures are counted, not propagated.
    pub async fn allocate_and_execute(&self, signals: &[Signal]) -> TradingResult<ExecutionSummary> {
        let controls = self.controls().await;
        if controls.kill_switch {
            warn!("Kill switch engaged, no orders placed");
            return Ok(ExecutionSummary {
                halted: true,
                skipped: signals.len(),
                ..Default::default()
            });
        }

        let open = self.repo().open_positions().await?;
        let valuation = self.ledger.valuation(&open).await;
        let ctx = AllocationContext {
            equity: valuation.equity,
            cash: valuation.cash_by_market,
            open_positions: open.iter().map(|p| (p.symbol.clone(), p.market)).collect::<HashSet<_>>(),
            kill_switch: controls.kill_switch,
        };
        let plan = self
            .allocation
            .allocate(signals, &ctx, Some(controls.confidence_threshold));

        let mut summary = ExecutionSummary {
            halted: plan.halted,
            skipped: plan.skipped.len(),
            ..Default::default()
        };
        for allocation in &plan.allocations {
            match self.lifecycle.execute(&allocation.signal, allocation.qty).await {
                Ok(ExecutionOutcome::Filled { .. }) | Ok(ExecutionOutcome::Pending(_)) => summary.placed += 1,
                Ok(ExecutionOutcome::Canceled(_)) => summary.skipped += 1,
                Err(e) => {
                    error!("Order failed for {}: {}", allocation.signal.symbol, e);
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    pub async fn run_monitor(&self) -> JobRun<TradingResult<MonitorReport>> {
        self.monitor_flight
            .run(|| async {
                let start = AgentMetrics::start_timer();
                let report = self.monitor.monitor_once().await?;
                let mut metrics = self.metrics.lock().await;
                for closed in &report.closed {
                    metrics.record_exit(closed.pnl);
                }
                metrics.record_monitor(start);
                Ok::<_, TradingError>(report)
            })
            .await
    }

    /// Operator order. Skips scoring and allocation, still honours the kill
    /// switch and the order lifecycle.
    pub async fn place_manual_order(&self, order: ManualOrder) -> TradingResult<ExecutionOutcome> {
        if self.controls.read().await.kill_switch {
            return Err(TradingError::Halted("kill switch is engaged".to_string()));
        }
        let signal = manual_signal(&order.symbol, order.market, order.side, order.entry, order.tp, order.sl)?;
        self.lifecycle.execute(&signal, order.qty).await
    }

    async fn exit_price(&self, position: &Position) -> f64 {
        let lookup = tokio::time::timeout(
            self.config.external_timeout(),
            self.source.get_last_price(&position.symbol),
        )
        .await;
        match lookup {
            Ok(Ok(Some(price))) if price.is_finite() && price > 0.0 => price,
            _ => {
                warn!("No last price for {}, closing at entry", position.symbol);
                position.entry_price
            }
        }
    }

    pub async fn close_position(&self, position_id: &str) -> TradingResult<Position> {
        let position = self
            .repo()
            .get_position(position_id)
            .await?
            .ok_or_else(|| TradingError::Validation(format!("unknown position {}", position_id)))?;
        let price = self.exit_price(&position).await;
        let closed = settle_close(&self.ledger, position, price, ExitReason::Manual).await?;
        self.metrics.lock().await.record_exit(closed.realized_pnl);
        Ok(closed)
    }

    /// Close every open position at its last price; failures are logged and
    /// the rest still close
    pub async fn close_all_positions(&self) -> TradingResult<Vec<Position>> {
        let mut closed = Vec::new();
        for position in self.repo().open_positions().await? {
            let price = self.exit_price(&position).await;
            let symbol = position.symbol.clone();
            match settle_close(&self.ledger, position, price, ExitReason::Manual).await {
                Ok(p) => {
                    self.metrics.lock().await.record_exit(p.realized_pnl);
                    closed.push(p);
                }
                Err(e) => error!("Failed to close {}: {}", symbol, e),
            }
        }
        info!("Closed {} positions", closed.len());
        Ok(closed)
    }

    pub async fn set_kill_switch(&self, enabled: bool) {
        self.controls.write().await.kill_switch = enabled;
        let message = format!("Kill Switch set to {}", enabled);
        warn!("{}", message);
        self.record_alert(Alert::new(AlertLevel::Warn, message, json!({"kill_switch": enabled})))
            .await;
    }

    pub async fn set_auto_trade(&self, enabled: bool) {
        self.controls.write().await.auto_trade = enabled;
        let message = format!("Auto trade set to {}", enabled);
        info!("{}", message);
        self.record_alert(Alert::info(message, json!({"auto_trade": enabled})))
            .await;
    }

    pub async fn set_confidence_threshold(&self, threshold: f64) -> TradingResult<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TradingError::Validation(format!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        self.controls.write().await.confidence_threshold = threshold;
        let message = format!("Confidence threshold set to {:.2}", threshold);
        info!("{}", message);
        self.record_alert(Alert::info(message, json!({"confidence_threshold": threshold})))
            .await;
        Ok(())
    }

    pub async fn update_strategy(&self, params: StrategyParams) -> TradingResult<()> {
        let name = params.name.clone();
        self.scanner.update_params(params).await?;
        self.record_alert(Alert::info(format!("Strategy set to {}", name), json!({})))
            .await;
        Ok(())
    }

    /// Quick backtest of the active strategy on `symbol` over the scan
    /// timeframe, risking `risk_per_trade_pct` of equity per trade
    pub async fn backtest(&self, symbol: &str) -> TradingResult<BacktestResult> {
        let timeframe = &self.config.scan_timeframe;
        let candles = tokio::time::timeout(
            self.config.external_timeout(),
            self.source.get_candles(symbol, timeframe, self.config.candle_limit),
        )
        .await
        .map_err(|_| TradingError::Timeout(format!("candles for {} {}", symbol, timeframe)))??;
        if candles.is_empty() {
            return Err(TradingError::DataUnavailable(format!(
                "no {} candles for {}",
                timeframe, symbol
            )));
        }

        let params = self.scanner.params().await;
        let result = quick_backtest(&candles, &params, self.config.risk_per_trade_pct);
        info!(
            symbol,
            strategy = params.name.as_str(),
            trades = result.trades,
            "Backtest return {:.2}%",
            result.return_pct
        );
        Ok(result)
    }

    pub async fn recent_alerts(&self, limit: usize) -> TradingResult<Vec<Alert>> {
        self.repo().recent_alerts(limit).await
    }

    /// Snapshots oldest first
    pub async fn equity_curve(&self, limit: usize) -> TradingResult<Vec<PortfolioSnapshot>> {
        self.repo().snapshots(limit).await
    }

    /// Open notional (qty · entry) per symbol
    pub async fn exposure(&self) -> TradingResult<BTreeMap<String, f64>> {
        let mut exposure = BTreeMap::new();
        for p in self.repo().open_positions().await? {
            *exposure.entry(p.symbol).or_insert(0.0) += p.qty * p.entry_price;
        }
        Ok(exposure)
    }

    pub async fn open_positions(&self) -> TradingResult<Vec<Position>> {
        self.repo().open_positions().await
    }

    pub async fn portfolio(&self) -> TradingResult<PortfolioSnapshot> {
        let open = self.repo().open_positions().await?;
        Ok(self.ledger.valuation(&open).await)
    }
}
