use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use portfolio_manager::{PortfolioLedger, SqliteRepository};
use tokio::sync::Notify;
use trading_core::{
    AlertLevel, Balances, Candle, ExitReason, GatewayAck, Market, MarketDataSource, OrderGateway,
    OrderRequest, OrderStatus, OrderType, Position, PositionStatus, Repository, Side, Signal,
    TradingError, TradingResult,
};

use crate::config::{AgentConfig, Mode};
use crate::market_data::CsvMarketData;
use crate::order_lifecycle::{manual_signal, ExecutionOutcome, OrderLifecycle};
use crate::position_monitor::{MonitorReport, PositionMonitor};
use crate::scheduler::{JobRun, Scheduler, SingleFlight};
use crate::{ManualOrder, ScanTrigger, TradingAgent};

/// Price board the tests move by hand. Symbols in `broken` fail every call.
#[derive(Default)]
struct FixtureSource {
    prices: StdMutex<HashMap<String, f64>>,
    broken: HashSet<String>,
    /// (entered, release) for the next price lookup only
    hold: StdMutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FixtureSource {
    fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Make the next `get_last_price` signal `entered` and wait for `release`
    fn hold_next_lookup(&self) -> (Arc<Notify>, Arc<Notify>) {
        let gates = (Arc::new(Notify::new()), Arc::new(Notify::new()));
        *self.hold.lock().unwrap() = Some(gates.clone());
        gates
    }
}

#[async_trait]
impl MarketDataSource for FixtureSource {
    async fn get_candles(&self, symbol: &str, _timeframe: &str, _limit: usize) -> TradingResult<Vec<Candle>> {
        if self.broken.contains(symbol) {
            return Err(TradingError::DataUnavailable(format!("{} feed down", symbol)));
        }
        Ok(Vec::new())
    }

    async fn get_last_price(&self, symbol: &str) -> TradingResult<Option<f64>> {
        let hold = self.hold.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
        if self.broken.contains(symbol) {
            return Err(TradingError::DataUnavailable(format!("{} feed down", symbol)));
        }
        Ok(self.prices.lock().unwrap().get(symbol).copied())
    }
}

enum Script {
    Ack(OrderStatus),
    Fail,
    Hang,
}

struct ScriptedGateway {
    script: Script,
    fill_price: Option<f64>,
    requests: StdMutex<Vec<OrderRequest>>,
}

impl ScriptedGateway {
    fn new(script: Script) -> Self {
        Self {
            script,
            fill_price: None,
            requests: StdMutex::new(Vec::new()),
        }
    }

    fn filling_at(mut self, price: f64) -> Self {
        self.fill_price = Some(price);
        self
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    async fn place_order(&self, request: &OrderRequest) -> TradingResult<GatewayAck> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script {
            Script::Ack(status) => Ok(GatewayAck {
                status,
                exchange_order_id: Some("ex-1".to_string()),
                avg_price: self.fill_price.or(request.price).or(Some(100.0)),
            }),
            Script::Fail => Err(TradingError::Gateway("rejected: insufficient margin".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(TradingError::Gateway("unreachable".to_string()))
            }
        }
    }

    fn gateway_name(&self) -> &str {
        "scripted"
    }
}

async fn ledger(spot: f64, futures: f64) -> Arc<PortfolioLedger> {
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new("sqlite::memory:").await.unwrap());
    Arc::new(PortfolioLedger::open(repo, Balances::new(spot, futures)).await.unwrap())
}

fn test_config() -> AgentConfig {
    AgentConfig {
        universe: vec!["BTCUSDT".to_string(), "ADAUSDT".to_string()],
        external_timeout_seconds: 1,
        ..AgentConfig::default()
    }
}

async fn agent_with(source: Arc<FixtureSource>) -> TradingAgent {
    let ledger = ledger(10_000.0, 5_000.0).await;
    TradingAgent::new(test_config(), source, ledger)
}

fn signal(symbol: &str, market: Market, confidence: f64) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        market,
        timeframe: "1h".to_string(),
        timestamp: Utc::now(),
        confidence,
        expected_return_pct: 10.0,
        suggested_leverage: match market {
            Market::Spot => None,
            Market::Futures => Some(2.0),
        },
        entry: 100.0,
        tp: 110.0,
        sl: 95.0,
        side: Side::Buy,
        rationale: "breakout".to_string(),
        strategy_tag: "test".to_string(),
    }
}

fn manual(symbol: &str, qty: f64) -> ManualOrder {
    ManualOrder {
        symbol: symbol.to_string(),
        market: Market::Spot,
        side: Side::Buy,
        qty,
        entry: 100.0,
        tp: 110.0,
        sl: 95.0,
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_spot_fill_debits_notional() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let lifecycle = OrderLifecycle::new(Mode::Paper, ledger.clone(), 3.0, Duration::from_secs(1));

        let outcome = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), 10.0).await.unwrap();
        let ExecutionOutcome::Filled { order, position } = outcome else {
            panic!("expected a fill");
        };
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.order_type, OrderType::Market);
        assert!(order.client_id.starts_with("cli-"));
        assert_eq!(position.leverage, 1.0);

        let balances = ledger.balances().await;
        assert!((balances.spot - 9_000.0).abs() < 1e-9);
        assert!((balances.futures - 5_000.0).abs() < 1e-9);

        let alerts = ledger.repository().recent_alerts(5).await.unwrap();
        assert!(alerts[0].message.starts_with("SIM SPOT BUY ADAUSDT"));
    }

    #[tokio::test]
    async fn test_simulated_futures_fill_locks_margin_only() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let lifecycle = OrderLifecycle::new(Mode::DryRun, ledger.clone(), 3.0, Duration::from_secs(1));

        let outcome = lifecycle.execute(&signal("BTCUSDT", Market::Futures, 0.8), 10.0).await.unwrap();
        let ExecutionOutcome::Filled { order, position } = outcome else {
            panic!("expected a fill");
        };
        assert_eq!(order.order_type, OrderType::Limit);
        assert!((order.qty - 20.0).abs() < 1e-9);
        assert_eq!(position.leverage, 2.0);
        assert!((position.locked_capital() - 1_000.0).abs() < 1e-9);

        let balances = ledger.balances().await;
        assert!((balances.futures - 4_000.0).abs() < 1e-9);
        assert!((balances.spot - 10_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fill_beyond_cash_is_rejected() {
        let ledger = ledger(500.0, 0.0).await;
        let lifecycle = OrderLifecycle::new(Mode::Paper, ledger.clone(), 3.0, Duration::from_secs(1));

        let err = lifecycle
            .execute(&signal("ADAUSDT", Market::Spot, 0.8), 10.0)
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::Validation(_)));
        assert!(ledger.repository().open_positions().await.unwrap().is_empty());
        assert!((ledger.balances().await.spot - 500.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_non_positive_quantity_is_rejected() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let lifecycle = OrderLifecycle::new(Mode::Paper, ledger, 3.0, Duration::from_secs(1));
        for qty in [0.0, -1.0, f64::NAN] {
            let result = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), qty).await;
            assert!(matches!(result, Err(TradingError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_live_without_gateway_is_config_error() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let lifecycle = OrderLifecycle::new(Mode::Live, ledger, 3.0, Duration::from_secs(1));
        let result = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), 1.0).await;
        assert!(matches!(result, Err(TradingError::Config(_))));
    }

    #[tokio::test]
    async fn test_live_fill_opens_position_and_forwards_leverage() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let gateway = Arc::new(ScriptedGateway::new(Script::Ack(OrderStatus::Filled)));
        let lifecycle = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_secs(1))
            .with_gateway(gateway.clone());

        let outcome = lifecycle.execute(&signal("BTCUSDT", Market::Futures, 0.8), 5.0).await.unwrap();
        let ExecutionOutcome::Filled { order, .. } = outcome else {
            panic!("expected a fill");
        };
        assert_eq!(order.exchange_order_id.as_deref(), Some("ex-1"));

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].leverage, Some(2.0));
        assert_eq!(requests[0].price, Some(100.0));
        assert_eq!(requests[0].client_id, order.client_id);
        assert_eq!(ledger.repository().open_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_fill_waits_for_reconciliation() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let gateway = Arc::new(ScriptedGateway::new(Script::Ack(OrderStatus::Partial)));
        let lifecycle = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_secs(1))
            .with_gateway(gateway);

        let outcome = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), 5.0).await.unwrap();
        let ExecutionOutcome::Pending(order) = outcome else {
            panic!("expected a pending order");
        };
        assert_eq!(order.status, OrderStatus::Partial);

        let repo = ledger.repository();
        assert!(repo.open_positions().await.unwrap().is_empty());
        assert_eq!(repo.recent_orders(5).await.unwrap()[0].status, OrderStatus::Partial);
        let alerts = repo.recent_alerts(5).await.unwrap();
        assert_eq!(alerts[0].level, AlertLevel::Warn);
        assert!(alerts[0].message.contains("awaiting reconciliation"));
        assert!((ledger.balances().await.spot - 10_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gateway_errors_and_timeouts_surface() {
        let ledger = ledger(10_000.0, 5_000.0).await;

        let failing = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_secs(1))
            .with_gateway(Arc::new(ScriptedGateway::new(Script::Fail)));
        let result = failing.execute(&signal("ADAUSDT", Market::Spot, 0.8), 1.0).await;
        assert!(matches!(result, Err(TradingError::Gateway(_))));

        let hanging = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_millis(50))
            .with_gateway(Arc::new(ScriptedGateway::new(Script::Hang)));
        let result = hanging.execute(&signal("ADAUSDT", Market::Spot, 0.8), 1.0).await;
        assert!(matches!(result, Err(TradingError::Timeout(_))));

        assert!(ledger.repository().open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_order_beyond_cash_never_reaches_gateway() {
        let ledger = ledger(500.0, 0.0).await;
        let gateway = Arc::new(ScriptedGateway::new(Script::Ack(OrderStatus::Filled)));
        let lifecycle = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_secs(1))
            .with_gateway(gateway.clone());

        let result = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), 10.0).await;
        assert!(matches!(result, Err(TradingError::Validation(_))));
        assert!(gateway.requests.lock().unwrap().is_empty());
        assert!(ledger.repository().recent_orders(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unbooked_live_fill_keeps_order_and_raises_error_alert() {
        let ledger = ledger(500.0, 0.0).await;
        // Slippage pushes the fill above what the spot bucket holds
        let gateway = Arc::new(ScriptedGateway::new(Script::Ack(OrderStatus::Filled)).filling_at(120.0));
        let lifecycle = OrderLifecycle::new(Mode::Live, ledger.clone(), 3.0, Duration::from_secs(1))
            .with_gateway(gateway.clone());

        let result = lifecycle.execute(&signal("ADAUSDT", Market::Spot, 0.8), 5.0).await;
        assert!(matches!(result, Err(TradingError::Validation(_))));
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);

        let repo = ledger.repository();
        let orders = repo.recent_orders(5).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
        assert_eq!(orders[0].exchange_order_id.as_deref(), Some("ex-1"));

        let alerts = repo.recent_alerts(5).await.unwrap();
        assert_eq!(alerts[0].level, AlertLevel::Error);
        assert!(alerts[0].message.contains("not booked"));
        assert_eq!(alerts[0].context["exchange_order_id"], "ex-1");

        assert!(repo.open_positions().await.unwrap().is_empty());
        assert!((ledger.balances().await.spot - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_manual_signal_checks_target_sides() {
        let sig = manual_signal(" btcusdt ", Market::Spot, Side::Buy, 100.0, 110.0, 95.0).unwrap();
        assert_eq!(sig.symbol, "BTCUSDT");
        assert_eq!(sig.confidence, 1.0);
        assert_eq!(sig.strategy_tag, "manual");

        assert!(manual_signal("BTCUSDT", Market::Spot, Side::Buy, 100.0, 95.0, 110.0).is_err());
        assert!(manual_signal("BTCUSDT", Market::Spot, Side::Sell, 100.0, 90.0, 105.0).is_ok());
        assert!(manual_signal("BTCUSDT", Market::Spot, Side::Sell, 100.0, 110.0, 95.0).is_err());
        assert!(manual_signal("", Market::Spot, Side::Buy, 100.0, 110.0, 95.0).is_err());
    }
}

mod monitor_tests {
    use super::*;

    async fn monitor_with_open_long() -> (Arc<FixtureSource>, Arc<PortfolioLedger>, PositionMonitor) {
        let source = Arc::new(FixtureSource::default());
        let ledger = ledger(10_000.0, 5_000.0).await;
        let lifecycle = OrderLifecycle::new(Mode::Paper, ledger.clone(), 3.0, Duration::from_secs(1));
        lifecycle
            .execute(&signal("ADAUSDT", Market::Spot, 0.8), 10.0)
            .await
            .unwrap();
        let monitor = PositionMonitor::new(source.clone(), ledger.clone(), Duration::from_secs(1));
        (source, ledger, monitor)
    }

    #[tokio::test]
    async fn test_take_profit_closes_and_credits() {
        let (source, ledger, monitor) = monitor_with_open_long().await;
        source.set_price("ADAUSDT", 110.5);

        let report = monitor.monitor_once().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, ExitReason::TakeProfit);
        assert!((report.closed[0].pnl - 105.0).abs() < 1e-9);

        assert!(ledger.repository().open_positions().await.unwrap().is_empty());
        assert!((ledger.balances().await.spot - 10_105.0).abs() < 1e-9);

        let snapshot = report.snapshot.unwrap();
        assert!((snapshot.equity - 15_105.0).abs() < 1e-9);

        let alerts = ledger.repository().recent_alerts(1).await.unwrap();
        assert!(alerts[0].message.starts_with("Exit ADAUSDT"));
    }

    #[tokio::test]
    async fn test_stop_loss_closes_at_a_loss() {
        let (source, ledger, monitor) = monitor_with_open_long().await;
        source.set_price("ADAUSDT", 94.0);

        let report = monitor.monitor_once().await.unwrap();
        assert_eq!(report.closed[0].reason, ExitReason::StopLoss);
        assert!((report.closed[0].pnl + 60.0).abs() < 1e-9);
        assert!((ledger.balances().await.spot - 9_940.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_price_between_levels_marks_to_market() {
        let (source, ledger, monitor) = monitor_with_open_long().await;
        source.set_price("ADAUSDT", 102.0);

        let report = monitor.monitor_once().await.unwrap();
        assert!(report.closed.is_empty());

        let open = ledger.repository().open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, PositionStatus::Open);
        assert!((open[0].unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((report.snapshot.unwrap().equity - 15_020.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_price_skips_position() {
        let (_source, ledger, monitor) = monitor_with_open_long().await;

        let report = monitor.monitor_once().await.unwrap();
        assert_eq!(report.skipped, vec!["ADAUSDT".to_string()]);
        assert!(report.closed.is_empty());
        assert_eq!(ledger.repository().open_positions().await.unwrap().len(), 1);
        assert_eq!(ledger.repository().snapshots(10).await.unwrap().len(), 1);
    }
}

mod agent_tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_counts_every_symbol() {
        let source = Arc::new(FixtureSource {
            broken: ["ADAUSDT".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let agent = agent_with(source).await;

        let summary = agent
            .run_scan(ScanTrigger::Scheduled)
            .await
            .completed()
            .unwrap()
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.scored + summary.no_signal + summary.failed, 2);
        assert!(summary.signals.is_empty());
        assert!(summary.execution.is_none());

        let summary = agent
            .run_scan(ScanTrigger::Manual { execute: true })
            .await
            .completed()
            .unwrap()
            .unwrap();
        assert_eq!(summary.execution.unwrap().placed, 0);
        assert_eq!(agent.metrics().await.scans_run, 2);
    }

    #[tokio::test]
    async fn test_allocation_places_orders_above_threshold() {
        let agent = agent_with(Arc::new(FixtureSource::default())).await;
        let signals = vec![
            signal("ADAUSDT", Market::Spot, 0.8),
            signal("BTCUSDT", Market::Futures, 0.9),
            signal("XRPUSDT", Market::Spot, 0.3),
        ];

        let summary = agent.allocate_and_execute(&signals).await.unwrap();
        assert!(!summary.halted);
        assert_eq!(summary.placed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);

        let open = agent.open_positions().await.unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|p| p.symbol != "XRPUSDT"));

        let exposure = agent.exposure().await.unwrap();
        assert_eq!(exposure.len(), 2);
        assert!(exposure.values().all(|v| *v > 0.0));
    }

    #[tokio::test]
    async fn test_allocation_skips_symbols_already_held() {
        let agent = agent_with(Arc::new(FixtureSource::default())).await;
        agent.place_manual_order(manual("ADAUSDT", 1.0)).await.unwrap();

        let summary = agent
            .allocate_and_execute(&[signal("ADAUSDT", Market::Spot, 0.9)])
            .await
            .unwrap();
        assert_eq!(summary.placed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_kill_switch_halts_allocation_and_manual_orders() {
        let agent = agent_with(Arc::new(FixtureSource::default())).await;
        agent.set_kill_switch(true).await;

        let summary = agent
            .allocate_and_execute(&[signal("ADAUSDT", Market::Spot, 0.9)])
            .await
            .unwrap();
        assert!(summary.halted);
        assert_eq!(summary.placed, 0);
        assert_eq!(summary.skipped, 1);

        let result = agent.place_manual_order(manual("ADAUSDT", 1.0)).await;
        assert!(matches!(result, Err(TradingError::Halted(_))));
        assert!(agent.open_positions().await.unwrap().is_empty());

        let alerts = agent.recent_alerts(5).await.unwrap();
        assert_eq!(alerts[0].level, AlertLevel::Warn);
        assert_eq!(alerts[0].message, "Kill Switch set to true");

        agent.set_kill_switch(false).await;
        assert!(agent.place_manual_order(manual("ADAUSDT", 1.0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_live_gateway_errors_are_counted() {
        let source = Arc::new(FixtureSource::default());
        let ledger = ledger(10_000.0, 5_000.0).await;
        let config = AgentConfig {
            mode: Mode::Live,
            ..test_config()
        };
        let agent = TradingAgent::new(config, source, ledger)
            .with_gateway(Arc::new(ScriptedGateway::new(Script::Fail)));

        let summary = agent
            .allocate_and_execute(&[signal("ADAUSDT", Market::Spot, 0.9)])
            .await
            .unwrap();
        assert_eq!(summary.placed, 0);
        assert_eq!(summary.errors, 1);
        assert!(agent.open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_position_uses_last_price() {
        let source = Arc::new(FixtureSource::default());
        let agent = agent_with(source.clone()).await;
        let outcome = agent.place_manual_order(manual("ADAUSDT", 10.0)).await.unwrap();
        let ExecutionOutcome::Filled { position, .. } = outcome else {
            panic!("expected a fill");
        };

        source.set_price("ADAUSDT", 104.0);
        let closed = agent.close_position(&position.id).await.unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert!((closed.realized_pnl - 40.0).abs() < 1e-9);

        let portfolio = agent.portfolio().await.unwrap();
        assert!((portfolio.cash_by_market.spot - 10_040.0).abs() < 1e-9);

        let again = agent.close_position(&position.id).await;
        assert!(matches!(again, Err(TradingError::InvalidTransition { .. })));
        assert!(matches!(
            agent.close_position("missing").await,
            Err(TradingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all_falls_back_to_entry() {
        let agent = agent_with(Arc::new(FixtureSource::default())).await;
        agent.place_manual_order(manual("ADAUSDT", 1.0)).await.unwrap();
        agent.place_manual_order(manual("XRPUSDT", 2.0)).await.unwrap();

        let closed = agent.close_all_positions().await.unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|p| p.realized_pnl.abs() < 1e-9));
        assert!(agent.open_positions().await.unwrap().is_empty());
        assert!((agent.portfolio().await.unwrap().cash_by_market.spot - 10_000.0).abs() < 1e-9);
        assert_eq!(agent.metrics().await.exits, 2);
    }

    /// Park a monitor tick inside its price lookup, close the same position
    /// manually, then let the tick finish on its stale copy
    async fn close_during_monitor_tick(price: f64) -> (TradingAgent, Position, MonitorReport) {
        let source = Arc::new(FixtureSource::default());
        let agent = agent_with(source.clone()).await;
        let outcome = agent.place_manual_order(manual("ADAUSDT", 10.0)).await.unwrap();
        let ExecutionOutcome::Filled { position, .. } = outcome else {
            panic!("expected a fill");
        };

        source.set_price("ADAUSDT", price);
        let (entered, release) = source.hold_next_lookup();
        let (tick, closed) = tokio::join!(agent.run_monitor(), async {
            entered.notified().await;
            let closed = agent.close_position(&position.id).await;
            release.notify_one();
            closed
        });

        let closed = closed.unwrap();
        let report = tick.completed().unwrap().unwrap();
        (agent, closed, report)
    }

    #[tokio::test]
    async fn test_manual_close_during_breached_tick_settles_once() {
        let (agent, closed, report) = close_during_monitor_tick(110.5).await;
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert!((closed.realized_pnl - 105.0).abs() < 1e-9);
        assert!(report.closed.is_empty());

        let portfolio = agent.portfolio().await.unwrap();
        assert!((portfolio.cash_by_market.spot - 10_105.0).abs() < 1e-9);
        assert!(agent.open_positions().await.unwrap().is_empty());

        let exits = agent
            .recent_alerts(20)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.message.starts_with("Exit ADAUSDT"))
            .count();
        assert_eq!(exits, 1);
        assert_eq!(agent.metrics().await.exits, 1);
    }

    #[tokio::test]
    async fn test_manual_close_during_quiet_tick_stays_closed() {
        let (agent, closed, report) = close_during_monitor_tick(102.0).await;
        assert!((closed.realized_pnl - 20.0).abs() < 1e-9);
        assert!(report.closed.is_empty());
        assert!(report.errors.is_empty());

        assert!(agent.open_positions().await.unwrap().is_empty());
        let portfolio = agent.portfolio().await.unwrap();
        assert!((portfolio.cash_by_market.spot - 10_020.0).abs() < 1e-9);
        assert!((portfolio.equity - 15_020.0).abs() < 1e-9);

        let snapshot = report.snapshot.unwrap();
        assert!(snapshot.margin_used.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backtest_uses_scan_series() {
        let ledger = ledger(10_000.0, 5_000.0).await;
        let source = Arc::new(CsvMarketData::new(std::env::temp_dir().join("signal-desk-no-csv")));
        let agent = TradingAgent::new(test_config(), source, ledger);

        let result = agent.backtest("BTCUSDT").await.unwrap();
        assert!(!result.equity_curve.is_empty());
        assert!(result.final_equity > 0.0);
        assert_eq!(result.equity_curve.last().map(|p| p.equity), Some(result.final_equity));

        let empty = agent_with(Arc::new(FixtureSource::default())).await;
        assert!(matches!(
            empty.backtest("BTCUSDT").await,
            Err(TradingError::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_confidence_threshold_bounds() {
        let agent = agent_with(Arc::new(FixtureSource::default())).await;
        assert!(agent.set_confidence_threshold(1.5).await.is_err());
        assert!(agent.set_confidence_threshold(-0.1).await.is_err());
        agent.set_confidence_threshold(0.9).await.unwrap();
        assert_eq!(agent.controls().await.confidence_threshold, 0.9);

        let summary = agent
            .allocate_and_execute(&[signal("ADAUSDT", Market::Spot, 0.8)])
            .await
            .unwrap();
        assert_eq!(summary.placed, 0);
    }

    #[tokio::test]
    async fn test_monitor_builds_equity_curve() {
        let source = Arc::new(FixtureSource::default());
        let agent = agent_with(source.clone()).await;
        agent.place_manual_order(manual("ADAUSDT", 10.0)).await.unwrap();

        source.set_price("ADAUSDT", 101.0);
        agent.run_monitor().await.completed().unwrap().unwrap();
        source.set_price("ADAUSDT", 111.0);
        let report = agent.run_monitor().await.completed().unwrap().unwrap();
        assert_eq!(report.closed.len(), 1);

        let curve = agent.equity_curve(10).await.unwrap();
        assert_eq!(curve.len(), 2);
        assert!(curve[0].timestamp <= curve[1].timestamp);
        assert!((curve[1].equity - 15_110.0).abs() < 1e-9);

        let metrics = agent.metrics().await;
        assert_eq!(metrics.monitor_cycles, 2);
        assert_eq!(metrics.exits, 1);
        assert!((metrics.recent_win_rate() - 100.0).abs() < 1e-9);
    }
}

mod scheduler_tests {
    use super::*;

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let flight = SingleFlight::new("scan");
        let release = Notify::new();

        let (first, second) = tokio::join!(
            flight.run(|| async {
                release.notified().await;
                1
            }),
            async {
                let overlapped = flight.run(|| async { 2 }).await;
                release.notify_one();
                overlapped
            }
        );
        assert_eq!(first, JobRun::Completed(1));
        assert!(second.is_skipped());
        assert!(!flight.is_running());
        assert_eq!(flight.run(|| async { 3 }).await, JobRun::Completed(3));
    }

    #[tokio::test]
    async fn test_periodic_task_stops_on_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let counter = ticks.clone();
        scheduler.add_periodic_task("tick", Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(scheduler.task_count(), 1);

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduler.shutdown().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
        assert!(Mode::Paper.is_simulated());
        assert!(!Mode::Live.is_simulated());
        assert_eq!("dry-run".parse::<Mode>().unwrap(), Mode::DryRun);
        assert!("sandbox".parse::<Mode>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let over_allocated = AgentConfig {
            spot_allocation_pct: 0.7,
            futures_allocation_pct: 0.5,
            ..AgentConfig::default()
        };
        assert!(over_allocated.validate().is_err());

        let bad_threshold = AgentConfig {
            confidence_threshold: 1.2,
            ..AgentConfig::default()
        };
        assert!(bad_threshold.validate().is_err());

        let no_universe = AgentConfig {
            universe: Vec::new(),
            ..AgentConfig::default()
        };
        assert!(no_universe.validate().is_err());

        let low_leverage = AgentConfig {
            max_leverage: 0.5,
            ..AgentConfig::default()
        };
        assert!(low_leverage.validate().is_err());
    }
}
