use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use market_regime_detector::RegimeClassifier;
use serde::{Deserialize, Serialize};
use technical_analysis::FeatureEngine;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use trading_core::{
    Candle, FeatureRow, FeatureSnapshot, Market, MarketDataSource, Regime, Repository, Side, Signal,
    SignalFeatures, TradingError, TradingResult,
};

use crate::params::StrategyParams;
use crate::scorer::Scorer;
use crate::targets::TargetProposer;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Symbols routed to the futures bucket; all others trade spot
    pub futures_symbols: HashSet<String>,
    /// Leverage suggested on futures signals
    pub max_leverage: f64,
    pub candle_limit: usize,
    pub timeout: Duration,
    pub regime_symbol: String,
    pub regime_timeframe: String,
    pub persist_market_data: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            futures_symbols: ["BTCUSDT", "ETHUSDT", "SOLUSDT"].iter().map(|s| s.to_string()).collect(),
            max_leverage: 3.0,
            candle_limit: 400,
            timeout: Duration::from_secs(10),
            regime_symbol: "BTCUSDT".to_string(),
            regime_timeframe: "4h".to_string(),
            persist_market_data: false,
        }
    }
}

impl ScannerConfig {
    pub fn market_for(&self, symbol: &str) -> Market {
        if self.futures_symbols.contains(symbol) {
            Market::Futures
        } else {
            Market::Spot
        }
    }
}

/// Per-symbol result of a scan. Only `Failed` is an error condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SymbolOutcome {
    Scored,
    NoSignal(String),
    Failed(String),
}

/// A scored signal together with the features it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub signal: Signal,
    pub features: SignalFeatures,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub timeframe: String,
    pub regime: Regime,
    /// Ranked by confidence, then expected return, both descending
    pub candidates: Vec<Candidate>,
    pub outcomes: Vec<(String, SymbolOutcome)>,
}

impl ScanReport {
    pub fn count(&self, pred: impl Fn(&SymbolOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn scored(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Scored))
    }

    pub fn no_signal(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::NoSignal(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Failed(_)))
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.candidates.iter().map(|c| c.signal.clone()).collect()
    }
}

/// Orders candidates by confidence, then expected return, both descending
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.signal
            .confidence
            .total_cmp(&a.signal.confidence)
            .then_with(|| b.signal.expected_return_pct.total_cmp(&a.signal.expected_return_pct))
    });
}

/// Runs the feature → score → targets pipeline over a symbol universe
pub struct SignalScanner {
    source: Arc<dyn MarketDataSource>,
    repository: Option<Arc<dyn Repository>>,
    params: RwLock<StrategyParams>,
    classifier: RegimeClassifier,
    config: ScannerConfig,
}

impl SignalScanner {
    pub fn new(source: Arc<dyn MarketDataSource>, params: StrategyParams, config: ScannerConfig) -> Self {
        Self {
            source,
            repository: None,
            params: RwLock::new(params),
            classifier: RegimeClassifier::new(),
            config,
        }
    }

    /// Store used when `persist_market_data` is set
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub async fn params(&self) -> StrategyParams {
        self.params.read().await.clone()
    }

    /// Replace the parameter set; takes effect on the next scan
    pub async fn update_params(&self, params: StrategyParams) -> TradingResult<()> {
        params.validate()?;
        info!(preset = %params.name, "strategy parameters updated");
        *self.params.write().await = params;
        Ok(())
    }

    async fn fetch(&self, symbol: &str, timeframe: &str) -> TradingResult<Vec<Candle>> {
        match tokio::time::timeout(
            self.config.timeout,
            self.source.get_candles(symbol, timeframe, self.config.candle_limit),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TradingError::Timeout(format!("candles for {} {}", symbol, timeframe))),
        }
    }

    /// Classify the market from the configured reference instrument
    pub async fn detect_regime(&self) -> Regime {
        let engine = FeatureEngine::new(self.params.read().await.feature_params());
        self.classifier
            .detect(
                self.source.as_ref(),
                &engine,
                &self.config.regime_symbol,
                &self.config.regime_timeframe,
                self.config.candle_limit,
                self.config.timeout,
            )
            .await
    }

    /// Score every symbol of `universe`. Failures are recorded per symbol
    /// and never abort the scan.
    pub async fn scan_and_score(&self, universe: &[String], timeframe: &str) -> ScanReport {
        let params = self.params().await;
        let engine = FeatureEngine::new(params.feature_params());
        let scorer = Scorer::new(params.clone());
        let proposer = TargetProposer::new(params.rr_target);
        let regime = self.detect_regime().await;

        let mut candidates = Vec::new();
        let mut outcomes = Vec::with_capacity(universe.len());

        for symbol in universe {
            let candles = match self.fetch(symbol, timeframe).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Skipping {}: {}", symbol, e);
                    outcomes.push((symbol.clone(), SymbolOutcome::Failed(e.to_string())));
                    continue;
                }
            };
            if candles.is_empty() {
                outcomes.push((symbol.clone(), SymbolOutcome::NoSignal("no candles".to_string())));
                continue;
            }

            let rows = engine.compute(&candles);
            self.persist_market_data(symbol, timeframe, &candles, rows.last()).await;

            let Some(row) = rows.last() else {
                debug!(symbol = %symbol, candles = candles.len(), "insufficient history");
                outcomes.push((symbol.clone(), SymbolOutcome::NoSignal("insufficient history".to_string())));
                continue;
            };
            let Some(score) = row.is_warm().then(|| scorer.score(row)).flatten() else {
                outcomes.push((symbol.clone(), SymbolOutcome::NoSignal("indicators warming up".to_string())));
                continue;
            };

            let entry = row.close;
            let targets = proposer.propose(entry, row.atr);
            let market = self.config.market_for(symbol);

            let signal = Signal {
                symbol: symbol.clone(),
                market,
                timeframe: timeframe.to_string(),
                timestamp: row.open_time,
                confidence: score.confidence,
                expected_return_pct: (targets.tp - entry) / entry * 100.0,
                suggested_leverage: (market == Market::Futures).then_some(self.config.max_leverage),
                entry,
                tp: targets.tp,
                sl: targets.sl,
                side: Side::Buy,
                rationale: describe(row),
                strategy_tag: params.name.clone(),
            };
            let features = SignalFeatures {
                price: entry,
                tp: targets.tp,
                sl: targets.sl,
                rr: Some(targets.risk_reward(entry)),
                atr: row.atr,
                atr_ratio: row.atr_ratio,
                ema_fast: row.ema_fast,
                ema_slow: row.ema_slow,
                trend_strength: row.trend_strength(),
                rsi: row.rsi,
                macd: row.macd,
                macd_signal: row.macd_signal,
                breakout: row.breakout,
            };

            debug!(
                symbol = %symbol,
                confidence = signal.confidence,
                trend = score.trend,
                rsi = score.rsi,
                macd = score.macd,
                breakout = score.breakout,
                "scored"
            );
            outcomes.push((symbol.clone(), SymbolOutcome::Scored));
            candidates.push(Candidate { signal, features });
        }

        rank_candidates(&mut candidates);

        let report = ScanReport {
            timeframe: timeframe.to_string(),
            regime,
            candidates,
            outcomes,
        };
        info!(
            "Generated {} signals for tf={} ({} no-signal, {} failed)",
            report.candidates.len(),
            timeframe,
            report.no_signal(),
            report.failed()
        );
        report
    }

    async fn persist_market_data(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
        latest: Option<&FeatureRow>,
    ) {
        if !self.config.persist_market_data {
            return;
        }
        let Some(repo) = &self.repository else {
            return;
        };
        if let Err(e) = repo.save_candles(candles).await {
            warn!("Failed to persist candles for {}: {}", symbol, e);
        }
        if let Some(row) = latest {
            let snapshot = FeatureSnapshot {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                row: row.clone(),
            };
            if let Err(e) = repo.save_feature_snapshot(&snapshot).await {
                warn!("Failed to persist features for {}: {}", symbol, e);
            }
        }
    }
}

fn describe(row: &FeatureRow) -> String {
    let fmt = |v: Option<f64>, precision: usize| match v {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    };
    let macd_above = match (row.macd, row.macd_signal) {
        (Some(m), Some(s)) => m > s,
        _ => false,
    };
    format!(
        "EMA trend: {}>{}, RSI: {}, MACD>Signal: {}.",
        fmt(row.ema_fast, 2),
        fmt(row.ema_slow, 2),
        fmt(row.rsi, 1),
        macd_above
    )
}
