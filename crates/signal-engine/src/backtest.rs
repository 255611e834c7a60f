//! Long-only replay of the scoring model over one candle series.
//!
//! Enough to sanity check the formulas against history; fills at the close,
//! no fees, no slippage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use technical_analysis::FeatureEngine;
use trading_core::Candle;

use crate::params::StrategyParams;
use crate::scorer::Scorer;
use crate::targets::{TargetProposer, Targets};

pub const BACKTEST_INITIAL_EQUITY: f64 = 10_000.0;
/// Confidence a bar must exceed for the next bar to enter
pub const ENTRY_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub final_equity: f64,
    pub return_pct: f64,
    pub trades: usize,
    pub equity_curve: Vec<EquityPoint>,
}

struct OpenTrade {
    entry: f64,
    units: f64,
    targets: Targets,
}

/// Risk `risk_pct` of equity per trade, sized on the distance to the stop
pub fn quick_backtest(candles: &[Candle], params: &StrategyParams, risk_pct: f64) -> BacktestResult {
    let rows = FeatureEngine::new(params.feature_params()).compute(candles);
    let scorer = Scorer::new(params.clone());
    let proposer = TargetProposer::new(params.rr_target);

    let confidence: Vec<Option<f64>> = rows
        .iter()
        .map(|row| scorer.score(row).map(|s| s.confidence))
        .collect();

    let mut equity = BACKTEST_INITIAL_EQUITY;
    let mut open: Option<OpenTrade> = None;
    let mut trades = 0;
    let mut equity_curve = Vec::with_capacity(rows.len());

    for i in 1..rows.len() {
        let price = rows[i].close;
        if let Some(trade) = open.take() {
            if price >= trade.targets.tp || price <= trade.targets.sl {
                equity += (price - trade.entry) * trade.units;
            } else {
                open = Some(trade);
            }
        } else if confidence[i - 1].is_some_and(|c| c > ENTRY_CONFIDENCE) {
            let targets = proposer.propose(price, rows[i].atr);
            let units = (equity * risk_pct / (price - targets.sl).max(1e-6)).max(0.0);
            open = Some(OpenTrade { entry: price, units, targets });
            trades += 1;
        }
        equity_curve.push(EquityPoint {
            time: rows[i].open_time,
            equity,
        });
    }

    BacktestResult {
        final_equity: equity,
        return_pct: (equity / BACKTEST_INITIAL_EQUITY - 1.0) * 100.0,
        trades,
        equity_curve,
    }
}
