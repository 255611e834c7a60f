use std::time::Duration;

use serde::{Deserialize, Serialize};
use technical_analysis::FeatureEngine;
use tracing::{debug, warn};
use trading_core::{FeatureRow, MarketDataSource, Regime, RegimeLabel, VolatilityBucket};

/// Thresholds for labelling the market from a reference instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    /// |trend_strength| above this counts as directional
    pub trend: f64,
    pub bullish_rsi: f64,
    pub bearish_rsi: f64,
    /// atr_ratio below this is a low-volatility market
    pub low_vol: f64,
    /// atr_ratio below this (and above `low_vol`) is medium
    pub med_vol: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            trend: 0.2,
            bullish_rsi: 55.0,
            bearish_rsi: 45.0,
            low_vol: 0.02,
            med_vol: 0.05,
        }
    }
}

/// Market regime classifier
#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    /// Classify from the reference instrument's latest features.
    /// Missing features give the neutral regime instead of an error.
    pub fn classify(&self, row: Option<&FeatureRow>) -> Regime {
        let Some(row) = row else {
            return Regime::neutral();
        };
        let Some(trend) = row.trend_strength() else {
            return Regime::neutral();
        };

        let t = &self.thresholds;
        let rsi = row.rsi.unwrap_or(50.0);
        let atr_ratio = row.atr_ratio.unwrap_or(t.low_vol);

        let label = if trend > t.trend && rsi > t.bullish_rsi {
            RegimeLabel::Bullish
        } else if trend < -t.trend && rsi < t.bearish_rsi {
            RegimeLabel::Bearish
        } else {
            RegimeLabel::Sideways
        };

        let volatility_bucket = if atr_ratio < t.low_vol {
            VolatilityBucket::Low
        } else if atr_ratio < t.med_vol {
            VolatilityBucket::Med
        } else {
            VolatilityBucket::High
        };

        Regime {
            label,
            trend_strength: trend,
            volatility_bucket,
            rsi: row.rsi,
            atr_ratio: row.atr_ratio,
        }
    }

    /// Fetch the reference series and classify it. Any data failure falls
    /// back to the neutral regime so a scan never fails on this step.
    pub async fn detect(
        &self,
        source: &dyn MarketDataSource,
        engine: &FeatureEngine,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        timeout: Duration,
    ) -> Regime {
        let candles = match tokio::time::timeout(timeout, source.get_candles(symbol, timeframe, limit)).await {
            Ok(Ok(candles)) => candles,
            Ok(Err(e)) => {
                warn!("Regime data for {} {} unavailable: {}. Using neutral regime.", symbol, timeframe, e);
                return Regime::neutral();
            }
            Err(_) => {
                warn!("Regime data for {} {} timed out. Using neutral regime.", symbol, timeframe);
                return Regime::neutral();
            }
        };

        let regime = self.classify(engine.latest(&candles).as_ref());
        debug!(
            symbol,
            label = regime.label.as_str(),
            volatility = regime.volatility_bucket.as_str(),
            trend_strength = regime.trend_strength,
            "regime classified"
        );
        regime
    }
}
