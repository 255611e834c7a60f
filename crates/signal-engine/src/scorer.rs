use serde::{Deserialize, Serialize};
use trading_core::FeatureRow;

use crate::params::{StrategyParams, WeightSet};

/// Guards every normalising denominator
pub const EPSILON: f64 = 1e-9;

fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Sub-scores and the weighted blend they produced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub trend: f64,
    pub rsi: f64,
    pub macd: f64,
    pub breakout: f64,
    pub weights: WeightSet,
    pub confidence: f64,
}

/// Confidence model. Rewards bullish continuation only; a bearish setup
/// scores low rather than scoring as a short.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    params: StrategyParams,
}

impl Scorer {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    /// Returns `None` for rows still in indicator warm-up
    pub fn score(&self, row: &FeatureRow) -> Option<ScoreBreakdown> {
        let p = &self.params;
        let (ema_fast, ema_slow) = (row.ema_fast?, row.ema_slow?);
        let rsi = row.rsi?;
        let (macd, macd_signal) = (row.macd?, row.macd_signal?);
        let atr = if p.trend_use_atr { row.atr } else { None };

        let trend_scale = match atr {
            Some(atr) => p.trend_k_atr * atr,
            None => p.trend_k_pct * row.close,
        };
        let trend = clamp01((ema_fast - ema_slow) / trend_scale.max(EPSILON));

        let rsi_score = clamp01(1.0 - (rsi - p.rsi_center).abs() / p.rsi_width.max(EPSILON));

        let macd_score = if macd > 0.0 {
            let macd_scale = match atr {
                Some(atr) => p.macd_k_atr * atr,
                None => p.macd_k_pct_close * row.close,
            };
            clamp01((macd - macd_signal) / macd_scale.max(EPSILON))
        } else {
            0.0
        };

        let breakout = if row.breakout { 1.0 } else { 0.0 };

        let weights = self.select_weights(row.adx);
        let total = weights.sum();
        let confidence = if total > EPSILON {
            clamp01(
                (weights.trend * trend
                    + weights.rsi * rsi_score
                    + weights.macd * macd_score
                    + weights.breakout * breakout)
                    / total,
            )
        } else {
            0.0
        };

        Some(ScoreBreakdown {
            trend,
            rsi: rsi_score,
            macd: macd_score,
            breakout,
            weights,
            confidence,
        })
    }

    /// Trending set at or above the ADX threshold, ranging below it, flat
    /// when ADX is undefined or regime weighting is off.
    pub fn select_weights(&self, adx: Option<f64>) -> WeightSet {
        match (adx, self.params.regime_weights()) {
            (Some(adx), Some((trending, ranging))) => {
                if adx >= self.params.adx_trend_threshold {
                    trending
                } else {
                    ranging
                }
            }
            _ => self.params.weights,
        }
    }
}
