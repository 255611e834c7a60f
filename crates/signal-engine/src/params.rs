use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use technical_analysis::FeatureParams;
use trading_core::TradingError;

/// Weights of the four sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub trend: f64,
    pub rsi: f64,
    pub macd: f64,
    pub breakout: f64,
}

impl WeightSet {
    pub const fn new(trend: f64, rsi: f64, macd: f64, breakout: f64) -> Self {
        Self { trend, rsi, macd, breakout }
    }

    pub fn sum(&self) -> f64 {
        self.trend + self.rsi + self.macd + self.breakout
    }

    fn is_valid(&self) -> bool {
        let parts = [self.trend, self.rsi, self.macd, self.breakout];
        parts.iter().all(|w| w.is_finite() && *w >= 0.0) && self.sum() > 0.0
    }
}

/// Full parameter set of the scoring strategy.
///
/// Indicator lengths feed the feature engine, the rest feeds the scorer and
/// target proposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub name: String,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_length: usize,
    pub atr_length: usize,
    pub breakout_lookback: usize,
    pub adx_length: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rr_target: f64,
    pub trend_use_atr: bool,
    pub trend_k_atr: f64,
    pub trend_k_pct: f64,
    pub rsi_center: f64,
    pub rsi_width: f64,
    pub macd_k_atr: f64,
    pub macd_k_pct_close: f64,
    pub adx_trend_threshold: f64,
    /// Flat weights, used when regime weighting is off or ADX is undefined
    pub weights: WeightSet,
    pub weights_trending: Option<WeightSet>,
    pub weights_ranging: Option<WeightSet>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyPreset::BalancedDefault.params()
    }
}

impl StrategyParams {
    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            ema_fast: self.ema_fast,
            ema_slow: self.ema_slow,
            rsi_length: self.rsi_length,
            atr_length: self.atr_length,
            breakout_lookback: self.breakout_lookback,
            adx_length: self.adx_length,
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
        }
    }

    /// Regime weighting is active only when both sets are configured
    pub fn regime_weights(&self) -> Option<(WeightSet, WeightSet)> {
        self.weights_trending.zip(self.weights_ranging)
    }

    pub fn validate(&self) -> Result<(), TradingError> {
        let lengths = [
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("rsi_length", self.rsi_length),
            ("atr_length", self.atr_length),
            ("breakout_lookback", self.breakout_lookback),
            ("adx_length", self.adx_length),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
        ];
        if let Some((name, _)) = lengths.iter().find(|(_, v)| *v == 0) {
            return Err(TradingError::Config(format!("{} must be positive", name)));
        }
        if self.ema_fast >= self.ema_slow {
            return Err(TradingError::Config("ema_fast must be shorter than ema_slow".to_string()));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(TradingError::Config("macd_fast must be shorter than macd_slow".to_string()));
        }
        let positive = [
            ("rr_target", self.rr_target),
            ("trend_k_atr", self.trend_k_atr),
            ("trend_k_pct", self.trend_k_pct),
            ("rsi_width", self.rsi_width),
            ("macd_k_atr", self.macd_k_atr),
            ("macd_k_pct_close", self.macd_k_pct_close),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !(v.is_finite() && *v > 0.0)) {
            return Err(TradingError::Config(format!("{} must be a positive number", name)));
        }
        let sets = [Some(self.weights), self.weights_trending, self.weights_ranging];
        if sets.iter().flatten().any(|w| !w.is_valid()) {
            return Err(TradingError::Config(
                "weights must be non-negative with a positive sum".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlay a partial JSON object onto these parameters
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self, TradingError> {
        let Value::Object(patch) = overrides else {
            return Err(TradingError::Config("strategy overrides must be a JSON object".to_string()));
        };
        let mut merged = serde_json::to_value(self)
            .map_err(|e| TradingError::Config(format!("strategy params: {}", e)))?;
        if let Value::Object(base) = &mut merged {
            for (key, value) in patch {
                if !base.contains_key(key) {
                    return Err(TradingError::Config(format!("unknown strategy parameter '{}'", key)));
                }
                base.insert(key.clone(), value.clone());
            }
        }
        let params: Self = serde_json::from_value(merged)
            .map_err(|e| TradingError::Config(format!("strategy params: {}", e)))?;
        params.validate()?;
        Ok(params)
    }
}

/// Named parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyPreset {
    BalancedDefault,
    FasterSwing,
    SlowerSwing,
    ChoppyRange,
}

impl StrategyPreset {
    pub const ALL: [StrategyPreset; 4] = [
        StrategyPreset::BalancedDefault,
        StrategyPreset::FasterSwing,
        StrategyPreset::SlowerSwing,
        StrategyPreset::ChoppyRange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyPreset::BalancedDefault => "BalancedDefault",
            StrategyPreset::FasterSwing => "FasterSwing",
            StrategyPreset::SlowerSwing => "SlowerSwing",
            StrategyPreset::ChoppyRange => "ChoppyRange",
        }
    }

    pub fn params(&self) -> StrategyParams {
        let base = StrategyParams {
            name: self.as_str().to_string(),
            ema_fast: 20,
            ema_slow: 50,
            rsi_length: 14,
            atr_length: 14,
            breakout_lookback: 55,
            adx_length: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rr_target: 1.8,
            trend_use_atr: true,
            trend_k_atr: 1.5,
            trend_k_pct: 0.02,
            rsi_center: 58.0,
            rsi_width: 30.0,
            macd_k_atr: 1.0,
            macd_k_pct_close: 0.01,
            adx_trend_threshold: 20.0,
            weights: WeightSet::new(0.40, 0.20, 0.25, 0.15),
            weights_trending: Some(WeightSet::new(0.42, 0.18, 0.25, 0.15)),
            weights_ranging: Some(WeightSet::new(0.25, 0.30, 0.20, 0.25)),
        };

        match self {
            StrategyPreset::BalancedDefault => base,
            StrategyPreset::FasterSwing => StrategyParams {
                ema_fast: 12,
                ema_slow: 36,
                rsi_length: 9,
                breakout_lookback: 40,
                rr_target: 2.0,
                trend_k_atr: 1.2,
                rsi_width: 28.0,
                macd_k_atr: 0.8,
                adx_trend_threshold: 18.0,
                weights_trending: Some(WeightSet::new(0.45, 0.15, 0.25, 0.15)),
                weights_ranging: Some(WeightSet::new(0.20, 0.35, 0.15, 0.30)),
                ..base
            },
            StrategyPreset::SlowerSwing => StrategyParams {
                ema_slow: 55,
                breakout_lookback: 60,
                trend_k_atr: 2.0,
                rsi_width: 32.0,
                macd_k_atr: 1.2,
                ..base
            },
            StrategyPreset::ChoppyRange => StrategyParams {
                ema_fast: 14,
                breakout_lookback: 25,
                rr_target: 1.6,
                rsi_center: 55.0,
                rsi_width: 26.0,
                weights: WeightSet::new(0.20, 0.35, 0.15, 0.30),
                weights_trending: Some(WeightSet::new(0.35, 0.25, 0.25, 0.15)),
                weights_ranging: Some(WeightSet::new(0.20, 0.35, 0.15, 0.30)),
                ..base
            },
        }
    }
}

impl fmt::Display for StrategyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyPreset {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyPreset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TradingError::Config(format!("unknown strategy preset '{}'", s)))
    }
}
