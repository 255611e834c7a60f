//! Explainable confidence adjustments.
//!
//! Rules are additive and fire independently; only the summed delta is
//! clamped, never an individual rule.

use serde::{Deserialize, Serialize};
use trading_core::{Regime, RegimeLabel, Side, Signal, SignalFeatures};

/// Largest total penalty the overlay may apply
pub const MAX_PENALTY: f64 = -0.15;
/// Largest total bonus the overlay may apply
pub const MAX_BONUS: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskAdjustment {
    pub delta: f64,
    pub reasons: Vec<String>,
}

impl RiskAdjustment {
    fn apply(&mut self, delta: f64, reason: &str) {
        self.delta += delta;
        self.reasons.push(reason.to_string());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskOverlay;

impl RiskOverlay {
    pub fn new() -> Self {
        Self
    }

    /// Pure: identical inputs always give an identical adjustment.
    /// Features still in warm-up (`None`) trigger no rule.
    pub fn assess(&self, signal: &Signal, features: &SignalFeatures, regime: &Regime) -> RiskAdjustment {
        let mut adj = RiskAdjustment::default();
        let is_buy = signal.side == Side::Buy;

        // Volatility
        if let Some(atr_ratio) = features.atr_ratio {
            if atr_ratio > 0.06 {
                adj.apply(-0.10, "ATR high");
            } else if atr_ratio > 0.04 {
                adj.apply(-0.05, "ATR elevated");
            }
        }

        // RSI extremes
        if let Some(rsi) = features.rsi {
            if rsi >= 80.0 {
                adj.apply(-0.08, "RSI overbought");
            } else if rsi >= 70.0 {
                adj.apply(-0.04, "RSI hot");
            } else if rsi <= 25.0 {
                adj.apply(-0.05, "RSI oversold");
            }
        }

        if is_buy && features.trend_strength.is_some_and(|t| t > 0.3) {
            adj.apply(0.03, "Trend aligned");
        }

        if features.breakout {
            adj.apply(0.02, "Breakout");
        }

        match regime.label {
            RegimeLabel::Bullish if is_buy => adj.apply(0.02, "Bull regime"),
            RegimeLabel::Bearish if is_buy => adj.apply(-0.03, "Bear regime"),
            _ => {}
        }

        if let Some(rr) = features.rr {
            if rr < 1.2 {
                adj.apply(-0.05, "RR weak");
            } else if rr > 2.5 {
                adj.apply(0.01, "RR strong");
            }
        }

        adj.delta = adj.delta.clamp(MAX_PENALTY, MAX_BONUS);
        adj
    }
}
