//! Deterministic advisors. Neither touches the network.

use async_trait::async_trait;
use trading_core::{Regime, RegimeLabel, Side, Signal, SignalFeatures};

use crate::{Advisor, AdvisorNote, AdvisorResult};

const HEURISTIC_DELTA_LIMIT: f64 = 0.08;

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Descriptive note used whenever a richer advisor cannot answer
pub fn compose_default_notes(features: &SignalFeatures, regime: &Regime) -> String {
    format!(
        "Trend strength {}, RSI {}, ATR ratio {}, breakout {}, regime {}.",
        fmt_opt(features.trend_strength, 2),
        fmt_opt(features.rsi, 1),
        fmt_opt(features.atr_ratio, 3),
        yes_no(features.breakout),
        regime.label.as_str(),
    )
}

/// Fallback composer: describes the setup, never moves confidence
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAdvisor;

impl RuleBasedAdvisor {
    pub fn note(&self, features: &SignalFeatures, regime: &Regime) -> AdvisorNote {
        AdvisorNote::new(compose_default_notes(features, regime), 0.0)
    }
}

#[async_trait]
impl Advisor for RuleBasedAdvisor {
    async fn analyze(
        &self,
        _signal: &Signal,
        features: &SignalFeatures,
        regime: &Regime,
    ) -> AdvisorResult<AdvisorNote> {
        Ok(self.note(features, regime))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

/// Research agent scoring favourable conditions into a small delta
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAdvisor;

impl HeuristicAdvisor {
    pub fn evaluate(&self, signal: &Signal, features: &SignalFeatures, regime: &Regime) -> AdvisorNote {
        let trend = features.trend_strength.unwrap_or(0.0);
        let rsi = features.rsi.unwrap_or(50.0);
        let atr_ratio = features.atr_ratio.unwrap_or(0.02);
        let rr = features.rr.unwrap_or(1.5);

        let mut delta = 0.0;
        if trend > 0.2 {
            delta += (trend / 2.0).min(0.05);
        }
        if (50.0..=65.0).contains(&rsi) {
            delta += 0.02;
        }
        if features.breakout {
            delta += 0.03;
        }
        if rr >= 1.5 {
            delta += 0.02;
        }
        if atr_ratio > 0.06 {
            delta -= 0.05;
        }
        if regime.label == RegimeLabel::Bullish && signal.side == Side::Buy {
            delta += 0.02;
        }
        let delta = delta.clamp(-HEURISTIC_DELTA_LIMIT, HEURISTIC_DELTA_LIMIT);

        let notes = format!(
            "Trend {:.2}, RSI {:.1}, ATR ratio {:.3}, RR {:.2}, breakout {}, regime {}. {}{:.2} conf.",
            trend,
            rsi,
            atr_ratio,
            rr,
            yes_no(features.breakout),
            regime.label.as_str(),
            if delta >= 0.0 { "+" } else { "" },
            delta,
        );
        AdvisorNote::new(notes, delta)
    }
}

#[async_trait]
impl Advisor for HeuristicAdvisor {
    async fn analyze(
        &self,
        signal: &Signal,
        features: &SignalFeatures,
        regime: &Regime,
    ) -> AdvisorResult<AdvisorNote> {
        Ok(self.evaluate(signal, features, regime))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}
