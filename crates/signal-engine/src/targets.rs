use serde::{Deserialize, Serialize};

/// Smallest stop distance and lowest stop price a proposal may carry
pub const MIN_STOP: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub tp: f64,
    pub sl: f64,
}

impl Targets {
    /// Reward over risk for a long entry
    pub fn risk_reward(&self, entry: f64) -> f64 {
        (self.tp - entry) / (entry - self.sl).max(1e-9)
    }
}

/// ATR stop with a reward-to-risk multiple for the target
#[derive(Debug, Clone, Copy)]
pub struct TargetProposer {
    rr_target: f64,
}

impl TargetProposer {
    pub fn new(rr_target: f64) -> Self {
        Self { rr_target }
    }

    /// Long-side levels. A zero or missing ATR still yields sl < entry < tp,
    /// only by the minimum distance, so the expected return is near zero.
    pub fn propose(&self, entry: f64, atr: Option<f64>) -> Targets {
        let risk = atr.filter(|a| a.is_finite()).unwrap_or(0.0).max(MIN_STOP);
        let sl = (entry - risk).max(MIN_STOP);
        let tp = entry + self.rr_target * risk;
        Targets { tp, sl }
    }
}
