pub mod error;
pub mod llm;
pub mod parse;
pub mod rules;

pub use error::{AdvisorError, AdvisorResult};
pub use llm::{LlmAdvisor, LlmConfig};
pub use parse::parse_json_from_text;
pub use rules::{compose_default_notes, HeuristicAdvisor, RuleBasedAdvisor};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trading_core::{Regime, Signal, SignalFeatures};

/// Bound on any advisor's confidence delta
pub const ADVISOR_DELTA_LIMIT: f64 = 0.15;

/// Narrative rationale plus a small secondary confidence delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorNote {
    pub notes: String,
    pub confidence_delta: f64,
}

impl AdvisorNote {
    pub fn new(notes: impl Into<String>, confidence_delta: f64) -> Self {
        Self {
            notes: notes.into(),
            confidence_delta: confidence_delta.clamp(-ADVISOR_DELTA_LIMIT, ADVISOR_DELTA_LIMIT),
        }
    }
}

/// Research capability consulted during signal enrichment.
///
/// Implementations may fail; callers recover with [`RuleBasedAdvisor`] output.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn analyze(
        &self,
        signal: &Signal,
        features: &SignalFeatures,
        regime: &Regime,
    ) -> AdvisorResult<AdvisorNote>;

    fn name(&self) -> &'static str;
}
