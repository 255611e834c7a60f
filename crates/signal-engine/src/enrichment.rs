use std::sync::Arc;
use std::time::Duration;

use advisor::{Advisor, AdvisorNote, RuleBasedAdvisor};
use risk_manager::RiskOverlay;
use tracing::{debug, warn};
use trading_core::Regime;

use crate::scanner::{rank_candidates, Candidate};

const MAX_RATIONALE_CHARS: usize = 1000;

/// Applies the risk overlay and the advisor to scored candidates
pub struct SignalEnricher {
    overlay: RiskOverlay,
    advisor: Option<Arc<dyn Advisor>>,
    fallback: RuleBasedAdvisor,
    timeout: Duration,
}

impl SignalEnricher {
    pub fn new(advisor: Option<Arc<dyn Advisor>>, timeout: Duration) -> Self {
        Self {
            overlay: RiskOverlay::new(),
            advisor,
            fallback: RuleBasedAdvisor,
            timeout,
        }
    }

    pub fn advisor_name(&self) -> &'static str {
        self.advisor.as_ref().map(|a| a.name()).unwrap_or("rules")
    }

    async fn research(&self, candidate: &Candidate, regime: &Regime) -> AdvisorNote {
        let Some(advisor) = &self.advisor else {
            return self.fallback.note(&candidate.features, regime);
        };
        let call = advisor.analyze(&candidate.signal, &candidate.features, regime);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(note)) => note,
            Ok(Err(e)) => {
                warn!("{} advisor failed for {}: {}", advisor.name(), candidate.signal.symbol, e);
                self.fallback.note(&candidate.features, regime)
            }
            Err(_) => {
                warn!("{} advisor timed out for {}", advisor.name(), candidate.signal.symbol);
                self.fallback.note(&candidate.features, regime)
            }
        }
    }

    /// Returns the same candidates with adjusted confidence and rationale,
    /// re-ranked. Never fails; advisor problems degrade to the rule-based note.
    pub async fn enrich_signals(&self, candidates: Vec<Candidate>, regime: &Regime) -> Vec<Candidate> {
        let mut enriched = Vec::with_capacity(candidates.len());

        for mut candidate in candidates {
            let note = self.research(&candidate, regime).await;
            let risk = self.overlay.assess(&candidate.signal, &candidate.features, regime);

            let signal = &mut candidate.signal;
            let before = signal.confidence;
            signal.confidence = (before + note.confidence_delta + risk.delta).clamp(0.0, 1.0);

            let mut segments: Vec<String> = [signal.rationale.as_str(), note.notes.as_str()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !risk.reasons.is_empty() {
                segments.push(format!("Risk: {}", risk.reasons.join("; ")));
            }
            signal.rationale = segments.join(" | ").chars().take(MAX_RATIONALE_CHARS).collect();

            debug!(
                symbol = %signal.symbol,
                before,
                after = signal.confidence,
                advisor_delta = note.confidence_delta,
                risk_delta = risk.delta,
                "enriched"
            );
            enriched.push(candidate);
        }

        rank_candidates(&mut enriched);
        enriched
    }
}
