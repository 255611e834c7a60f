use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trading_core::{Balances, Market, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Share of equity the spot bucket may deploy
    pub spot_pct: f64,
    /// Share of equity the futures bucket may deploy
    pub futures_pct: f64,
    pub max_positions: usize,
    pub min_confidence: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            spot_pct: 0.6,
            futures_pct: 0.4,
            max_positions: 5,
            min_confidence: 0.65,
        }
    }
}

impl AllocationConfig {
    pub fn pct_for(&self, market: Market) -> f64 {
        match market {
            Market::Spot => self.spot_pct,
            Market::Futures => self.futures_pct,
        }
    }
}

/// Portfolio state an allocation pass decides against
#[derive(Debug, Clone, Default)]
pub struct AllocationContext {
    pub equity: f64,
    pub cash: Balances,
    /// (symbol, market) of every open position
    pub open_positions: HashSet<(String, Market)>,
    pub kill_switch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub signal: Signal,
    /// Capital assigned from the bucket; notional for spot, margin for futures
    pub amount: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub allocations: Vec<Allocation>,
    pub skipped: Vec<(String, String)>,
    pub halted: bool,
    pub spot_budget: f64,
    pub futures_budget: f64,
}

impl AllocationPlan {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn allocated(&self, market: Market) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.signal.market == market)
            .map(|a| a.amount)
            .sum()
    }

    pub fn budget(&self, market: Market) -> f64 {
        match market {
            Market::Spot => self.spot_budget,
            Market::Futures => self.futures_budget,
        }
    }
}

/// Splits capital across ranked signals, one budget per market bucket
pub struct AllocationEngine {
    config: AllocationConfig,
}

impl AllocationEngine {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Bucket budget: the configured share of equity, capped by the cash
    /// actually sitting in that market
    pub fn bucket_budget(&self, market: Market, ctx: &AllocationContext) -> f64 {
        (ctx.equity * self.config.pct_for(market))
            .min(ctx.cash.get(market))
            .max(0.0)
    }

    /// `ranked` must already be ordered by confidence then expected return.
    /// `min_confidence` overrides the configured threshold when given.
    pub fn allocate(
        &self,
        ranked: &[Signal],
        ctx: &AllocationContext,
        min_confidence: Option<f64>,
    ) -> AllocationPlan {
        if ctx.kill_switch {
            return AllocationPlan {
                halted: true,
                ..Default::default()
            };
        }

        let threshold = min_confidence.unwrap_or(self.config.min_confidence);
        let free_slots = self.config.max_positions.saturating_sub(ctx.open_positions.len());
        let mut skipped = Vec::new();
        let mut selected: Vec<&Signal> = Vec::new();

        for signal in ranked {
            if signal.confidence < threshold {
                skipped.push((signal.symbol.clone(), "below confidence threshold".to_string()));
            } else if ctx.open_positions.contains(&(signal.symbol.clone(), signal.market)) {
                skipped.push((signal.symbol.clone(), "position already open".to_string()));
            } else if signal.entry.is_nan() || signal.entry <= 0.0 {
                skipped.push((signal.symbol.clone(), "non-positive entry".to_string()));
            } else if selected.len() >= free_slots {
                skipped.push((signal.symbol.clone(), "max positions reached".to_string()));
            } else {
                selected.push(signal);
            }
        }

        let mut plan = AllocationPlan {
            skipped,
            spot_budget: self.bucket_budget(Market::Spot, ctx),
            futures_budget: self.bucket_budget(Market::Futures, ctx),
            ..Default::default()
        };

        for market in [Market::Spot, Market::Futures] {
            let bucket: Vec<&Signal> = selected.iter().copied().filter(|s| s.market == market).collect();
            if bucket.is_empty() {
                continue;
            }
            let budget = plan.budget(market);

            let raw: Vec<f64> = bucket
                .iter()
                .map(|s| (s.confidence * s.expected_return_pct.max(0.0)).max(0.0))
                .collect();
            let total: f64 = raw.iter().sum();
            // All-zero weights fall back to an even split
            let weights: Vec<f64> = if total > 0.0 && total.is_finite() {
                raw.iter().map(|w| w / total).collect()
            } else {
                vec![1.0 / bucket.len() as f64; bucket.len()]
            };

            for (signal, weight) in bucket.into_iter().zip(weights) {
                let amount = budget * weight;
                if amount <= 0.0 {
                    plan.skipped.push((signal.symbol.clone(), format!("no {} budget", market)));
                    continue;
                }
                debug!(symbol = %signal.symbol, %market, weight, amount, "allocated");
                plan.allocations.push(Allocation {
                    signal: signal.clone(),
                    amount,
                    qty: amount / signal.entry,
                });
            }
        }

        plan
    }
}
