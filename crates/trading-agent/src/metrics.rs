use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

const RECENT_EXITS: usize = 20;

/// Counts of what one allocation pass did with its signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// Kill switch was on; nothing was attempted
    pub halted: bool,
    pub placed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Running counters for scan and monitor cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub scans_run: u64,
    pub monitor_cycles: u64,
    pub signals_generated: u64,
    pub symbols_failed: u64,
    pub orders_placed: u64,
    pub orders_skipped: u64,
    pub orders_errored: u64,
    pub exits: u64,
    pub realized_pnl: f64,
    pub last_scan_duration_ms: u64,
    pub last_monitor_duration_ms: u64,

    #[serde(skip)]
    recent_exits: VecDeque<f64>,
    #[serde(skip)]
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            recent_exits: VecDeque::with_capacity(RECENT_EXITS),
            log_interval_cycles,
            ..Default::default()
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_scan(&mut self, start: Instant, signals: usize, failed: usize) {
        self.scans_run += 1;
        self.signals_generated += signals as u64;
        self.symbols_failed += failed as u64;
        self.last_scan_duration_ms = start.elapsed().as_millis() as u64;
        if self.log_interval_cycles > 0 && self.scans_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    pub fn record_execution(&mut self, summary: &ExecutionSummary) {
        self.orders_placed += summary.placed as u64;
        self.orders_skipped += summary.skipped as u64;
        self.orders_errored += summary.errors as u64;
    }

    pub fn record_exit(&mut self, pnl: f64) {
        self.exits += 1;
        self.realized_pnl += pnl;
        self.recent_exits.push_back(pnl);
        if self.recent_exits.len() > RECENT_EXITS {
            self.recent_exits.pop_front();
        }
    }

    pub fn record_monitor(&mut self, start: Instant) {
        self.monitor_cycles += 1;
        self.last_monitor_duration_ms = start.elapsed().as_millis() as u64;
    }

    /// Share of winning exits among the last 20 (0-100%)
    pub fn recent_win_rate(&self) -> f64 {
        if self.recent_exits.is_empty() {
            return 0.0;
        }
        let wins = self.recent_exits.iter().filter(|p| **p > 0.0).count() as f64;
        wins / self.recent_exits.len() as f64 * 100.0
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            scans = self.scans_run,
            monitor_cycles = self.monitor_cycles,
            signals_generated = self.signals_generated,
            symbols_failed = self.symbols_failed,
            orders_placed = self.orders_placed,
            orders_skipped = self.orders_skipped,
            orders_errored = self.orders_errored,
            exits = self.exits,
            realized_pnl = format!("{:.2}", self.realized_pnl),
            recent_win_rate = format!("{:.1}%", self.recent_win_rate()),
            last_scan_ms = self.last_scan_duration_ms,
            last_monitor_ms = self.last_monitor_duration_ms,
            "Agent metrics summary"
        );
    }
}
