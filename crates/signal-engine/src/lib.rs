pub mod backtest;
pub mod enrichment;
pub mod params;
pub mod scanner;
pub mod scorer;
pub mod targets;


pub use backtest::{quick_backtest, BacktestResult, EquityPoint};
pub use enrichment::SignalEnricher;
pub use params::{StrategyParams, StrategyPreset, WeightSet};
pub use scanner::{rank_candidates, Candidate, ScanReport, ScannerConfig, SignalScanner, SymbolOutcome};
pub use scorer::{ScoreBreakdown, Scorer};
pub use targets::{TargetProposer, Targets};
