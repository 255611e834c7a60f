pub mod agent;
pub mod config;
pub mod market_data;
pub mod metrics;
pub mod order_lifecycle;
pub mod position_monitor;
pub mod scheduler;

pub use agent::{Controls, ManualOrder, ScanSummary, ScanTrigger, TradingAgent};
pub use config::{AdvisorMode, AgentConfig, Mode};
pub use market_data::CsvMarketData;
pub use metrics::{AgentMetrics, ExecutionSummary};
pub use order_lifecycle::{ExecutionOutcome, OrderLifecycle};
pub use position_monitor::{MonitorReport, PositionMonitor};
pub use scheduler::{JobRun, Scheduler, SingleFlight};

#[cfg(test)]
mod tests;
