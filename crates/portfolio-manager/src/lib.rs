pub mod allocation;
pub mod db;
pub mod ledger;

pub use allocation::{Allocation, AllocationConfig, AllocationContext, AllocationEngine, AllocationPlan};
pub use db::SqliteRepository;
pub use ledger::PortfolioLedger;
