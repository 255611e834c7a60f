pub mod overlay;
#[cfg(test)]
mod tests;

pub use overlay::{RiskAdjustment, RiskOverlay, MAX_BONUS, MAX_PENALTY};
