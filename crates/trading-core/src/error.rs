use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradingError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Trading halted: {0}")]
    Halted(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type TradingResult<T> = Result<T, TradingError>;
