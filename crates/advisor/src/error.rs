use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdvisorError {
    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Timeout")]
    Timeout,
}

pub type AdvisorResult<T> = Result<T, AdvisorError>;
