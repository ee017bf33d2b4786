use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stats tree is empty: the crawler logs produced nothing usable")]
    EmptyTree,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type StatsResult<T> = Result<T, StatsError>;
