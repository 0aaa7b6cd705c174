use crate::reshape::SampleSet;

use async_trait::async_trait;
use thiserror::Error;

use std::time::Duration;

mod prometheus;

pub use prometheus::PrometheusClient;

/// Failure to obtain a vector result from the metrics backend.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to create metrics client: {0}")]
    Client(String),
    #[error("error during query execution: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("query did not complete within {0:?}")]
    Timeout(Duration),
    #[error("backend returned an error: {0}")]
    Backend(String),
    #[error("query result is not a vector: {0}")]
    UnexpectedResult(String),
}

/// A store able to evaluate instant queries.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluates `query` at the current time.
    async fn instant_query(&self, query: &str) -> Result<SampleSet, QueryError>;
}
