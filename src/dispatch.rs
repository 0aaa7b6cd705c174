use crate::backend::{MetricsBackend, PrometheusClient, QueryError};
use crate::config::Config;
use crate::query::{
    MetricKind, ParameterError, ParameterPolicy, QueryParams, QueryRequest, TemplateError,
};
use crate::reshape::SampleSet;

use ringlog::*;
use thiserror::Error;

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error("failed to build query: {0}")]
    Template(#[from] TemplateError),
    /// Every backend failure collapses into this variant. The cause is kept
    /// for logging but not shown to callers.
    #[error("query execution failed")]
    Execution(#[source] QueryError),
}

/// Resolves request parameters into a query from the catalogue and runs it
/// against the backend under a fixed deadline.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
    default_range_width: String,
    averaging_window: String,
    policy: ParameterPolicy,
}

impl Dispatcher {
    pub fn new(config: &Config, backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            timeout: config.backend().timeout(),
            default_range_width: config.query().default_range_width().to_string(),
            averaging_window: config.query().averaging_window().to_string(),
            policy: config.query().parameter_policy(),
        }
    }

    /// Builds a dispatcher talking to the configured Prometheus server.
    pub fn from_config(config: &Config) -> Result<Self, QueryError> {
        let client = PrometheusClient::new(config.backend().address(), config.backend().timeout())?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Issues exactly one query. Failures are never retried.
    ///
    /// An empty sample set is a successful outcome.
    pub async fn execute(
        &self,
        kind: MetricKind,
        averaged: bool,
        params: QueryParams,
    ) -> Result<(QueryRequest, SampleSet), DispatchError> {
        let request = QueryRequest::resolve(
            kind,
            averaged,
            params,
            &self.default_range_width,
            self.policy,
        )?;

        let query = request.render(&self.averaging_window)?;

        debug!("{kind} query: {query}");

        let result = tokio::time::timeout(self.timeout, self.backend.instant_query(&query))
            .await
            .unwrap_or_else(|_| Err(QueryError::Timeout(self.timeout)));

        match result {
            Ok(samples) => {
                debug!("{kind} query returned {} samples", samples.len());
                Ok((request, samples))
            }
            Err(e) => {
                warn!("{kind} query failed: {e}");
                Err(DispatchError::Execution(e))
            }
        }
    }
}
