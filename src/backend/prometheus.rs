use super::{MetricsBackend, QueryError};
use crate::reshape::{Sample, SampleSet};

use async_trait::async_trait;
use ringlog::*;
use serde::Deserialize;

use std::collections::HashMap;
use std::time::Duration;

/// Client for the Prometheus HTTP API.
///
/// The underlying connection pool holds no request state, so one client can
/// serve any number of concurrent requests.
#[derive(Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    url: String,
}

impl PrometheusClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/api/v1/query", address.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MetricsBackend for PrometheusClient {
    async fn instant_query(&self, query: &str) -> Result<SampleSet, QueryError> {
        let time = format!("{:.3}", chrono::Utc::now().timestamp_millis() as f64 / 1000.0);

        trace!("GET {} query={query} time={time}", self.url);

        let response = self
            .client
            .get(&self.url)
            .query(&[("query", query), ("time", time.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            // prometheus reports bad queries with a 4xx status and an error envelope
            return Err(match parse_vector(&body) {
                Err(QueryError::Backend(e)) => QueryError::Backend(e),
                _ => QueryError::Backend(format!("unexpected http status: {status}")),
            });
        }

        parse_vector(&body)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct VectorEntry {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

/// Decodes an instant query response body, accepting only vector results.
pub fn parse_vector(body: &[u8]) -> Result<SampleSet, QueryError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| QueryError::UnexpectedResult(format!("malformed response: {e}")))?;

    if envelope.status != "success" {
        return Err(QueryError::Backend(format!(
            "{}: {}",
            envelope.error_type.as_deref().unwrap_or("unknown"),
            envelope.error.as_deref().unwrap_or("no error message"),
        )));
    }

    let data = envelope
        .data
        .ok_or_else(|| QueryError::UnexpectedResult("response has no data".to_string()))?;

    if data.result_type != "vector" {
        return Err(QueryError::UnexpectedResult(format!(
            "result type is {}",
            data.result_type
        )));
    }

    let entries: Vec<VectorEntry> = serde_json::from_value(data.result)
        .map_err(|e| QueryError::UnexpectedResult(format!("malformed vector: {e}")))?;

    entries
        .into_iter()
        .map(|entry| {
            let value = entry.value.1.parse::<f64>().map_err(|_| {
                QueryError::UnexpectedResult(format!("sample value is not a number: {}", entry.value.1))
            })?;
            Ok(Sample::new(entry.metric, value))
        })
        .collect()
}
