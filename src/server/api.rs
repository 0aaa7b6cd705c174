use super::AppState;
use crate::dispatch::DispatchError;
use crate::query::{Family, MetricKind, QueryParams, QueryRequest, Shape};
use crate::reshape::{
    pivot_all_pairs, pivot_scalar, pivot_single_entity, AdjacencyMap, SampleSet, ScalarMap,
};

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Json;
use ringlog::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::sync::Arc;

/// Query string accepted by every metric endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct MetricParams {
    #[serde(rename = "app-group")]
    pub app_group: Option<String>,
    pub app: Option<String>,
    pub node: Option<String>,
    #[serde(rename = "range-width")]
    pub range_width: Option<String>,
}

impl MetricParams {
    fn for_kind(self, kind: MetricKind) -> QueryParams {
        let entity = match kind.family() {
            Family::App => self.app,
            Family::Node => self.node,
        };

        QueryParams {
            group: self.app_group,
            entity,
            range_width: self.range_width,
        }
    }
}

/// Body of a successful response. The shape depends on the metric kind and
/// on whether a single entity was requested.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricResponse {
    Scalar(f64),
    Flat(ScalarMap),
    Nested(AdjacencyMap),
}

/// Body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("invalid query string: {0}")]
    QueryString(#[from] QueryRejection),
    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(DispatchError::Parameter(_)) => StatusCode::BAD_REQUEST,
            Self::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::QueryString(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// A GET handler serving one metric kind.
pub fn endpoint(kind: MetricKind, averaged: bool) -> MethodRouter<Arc<AppState>> {
    get(
        move |State(state): State<Arc<AppState>>,
              params: Result<Query<MetricParams>, QueryRejection>| async move {
            metric(&state, kind, averaged, params).await
        },
    )
}

async fn metric(
    state: &AppState,
    kind: MetricKind,
    averaged: bool,
    params: Result<Query<MetricParams>, QueryRejection>,
) -> Result<Json<MetricResponse>, ApiError> {
    let Query(params) = params?;

    let (request, samples) = state
        .dispatcher
        .execute(kind, averaged, params.for_kind(kind))
        .await?;

    let response = reshape(&request, samples)?;

    Ok(Json(response))
}

/// Picks the pivot for a request and applies it.
///
/// Scalar metrics for a single entity answer with a bare number, matching
/// the established API; the all-entities view answers with a map.
pub fn reshape(request: &QueryRequest, samples: SampleSet) -> Result<MetricResponse, ApiError> {
    let kind = request.kind;

    let response = match (kind.shape(), &request.entity) {
        (Shape::Pairwise(pair), Some(entity)) => {
            MetricResponse::Flat(pivot_single_entity(&samples, entity, pair))
        }
        (Shape::Pairwise(pair), None) => MetricResponse::Nested(pivot_all_pairs(&samples, pair)),
        (Shape::Scalar(_), Some(entity)) => match samples.first() {
            Some(sample) => MetricResponse::Scalar(sample.value()),
            None => {
                debug!("no {kind} samples for {entity}");
                return Err(ApiError::NotFound(format!(
                    "{} metrics for {} {entity} not found",
                    kind.description(),
                    kind.entity_param(),
                )));
            }
        },
        (Shape::Scalar(label), None) => MetricResponse::Flat(pivot_scalar(&samples, label)),
    };

    Ok(response)
}
