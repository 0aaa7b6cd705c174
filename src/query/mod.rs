//! Query catalogue and template rendering.
//!
//! Every metric kind maps onto exactly one PromQL template. Requests only
//! choose which label matchers are substituted into it (one entity or all
//! entities) and the range width; the averaged variants wrap the rendered
//! expression in an `avg_over_time` subquery.

use crate::reshape::LabelPair;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use std::collections::BTreeMap;
use std::fmt;

mod catalogue;

pub use catalogue::{Template, AVERAGED};

lazy_static! {
    static ref NAME: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").unwrap();
    static ref RANGE_WIDTH: Regex = Regex::new(r"^([0-9]+(ms|s|m|h|d|w|y))+$").unwrap();
}

/// Longest entity name accepted (DNS subdomain limit).
const MAX_NAME_LEN: usize = 253;

/// The fixed set of queries the service knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    AppTraffic,
    AppCpu,
    AppMemory,
    NodeLatency,
    NodeAvailableMemory,
    NodeAvailableCpu,
}

/// Whether a kind describes applications inside a group or cluster nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    App,
    Node,
}

/// How samples of a given kind are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A relation between two entities.
    Pairwise(LabelPair),
    /// A single value per entity, keyed by the named label.
    Scalar(&'static str),
}

impl MetricKind {
    pub fn family(&self) -> Family {
        match self {
            Self::AppTraffic | Self::AppCpu | Self::AppMemory => Family::App,
            Self::NodeLatency | Self::NodeAvailableMemory | Self::NodeAvailableCpu => Family::Node,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Self::AppTraffic => Shape::Pairwise(LabelPair::APP),
            Self::NodeLatency => Shape::Pairwise(LabelPair::NODE),
            Self::AppCpu | Self::AppMemory => Shape::Scalar("container"),
            Self::NodeAvailableMemory | Self::NodeAvailableCpu => Shape::Scalar("node_id"),
        }
    }

    pub fn template(&self) -> &'static Template {
        match self {
            Self::AppTraffic => &catalogue::APP_TRAFFIC,
            Self::AppCpu => &catalogue::APP_CPU,
            Self::AppMemory => &catalogue::APP_MEMORY,
            Self::NodeLatency => &catalogue::NODE_LATENCY,
            Self::NodeAvailableMemory => &catalogue::NODE_AVAILABLE_MEMORY,
            Self::NodeAvailableCpu => &catalogue::NODE_AVAILABLE_CPU,
        }
    }

    /// Name of the request parameter that narrows the query to one entity.
    pub fn entity_param(&self) -> &'static str {
        match self.family() {
            Family::App => "app",
            Family::Node => "node",
        }
    }

    /// Human readable description used in "not found" messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::AppTraffic => "traffic",
            Self::AppCpu => "cpu usage",
            Self::AppMemory => "memory usage",
            Self::NodeLatency => "latency",
            Self::NodeAvailableMemory => "available memory",
            Self::NodeAvailableCpu => "available cpu",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AppTraffic => "app-traffic",
            Self::AppCpu => "app-cpu",
            Self::AppMemory => "app-memory",
            Self::NodeLatency => "node-latency",
            Self::NodeAvailableMemory => "node-available-memory",
            Self::NodeAvailableCpu => "node-available-cpu",
        };
        f.write_str(name)
    }
}

/// How request supplied strings are treated before substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterPolicy {
    /// Reject names and range widths that could alter the query structure.
    #[default]
    Validate,
    /// Substitute values verbatim. The backend must be trusted.
    Passthrough,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),
    #[error("invalid value for parameter {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template placeholder is not bound: {0}")]
    Unbound(String),
    #[error("template placeholder is not terminated at offset {0}")]
    Unterminated(usize),
}

pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && NAME.is_match(name)
}

pub fn is_valid_range_width(range_width: &str) -> bool {
    RANGE_WIDTH.is_match(range_width)
}

/// Returns `default` when no range width was supplied or it was empty.
pub fn resolve_range_width<'a>(range_width: Option<&'a str>, default: &'a str) -> &'a str {
    match range_width {
        None | Some("") => default,
        Some(range_width) => range_width,
    }
}

/// Raw parameters as they arrive with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub group: Option<String>,
    pub entity: Option<String>,
    pub range_width: Option<String>,
}

/// A fully resolved query, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub kind: MetricKind,
    pub averaged: bool,
    pub group: Option<String>,
    pub entity: Option<String>,
    pub range_width: String,
}

impl QueryRequest {
    /// Applies the range width default and the parameter policy to raw
    /// request parameters.
    pub fn resolve(
        kind: MetricKind,
        averaged: bool,
        params: QueryParams,
        default_range_width: &str,
        policy: ParameterPolicy,
    ) -> Result<Self, ParameterError> {
        let range_width =
            resolve_range_width(params.range_width.as_deref(), default_range_width).to_string();

        // an empty entity selects the all-entities view
        let entity = params.entity.filter(|e| !e.is_empty());

        let group = match kind.family() {
            Family::App => params.group.filter(|g| !g.is_empty()),
            Family::Node => None,
        };

        if policy == ParameterPolicy::Validate {
            if kind.family() == Family::App {
                match &group {
                    None => return Err(ParameterError::Missing("app-group")),
                    Some(group) if !is_valid_name(group) => {
                        return Err(ParameterError::Invalid {
                            name: "app-group",
                            value: group.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            if let Some(entity) = entity.as_ref().filter(|e| !is_valid_name(e)) {
                return Err(ParameterError::Invalid {
                    name: kind.entity_param(),
                    value: entity.clone(),
                });
            }

            if !is_valid_range_width(&range_width) {
                return Err(ParameterError::Invalid {
                    name: "range-width",
                    value: range_width,
                });
            }
        }

        Ok(Self {
            kind,
            averaged,
            group,
            entity,
            range_width,
        })
    }

    /// Renders the PromQL expression for this request.
    pub fn render(&self, averaging_window: &str) -> Result<String, TemplateError> {
        let template = self.kind.template();

        let mut matchers = match &self.entity {
            Some(entity) => QueryBuilder::new(template.scoped).bind(self.kind.entity_param(), entity),
            None => QueryBuilder::new(template.all),
        };
        if self.kind.family() == Family::App {
            matchers = matchers.bind("app_group", self.group.as_deref().unwrap_or_default());
        }
        let matchers = matchers.render()?;

        let expr = QueryBuilder::new(template.expr)
            .bind("matchers", &matchers)
            .bind("range", &self.range_width)
            .render()?;

        if !self.averaged {
            return Ok(expr);
        }

        QueryBuilder::new(AVERAGED)
            .bind("expr", &expr)
            .bind("window", averaging_window)
            .bind("range", &self.range_width)
            .render()
    }
}

/// Substitutes `${name}` placeholders in a template with bound values.
///
/// Bound values are inserted as-is and never rescanned for placeholders.
pub struct QueryBuilder<'a> {
    template: &'a str,
    bindings: BTreeMap<&'a str, &'a str>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(template: &'a str) -> Self {
        Self {
            template,
            bindings: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: &'a str, value: &'a str) -> Self {
        self.bindings.insert(name, value);
        self
    }

    pub fn render(&self) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template;
        let mut offset = 0;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);

            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let name = &after[..end];

            let value = self
                .bindings
                .get(name)
                .ok_or_else(|| TemplateError::Unbound(name.to_string()))?;
            out.push_str(value);

            let consumed = start + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }

        out.push_str(rest);
        Ok(out)
    }
}
