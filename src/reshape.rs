//! Pivots flat sample vectors into maps keyed by entity name.
//!
//! All functions here are pure single passes over a [`SampleSet`]. Samples
//! whose key label is missing or empty are skipped so that entity names in
//! the output are never empty. Duplicate keys resolve last-write-wins.

use std::collections::{BTreeMap, HashMap};

/// Entity name to value.
pub type ScalarMap = BTreeMap<String, f64>;

/// Entity name to (entity name to value).
pub type AdjacencyMap = BTreeMap<String, ScalarMap>;

/// One labeled observation returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    labels: HashMap<String, String>,
    value: f64,
}

impl Sample {
    pub fn new(labels: HashMap<String, String>, value: f64) -> Self {
        Self { labels, value }
    }

    /// The non-empty value of a label, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The ordered result of a single instant query.
pub type SampleSet = Vec<Sample>;

/// Names of the two labels identifying the endpoints of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPair {
    pub source: &'static str,
    pub destination: &'static str,
}

impl LabelPair {
    pub const APP: LabelPair = LabelPair {
        source: "source_app",
        destination: "destination_app",
    };

    pub const NODE: LabelPair = LabelPair {
        source: "origin_node",
        destination: "destination_node",
    };
}

/// Values of every relation involving `entity`, keyed by the other endpoint.
///
/// Samples where neither endpoint is `entity` are ignored, as are
/// self-relations where both endpoints are `entity`.
pub fn pivot_single_entity(samples: &[Sample], entity: &str, pair: LabelPair) -> ScalarMap {
    let mut values = ScalarMap::new();

    for sample in samples {
        let source = sample.label(pair.source);
        let destination = sample.label(pair.destination);

        let other = if source == Some(entity) {
            destination
        } else if destination == Some(entity) {
            source
        } else {
            None
        };

        if let Some(other) = other.filter(|other| *other != entity) {
            values.insert(other.to_string(), sample.value());
        }
    }

    values
}

/// Full symmetric matrix: every sample is recorded under both
/// `[source][destination]` and `[destination][source]`.
///
/// A missing pair means nothing was observed in the window, not zero.
pub fn pivot_all_pairs(samples: &[Sample], pair: LabelPair) -> AdjacencyMap {
    let mut values = AdjacencyMap::new();

    for sample in samples {
        let (Some(source), Some(destination)) =
            (sample.label(pair.source), sample.label(pair.destination))
        else {
            continue;
        };

        values
            .entry(source.to_string())
            .or_default()
            .insert(destination.to_string(), sample.value());

        values
            .entry(destination.to_string())
            .or_default()
            .insert(source.to_string(), sample.value());
    }

    values
}

/// Maps each sample's `label` directly to its value.
pub fn pivot_scalar(samples: &[Sample], label: &str) -> ScalarMap {
    samples
        .iter()
        .filter_map(|sample| {
            sample
                .label(label)
                .map(|key| (key.to_string(), sample.value()))
        })
        .collect()
}
