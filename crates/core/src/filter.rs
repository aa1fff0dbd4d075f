//! Attribute filters for retrieval queries
//!
//! A small tagged expression rather than a bare key/value pair, so the
//! query language can grow without re-deriving one. Only exact equality
//! and conjunction exist today.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Equality predicate over indexed-chunk attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Attribute equals value exactly
    Eq(String, Value),
    /// All sub-filters hold
    And(Vec<Filter>),
}

impl Filter {
    /// Equality on a single attribute.
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(key.into(), value.into())
    }

    /// Conjunction of filters. A single-element conjunction collapses to
    /// the element itself.
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        }
    }

    /// Evaluate against a chunk's attribute map.
    pub fn matches(&self, attributes: &serde_json::Map<String, Value>) -> bool {
        match self {
            Filter::Eq(key, value) => attributes.get(key) == Some(value),
            Filter::And(filters) => filters.iter().all(|f| f.matches(attributes)),
        }
    }

    /// Flatten into the (attribute, value) pairs of the conjunction.
    pub fn terms(&self) -> Vec<(&str, &Value)> {
        match self {
            Filter::Eq(key, value) => vec![(key.as_str(), value)],
            Filter::And(filters) => filters.iter().flat_map(|f| f.terms()).collect(),
        }
    }
}
