//! Closed predicate algebra for storage queries
//!
//! Callers never construct backend-specific queries; they build a
//! `FilterExpr` and each backend compiles or evaluates it natively. The
//! in-process evaluator here is the reference semantics and serves the
//! embedded backend directly.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Predicate over a JSON-shaped row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterExpr {
    /// Field equals value.
    Eq {
        field: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        value: JsonValue,
    },
    /// Field does not equal value.
    Ne {
        field: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Object))]
        value: JsonValue,
    },
    /// Numeric field within the closed range `[min, max]`; either bound may
    /// be open.
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Field value is a member of the given list.
    In {
        field: String,
        #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
        values: Vec<JsonValue>,
    },
    /// Array field contains at least one of the given strings.
    TagsAny { field: String, tags: Vec<String> },
    /// Full-text match on a nominated text column. Backends score it;
    /// the reference evaluator treats it as case-insensitive token
    /// containment.
    TextMatch { field: String, query: String },
    /// Conjunction.
    And { clauses: Vec<FilterExpr> },
    /// Disjunction.
    Or { clauses: Vec<FilterExpr> },
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: JsonValue) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value,
        }
    }

    /// Create a tags-contains-any filter.
    pub fn tags_any(field: impl Into<String>, tags: Vec<String>) -> Self {
        FilterExpr::TagsAny {
            field: field.into(),
            tags,
        }
    }

    /// Create a numeric range filter.
    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        FilterExpr::Range {
            field: field.into(),
            min,
            max,
        }
    }

    /// AND this filter with another, flattening nested conjunctions.
    pub fn and(self, other: FilterExpr) -> Self {
        match self {
            FilterExpr::And { mut clauses } => {
                clauses.push(other);
                FilterExpr::And { clauses }
            }
            first => FilterExpr::And {
                clauses: vec![first, other],
            },
        }
    }

    /// Evaluate this predicate against a JSON row.
    ///
    /// Reference semantics for all backends: a backend-native compilation
    /// must accept exactly the rows this accepts (scores may differ).
    pub fn matches(&self, row: &JsonValue) -> bool {
        match self {
            FilterExpr::Eq { field, value } => lookup(row, field) == Some(value),
            FilterExpr::Ne { field, value } => lookup(row, field) != Some(value),
            FilterExpr::Range { field, min, max } => {
                let Some(n) = lookup(row, field).and_then(JsonValue::as_f64) else {
                    return false;
                };
                min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
            }
            FilterExpr::In { field, values } => lookup(row, field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            FilterExpr::TagsAny { field, tags } => {
                let Some(arr) = lookup(row, field).and_then(JsonValue::as_array) else {
                    return false;
                };
                arr.iter()
                    .filter_map(JsonValue::as_str)
                    .any(|t| tags.iter().any(|wanted| wanted == t))
            }
            FilterExpr::TextMatch { field, query } => {
                let Some(text) = lookup(row, field).and_then(JsonValue::as_str) else {
                    return false;
                };
                let haystack = text.to_lowercase();
                query
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .any(|token| haystack.contains(&token))
            }
            FilterExpr::And { clauses } => clauses.iter().all(|c| c.matches(row)),
            FilterExpr::Or { clauses } => clauses.iter().any(|c| c.matches(row)),
        }
    }

    /// Lexical match score in [0, 1] for `TextMatch` clauses nested in this
    /// filter: fraction of query tokens present in the nominated column.
    /// Non-text filters contribute nothing.
    pub fn text_score(&self, row: &JsonValue) -> f64 {
        match self {
            FilterExpr::TextMatch { field, query } => {
                let Some(text) = lookup(row, field).and_then(JsonValue::as_str) else {
                    return 0.0;
                };
                let haystack = text.to_lowercase();
                let tokens: Vec<String> =
                    query.split_whitespace().map(str::to_lowercase).collect();
                if tokens.is_empty() {
                    return 0.0;
                }
                let hits = tokens.iter().filter(|t| haystack.contains(*t)).count();
                hits as f64 / tokens.len() as f64
            }
            FilterExpr::And { clauses } | FilterExpr::Or { clauses } => clauses
                .iter()
                .map(|c| c.text_score(row))
                .fold(0.0, f64::max),
            _ => 0.0,
        }
    }
}

/// Dotted-path field lookup inside a JSON object.
fn lookup<'a>(row: &'a JsonValue, field: &str) -> Option<&'a JsonValue> {
    let mut current = row;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Sort order for query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }
}
