//! Networked vector index over a Qdrant-compatible REST API
//!
//! Speaks the plain HTTP surface (create collection, upsert points, search,
//! delete) so deployments can point `VECTOR_URL` at any Qdrant-compatible
//! server. The attribute filter is translated to a native payload filter
//! where the wire format can express it; returned hits are always
//! re-checked in process, so the native translation only affects recall
//! efficiency, never correctness.

use std::time::Duration;

use async_trait::async_trait;
use mnema_core::{
    FilterExpr, HealthCheck, MnemaError, MnemaResult, VectorAttrs, VectorIndexError,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use super::{attrs_match, normalize_cosine, CollectionRef, VectorHit, VectorIndex, VectorPoint};

/// Networked vector index client.
pub struct RemoteVectorIndex {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: JsonValue,
    score: f64,
    payload: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

impl RemoteVectorIndex {
    /// Create a client for the server at `base_url`
    /// (e.g. `http://localhost:6333`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MnemaResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                MnemaError::Vector(VectorIndexError::Unavailable {
                    reason: format!("failed to build http client: {}", e),
                })
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_transport_error(e: reqwest::Error) -> MnemaError {
        if e.is_timeout() {
            MnemaError::Vector(VectorIndexError::Timeout { elapsed_ms: 0 })
        } else {
            MnemaError::Vector(VectorIndexError::Unavailable {
                reason: e.to_string(),
            })
        }
    }

    async fn check_status(response: reqwest::Response) -> MnemaResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MnemaError::Vector(VectorIndexError::Unavailable {
                reason: format!("vector backend returned {}: {}", status, body),
            }))
        }
    }

    fn parse_attrs(payload: Option<JsonValue>) -> Option<VectorAttrs> {
        payload.and_then(|p| serde_json::from_value(p).ok())
    }
}

/// Translate the supported subset of the filter algebra into a Qdrant
/// payload filter. `None` means the clause cannot be expressed natively and
/// the in-process re-check alone will enforce it.
fn native_filter(filter: &FilterExpr) -> Option<JsonValue> {
    match filter {
        FilterExpr::Eq { field, value } => Some(json!({
            "must": [{"key": field, "match": {"value": value}}]
        })),
        FilterExpr::In { field, values } => Some(json!({
            "must": [{"key": field, "match": {"any": values}}]
        })),
        FilterExpr::TagsAny { field, tags } => Some(json!({
            "must": [{"key": field, "match": {"any": tags}}]
        })),
        FilterExpr::Range { field, min, max } => {
            let mut range = serde_json::Map::new();
            if let Some(min) = min {
                range.insert("gte".to_string(), json!(min));
            }
            if let Some(max) = max {
                range.insert("lte".to_string(), json!(max));
            }
            Some(json!({"must": [{"key": field, "range": range}]}))
        }
        FilterExpr::And { clauses } => {
            let mut must = Vec::new();
            for clause in clauses {
                // A single untranslatable clause in a conjunction is fine;
                // it just widens the native candidate set.
                if let Some(native) = native_filter(clause) {
                    if let Some(inner) = native.get("must").and_then(JsonValue::as_array) {
                        must.extend(inner.iter().cloned());
                    }
                }
            }
            (!must.is_empty()).then(|| json!({"must": must}))
        }
        // Or/Ne/TextMatch are enforced purely by the in-process re-check.
        _ => None,
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    async fn ensure_collection(&self, collection: &CollectionRef, dim: i32) -> MnemaResult<()> {
        if dim <= 0 {
            return Err(MnemaError::Vector(VectorIndexError::InvalidVector {
                reason: format!("non-positive dimension {}", dim),
            }));
        }
        let name = collection.qualified();

        let existing = self
            .http
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        if existing.status().is_success() {
            return Ok(());
        }

        let body = json!({
            "vectors": {"size": dim, "distance": "Cosine"}
        });
        let response = self
            .http
            .put(self.url(&format!("/collections/{}", name)))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionRef, point: VectorPoint) -> MnemaResult<()> {
        let name = collection.qualified();
        let body = json!({
            "points": [{
                "id": point.id.to_string(),
                "vector": point.vector,
                "payload": point.attrs,
            }]
        });
        let response = self
            .http
            .put(self.url(&format!("/collections/{}/points?wait=true", name)))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionRef,
        vector: &[f32],
        k: usize,
        filter: Option<&FilterExpr>,
    ) -> MnemaResult<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let name = collection.qualified();

        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(native) = filter.and_then(native_filter) {
            body["filter"] = native;
        }

        let response = self
            .http
            .post(self.url(&format!("/collections/{}/points/search", name)))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        let response = Self::check_status(response).await?;
        let parsed: SearchResponse = response.json().await.map_err(|e| {
            MnemaError::Vector(VectorIndexError::Unavailable {
                reason: format!("invalid search response: {}", e),
            })
        })?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for point in parsed.result {
            let Some(attrs) = Self::parse_attrs(point.payload) else {
                continue;
            };
            // Correctness re-check regardless of the native pre-filter.
            if !attrs_match(filter, &attrs) {
                continue;
            }
            let Some(id) = point.id.as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
                continue;
            };
            hits.push(VectorHit {
                id,
                score: normalize_cosine(point.score),
                attrs,
            });
        }
        Ok(hits)
    }

    async fn delete_point(&self, collection: &CollectionRef, id: Uuid) -> MnemaResult<()> {
        let name = collection.qualified();
        let body = json!({"points": [id.to_string()]});
        let response = self
            .http
            .post(self.url(&format!("/collections/{}/points/delete?wait=true", name)))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete_by_filter(
        &self,
        collection: &CollectionRef,
        filter: &FilterExpr,
    ) -> MnemaResult<u64> {
        let name = collection.qualified();
        let Some(native) = native_filter(filter) else {
            return Err(MnemaError::Vector(VectorIndexError::InvalidVector {
                reason: "filter cannot be expressed for remote deletion".to_string(),
            }));
        };
        let body = json!({"filter": native});
        let response = self
            .http
            .post(self.url(&format!("/collections/{}/points/delete?wait=true", name)))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        Self::check_status(response).await?;
        // The wire format does not report how many points were removed.
        Ok(0)
    }

    async fn count(&self, collection: &CollectionRef) -> MnemaResult<u64> {
        let name = collection.qualified();
        let response = self
            .http
            .post(self.url(&format!("/collections/{}/points/count", name)))
            .json(&json!({"exact": true}))
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        let response = Self::check_status(response).await?;
        let parsed: CountResponse = response.json().await.map_err(|e| {
            MnemaError::Vector(VectorIndexError::Unavailable {
                reason: format!("invalid count response: {}", e),
            })
        })?;
        Ok(parsed.result.count)
    }

    async fn health(&self) -> HealthCheck {
        let started = std::time::Instant::now();
        match self.http.get(self.url("/healthz")).send().await {
            Ok(response) if response.status().is_success() => {
                HealthCheck::healthy("vector:remote")
                    .with_response_time(started.elapsed().as_millis() as i64)
            }
            Ok(response) => HealthCheck::unhealthy(
                "vector:remote",
                format!("health endpoint returned {}", response.status()),
            ),
            Err(e) => HealthCheck::unhealthy("vector:remote", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_filter_translation() {
        let filter = FilterExpr::eq("agent_name", json!("default"))
            .and(FilterExpr::tags_any("tags", vec!["rust".to_string()]))
            .and(FilterExpr::range("importance", Some(0.5), None));

        let native = native_filter(&filter).expect("translatable");
        let must = native["must"].as_array().expect("must array");
        assert_eq!(must.len(), 3);
    }

    #[test]
    fn test_untranslatable_clauses_fall_back() {
        let or = FilterExpr::Or {
            clauses: vec![
                FilterExpr::eq("a", json!(1)),
                FilterExpr::eq("b", json!(2)),
            ],
        };
        assert!(native_filter(&or).is_none());

        // A conjunction keeps its translatable clauses.
        let mixed = or.and(FilterExpr::eq("scope", json!("persistent")));
        let native = native_filter(&mixed).expect("partially translatable");
        assert_eq!(native["must"].as_array().expect("must").len(), 1);
    }
}
