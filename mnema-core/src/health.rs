//! Unified health check types
//!
//! Shared by the storage, vector, and embedding layers so the API health
//! endpoint can report per-backend status consistently.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a service or component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded
    Degraded,
    /// Component is not operational
    Unhealthy,
    /// Health status is unknown (e.g., not yet checked)
    Unknown,
}

/// Detailed health check result for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthCheck {
    /// Overall health status
    pub status: HealthStatus,
    /// Component name
    pub component: String,
    /// Detailed status message
    pub message: Option<String>,
    /// Response time in milliseconds (if applicable)
    pub response_time_ms: Option<i64>,
    /// Additional metadata
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    /// Create a healthy check result.
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            response_time_ms: None,
            metadata: None,
        }
    }

    /// Create a degraded check result.
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            response_time_ms: None,
            metadata: None,
        }
    }

    /// Create an unhealthy check result.
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            response_time_ms: None,
            metadata: None,
        }
    }

    /// Set the response time.
    pub fn with_response_time(mut self, ms: i64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }
}

/// Aggregate readiness report across all backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Fold individual checks into an overall status: any unhealthy backend
    /// makes the service unhealthy; any degraded one degrades it.
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else if checks.is_empty() {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };
        Self { status, checks }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregation() {
        let report = HealthReport::from_checks(vec![
            HealthCheck::healthy("storage"),
            HealthCheck::healthy("vector"),
        ]);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.is_ready());

        let degraded = HealthReport::from_checks(vec![
            HealthCheck::healthy("storage"),
            HealthCheck::degraded("vector", "slow responses"),
        ]);
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.is_ready());

        let down = HealthReport::from_checks(vec![
            HealthCheck::healthy("storage"),
            HealthCheck::unhealthy("vector", "connection refused"),
        ]);
        assert_eq!(down.status, HealthStatus::Unhealthy);
        assert!(!down.is_ready());
    }

    #[test]
    fn test_empty_report_unknown() {
        let report = HealthReport::from_checks(vec![]);
        assert_eq!(report.status, HealthStatus::Unknown);
    }
}
