use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete health classification of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Recovering,
    Degraded,
    Critical,
    Emergency,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Recovering => "RECOVERING",
            Self::Degraded => "DEGRADED",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        };
        f.write_str(s)
    }
}

/// Issues detected from the sample history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthIssues {
    pub leak_detected: bool,
    pub degradation_detected: bool,
}

/// Metric a predictive alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMetric {
    Memory,
    Disk,
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Disk => f.write_str("disk"),
        }
    }
}

/// Warning that a resource will reach its limit within the prediction horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveAlert {
    pub metric: AlertMetric,
    pub current_percent: f64,
    pub limit_percent: f64,
    pub minutes_to_limit: f64,
    pub message: String,
}

/// Result of one health evaluation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub health_score: f64,
    pub health_state: HealthState,
    pub issues: HealthIssues,
    pub predictive_alerts: Vec<PredictiveAlert>,
    pub recommendations: Vec<String>,
}
