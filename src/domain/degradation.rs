use std::fmt;

use serde::{Deserialize, Serialize};

/// One stage of load shedding, applied while the host is unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationStep {
    ReduceMonitoringFrequency,
    DisableNonEssentialFeatures,
    ReduceConcurrency,
    EmergencyMode,
}

impl DegradationStep {
    pub fn default_sequence() -> Vec<Self> {
        vec![
            Self::ReduceMonitoringFrequency,
            Self::DisableNonEssentialFeatures,
            Self::ReduceConcurrency,
            Self::EmergencyMode,
        ]
    }
}

impl fmt::Display for DegradationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReduceMonitoringFrequency => "reduce_monitoring_frequency",
            Self::DisableNonEssentialFeatures => "disable_non_essential_features",
            Self::ReduceConcurrency => "reduce_concurrency",
            Self::EmergencyMode => "emergency_mode",
        };
        f.write_str(s)
    }
}

/// Optional monitoring features that degradation may switch off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringFeature {
    PredictiveAlerts,
    LeakDetection,
    DegradationDetection,
    MemoryOptimization,
    Webhook,
    ProcessResourceChecks,
}

impl MonitoringFeature {
    pub fn default_non_essential() -> Vec<Self> {
        vec![Self::PredictiveAlerts, Self::MemoryOptimization, Self::Webhook]
    }
}

impl fmt::Display for MonitoringFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PredictiveAlerts => "predictive_alerts",
            Self::LeakDetection => "leak_detection",
            Self::DegradationDetection => "degradation_detection",
            Self::MemoryOptimization => "memory_optimization",
            Self::Webhook => "webhook",
            Self::ProcessResourceChecks => "process_resource_checks",
        };
        f.write_str(s)
    }
}
