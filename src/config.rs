use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DegradationStep, HealthCheckSpec, MonitoringFeature, ProcessSpec, RestartStrategy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Supervisor configuration.
///
/// Loaded once at startup. Durations are expressed in seconds. Nothing mutates
/// a config in place: degradation derives a new value with
/// [`SupervisorConfig::with_widened_intervals`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    // Scheduling
    pub check_interval: f64,
    pub health_check_interval: f64,
    pub health_check_timeout: f64,
    pub health_check_failure_threshold: u32,
    pub metrics_collection_interval: f64,
    pub max_monitoring_interval: f64,

    // Resource thresholds (percent)
    pub warning_cpu_percent: f64,
    pub warning_memory_percent: f64,
    pub warning_disk_percent: f64,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_disk_percent: f64,
    pub emergency_cpu_percent: f64,
    pub emergency_memory_percent: f64,
    pub emergency_disk_percent: f64,

    // Restart policy
    pub enable_auto_restart: bool,
    pub max_retries: u32,
    pub retry_delay: f64,
    pub exponential_backoff: bool,
    pub max_retry_delay: f64,
    pub termination_timeout: f64,
    pub emergency_shutdown_timeout: f64,

    // Leak and regression detection
    pub history_size: usize,
    pub max_memory_growth_rate: f64,
    pub leak_min_samples: usize,
    pub max_handle_growth: u64,
    pub performance_degradation_threshold: f64,
    pub baseline_samples: usize,
    pub rolling_window: usize,
    pub prediction_horizon_minutes: f64,

    // Circuit breaker
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: f64,
    pub circuit_breaker_half_open_max_calls: u32,

    // Degradation
    pub degradation_steps: Vec<DegradationStep>,
    pub non_essential_features: Vec<MonitoringFeature>,

    // Persistence
    pub state_dir: PathBuf,
    pub state_save_interval: f64,
    pub metrics_retention_days: u32,
    pub backup_retention_days: u32,

    // Startup preflight
    pub min_free_memory_mb: u64,
    pub min_free_disk_mb: u64,

    // Outbound interfaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub webhook_timeout: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_port: Option<u16>,
    pub proc_path: PathBuf,
    pub log_level: String,

    pub processes: Vec<ProcessSpec>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: 5.0,
            health_check_interval: 30.0,
            health_check_timeout: 5.0,
            health_check_failure_threshold: 3,
            metrics_collection_interval: 10.0,
            max_monitoring_interval: 300.0,

            warning_cpu_percent: 70.0,
            warning_memory_percent: 75.0,
            warning_disk_percent: 80.0,
            max_cpu_percent: 90.0,
            max_memory_percent: 90.0,
            max_disk_percent: 95.0,
            emergency_cpu_percent: 98.0,
            emergency_memory_percent: 97.0,
            emergency_disk_percent: 99.0,

            enable_auto_restart: true,
            max_retries: 5,
            retry_delay: 1.0,
            exponential_backoff: true,
            max_retry_delay: 60.0,
            termination_timeout: 10.0,
            emergency_shutdown_timeout: 30.0,

            history_size: 1000,
            max_memory_growth_rate: 10.0,
            leak_min_samples: 30,
            max_handle_growth: 100,
            performance_degradation_threshold: 50.0,
            baseline_samples: 50,
            rolling_window: 10,
            prediction_horizon_minutes: 60.0,

            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: 60.0,
            circuit_breaker_half_open_max_calls: 3,

            degradation_steps: DegradationStep::default_sequence(),
            non_essential_features: MonitoringFeature::default_non_essential(),

            state_dir: PathBuf::from("./vigil-state"),
            state_save_interval: 60.0,
            metrics_retention_days: 7,
            backup_retention_days: 7,

            min_free_memory_mb: 64,
            min_free_disk_mb: 100,

            webhook_url: None,
            webhook_timeout: 5.0,
            status_port: None,
            proc_path: PathBuf::from("/proc"),
            log_level: "info".to_string(),

            processes: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Load from the TOML file named by `VIGIL_CONFIG`, or from the environment
    /// when it is unset, and validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match env::var("VIGIL_CONFIG") {
            Ok(path) => Self::from_file(path)?.with_env_overrides()?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Defaults overridden by `VIGIL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_parse("VIGIL_CHECK_INTERVAL")? {
            self.check_interval = v;
        }
        if let Some(v) = env_parse("VIGIL_HEALTH_CHECK_INTERVAL")? {
            self.health_check_interval = v;
        }
        if let Some(v) = env_parse("VIGIL_METRICS_INTERVAL")? {
            self.metrics_collection_interval = v;
        }
        if let Some(v) = env_parse("VIGIL_MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("VIGIL_STATUS_PORT")? {
            self.status_port = Some(v);
        }
        if let Ok(v) = env::var("VIGIL_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("VIGIL_PROC_PATH") {
            self.proc_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("VIGIL_WEBHOOK_URL") {
            self.webhook_url = Some(v);
        }
        if let Ok(v) = env::var("VIGIL_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("check_interval", self.check_interval),
            ("health_check_interval", self.health_check_interval),
            ("health_check_timeout", self.health_check_timeout),
            ("metrics_collection_interval", self.metrics_collection_interval),
            ("max_monitoring_interval", self.max_monitoring_interval),
            ("termination_timeout", self.termination_timeout),
            ("emergency_shutdown_timeout", self.emergency_shutdown_timeout),
            ("circuit_breaker_timeout", self.circuit_breaker_timeout),
            ("state_save_interval", self.state_save_interval),
            ("webhook_timeout", self.webhook_timeout),
            ("prediction_horizon_minutes", self.prediction_horizon_minutes),
            ("max_memory_growth_rate", self.max_memory_growth_rate),
            ("performance_degradation_threshold", self.performance_degradation_threshold),
        ];
        for (field, value) in durations {
            require_positive(field, value)?;
        }

        validate_restart("", &self.restart_strategy())?;

        validate_thresholds(
            "cpu",
            self.warning_cpu_percent,
            self.max_cpu_percent,
            self.emergency_cpu_percent,
        )?;
        validate_thresholds(
            "memory",
            self.warning_memory_percent,
            self.max_memory_percent,
            self.emergency_memory_percent,
        )?;
        validate_thresholds(
            "disk",
            self.warning_disk_percent,
            self.max_disk_percent,
            self.emergency_disk_percent,
        )?;

        if self.health_check_failure_threshold == 0 {
            return Err(ConfigError::invalid("health_check_failure_threshold", "must be at least 1"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker_threshold", "must be at least 1"));
        }
        if self.circuit_breaker_half_open_max_calls == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker_half_open_max_calls",
                "must be at least 1",
            ));
        }
        if self.leak_min_samples < 2 {
            return Err(ConfigError::invalid("leak_min_samples", "must be at least 2"));
        }
        if self.rolling_window == 0 {
            return Err(ConfigError::invalid("rolling_window", "must be at least 1"));
        }
        if self.baseline_samples == 0 {
            return Err(ConfigError::invalid("baseline_samples", "must be at least 1"));
        }
        let needed = self.leak_min_samples.max(self.baseline_samples);
        if self.history_size < needed {
            return Err(ConfigError::invalid(
                "history_size",
                format!("must hold at least {} samples", needed),
            ));
        }
        if self.max_monitoring_interval < self.check_interval
            || self.max_monitoring_interval < self.metrics_collection_interval
        {
            return Err(ConfigError::invalid(
                "max_monitoring_interval",
                "must not be below check_interval or metrics_collection_interval",
            ));
        }

        let mut seen_steps = HashSet::new();
        for step in &self.degradation_steps {
            if !seen_steps.insert(*step) {
                return Err(ConfigError::invalid(
                    "degradation_steps",
                    format!("step {} listed more than once", step),
                ));
            }
        }

        if let Some(url) = &self.webhook_url {
            validate_http_url("webhook_url", url)?;
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::invalid("log_level", "must not be empty"));
        }

        let mut names = HashSet::new();
        for spec in &self.processes {
            validate_process(spec)?;
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::invalid(
                    "processes",
                    format!("duplicate process name '{}'", spec.name),
                ));
            }
        }

        Ok(())
    }

    /// Restart strategy applied to processes without their own override.
    pub fn restart_strategy(&self) -> RestartStrategy {
        if self.exponential_backoff {
            RestartStrategy::exponential(self.max_retries, self.retry_delay, self.max_retry_delay)
        } else {
            RestartStrategy::fixed(self.max_retries, self.retry_delay)
        }
    }

    /// Copy with every monitoring interval multiplied by `factor`, capped at
    /// `max_monitoring_interval` (an interval already above the cap is kept).
    pub fn with_widened_intervals(&self, factor: f64) -> Self {
        let cap = self.max_monitoring_interval;
        let widen = |value: f64| (value * factor).min(cap.max(value));
        Self {
            check_interval: widen(self.check_interval),
            health_check_interval: widen(self.health_check_interval),
            metrics_collection_interval: widen(self.metrics_collection_interval),
            ..self.clone()
        }
    }

    pub fn check_interval(&self) -> Duration {
        secs(self.check_interval)
    }

    pub fn health_check_interval(&self) -> Duration {
        secs(self.health_check_interval)
    }

    pub fn health_check_timeout(&self) -> Duration {
        secs(self.health_check_timeout)
    }

    pub fn metrics_collection_interval(&self) -> Duration {
        secs(self.metrics_collection_interval)
    }

    pub fn termination_timeout(&self) -> Duration {
        secs(self.termination_timeout)
    }

    pub fn emergency_shutdown_timeout(&self) -> Duration {
        secs(self.emergency_shutdown_timeout)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        secs(self.circuit_breaker_timeout)
    }

    pub fn state_save_interval(&self) -> Duration {
        secs(self.state_save_interval)
    }

    pub fn webhook_timeout(&self) -> Duration {
        secs(self.webhook_timeout)
    }

    pub fn metrics_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.metrics_retention_days) * 24 * 3600)
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, format!("'{}': {}", raw, e))),
        Err(_) => Ok(None),
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(field, format!("must be a positive number, got {}", value)));
    }
    Ok(())
}

fn validate_thresholds(metric: &str, warning: f64, max: f64, emergency: f64) -> Result<(), ConfigError> {
    for (kind, value) in [("warning", warning), ("max", max), ("emergency", emergency)] {
        if !(value > 0.0 && value <= 100.0) {
            return Err(ConfigError::invalid(
                format!("{}_{}_percent", kind, metric),
                format!("must be within (0, 100], got {}", value),
            ));
        }
    }
    if !(warning <= max && max <= emergency) {
        return Err(ConfigError::invalid(
            format!("{}_percent thresholds", metric),
            format!(
                "expected warning <= max <= emergency, got {} / {} / {}",
                warning, max, emergency
            ),
        ));
    }
    Ok(())
}

fn validate_restart(prefix: &str, strategy: &RestartStrategy) -> Result<(), ConfigError> {
    if !strategy.retry_delay.is_finite() || strategy.retry_delay < 0.0 {
        return Err(ConfigError::invalid(
            format!("{}retry_delay", prefix),
            "must be a non-negative number",
        ));
    }
    if !strategy.max_retry_delay.is_finite() || strategy.max_retry_delay < strategy.retry_delay {
        return Err(ConfigError::invalid(
            format!("{}max_retry_delay", prefix),
            "must be at least retry_delay",
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(field, "only http and https URLs are supported"));
    }
    Ok(())
}

fn validate_process(spec: &ProcessSpec) -> Result<(), ConfigError> {
    if spec.name.trim().is_empty() {
        return Err(ConfigError::invalid("processes.name", "must not be empty"));
    }
    let field = |name: &str| format!("processes.{}.{}", spec.name, name);
    if spec.command.trim().is_empty() {
        return Err(ConfigError::invalid(field("command"), "must not be empty"));
    }
    if let Some(restart) = &spec.restart {
        validate_restart(&field("restart."), restart)?;
    }
    match &spec.health_check {
        Some(HealthCheckSpec::Http { url }) => validate_http_url(&field("health_check.url"), url)?,
        Some(HealthCheckSpec::Tcp { address }) if address.trim().is_empty() => {
            return Err(ConfigError::invalid(field("health_check.address"), "must not be empty"));
        }
        _ => {}
    }
    Ok(())
}
