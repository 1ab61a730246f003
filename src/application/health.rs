use crate::config::SupervisorConfig;
use crate::domain::{AlertMetric, HealthIssues, HealthSnapshot, HealthState, PredictiveAlert, ResourceSample};

const HARD_LIMIT_PENALTY: f64 = 0.4;
const WARNING_PENALTY: f64 = 0.8;
/// Samples used for trend extrapolation
const TREND_WINDOW: usize = 20;
const MIN_TREND_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Limits {
    warning: f64,
    max: f64,
    emergency: f64,
}

impl Limits {
    fn penalty(&self, value: f64) -> f64 {
        if value > self.max {
            HARD_LIMIT_PENALTY
        } else if value > self.warning {
            WARNING_PENALTY
        } else {
            1.0
        }
    }
}

/// Turns a sample plus detector flags into a [`HealthSnapshot`].
///
/// Every method is a pure function of its arguments and the configured limits.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    cpu: Limits,
    memory: Limits,
    disk: Limits,
    prediction_horizon_minutes: f64,
}

impl HealthAggregator {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            cpu: Limits {
                warning: config.warning_cpu_percent,
                max: config.max_cpu_percent,
                emergency: config.emergency_cpu_percent,
            },
            memory: Limits {
                warning: config.warning_memory_percent,
                max: config.max_memory_percent,
                emergency: config.emergency_memory_percent,
            },
            disk: Limits {
                warning: config.warning_disk_percent,
                max: config.max_disk_percent,
                emergency: config.emergency_disk_percent,
            },
            prediction_horizon_minutes: config.prediction_horizon_minutes,
        }
    }

    /// 1.0 with a multiplicative penalty per metric over its warning or hard limit
    pub fn health_score(&self, sample: &ResourceSample) -> f64 {
        self.cpu.penalty(sample.cpu_percent)
            * self.memory.penalty(sample.memory_percent)
            * self.disk.penalty(sample.disk_percent)
    }

    pub fn state(score: f64, leak_detected: bool, degradation_detected: bool) -> HealthState {
        if score < 0.3 || leak_detected {
            HealthState::Critical
        } else if score < 0.5 || degradation_detected {
            HealthState::Degraded
        } else if score < 0.7 {
            HealthState::Recovering
        } else {
            HealthState::Healthy
        }
    }

    pub fn is_emergency(&self, sample: &ResourceSample) -> bool {
        sample.cpu_percent > self.cpu.emergency
            || sample.memory_percent > self.memory.emergency
            || sample.disk_percent > self.disk.emergency
    }

    /// At most one alert per metric, for metrics trending into their hard limit
    /// within the prediction horizon.
    pub fn predictive_alerts(&self, history: &[ResourceSample]) -> Vec<PredictiveAlert> {
        let skip = history.len().saturating_sub(TREND_WINDOW);
        let recent = &history[skip..];
        if recent.len() < MIN_TREND_SAMPLES {
            return Vec::new();
        }

        let metrics: [(AlertMetric, f64, fn(&ResourceSample) -> f64); 2] = [
            (AlertMetric::Memory, self.memory.max, |s| s.memory_percent),
            (AlertMetric::Disk, self.disk.max, |s| s.disk_percent),
        ];
        metrics
            .into_iter()
            .filter_map(|(metric, limit, value)| self.predict(metric, limit, recent, value))
            .collect()
    }

    fn predict(
        &self,
        metric: AlertMetric,
        limit: f64,
        samples: &[ResourceSample],
        value: fn(&ResourceSample) -> f64,
    ) -> Option<PredictiveAlert> {
        let origin = samples.first()?.timestamp;
        let points: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| {
                let minutes = (s.timestamp - origin).num_milliseconds() as f64 / 60_000.0;
                (minutes, value(s))
            })
            .collect();

        let slope = least_squares_slope(&points)?;
        let current = value(samples.last()?);
        if slope <= 0.0 || current >= limit {
            return None;
        }

        let minutes_to_limit = (limit - current) / slope;
        if minutes_to_limit >= self.prediction_horizon_minutes {
            return None;
        }

        Some(PredictiveAlert {
            metric,
            current_percent: current,
            limit_percent: limit,
            minutes_to_limit,
            message: format!(
                "{} usage {:.1}% is projected to reach {:.0}% in {:.0} minutes",
                metric, current, limit, minutes_to_limit
            ),
        })
    }

    pub fn evaluate(
        &self,
        sequence: u64,
        sample: &ResourceSample,
        history: &[ResourceSample],
        issues: HealthIssues,
        predict: bool,
    ) -> HealthSnapshot {
        let health_score = self.health_score(sample);
        let health_state = if self.is_emergency(sample) {
            HealthState::Emergency
        } else {
            Self::state(health_score, issues.leak_detected, issues.degradation_detected)
        };
        let predictive_alerts = if predict {
            self.predictive_alerts(history)
        } else {
            Vec::new()
        };
        let recommendations = self.recommendations(sample, issues, &predictive_alerts);

        HealthSnapshot {
            sequence,
            timestamp: sample.timestamp,
            health_score,
            health_state,
            issues,
            predictive_alerts,
            recommendations,
        }
    }

    fn recommendations(
        &self,
        sample: &ResourceSample,
        issues: HealthIssues,
        alerts: &[PredictiveAlert],
    ) -> Vec<String> {
        let mut out = Vec::new();

        for (name, value, limits) in [
            ("CPU", sample.cpu_percent, self.cpu),
            ("memory", sample.memory_percent, self.memory),
            ("disk", sample.disk_percent, self.disk),
        ] {
            if value > limits.max {
                out.push(format!(
                    "{} usage {:.1}% exceeds the {:.0}% limit; shed load or add capacity",
                    name, value, limits.max
                ));
            } else if value > limits.warning {
                out.push(format!("{} usage {:.1}% is above the warning level", name, value));
            }
        }

        if issues.leak_detected {
            out.push("memory or handle growth suggests a leak; inspect long-running workers".to_string());
        }
        if issues.degradation_detected {
            out.push("usage is well above the baseline; look for a performance regression".to_string());
        }
        out.extend(alerts.iter().map(|alert| alert.message.clone()));

        out
    }
}

fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (x, y)| {
        (num + (x - mean_x) * (y - mean_y), den + (x - mean_x).powi(2))
    });
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn aggregator() -> HealthAggregator {
        HealthAggregator::new(&SupervisorConfig::default())
    }

    fn sample(cpu: f64, memory: f64, disk: f64) -> ResourceSample {
        ResourceSample::new(Utc::now()).with_usage(cpu, memory, disk)
    }

    #[test]
    fn state_table() {
        assert_eq!(HealthAggregator::state(0.25, false, false), HealthState::Critical);
        assert_eq!(HealthAggregator::state(0.25, true, true), HealthState::Critical);
        assert_eq!(HealthAggregator::state(0.25, false, true), HealthState::Critical);
        assert_eq!(HealthAggregator::state(0.9, true, false), HealthState::Critical);
        assert_eq!(HealthAggregator::state(0.45, false, false), HealthState::Degraded);
        assert_eq!(HealthAggregator::state(0.9, false, true), HealthState::Degraded);
        assert_eq!(HealthAggregator::state(0.65, false, false), HealthState::Recovering);
        assert_eq!(HealthAggregator::state(0.9, false, false), HealthState::Healthy);
    }

    #[test]
    fn penalties_compose_multiplicatively() {
        let agg = aggregator();
        assert_eq!(agg.health_score(&sample(10.0, 10.0, 10.0)), 1.0);
        // CPU over warning only
        assert!((agg.health_score(&sample(75.0, 10.0, 10.0)) - 0.8).abs() < 1e-9);
        // CPU over max, memory over warning
        assert!((agg.health_score(&sample(95.0, 80.0, 10.0)) - 0.32).abs() < 1e-9);
        // Everything over max
        assert!((agg.health_score(&sample(95.0, 95.0, 96.0)) - 0.064).abs() < 1e-9);
    }

    #[test]
    fn emergency_limit_overrides_table() {
        let agg = aggregator();
        let snapshot = agg.evaluate(1, &sample(10.0, 98.0, 10.0), &[], HealthIssues::default(), true);
        assert_eq!(snapshot.health_state, HealthState::Emergency);

        let snapshot = agg.evaluate(2, &sample(10.0, 10.0, 10.0), &[], HealthIssues::default(), true);
        assert_eq!(snapshot.health_state, HealthState::Healthy);
        assert!(snapshot.recommendations.is_empty());
    }

    #[test]
    fn leak_flag_makes_snapshot_critical() {
        let agg = aggregator();
        let issues = HealthIssues {
            leak_detected: true,
            degradation_detected: false,
        };
        let current = sample(10.0, 10.0, 10.0);
        let snapshot = agg.evaluate(3, &current, &[], issues, true);
        assert_eq!(snapshot.health_state, HealthState::Critical);
        assert_eq!(snapshot.timestamp, current.timestamp);
        assert_eq!(snapshot.sequence, 3);
        assert!(!snapshot.recommendations.is_empty());
    }

    #[test]
    fn rising_memory_raises_single_alert() {
        let agg = aggregator();
        let start = Utc::now();
        // +1% per minute ending at 60%: 90% is 30 minutes past the last sample
        let history: Vec<ResourceSample> = (0..30)
            .map(|i| {
                ResourceSample::new(start + Duration::minutes(i)).with_usage(10.0, 31.0 + i as f64, 20.0)
            })
            .collect();

        let alerts = agg.predictive_alerts(&history);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, AlertMetric::Memory);
        assert!((alerts[0].minutes_to_limit - 30.0).abs() < 1e-6);
    }

    #[test]
    fn slow_or_flat_trends_raise_nothing() {
        let agg = aggregator();
        let start = Utc::now();
        let history: Vec<ResourceSample> = (0..30)
            .map(|i| {
                ResourceSample::new(start + Duration::minutes(i)).with_usage(10.0, 40.0 + i as f64 * 0.1, 50.0)
            })
            .collect();
        assert!(agg.predictive_alerts(&history).is_empty());
        assert!(agg.predictive_alerts(&history[..3]).is_empty());
    }

    #[test]
    fn alerts_are_skipped_when_prediction_is_disabled() {
        let agg = aggregator();
        let start = Utc::now();
        let history: Vec<ResourceSample> = (0..30)
            .map(|i| ResourceSample::new(start + Duration::minutes(i)).with_usage(10.0, 31.0 + i as f64, 20.0))
            .collect();
        let snapshot = agg.evaluate(1, &history[29], &history, HealthIssues::default(), false);
        assert!(snapshot.predictive_alerts.is_empty());
    }
}
