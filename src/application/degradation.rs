use tracing::warn;

use crate::domain::{DegradationStep, HealthState};

/// Decides which load-shedding steps to apply.
///
/// Steps come out in configured order, each exactly once. Executing them is
/// the supervisor's job.
#[derive(Debug, Clone)]
pub struct DegradationController {
    steps: Vec<DegradationStep>,
    applied: usize,
}

impl DegradationController {
    pub fn new(steps: Vec<DegradationStep>) -> Self {
        Self { steps, applied: 0 }
    }

    /// Steps to apply for this tick: none when healthy, everything left in an
    /// emergency, otherwise the next one.
    pub fn next_steps(&mut self, state: HealthState) -> Vec<DegradationStep> {
        let take = match state {
            HealthState::Healthy => 0,
            HealthState::Emergency => self.steps.len() - self.applied,
            HealthState::Recovering | HealthState::Degraded | HealthState::Critical => {
                usize::from(self.applied < self.steps.len())
            }
        };

        let due = self.steps[self.applied..self.applied + take].to_vec();
        self.applied += take;
        for step in &due {
            warn!(step = %step, health_state = %state, "applying degradation step");
        }
        due
    }

    pub fn applied(&self) -> &[DegradationStep] {
        &self.steps[..self.applied]
    }

    pub fn pending(&self) -> &[DegradationStep] {
        &self.steps[self.applied..]
    }
}
