use std::collections::VecDeque;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::ResourceSample;

/// In-memory ring buffer of resource samples.
///
/// Appends evict the oldest sample once `max_size` is reached. Readers get
/// owned copies so the lock is never held while computing.
pub struct SampleHistory {
    samples: RwLock<VecDeque<ResourceSample>>,
    max_size: usize,
}

impl SampleHistory {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    pub fn push(&self, sample: ResourceSample) {
        let mut samples = self.write();

        while samples.len() >= self.max_size {
            samples.pop_front();
        }

        samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<ResourceSample> {
        self.read().back().cloned()
    }

    /// Every stored sample, oldest first
    pub fn snapshot(&self) -> Vec<ResourceSample> {
        self.read().iter().cloned().collect()
    }

    /// Drop samples older than `retention`. Returns how many were removed.
    pub fn prune_older_than(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
        else {
            return 0;
        };
        let mut samples = self.write();
        let before = samples.len();
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }
        before - samples.len()
    }

    /// Release spare buffer capacity. Returns the number of bytes freed.
    pub fn compact(&self) -> usize {
        let mut samples = self.write();
        let before = samples.capacity();
        samples.shrink_to_fit();
        before.saturating_sub(samples.capacity()) * std::mem::size_of::<ResourceSample>()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<ResourceSample>> {
        self.samples.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<ResourceSample>> {
        self.samples.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
