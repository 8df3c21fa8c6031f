//! Lightweight profiling regions.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// One timed execution of a region.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub start: Instant,
    pub elapsed: Duration,
}

/// Named region collecting samples while profiling is enabled.
#[derive(Debug)]
pub struct ProfRegion {
    name: String,
    enabled: bool,
    samples: Mutex<Vec<Sample>>,
}

impl ProfRegion {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start timing; the sample is recorded when the guard drops.
    pub fn enter(&self) -> ProfGuard<'_> {
        ProfGuard {
            region: self,
            start: self.enabled.then(Instant::now),
        }
    }

    pub fn record(&self, start: Instant, elapsed: Duration) {
        if self.enabled {
            self.samples.lock().push(Sample { start, elapsed });
        }
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn total(&self) -> Duration {
        self.samples.lock().iter().map(|s| s.elapsed).sum()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    /// Log a one-line summary at debug level.
    pub fn report(&self) {
        if !self.enabled {
            return;
        }
        let count = self.count();
        let total = self.total();
        let mean = if count > 0 {
            total / count as u32
        } else {
            Duration::ZERO
        };
        debug!(
            "[Prof] {}: {} samples, total {:?}, mean {:?}",
            self.name, count, total, mean
        );
    }
}

/// Guard returned by [`ProfRegion::enter`].
pub struct ProfGuard<'a> {
    region: &'a ProfRegion,
    start: Option<Instant>,
}

impl Drop for ProfGuard<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            self.region.record(start, start.elapsed());
        }
    }
}
