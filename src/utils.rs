/// Utility helpers for publish-cycle monitoring
///
/// This module contains the metrics recorded by the scan-tick publisher
/// and a small timer for measuring operation duration.

use std::time::{Duration, Instant};

use log::debug;
use serde::Serialize;

/// Metrics for publish cycles
#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishMetrics {
    /// Publish cycles executed while the server was running
    pub cycles: u64,
    /// Node values pushed into the protocol stack
    pub values_pushed: u64,
    /// Pushes the stack refused
    pub push_failures: u64,
    /// Accumulated time spent snapshotting the image under the scan lock
    pub total_snapshot: Duration,
    pub min_snapshot: Option<Duration>,
    pub max_snapshot: Option<Duration>,
}

impl PublishMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one publish cycle
    pub fn record_cycle(&mut self, snapshot: Duration, pushed: u64, failures: u64) {
        self.cycles += 1;
        self.values_pushed += pushed;
        self.push_failures += failures;
        self.total_snapshot += snapshot;

        self.min_snapshot = Some(self.min_snapshot.map_or(snapshot, |min| min.min(snapshot)));
        self.max_snapshot = Some(self.max_snapshot.map_or(snapshot, |max| max.max(snapshot)));
    }

    /// Average time spent under the scan lock per cycle
    pub fn avg_snapshot(&self) -> Duration {
        if self.cycles == 0 {
            return Duration::ZERO;
        }
        self.total_snapshot / self.cycles as u32
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    /// Stop the timer and return duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!(
            "Operation '{}' completed in {:?}",
            self.operation_name, duration
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_metrics() {
        let mut metrics = PublishMetrics::new();

        metrics.record_cycle(Duration::from_micros(100), 5, 0);
        metrics.record_cycle(Duration::from_micros(300), 5, 1);

        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.values_pushed, 10);
        assert_eq!(metrics.push_failures, 1);
        assert_eq!(metrics.min_snapshot, Some(Duration::from_micros(100)));
        assert_eq!(metrics.max_snapshot, Some(Duration::from_micros(300)));
        assert_eq!(metrics.avg_snapshot(), Duration::from_micros(200));

        metrics.reset();
        assert_eq!(metrics.cycles, 0);
        assert_eq!(metrics.avg_snapshot(), Duration::ZERO);
    }

    #[test]
    fn test_operation_timer() {
        let timer = OperationTimer::start("snapshot");
        let duration = timer.stop();
        assert!(duration < Duration::from_secs(1));
    }
}
