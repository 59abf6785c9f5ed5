//! Backend recovery estimate derived from the generations log.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::record::LoggerRecord;

/// Lower bound of a non-zero estimate.
pub const MIN_ESTIMATE: Duration = Duration::from_secs(1);
/// Upper bound of any estimate.
pub const MAX_ESTIMATE: Duration = Duration::from_secs(24 * 60 * 60);

/// Expected time until a backend answers again, given the records since
/// its last success.
///
/// Zero when there are no failures. Otherwise the backend has been failing
/// for `now - oldest_failure`, and is expected to keep failing for about as
/// long, clamped to `[1 second, 1 day]`.
pub fn estimate_time_to_become_available(records: &[LoggerRecord], now_millis: i64) -> Duration {
    let oldest_failure = records
        .iter()
        .filter(|record| !record.is_success())
        .map(|record| record.timestamp)
        .min();
    estimate_from_failing_since(oldest_failure, now_millis)
}

/// Same estimate from the timestamp of the oldest failure since the last
/// success alone.
pub fn estimate_from_failing_since(failing_since: Option<i64>, now_millis: i64) -> Duration {
    let Some(oldest_failure) = failing_since else {
        return Duration::ZERO;
    };

    let elapsed = u64::try_from(now_millis.saturating_sub(oldest_failure)).unwrap_or(0);
    Duration::from_millis(elapsed).clamp(MIN_ESTIMATE, MAX_ESTIMATE)
}

/// Snapshot of a backend's availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityReport {
    pub service_name: String,
    /// Failures since the last success
    pub consecutive_failures: usize,
    /// Epoch milliseconds of the oldest of those failures
    pub failing_since: Option<i64>,
    pub estimated_time_to_become_available: Duration,
}

impl AvailabilityReport {
    /// Build a report from the records since the last success.
    pub fn from_records(service_name: impl Into<String>, records: &[LoggerRecord], now_millis: i64) -> Self {
        let failures: Vec<&LoggerRecord> = records.iter().filter(|r| !r.is_success()).collect();
        Self {
            service_name: service_name.into(),
            consecutive_failures: failures.len(),
            failing_since: failures.iter().map(|r| r.timestamp).min(),
            estimated_time_to_become_available: estimate_time_to_become_available(records, now_millis),
        }
    }

    pub fn is_available(&self) -> bool {
        self.consecutive_failures == 0
    }
}
