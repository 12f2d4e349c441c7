//! Request counters and the sampled statistics series.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use analysis_protocol::StatisticSample;

/// Consume-and-reset counters of analysis requests and failures.
#[derive(Debug, Default)]
pub(crate) struct RequestCounters {
    requests: AtomicU64,
    failures: AtomicU64,
}

impl RequestCounters {
    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts since the previous call, as `(requests, failures)`.
    pub(crate) fn take(&self) -> (u64, u64) {
        (
            self.requests.swap(0, Ordering::Relaxed),
            self.failures.swap(0, Ordering::Relaxed),
        )
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> (u64, u64) {
        (
            self.requests.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// Append-only series of samples, read by copy.
#[derive(Debug, Default)]
pub(crate) struct StatisticsSeries {
    samples: RwLock<Vec<StatisticSample>>,
}

impl StatisticsSeries {
    pub(crate) fn push(&self, sample: StatisticSample) {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    /// Samples recorded in `[from_ms, to_ms)`.
    pub(crate) fn range(&self, from_ms: u64, to_ms: u64) -> Vec<StatisticSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sample| (from_ms..to_ms).contains(&sample.recorded_ms))
            .copied()
            .collect()
    }

    pub(crate) fn all(&self) -> Vec<StatisticSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
