//! Periodic activity samples reported to statistics clients.

use serde::{Deserialize, Serialize};

/// Snapshot of server activity over one sampling period.
///
/// Request and failure counts cover only the period that ended at
/// `recorded_ms`; pool figures are instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticSample {
    /// Recording time, Unix milliseconds.
    pub recorded_ms: u64,
    /// Analysis requests received during the period.
    pub analysis_requests: u64,
    /// Analyses that failed during the period.
    pub failed_analyses: u64,
    /// Worker threads alive when sampled.
    pub pool_size: usize,
    /// Tasks running when sampled.
    pub active_tasks: usize,
}
