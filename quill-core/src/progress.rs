//! Progress aggregation
//!
//! Folds the completed-stage count and the active task's fractional completion
//! into one overall percentage, and extrapolates the time left on the active task.
//!
//! The ETA is a naive linear extrapolation: `elapsed / fraction - elapsed`.
//! There is no smoothing and no averaging across stages, so it jumps whenever
//! the remote service reports progress unevenly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::task::{TaskRecord, TaskStatus};

/// Estimated time remaining on the active task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "seconds")]
pub enum Eta {
    /// No task is active or it has not reported any progress yet
    Unknown,
    Remaining(f64),
}

impl Eta {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Eta::Unknown => None,
            Eta::Remaining(secs) => Some(Duration::from_secs_f64(secs)),
        }
    }

    pub fn minutes(self) -> Option<f64> {
        match self {
            Eta::Unknown => None,
            Eta::Remaining(secs) => Some(secs / 60.0),
        }
    }
}

/// Overall completion percentage in `[0, 100]`
///
/// # Arguments
/// * `stage_count` - Number of stages in the pipeline
/// * `active_index` - Zero-based index of the active (or next-to-run) stage;
///   equal to `stage_count` once every stage has completed
/// * `active` - Task record of the active stage, if one exists
pub fn overall_progress(
    stage_count: usize,
    active_index: usize,
    active: Option<&TaskRecord>,
) -> f64 {
    if stage_count == 0 {
        return 0.0;
    }

    let n = stage_count as f64;
    let baseline = active_index as f64 / n * 100.0;

    let in_flight = match active {
        Some(record) if record.status == TaskStatus::Running => record.fraction() / n * 100.0,
        _ => 0.0,
    };

    (baseline + in_flight).clamp(0.0, 100.0)
}

/// Linear estimate of the time left on `record`
pub fn estimate_remaining(record: &TaskRecord, now: DateTime<Utc>) -> Eta {
    let fraction = record.fraction();
    if fraction <= 0.0 {
        return Eta::Unknown;
    }

    let elapsed = now
        .signed_duration_since(record.started_at)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;

    let estimated_total = elapsed / fraction;
    let remaining = (estimated_total - elapsed).max(0.0);

    if remaining.is_finite() {
        Eta::Remaining(remaining)
    } else {
        Eta::Unknown
    }
}
