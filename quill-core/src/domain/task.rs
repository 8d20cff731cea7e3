//! Task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Status of a remote task as reported by the task service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    /// `success` and `failure` accept no further updates
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// One observation of a remote task
///
/// This is also the body of `GET /api/tasks/status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "lenient_counter")]
    pub current: u64,
    #[serde(default, deserialize_with = "lenient_counter")]
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn running(current: u64, total: u64) -> Self {
        Self {
            status: TaskStatus::Running,
            current,
            total,
            message: String::new(),
            result: None,
            error: None,
        }
    }

    pub fn success(result: JsonValue) -> Self {
        Self {
            status: TaskStatus::Success,
            current: 1,
            total: 1,
            message: String::new(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            current: 0,
            total: 0,
            message: String::new(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Reads a progress counter from any JSON number
///
/// Floats are rounded; negative, non-finite and `null` values read as 0.
fn lenient_counter<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let number = match value {
        None | Some(JsonValue::Null) => return Ok(0),
        Some(JsonValue::Number(n)) => n,
        Some(JsonValue::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => return Ok(clamp_counter(f)),
            Err(_) => {
                return Err(serde::de::Error::custom(format!(
                    "expected a number, got \"{}\"",
                    s
                )));
            }
        },
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a number, got {}",
                other
            )));
        }
    };

    Ok(match number.as_u64() {
        Some(n) => n,
        None => clamp_counter(number.as_f64().unwrap_or(0.0)),
    })
}

fn clamp_counter(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Observed state of one remote task, keyed by its server-issued id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    /// Stage this task executes
    pub stage_id: String,
    pub status: TaskStatus,
    pub current: u64,
    pub total: u64,
    pub message: String,
    /// Present only when `status` is `success`
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set when a terminal status is first observed
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Creates a pending record for a freshly started task
    pub fn new(
        task_id: impl Into<String>,
        stage_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            stage_id: stage_id.into(),
            status: TaskStatus::Pending,
            current: 0,
            total: 0,
            message: String::new(),
            result: None,
            error: None,
            started_at,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fractional completion in `[0, 1]`
    ///
    /// A zero `total` is treated as one. `current > total` is clamped.
    pub fn fraction(&self) -> f64 {
        let total = self.total.max(1) as f64;
        (self.current as f64 / total).clamp(0.0, 1.0)
    }

    /// Replaces every observed field with `update`
    ///
    /// Returns `false` without touching the record when it is already terminal.
    pub fn apply(&mut self, update: TaskUpdate, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = update.status;
        self.current = update.current;
        self.total = update.total;
        self.message = update.message;
        self.result = match update.status {
            TaskStatus::Success => update.result,
            _ => None,
        };
        self.error = update.error;

        if self.is_terminal() {
            self.ended_at = Some(now);
        }

        true
    }

    /// Forces the record into `failure`, keeping the last observed progress
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = TaskStatus::Failure;
        self.result = None;
        self.error = Some(error.into());
        self.ended_at = Some(now);
        true
    }

    /// Text to show for a failed task: the remote error, else its message
    pub fn failure_text(&self) -> String {
        match (&self.error, self.message.is_empty()) {
            (Some(error), _) if !error.is_empty() => error.clone(),
            (_, false) => self.message.clone(),
            _ => "task failed".to_string(),
        }
    }
}
