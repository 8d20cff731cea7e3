//! Saved session DTOs
//!
//! Only the project identity and the results of completed stages survive a
//! restart. In-flight task records and polling timers are never saved.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A pipeline instance reduced to what can be resumed later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPipeline {
    /// Name of the pipeline definition
    pub pipeline: String,
    pub project_id: String,
    /// Payload the workflow was launched with
    #[serde(default)]
    pub launch_input: JsonValue,
    /// Stage id to result payload, for completed stages only
    #[serde(default)]
    pub results: BTreeMap<String, JsonValue>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}
