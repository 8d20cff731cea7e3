//! Task DTOs for the remote task service

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use crate::domain::task::TaskUpdate as TaskStatusResponse;

/// Body of `POST /api/{domain}/{stage-start-path}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStageRequest {
    pub project_id: String,
    pub stage: String,
    pub input: JsonValue,
}

/// Response to a stage-start call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartStageResponse {
    pub task_id: String,
    /// Set when the service minted or changed the project id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_response_without_project() {
        let response: StartStageResponse =
            serde_json::from_value(json!({ "task_id": "abc" })).unwrap();
        assert_eq!(response.task_id, "abc");
        assert!(response.project_id.is_none());
    }

    #[test]
    fn test_start_request_shape() {
        let request = StartStageRequest {
            project_id: "p-1".into(),
            stage: "clean".into(),
            input: json!({ "text": "hello" }),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "project_id": "p-1", "stage": "clean", "input": { "text": "hello" } })
        );
    }
}
