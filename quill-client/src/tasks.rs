//! Stage-start and task-status endpoints

use crate::ServiceClient;
use crate::error::{ClientError, Result};
use quill_core::dto::task::{StartStageRequest, StartStageResponse, TaskStatusResponse};
use tracing::debug;

impl ServiceClient {
    // =============================================================================
    // Stage Lifecycle
    // =============================================================================

    /// Start a stage on the task service
    ///
    /// # Arguments
    /// * `domain` - Path segment under `/api/` (e.g., "video")
    /// * `endpoint` - Stage-start path under the domain (e.g., "transcribe")
    /// * `req` - Project id, stage id and stage input
    ///
    /// # Returns
    /// The id of the remote task executing the stage
    pub async fn start_stage(
        &self,
        domain: &str,
        endpoint: &str,
        req: &StartStageRequest,
    ) -> Result<StartStageResponse> {
        let url = self.stage_url(domain, endpoint)?;
        debug!("POST {} (stage {})", url, req.stage);

        let response = self.client.post(&url).json(req).send().await?;
        let started: StartStageResponse = self.handle_response(response).await?;

        if started.task_id.trim().is_empty() {
            return Err(ClientError::MissingTaskId {
                stage: req.stage.clone(),
            });
        }

        Ok(started)
    }

    /// Get the current status of a task
    ///
    /// # Arguments
    /// * `task_id` - Opaque id returned by [`ServiceClient::start_stage`]
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let task_id = task_id.trim();
        if task_id.is_empty() || task_id.contains('/') {
            return Err(ClientError::InvalidRequest(format!(
                "invalid task id '{}'",
                task_id
            )));
        }

        let url = format!("{}/api/tasks/status/{}", self.base_url, task_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    fn stage_url(&self, domain: &str, endpoint: &str) -> Result<String> {
        let domain = domain.trim_matches('/');
        let endpoint = endpoint.trim_matches('/');

        if domain.is_empty() || endpoint.is_empty() {
            return Err(ClientError::InvalidRequest(format!(
                "stage path '{}/{}' is incomplete",
                domain, endpoint
            )));
        }

        Ok(format!("{}/api/{}/{}", self.base_url, domain, endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_url() {
        let client = ServiceClient::new("http://localhost:8000/");
        assert_eq!(
            client.stage_url("video", "/transcribe").unwrap(),
            "http://localhost:8000/api/video/transcribe"
        );
        assert_eq!(
            client.stage_url("/testimony/", "scene/compose").unwrap(),
            "http://localhost:8000/api/testimony/scene/compose"
        );
    }

    #[test]
    fn test_stage_url_rejects_blank_segments() {
        let client = ServiceClient::new("http://localhost:8000");
        assert!(matches!(
            client.stage_url("", "transcribe"),
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.stage_url("video", "/"),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_task_status_rejects_bad_ids() {
        let client = ServiceClient::new("http://localhost:8000");
        assert!(matches!(
            client.task_status("  ").await,
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.task_status("a/b").await,
            Err(ClientError::InvalidRequest(_))
        ));
    }
}
