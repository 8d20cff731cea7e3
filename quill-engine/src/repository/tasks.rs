//! Tasks repository
//!
//! Handles communication with the task service:
//! - Starting a stage and obtaining its task id
//! - Fetching the current status of a task

use async_trait::async_trait;
use quill_client::{ClientError, ServiceClient};
use quill_core::domain::stage::Stage;
use quill_core::domain::task::TaskUpdate;
use quill_core::dto::task::{StartStageRequest, StartStageResponse};

use crate::config::Config;

/// Repository trait for task service operations
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Starts `stage` under `domain`
    ///
    /// # Returns
    /// The id of the remote task, and the project id if the service assigned one
    async fn start_stage(
        &self,
        domain: &str,
        stage: &Stage,
        request: &StartStageRequest,
    ) -> Result<StartStageResponse, ClientError>;

    /// Fetches the current status of a task
    async fn fetch_status(&self, task_id: &str) -> Result<TaskUpdate, ClientError>;
}

/// HTTP implementation of TaskRepository
pub struct HttpTaskRepository {
    client: ServiceClient,
}

impl HttpTaskRepository {
    /// Creates a repository over an existing client
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// Creates a repository with a client configured from `config`
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self::new(ServiceClient::with_client(
            config.service_url.clone(),
            http,
        )))
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }
}

#[async_trait]
impl TaskRepository for HttpTaskRepository {
    async fn start_stage(
        &self,
        domain: &str,
        stage: &Stage,
        request: &StartStageRequest,
    ) -> Result<StartStageResponse, ClientError> {
        self.client
            .start_stage(domain, &stage.endpoint, request)
            .await
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskUpdate, ClientError> {
        self.client.task_status(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_uses_service_url() {
        let config = Config::new("http://tasks.internal:9000/".to_string());
        let repository = HttpTaskRepository::from_config(&config).unwrap();
        assert_eq!(repository.client().base_url(), "http://tasks.internal:9000");
    }
}
