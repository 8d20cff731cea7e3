//! Quill HTTP Client
//!
//! A small, type-safe HTTP client for the remote task service that executes
//! workflow stages (transcription, cleaning, generation, ...).
//!
//! The service exposes two kinds of endpoints:
//! - `POST /api/{domain}/{stage-start-path}` starts a stage and returns a task id
//! - `GET /api/tasks/status/{task_id}` reports the status of a task
//!
//! # Example
//!
//! ```no_run
//! use quill_client::ServiceClient;
//! use quill_core::dto::task::StartStageRequest;
//!
//! #[tokio::main]
//! async fn main() -> quill_client::Result<()> {
//!     let client = ServiceClient::new("http://localhost:8000");
//!
//!     let started = client
//!         .start_stage("video", "transcribe", &StartStageRequest {
//!             project_id: "demo".to_string(),
//!             stage: "transcript".to_string(),
//!             input: serde_json::json!({ "video_url": "https://example.com/talk.mp4" }),
//!         })
//!         .await?;
//!
//!     let status = client.task_status(&started.task_id).await?;
//!     println!("{:?}", status.status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod tasks;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use quill_core::dto::task::{StartStageRequest, StartStageResponse, TaskStatusResponse};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the remote task service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    /// Base URL of the service (e.g., "http://localhost:8000")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ServiceClient {
    /// Create a new service client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the task service (e.g., "http://localhost:8000")
    ///
    /// # Example
    /// ```
    /// use quill_client::ServiceClient;
    ///
    /// let client = ServiceClient::new("http://localhost:8000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new service client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use quill_client::ServiceClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = ServiceClient::with_client("http://localhost:8000", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
