//! Error types for the engine

use quill_client::ClientError;
use quill_core::domain::pipeline::InvalidTransition;
use quill_core::domain::stage::DefinitionError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::store::{FailureReason, StageFailure};

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the store and the sequencer
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A single HTTP call to the task service failed
    #[error("transport error: {0}")]
    Transport(#[from] ClientError),

    /// The stage-start call failed before a task id was obtained
    #[error("stage '{stage_id}' could not be started: {message}")]
    StageStart { stage_id: String, message: String },

    /// The remote task reported `failure`
    #[error("stage '{stage_id}' failed: {message}")]
    RemoteTaskFailure { stage_id: String, message: String },

    /// The task was polled longer than the configured timeout
    #[error("stage '{}' timed out after {}s (task {})", .stage_id, .elapsed.as_secs(), .task_id)]
    Timeout {
        stage_id: String,
        task_id: String,
        elapsed: Duration,
    },

    /// A pipeline instance is still awaiting start or running
    #[error("pipeline {0} is already running")]
    AlreadyRunning(Uuid),

    /// Operation not allowed in the current pipeline state
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// Session file could not be read or written
    #[error("session error: {0}")]
    Persistence(String),
}

impl From<InvalidTransition> for OrchestratorError {
    fn from(err: InvalidTransition) -> Self {
        OrchestratorError::InvalidState(err.to_string())
    }
}

impl From<&StageFailure> for OrchestratorError {
    fn from(failure: &StageFailure) -> Self {
        let stage_id = failure.stage_id.clone();
        match &failure.reason {
            FailureReason::StartFailed { message } => OrchestratorError::StageStart {
                stage_id,
                message: message.clone(),
            },
            FailureReason::Remote { message, .. } => OrchestratorError::RemoteTaskFailure {
                stage_id,
                message: message.clone(),
            },
            FailureReason::Timeout { task_id, elapsed } => OrchestratorError::Timeout {
                stage_id,
                task_id: task_id.clone(),
                elapsed: *elapsed,
            },
        }
    }
}

impl OrchestratorError {
    /// Whether the error came from the state machine rejecting the call
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidState(_) | OrchestratorError::AlreadyRunning(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::domain::pipeline::{PipelineEvent, PipelineState};

    #[test]
    fn test_from_stage_failure() {
        let failure = StageFailure {
            stage_id: "outline".into(),
            reason: FailureReason::Remote {
                task_id: "t-9".into(),
                message: "oom".into(),
            },
        };
        let err = OrchestratorError::from(&failure);
        assert_eq!(err.to_string(), "stage 'outline' failed: oom");

        let failure = StageFailure {
            stage_id: "outline".into(),
            reason: FailureReason::Timeout {
                task_id: "t-9".into(),
                elapsed: Duration::from_secs(90),
            },
        };
        assert!(matches!(
            OrchestratorError::from(&failure),
            OrchestratorError::Timeout { .. }
        ));
    }

    #[test]
    fn test_invalid_transition_maps_to_invalid_state() {
        let err: OrchestratorError = PipelineState::Errored
            .transition(PipelineEvent::TaskStarted)
            .unwrap_err()
            .into();
        assert!(err.is_invalid_state());
        assert!(!OrchestratorError::Persistence("x".into()).is_invalid_state());
    }
}
