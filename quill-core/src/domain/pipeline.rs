//! Pipeline state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    /// No workflow launched
    Idle,
    /// A stage-start call for the active stage is pending
    AwaitingStart,
    /// The active stage's task is being polled
    Running,
    Completed,
    Errored,
}

/// Inputs that drive [`PipelineState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineEvent {
    /// Workflow submitted by the user
    Launch,
    /// The stage-start call returned a task id and polling began
    TaskStarted,
    /// The active task reported `success`
    StageSucceeded { has_next: bool },
    /// The active task reported `failure`, timed out, or its start call failed
    StageFailed,
    /// User asked to re-run the failed stage
    Retry,
    /// User abandoned or restarted the workflow
    Reset,
}

/// A transition the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: PipelineState,
    pub event: PipelineEvent,
}

impl PipelineState {
    /// Applies `event`, returning the next state
    ///
    /// | from            | event                       | to              |
    /// |-----------------|-----------------------------|-----------------|
    /// | idle            | launch                      | awaiting-start  |
    /// | awaiting-start  | task-started                | running         |
    /// | awaiting-start  | stage-failed                | errored         |
    /// | running         | stage-succeeded (next)      | awaiting-start  |
    /// | running         | stage-succeeded (last)      | completed       |
    /// | running         | stage-failed                | errored         |
    /// | errored         | retry                       | awaiting-start  |
    /// | any             | reset                       | idle            |
    pub fn transition(self, event: PipelineEvent) -> Result<PipelineState, InvalidTransition> {
        use PipelineEvent as E;
        use PipelineState as S;

        let next = match (self, event) {
            (_, E::Reset) => S::Idle,
            (S::Idle, E::Launch) => S::AwaitingStart,
            (S::AwaitingStart, E::TaskStarted) => S::Running,
            (S::AwaitingStart, E::StageFailed) => S::Errored,
            (S::Running, E::StageSucceeded { has_next: true }) => S::AwaitingStart,
            (S::Running, E::StageSucceeded { has_next: false }) => S::Completed,
            (S::Running, E::StageFailed) => S::Errored,
            (S::Errored, E::Retry) => S::AwaitingStart,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }

    /// `completed` or `errored`
    pub fn is_finished(self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Errored)
    }

    /// `awaiting-start` or `running`
    pub fn is_in_flight(self) -> bool {
        matches!(self, PipelineState::AwaitingStart | PipelineState::Running)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::AwaitingStart => "awaiting-start",
            PipelineState::Running => "running",
            PipelineState::Completed => "completed",
            PipelineState::Errored => "errored",
        };
        f.write_str(s)
    }
}
