//! Orchestration store
//!
//! Single owner of the pipeline instance: the stage cursor, every task record
//! created for the instance, and the results accumulated by completed stages.
//! All mutation goes through the action methods below; renderers read the
//! derived selectors or a [`PipelineSnapshot`].

use chrono::{DateTime, Utc};
use quill_core::domain::pipeline::{PipelineEvent, PipelineState};
use quill_core::domain::stage::{PipelineDefinition, Stage, StageInput};
use quill_core::domain::task::{TaskRecord, TaskStatus, TaskUpdate};
use quill_core::dto::session::PersistedPipeline;
use quill_core::dto::task::StartStageRequest;
use quill_core::progress::{self, Eta};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Identity and launch payload of a new pipeline instance
#[derive(Debug, Clone, Default)]
pub struct ProjectSeed {
    /// Project id to start with; a random one is generated when absent
    pub project_id: Option<String>,
    /// Payload handed to stages reading [`StageInput::Launch`]
    pub input: JsonValue,
}

impl ProjectSeed {
    pub fn new(input: JsonValue) -> Self {
        Self {
            project_id: None,
            input,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Why a stage stopped the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureReason {
    /// The stage-start call failed; no task record exists for the attempt
    StartFailed { message: String },
    /// The remote task reported `failure`
    Remote { task_id: String, message: String },
    /// The task was polled for longer than the configured timeout
    Timeout { task_id: String, elapsed: Duration },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StartFailed { message } => write!(f, "could not start: {}", message),
            FailureReason::Remote { message, .. } => f.write_str(message),
            FailureReason::Timeout { elapsed, .. } => {
                write!(f, "timed out after {}s", elapsed.as_secs())
            }
        }
    }
}

/// The failure recorded against a stage while the pipeline is errored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage_id: String,
    pub reason: FailureReason,
}

/// What [`OrchestrationStore::record_task_update`] did with an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record was replaced and now has this status
    Applied(TaskStatus),
    /// The observation belongs to another instance or a task that is no longer active
    Stale,
    /// The record is already terminal and was left untouched
    Frozen,
}

/// One run of a pipeline definition
#[derive(Debug, Clone)]
pub struct PipelineInstance {
    pub id: Uuid,
    pub project_id: String,
    pub definition: Arc<PipelineDefinition>,
    pub state: PipelineState,
    /// Zero-based index of the active (or next-to-run) stage
    pub active_index: usize,
    /// Task executing the active stage, once its start call returned
    pub active_task: Option<String>,
    /// Every task record created for this instance, by task id
    pub tasks: HashMap<String, TaskRecord>,
    /// Latest task id per stage id
    pub stage_tasks: HashMap<String, String>,
    /// Result payload per completed stage id
    pub results: BTreeMap<String, JsonValue>,
    pub failure: Option<StageFailure>,
    pub launch_input: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl PipelineInstance {
    fn new(definition: Arc<PipelineDefinition>, seed: ProjectSeed) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            project_id: seed.project_id.unwrap_or_else(|| id.to_string()),
            definition,
            state: PipelineState::Idle,
            active_index: 0,
            active_task: None,
            tasks: HashMap::new(),
            stage_tasks: HashMap::new(),
            results: BTreeMap::new(),
            failure: None,
            launch_input: seed.input,
            created_at: Utc::now(),
        }
    }

    /// Stage under the cursor; `None` once every stage has completed
    pub fn active_stage(&self) -> Option<&Stage> {
        self.definition.stage(self.active_index)
    }

    pub fn active_record(&self) -> Option<&TaskRecord> {
        self.active_task.as_ref().and_then(|id| self.tasks.get(id))
    }

    fn active_record_mut(&mut self) -> Option<&mut TaskRecord> {
        match &self.active_task {
            Some(id) => self.tasks.get_mut(id),
            None => None,
        }
    }

    fn apply(&mut self, event: PipelineEvent) -> Result<()> {
        self.state = self.state.transition(event)?;
        Ok(())
    }
}

/// Display status of one stage in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

/// One row of the stage list
#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub stage: Stage,
    pub status: StageStatus,
    pub task: Option<TaskRecord>,
    pub error: Option<String>,
}

/// Point-in-time view of the store for renderers
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub instance_id: Uuid,
    pub project_id: String,
    pub pipeline: String,
    pub state: PipelineState,
    pub stages: Vec<StageView>,
    pub progress: f64,
    pub eta_minutes: Option<f64>,
    pub busy: bool,
}

/// State container for at most one pipeline instance
#[derive(Debug, Default)]
pub struct OrchestrationStore {
    instance: Option<PipelineInstance>,
}

impl OrchestrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(&self) -> Option<&PipelineInstance> {
        self.instance.as_ref()
    }

    pub fn instance_id(&self) -> Option<Uuid> {
        self.instance.as_ref().map(|i| i.id)
    }

    /// `idle` when no instance exists
    pub fn state(&self) -> PipelineState {
        self.instance
            .as_ref()
            .map(|i| i.state)
            .unwrap_or(PipelineState::Idle)
    }

    // =============================================================================
    // Actions
    // =============================================================================

    /// Creates a new instance in `awaiting-start`
    ///
    /// Fails with [`OrchestratorError::AlreadyRunning`] while the current
    /// instance is neither completed nor errored. A finished instance is replaced.
    pub fn start_pipeline(
        &mut self,
        definition: Arc<PipelineDefinition>,
        seed: ProjectSeed,
    ) -> Result<Uuid> {
        self.ensure_replaceable()?;
        definition.validate()?;

        let mut instance = PipelineInstance::new(definition, seed);
        instance.apply(PipelineEvent::Launch)?;

        info!(
            "Pipeline '{}' started (instance {}, project {})",
            instance.definition.name, instance.id, instance.project_id
        );

        let id = instance.id;
        self.instance = Some(instance);
        Ok(id)
    }

    /// Rebuilds an instance from a saved session
    ///
    /// The cursor lands on the first stage without a result. Results for stage
    /// ids the definition does not know are dropped.
    pub fn resume_pipeline(
        &mut self,
        definition: Arc<PipelineDefinition>,
        persisted: PersistedPipeline,
    ) -> Result<Uuid> {
        self.ensure_replaceable()?;
        definition.validate()?;

        if persisted.pipeline != definition.name {
            return Err(OrchestratorError::InvalidState(format!(
                "session belongs to pipeline '{}', not '{}'",
                persisted.pipeline, definition.name
            )));
        }

        let seed = ProjectSeed {
            project_id: Some(persisted.project_id),
            input: persisted.launch_input,
        };
        let mut instance = PipelineInstance::new(definition, seed);

        let mut results = persisted.results;
        results.retain(|stage_id, _| instance.definition.position_of(stage_id).is_some());

        instance.active_index = instance
            .definition
            .stages
            .iter()
            .position(|s| !results.contains_key(&s.id))
            .unwrap_or(instance.definition.len());
        instance.results = results;
        instance.state = if instance.active_index == instance.definition.len() {
            PipelineState::Completed
        } else {
            PipelineState::AwaitingStart
        };

        info!(
            "Pipeline '{}' resumed at stage {}/{} (instance {})",
            instance.definition.name,
            instance.active_index + 1,
            instance.definition.len(),
            instance.id
        );

        let id = instance.id;
        self.instance = Some(instance);
        Ok(id)
    }

    /// Builds the stage-start request for the active stage
    ///
    /// Only valid in `awaiting-start`.
    pub fn start_request(&self) -> Result<(Uuid, Stage, StartStageRequest)> {
        let instance = self.require_instance()?;

        if instance.state != PipelineState::AwaitingStart {
            return Err(OrchestratorError::InvalidState(format!(
                "no stage is awaiting start (pipeline is {})",
                instance.state
            )));
        }

        let stage = instance
            .active_stage()
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidState("no stage left to start".into()))?;

        let input = match &stage.input {
            StageInput::Launch => instance.launch_input.clone(),
            StageInput::Stage(source) => instance.results.get(source).cloned().ok_or_else(|| {
                OrchestratorError::InvalidState(format!(
                    "stage '{}' needs the result of '{}', which is missing",
                    stage.id, source
                ))
            })?,
        };

        let request = StartStageRequest {
            project_id: instance.project_id.clone(),
            stage: stage.id.clone(),
            input,
        };

        Ok((instance.id, stage, request))
    }

    /// Registers the task returned by a stage-start call and enters `running`
    ///
    /// `instance_id` guards against a start call that completed after a reset.
    pub fn begin_task(
        &mut self,
        instance_id: Uuid,
        task_id: impl Into<String>,
        project_id: Option<String>,
    ) -> Result<()> {
        let instance = self.require_instance_mut()?;
        if instance.id != instance_id {
            return Err(OrchestratorError::InvalidState(format!(
                "instance {} is no longer current",
                instance_id
            )));
        }

        if let Some(active) = instance.active_record() {
            if !active.is_terminal() {
                return Err(OrchestratorError::InvalidState(format!(
                    "task {} is still {:?}",
                    active.task_id, active.status
                )));
            }
        }

        let stage_id = instance
            .active_stage()
            .map(|s| s.id.clone())
            .ok_or_else(|| OrchestratorError::InvalidState("no active stage".into()))?;

        instance.apply(PipelineEvent::TaskStarted)?;

        if let Some(project_id) = project_id.filter(|p| !p.is_empty()) {
            if project_id != instance.project_id {
                debug!(
                    "Adopting project id {} (was {})",
                    project_id, instance.project_id
                );
                instance.project_id = project_id;
            }
        }

        let task_id = task_id.into();
        let record = TaskRecord::new(task_id.clone(), stage_id.clone(), Utc::now());
        instance.tasks.insert(task_id.clone(), record);
        instance.stage_tasks.insert(stage_id, task_id.clone());
        instance.active_task = Some(task_id);

        Ok(())
    }

    /// Replaces the active task record with a fresh observation
    ///
    /// Observations for another instance, for a task that is not the active one,
    /// or for a record that already reached a terminal status change nothing.
    pub fn record_task_update(
        &mut self,
        instance_id: Uuid,
        task_id: &str,
        update: TaskUpdate,
    ) -> UpdateOutcome {
        let Some(instance) = self.instance.as_mut() else {
            return UpdateOutcome::Stale;
        };

        if instance.id != instance_id || instance.active_task.as_deref() != Some(task_id) {
            debug!("Ignoring update for inactive task {}", task_id);
            return UpdateOutcome::Stale;
        }

        let Some(record) = instance.tasks.get_mut(task_id) else {
            return UpdateOutcome::Stale;
        };

        if record.apply(update, Utc::now()) {
            UpdateOutcome::Applied(record.status)
        } else {
            debug!("Task {} is already {:?}", task_id, record.status);
            UpdateOutcome::Frozen
        }
    }

    /// Stores `result` under the active stage and moves the cursor forward
    ///
    /// Requires the active task to have reported `success`.
    ///
    /// # Returns
    /// The next stage to start, or `None` when the pipeline completed
    pub fn advance_stage(&mut self, result: JsonValue) -> Result<Option<Stage>> {
        let instance = self.require_instance_mut()?;

        let status = instance.active_record().map(|r| r.status);
        if status != Some(TaskStatus::Success) {
            return Err(OrchestratorError::InvalidState(format!(
                "cannot advance: active task is {:?}",
                status
            )));
        }

        let stage_id = instance
            .active_stage()
            .map(|s| s.id.clone())
            .ok_or_else(|| OrchestratorError::InvalidState("no active stage".into()))?;

        let has_next = instance.active_index + 1 < instance.definition.len();
        instance.apply(PipelineEvent::StageSucceeded { has_next })?;

        instance.results.insert(stage_id.clone(), result);
        instance.active_index += 1;
        instance.active_task = None;

        info!(
            "Stage '{}' completed ({}/{})",
            stage_id,
            instance.active_index,
            instance.definition.len()
        );

        Ok(instance.active_stage().cloned())
    }

    /// Freezes the pipeline on the active stage
    ///
    /// A non-terminal active record (timeout) is forced to `failure`.
    pub fn fail_stage(&mut self, reason: FailureReason) -> Result<()> {
        let instance = self.require_instance_mut()?;
        instance.apply(PipelineEvent::StageFailed)?;

        let text = reason.to_string();
        if let Some(record) = instance.active_record_mut() {
            record.fail(text.clone(), Utc::now());
        }

        let stage_id = instance
            .active_stage()
            .map(|s| s.id.clone())
            .unwrap_or_default();

        warn!("Stage '{}' failed: {}", stage_id, text);
        instance.failure = Some(StageFailure { stage_id, reason });

        Ok(())
    }

    /// Re-arms the failed stage; completed stages keep their results
    pub fn retry_stage(&mut self) -> Result<Stage> {
        let instance = self.require_instance_mut()?;
        instance.apply(PipelineEvent::Retry)?;

        instance.failure = None;
        instance.active_task = None;

        let stage = instance
            .active_stage()
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidState("no stage to retry".into()))?;

        info!("Retrying stage '{}'", stage.id);
        Ok(stage)
    }

    /// Discards the instance
    ///
    /// Callers must stop polling the active task first.
    pub fn reset_pipeline(&mut self) -> Option<PipelineInstance> {
        let discarded = self.instance.take();
        if let Some(instance) = &discarded {
            info!("Pipeline instance {} reset", instance.id);
        }
        discarded
    }

    // =============================================================================
    // Selectors
    // =============================================================================

    /// Overall completion percentage in `[0, 100]`
    pub fn overall_progress(&self) -> f64 {
        match &self.instance {
            Some(i) => progress::overall_progress(
                i.definition.len(),
                i.active_index,
                i.active_record(),
            ),
            None => 0.0,
        }
    }

    /// Time left on the active task
    pub fn eta_at(&self, now: DateTime<Utc>) -> Eta {
        match self.active_record() {
            Some(record) if !record.is_terminal() => progress::estimate_remaining(record, now),
            _ => Eta::Unknown,
        }
    }

    /// Minutes left on the active task; `None` when unknown
    pub fn eta_minutes(&self) -> Option<f64> {
        self.eta_at(Utc::now()).minutes()
    }

    /// Whether the active task exists and is not terminal
    pub fn is_busy(&self) -> bool {
        self.active_record().is_some_and(|r| !r.is_terminal())
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.instance.as_ref().and_then(|i| i.active_stage())
    }

    pub fn active_record(&self) -> Option<&TaskRecord> {
        self.instance.as_ref().and_then(|i| i.active_record())
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.instance.as_ref().and_then(|i| i.tasks.get(task_id))
    }

    pub fn result(&self, stage_id: &str) -> Option<&JsonValue> {
        self.instance.as_ref().and_then(|i| i.results.get(stage_id))
    }

    pub fn results(&self) -> Option<&BTreeMap<String, JsonValue>> {
        self.instance.as_ref().map(|i| &i.results)
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.instance.as_ref().and_then(|i| i.failure.as_ref())
    }

    /// Number of task records that are not terminal
    pub fn in_flight_tasks(&self) -> usize {
        self.instance
            .as_ref()
            .map(|i| i.tasks.values().filter(|r| !r.is_terminal()).count())
            .unwrap_or(0)
    }

    /// The resumable part of the instance
    pub fn to_persisted(&self) -> Option<PersistedPipeline> {
        self.instance.as_ref().map(|i| PersistedPipeline {
            pipeline: i.definition.name.clone(),
            project_id: i.project_id.clone(),
            launch_input: i.launch_input.clone(),
            results: i.results.clone(),
            saved_at: Utc::now(),
        })
    }

    pub fn snapshot(&self) -> Option<PipelineSnapshot> {
        let instance = self.instance.as_ref()?;

        let stages = instance
            .definition
            .stages
            .iter()
            .enumerate()
            .map(|(idx, stage)| {
                let failed = instance
                    .failure
                    .as_ref()
                    .filter(|f| f.stage_id == stage.id);

                let status = if failed.is_some() {
                    StageStatus::Failed
                } else if instance.results.contains_key(&stage.id) {
                    StageStatus::Completed
                } else if idx == instance.active_index && instance.state.is_in_flight() {
                    StageStatus::Active
                } else {
                    StageStatus::Pending
                };

                let task = instance
                    .stage_tasks
                    .get(&stage.id)
                    .and_then(|id| instance.tasks.get(id))
                    .cloned();

                StageView {
                    stage: stage.clone(),
                    status,
                    task,
                    error: failed.map(|f| f.reason.to_string()),
                }
            })
            .collect();

        Some(PipelineSnapshot {
            instance_id: instance.id,
            project_id: instance.project_id.clone(),
            pipeline: instance.definition.name.clone(),
            state: instance.state,
            stages,
            progress: self.overall_progress(),
            eta_minutes: self.eta_minutes(),
            busy: self.is_busy(),
        })
    }

    fn ensure_replaceable(&self) -> Result<()> {
        match &self.instance {
            Some(i) if i.state.is_in_flight() => Err(OrchestratorError::AlreadyRunning(i.id)),
            _ => Ok(()),
        }
    }

    fn require_instance(&self) -> Result<&PipelineInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidState("no pipeline instance".into()))
    }

    fn require_instance_mut(&mut self) -> Result<&mut PipelineInstance> {
        self.instance
            .as_mut()
            .ok_or_else(|| OrchestratorError::InvalidState("no pipeline instance".into()))
    }
}
