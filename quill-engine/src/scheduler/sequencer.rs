//! Pipeline sequencer
//!
//! Walks a pipeline definition one stage at a time: issues the stage-start
//! call, hands the returned task to the poller, feeds observations into the
//! store, and advances on `success` or freezes on `failure`.
//!
//! The sequencer owns the store and the poller. It runs on the caller's task,
//! so every store mutation happens between two awaits of the same task.

use quill_core::domain::pipeline::PipelineState;
use quill_core::domain::stage::PipelineDefinition;
use quill_core::domain::task::TaskStatus;
use quill_core::dto::session::PersistedPipeline;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::poller::{PollEvent, PollEventKind, TaskPoller};
use crate::config::Config;
use crate::error::{OrchestratorError, Result};
use crate::repository::TaskRepository;
use crate::store::{FailureReason, OrchestrationStore, ProjectSeed, StageFailure, UpdateOutcome};

/// What handling one poll event changed
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// The event belonged to a reset instance or an inactive task
    Ignored,
    /// The active task record was updated without reaching a terminal status
    Progress,
    /// A stage completed; `next` is the stage that was started after it
    Advanced {
        completed: String,
        next: Option<String>,
    },
    /// The active stage failed and the pipeline is errored
    Failed(StageFailure),
}

/// Drives one pipeline instance at a time
pub struct Sequencer {
    store: OrchestrationStore,
    repository: Arc<dyn TaskRepository>,
    poller: TaskPoller,
    events: mpsc::UnboundedReceiver<PollEvent>,
}

impl Sequencer {
    /// Creates a sequencer with an empty store
    pub fn new(repository: Arc<dyn TaskRepository>, config: &Config) -> Self {
        let (poller, events) = TaskPoller::new(
            Arc::clone(&repository),
            config.poll_interval,
            config.task_timeout,
        );

        Self {
            store: OrchestrationStore::new(),
            repository,
            poller,
            events,
        }
    }

    /// Read access for renderers
    pub fn store(&self) -> &OrchestrationStore {
        &self.store
    }

    pub fn poller(&self) -> &TaskPoller {
        &self.poller
    }

    // =============================================================================
    // User Actions
    // =============================================================================

    /// Creates a new instance and starts its first stage
    ///
    /// A failed start call leaves the pipeline `errored` and still returns the
    /// instance id; check [`OrchestrationStore::failure`].
    pub async fn launch(
        &mut self,
        definition: Arc<PipelineDefinition>,
        seed: ProjectSeed,
    ) -> Result<Uuid> {
        let id = self.store.start_pipeline(definition, seed)?;
        self.start_active_stage().await?;
        Ok(id)
    }

    /// Rebuilds an instance from a saved session and starts its next stage
    pub async fn resume(
        &mut self,
        definition: Arc<PipelineDefinition>,
        persisted: PersistedPipeline,
    ) -> Result<Uuid> {
        let id = self.store.resume_pipeline(definition, persisted)?;
        if self.store.state() == PipelineState::AwaitingStart {
            self.start_active_stage().await?;
        }
        Ok(id)
    }

    /// Re-issues the start call for the failed stage only
    pub async fn retry(&mut self) -> Result<()> {
        self.store.retry_stage()?;
        self.start_active_stage().await
    }

    /// Stops polling and discards the instance
    ///
    /// # Returns
    /// `true` if an instance was discarded
    pub fn reset(&mut self) -> bool {
        if let Some(task_id) = self.store.active_record().map(|r| r.task_id.clone()) {
            self.poller.stop_polling(&task_id);
        }
        self.poller.stop_all();
        self.store.reset_pipeline().is_some()
    }

    // =============================================================================
    // Event Loop
    // =============================================================================

    /// Waits for the next poll event and applies it
    ///
    /// # Returns
    /// `None` once the pipeline is no longer running
    pub async fn next_change(&mut self) -> Result<Option<Change>> {
        if self.store.state() != PipelineState::Running {
            return Ok(None);
        }

        match self.events.recv().await {
            Some(event) => self.handle_event(event).await.map(Some),
            None => Ok(None),
        }
    }

    /// Processes events until the pipeline completes or errors
    ///
    /// # Returns
    /// The final state, or the stage failure as an error
    pub async fn run_to_end(&mut self) -> Result<PipelineState> {
        while self.next_change().await?.is_some() {}

        match self.store.failure() {
            Some(failure) if self.store.state() == PipelineState::Errored => {
                Err(OrchestratorError::from(failure))
            }
            _ => Ok(self.store.state()),
        }
    }

    async fn handle_event(&mut self, event: PollEvent) -> Result<Change> {
        if self.store.instance_id() != Some(event.instance_id) {
            debug!(
                "Dropping event for task {} of a discarded instance",
                event.task_id
            );
            return Ok(Change::Ignored);
        }

        match event.kind {
            PollEventKind::Observed(update) => {
                match self
                    .store
                    .record_task_update(event.instance_id, &event.task_id, update)
                {
                    UpdateOutcome::Applied(TaskStatus::Success) => {
                        self.on_task_succeeded(&event.task_id).await
                    }
                    UpdateOutcome::Applied(TaskStatus::Failure) => {
                        self.poller.stop_polling(&event.task_id);
                        let message = self
                            .store
                            .task(&event.task_id)
                            .map(|r| r.failure_text())
                            .unwrap_or_default();
                        self.fail(FailureReason::Remote {
                            task_id: event.task_id,
                            message,
                        })
                    }
                    UpdateOutcome::Applied(_) => Ok(Change::Progress),
                    UpdateOutcome::Stale | UpdateOutcome::Frozen => Ok(Change::Ignored),
                }
            }
            PollEventKind::TimedOut { elapsed } => {
                let is_active = self
                    .store
                    .active_record()
                    .is_some_and(|r| r.task_id == event.task_id && !r.is_terminal());
                if !is_active {
                    return Ok(Change::Ignored);
                }

                self.poller.stop_polling(&event.task_id);
                self.fail(FailureReason::Timeout {
                    task_id: event.task_id,
                    elapsed,
                })
            }
        }
    }

    async fn on_task_succeeded(&mut self, task_id: &str) -> Result<Change> {
        // Stop before advancing so no late poll can touch the next stage
        self.poller.stop_polling(task_id);

        let result = self
            .store
            .task(task_id)
            .and_then(|r| r.result.clone())
            .unwrap_or(JsonValue::Null);

        let completed = self
            .store
            .current_stage()
            .map(|s| s.id.clone())
            .unwrap_or_default();

        let next = self.store.advance_stage(result)?;

        match &next {
            Some(stage) => {
                info!("Advancing from '{}' to '{}'", completed, stage.id);
                self.start_active_stage().await?;
            }
            None => info!("Pipeline completed after stage '{}'", completed),
        }

        Ok(Change::Advanced {
            completed,
            next: next.map(|s| s.id),
        })
    }

    fn fail(&mut self, reason: FailureReason) -> Result<Change> {
        self.store.fail_stage(reason)?;
        let failure = self
            .store
            .failure()
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidState("failure was not recorded".into()))?;
        error!("Pipeline halted at stage '{}': {}", failure.stage_id, failure.reason);
        Ok(Change::Failed(failure))
    }

    /// Issues the start call for the active stage and begins polling its task
    ///
    /// A failed start call moves the pipeline to `errored` without creating a
    /// task record.
    async fn start_active_stage(&mut self) -> Result<()> {
        let (instance_id, stage, request) = self.store.start_request()?;
        let domain = self
            .store
            .instance()
            .map(|i| i.definition.domain.clone())
            .unwrap_or_default();

        info!(
            "Starting stage '{}' ({}/{})",
            stage.id,
            stage.position + 1,
            self.store.instance().map(|i| i.definition.len()).unwrap_or(0)
        );

        match self.repository.start_stage(&domain, &stage, &request).await {
            Ok(started) => {
                self.store
                    .begin_task(instance_id, started.task_id.clone(), started.project_id)?;
                self.poller.start_polling(instance_id, &started.task_id);
                debug!("Stage '{}' running as task {}", stage.id, started.task_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start stage '{}': {}", stage.id, e);
                self.fail(FailureReason::StartFailed {
                    message: e.to_string(),
                })
                .map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Reply, ScriptedRepository};
    use quill_core::domain::stage::{Stage, StageInput};
    use quill_core::domain::task::TaskUpdate;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::time;

    const TICK: Duration = Duration::from_millis(2000);

    fn three_stages() -> Arc<PipelineDefinition> {
        Arc::new(
            PipelineDefinition::new(
                "three",
                "test",
                vec![
                    Stage::new("one", "One", "", "one", StageInput::Launch),
                    Stage::new("two", "Two", "", "two", StageInput::Stage("one".into())),
                    Stage::new("three", "Three", "", "three", StageInput::Stage("two".into())),
                ],
            )
            .unwrap(),
        )
    }

    fn sequencer(repo: &Arc<ScriptedRepository>) -> Sequencer {
        Sequencer::new(Arc::clone(repo) as Arc<dyn TaskRepository>, &Config::default())
    }

    fn close(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 0.05
    }

    #[tokio::test(start_paused = true)]
    async fn test_advances_on_success() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script(
            "task-1",
            vec![
                Reply::Status(TaskUpdate::running(40, 100)),
                Reply::Status(TaskUpdate::success(json!({"x": 1}))),
            ],
        );

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::new(json!({"url": "v"})))
            .await
            .unwrap();
        assert_eq!(seq.store().state(), PipelineState::Running);
        assert_eq!(repo.started_stages(), vec!["one"]);

        assert_eq!(seq.next_change().await.unwrap(), Some(Change::Progress));
        assert!(close(seq.store().overall_progress(), 13.3));

        assert_eq!(
            seq.next_change().await.unwrap(),
            Some(Change::Advanced {
                completed: "one".into(),
                next: Some("two".into())
            })
        );
        assert!(close(seq.store().overall_progress(), 33.3));
        assert_eq!(seq.store().result("one"), Some(&json!({"x": 1})));

        // Stage two was started exactly once, with stage one's result
        assert_eq!(repo.started_stages(), vec!["one", "two"]);
        assert_eq!(repo.start_requests()[1].input, json!({"x": 1}));
        assert!(!seq.poller().is_polling("task-1"));
        assert!(seq.poller().is_polling("task-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_halts_pipeline() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script("task-1", vec![Reply::Status(TaskUpdate::failure("oom"))]);

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        let err = seq.run_to_end().await.unwrap_err();
        assert!(matches!(
            &err,
            OrchestratorError::RemoteTaskFailure { stage_id, message }
                if stage_id == "one" && message == "oom"
        ));

        assert_eq!(seq.store().state(), PipelineState::Errored);
        assert_eq!(seq.store().failure().unwrap().reason.to_string(), "oom");
        assert_eq!(repo.started_stages(), vec!["one"]);
        assert!(!seq.store().is_busy());

        // Frozen: no more polling, no automatic start
        time::sleep(TICK * 5).await;
        assert_eq!(repo.fetch_count("task-1"), 1);
        assert_eq!(repo.started_stages(), vec!["one"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reruns_only_failed_stage() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script("task-1", vec![Reply::Status(TaskUpdate::success(json!("a")))]);
        repo.script("task-2", vec![Reply::Status(TaskUpdate::failure("flaky"))]);
        repo.script("task-3", vec![Reply::Status(TaskUpdate::success(json!("b")))]);
        repo.script("task-4", vec![Reply::Status(TaskUpdate::success(json!("c")))]);

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();
        assert!(seq.run_to_end().await.is_err());
        assert_eq!(seq.store().failure().unwrap().stage_id, "two");

        seq.retry().await.unwrap();
        assert_eq!(seq.store().state(), PipelineState::Running);

        assert_eq!(seq.run_to_end().await.unwrap(), PipelineState::Completed);
        assert_eq!(repo.started_stages(), vec!["one", "two", "two", "three"]);
        assert_eq!(seq.store().result("one"), Some(&json!("a")));
        assert_eq!(seq.store().result("three"), Some(&json!("c")));
        assert_eq!(seq.store().overall_progress(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_errors_without_record() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.fail_next_start("service down");

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        assert_eq!(seq.store().state(), PipelineState::Errored);
        assert!(seq.store().instance().unwrap().tasks.is_empty());
        assert!(matches!(
            seq.run_to_end().await,
            Err(OrchestratorError::StageStart { .. })
        ));

        // The explicit retry recovers
        repo.script("task-1", vec![Reply::Status(TaskUpdate::success(json!(1)))]);
        seq.retry().await.unwrap();
        assert!(seq.poller().is_polling("task-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_ignores_late_events() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script("task-1", vec![Reply::Status(TaskUpdate::running(10, 100))]);

        let mut seq = sequencer(&repo);
        let old = seq
            .launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        // Let a few observations queue up, then reset before handling them
        time::sleep(TICK * 3 + Duration::from_millis(1)).await;
        assert!(seq.reset());
        assert_eq!(seq.poller().active_count(), 0);

        let fetched = repo.fetch_count("task-1");
        time::sleep(TICK * 5).await;
        assert_eq!(repo.fetch_count("task-1"), fetched);

        // New instance; queued events from the old one are dropped
        repo.script("task-2", vec![Reply::Status(TaskUpdate::running(1, 2))]);
        let new = seq
            .launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();
        assert_ne!(old, new);

        let mut ignored = 0;
        loop {
            match seq.next_change().await.unwrap() {
                Some(Change::Ignored) => ignored += 1,
                Some(Change::Progress) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(ignored, 3);
        assert!(seq.store().task("task-1").is_none());
        assert_eq!(seq.store().active_record().unwrap().task_id, "task-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_blips_are_invisible() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script(
            "task-1",
            vec![
                Reply::Status(TaskUpdate::running(5, 10)),
                Reply::Unavailable,
                Reply::Unavailable,
                Reply::Status(TaskUpdate::running(8, 10)),
            ],
        );

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        assert_eq!(seq.next_change().await.unwrap(), Some(Change::Progress));
        assert_eq!(seq.next_change().await.unwrap(), Some(Change::Progress));
        assert_eq!(seq.store().active_record().unwrap().current, 8);
        assert_eq!(seq.store().state(), PipelineState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_stage() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script("task-1", vec![Reply::Status(TaskUpdate::running(1, 100))]);

        let config = Config::default().with_task_timeout(TICK * 2);
        let mut seq = Sequencer::new(Arc::clone(&repo) as Arc<dyn TaskRepository>, &config);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        let err = seq.run_to_end().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { ref task_id, .. } if task_id == "task-1"));

        let record = seq.store().task("task-1").unwrap();
        assert_eq!(record.status, TaskStatus::Failure);
        assert!(record.error.as_deref().unwrap_or("").starts_with("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_rejected_while_running() {
        let repo = Arc::new(ScriptedRepository::new());
        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        let err = seq
            .launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyRunning(_)));
        assert_eq!(repo.started_stages(), vec!["one"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_id_flows_to_later_stages() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.assign_project("server-p");
        repo.script("task-1", vec![Reply::Status(TaskUpdate::success(json!(1)))]);

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default().with_project("local"))
            .await
            .unwrap();
        seq.next_change().await.unwrap();

        let requests = repo.start_requests();
        assert_eq!(requests[0].project_id, "local");
        assert_eq!(requests[1].project_id, "server-p");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_starts_first_missing_stage() {
        let repo = Arc::new(ScriptedRepository::new());
        let mut seq = sequencer(&repo);

        let persisted = PersistedPipeline {
            pipeline: "three".into(),
            project_id: "p".into(),
            launch_input: JsonValue::Null,
            results: BTreeMap::from([
                ("one".to_string(), json!("a")),
                ("two".to_string(), json!("b")),
            ]),
            saved_at: chrono::Utc::now(),
        };

        seq.resume(three_stages(), persisted).await.unwrap();
        assert_eq!(repo.started_stages(), vec!["three"]);
        assert_eq!(repo.start_requests()[0].input, json!("b"));
        assert_eq!(seq.store().state(), PipelineState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic_within_stage() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.script(
            "task-1",
            [0, 10, 10, 35, 90, 100]
                .into_iter()
                .map(|c| Reply::Status(TaskUpdate::running(c, 100)))
                .chain(std::iter::once(Reply::Status(TaskUpdate::success(json!(1)))))
                .collect(),
        );

        let mut seq = sequencer(&repo);
        seq.launch(three_stages(), ProjectSeed::default())
            .await
            .unwrap();

        let mut last = seq.store().overall_progress();
        while let Some(change) = seq.next_change().await.unwrap() {
            let now = seq.store().overall_progress();
            assert!(now >= last, "{now} < {last}");
            last = now;
            if matches!(change, Change::Advanced { .. }) {
                break;
            }
        }
        assert!(close(last, 33.3));
    }
}
