//! Scripted task service used by the engine tests

use async_trait::async_trait;
use quill_client::ClientError;
use quill_core::domain::stage::Stage;
use quill_core::domain::task::TaskUpdate;
use quill_core::dto::task::{StartStageRequest, StartStageResponse};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::repository::TaskRepository;

/// One scripted reply to a status fetch
#[derive(Debug, Clone)]
pub enum Reply {
    Status(TaskUpdate),
    /// Transport-level failure (HTTP 503)
    Unavailable,
}

/// In-memory task service
///
/// Stage starts hand out `task-1`, `task-2`, ... unless a failure is queued.
/// Each task replays its script one reply per fetch and then repeats the last
/// reply; unscripted tasks stay `pending`.
#[derive(Default)]
pub struct ScriptedRepository {
    start_failures: Mutex<VecDeque<String>>,
    starts: Mutex<Vec<(String, StartStageRequest)>>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fetches: Mutex<HashMap<String, usize>>,
    project_id: Mutex<Option<String>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, task_id: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(task_id.to_string(), replies.into());
    }

    /// Makes the next stage-start call fail
    pub fn fail_next_start(&self, message: &str) {
        self.start_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    /// Project id returned by every stage-start response
    pub fn assign_project(&self, project_id: &str) {
        *self.project_id.lock().unwrap() = Some(project_id.to_string());
    }

    /// Stage ids of every successful start call, in order
    pub fn started_stages(&self) -> Vec<String> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .map(|(stage, _)| stage.clone())
            .collect()
    }

    pub fn start_requests(&self) -> Vec<StartStageRequest> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, req)| req.clone())
            .collect()
    }

    pub fn fetch_count(&self, task_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl TaskRepository for ScriptedRepository {
    async fn start_stage(
        &self,
        _domain: &str,
        stage: &Stage,
        request: &StartStageRequest,
    ) -> Result<StartStageResponse, ClientError> {
        if let Some(message) = self.start_failures.lock().unwrap().pop_front() {
            return Err(ClientError::api_error(500, message));
        }

        let mut starts = self.starts.lock().unwrap();
        starts.push((stage.id.clone(), request.clone()));

        Ok(StartStageResponse {
            task_id: format!("task-{}", starts.len()),
            project_id: self.project_id.lock().unwrap().clone(),
        })
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskUpdate, ClientError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default() += 1;

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(task_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Status(update)) => Ok(update),
            Some(Reply::Unavailable) => Err(ClientError::api_error(503, "unavailable")),
            None => Ok(TaskUpdate {
                status: quill_core::domain::task::TaskStatus::Pending,
                current: 0,
                total: 0,
                message: String::new(),
                result: None,
                error: None,
            }),
        }
    }
}
