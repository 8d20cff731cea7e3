//! Task poller
//!
//! Fetches the status of a remote task on a fixed interval until it reaches a
//! terminal status, forwarding every observation to the sequencer.
//! Transport failures are logged and the next tick proceeds as scheduled.

use quill_core::domain::task::TaskUpdate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::TaskRepository;

/// Something the poller learned about a task
#[derive(Debug, Clone, PartialEq)]
pub struct PollEvent {
    /// Pipeline instance the task was started for
    pub instance_id: Uuid,
    pub task_id: String,
    pub kind: PollEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEventKind {
    /// A successful status fetch
    Observed(TaskUpdate),
    /// The task was polled longer than the configured timeout; polling stopped
    TimedOut { elapsed: Duration },
}

/// Running poll loop for one task
///
/// Dropping the handle cancels the timer. An in-flight fetch is abandoned and
/// its response never reaches the channel.
#[derive(Debug)]
pub struct PollHandle {
    instance_id: Uuid,
    handle: JoinHandle<()>,
}

impl PollHandle {
    /// Whether the loop exited on its own (terminal status or timeout)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Registry of poll loops, at most one per task id
pub struct TaskPoller {
    repository: Arc<dyn TaskRepository>,
    interval: Duration,
    timeout: Option<Duration>,
    events: mpsc::UnboundedSender<PollEvent>,
    active: HashMap<String, PollHandle>,
}

impl TaskPoller {
    /// Creates a poller and the receiving end of its event channel
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let poller = Self {
            repository,
            interval,
            timeout,
            events,
            active: HashMap::new(),
        };
        (poller, rx)
    }

    /// Starts polling `task_id`
    ///
    /// Calling this again while the task is already being polled does nothing.
    ///
    /// # Returns
    /// `true` if a new poll loop was started
    pub fn start_polling(&mut self, instance_id: Uuid, task_id: &str) -> bool {
        if let Some(existing) = self.active.get(task_id) {
            if !existing.is_finished() {
                debug!("Task {} is already being polled", task_id);
                return false;
            }
        }

        debug!(
            "Polling task {} every {:?} (timeout: {:?})",
            task_id, self.interval, self.timeout
        );

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.repository),
            instance_id,
            task_id.to_string(),
            self.interval,
            self.timeout,
            self.events.clone(),
        ));

        self.active.insert(
            task_id.to_string(),
            PollHandle {
                instance_id,
                handle,
            },
        );
        true
    }

    /// Stops polling `task_id`; safe to call when nothing is polling it
    ///
    /// # Returns
    /// `true` if a poll loop was registered for the task
    pub fn stop_polling(&mut self, task_id: &str) -> bool {
        match self.active.remove(task_id) {
            Some(handle) => {
                debug!("Stopped polling task {}", task_id);
                drop(handle);
                true
            }
            None => false,
        }
    }

    /// Stops every poll loop
    pub fn stop_all(&mut self) {
        if !self.active.is_empty() {
            debug!("Stopping {} poll loop(s)", self.active.len());
        }
        self.active.clear();
    }

    /// Whether a live poll loop exists for `task_id`
    pub fn is_polling(&self, task_id: &str) -> bool {
        self.active
            .get(task_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live poll loops
    pub fn active_count(&self) -> usize {
        self.active.values().filter(|h| !h.is_finished()).count()
    }
}

async fn poll_loop(
    repository: Arc<dyn TaskRepository>,
    instance_id: Uuid,
    task_id: String,
    interval: Duration,
    timeout: Option<Duration>,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let started = Instant::now();
    let mut ticker = time::interval_at(started + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match repository.fetch_status(&task_id).await {
            Ok(update) => {
                let terminal = update.status.is_terminal();
                if terminal {
                    info!("Task {} finished with status {:?}", task_id, update.status);
                } else {
                    debug!(
                        "Task {}: {:?} {}/{} {}",
                        task_id, update.status, update.current, update.total, update.message
                    );
                }

                let event = PollEvent {
                    instance_id,
                    task_id: task_id.clone(),
                    kind: PollEventKind::Observed(update),
                };

                if events.send(event).is_err() || terminal {
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to poll task {}: {}", task_id, e);
            }
        }

        if let Some(limit) = timeout {
            let elapsed = started.elapsed();
            if elapsed >= limit {
                warn!("Task {} timed out after {:?}", task_id, elapsed);
                let _ = events.send(PollEvent {
                    instance_id,
                    task_id: task_id.clone(),
                    kind: PollEventKind::TimedOut { elapsed },
                });
                return;
            }
        }
    }
}
