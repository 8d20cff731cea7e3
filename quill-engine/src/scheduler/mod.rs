//! Scheduler
//!
//! - Poller: interval timers fetching the status of remote tasks
//! - Sequencer: walks the pipeline stages, reacting to poll events

pub mod poller;
pub mod sequencer;

pub use poller::{PollEvent, PollEventKind, PollHandle, TaskPoller};
pub use sequencer::{Change, Sequencer};
