mod error;
mod events;
mod poller;
mod run_log;
mod service;
mod submit;
mod summary;
mod task;

pub const APP_NAME: &str = "VideoStack";

pub use error::{Error, Result};
pub use events::{EventSink, TaskEvent};
pub use poller::{
    DEFAULT_POLL_FAILURE_BUDGET, DEFAULT_POLL_INTERVAL, PROCESSING_DONE, PollSettings,
    poll_until_complete,
};
pub use run_log::{RunLogGuard, init_run_logging, start_run_log};
pub use service::{
    HttpProcessingService, HttpProcessingServiceConfig, InMemoryProcessingService, OutputDetails,
    ProcessingService, ScriptedPoll,
};
pub use submit::{
    DEFAULT_PRIMARY_CLEAR_DELAY, DEFAULT_SECONDARY_CLEAR_DELAY, FilePayload, SubmissionPlan,
    SubmissionResult, SubmitOptions, run_submission, run_submission_with,
};
pub use summary::{SummaryEntry, SummaryList};
pub use task::{FileTask, TaskKind, TaskReport, TaskState};
