use crate::summary::SummaryEntry;

/// Lifecycle notifications for one file task, identified by its stable index
/// (0 = secondary, 1.. = primaries in selection order). Front-ends render
/// these; the orchestrator never talks to a UI directly.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    TaskCreated { index: usize, display_name: String },
    UploadProgress { index: usize, percent: u8 },
    UploadFailed { index: usize, message: String },
    ProcessingStarted { index: usize, server_filename: String },
    /// Raw wire value, displayed as received (no smoothing).
    ProcessingProgress { index: usize, raw: String },
    ProcessingFailed { index: usize, message: String },
    TaskCompleted { index: usize, summary: SummaryEntry },
    TaskCleared { index: usize },
}

impl TaskEvent {
    pub fn index(&self) -> usize {
        match self {
            TaskEvent::TaskCreated { index, .. }
            | TaskEvent::UploadProgress { index, .. }
            | TaskEvent::UploadFailed { index, .. }
            | TaskEvent::ProcessingStarted { index, .. }
            | TaskEvent::ProcessingProgress { index, .. }
            | TaskEvent::ProcessingFailed { index, .. }
            | TaskEvent::TaskCompleted { index, .. }
            | TaskEvent::TaskCleared { index } => *index,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn on_event(&self, event: TaskEvent);
}
