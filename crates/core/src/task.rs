use crate::summary::SummaryEntry;
use crate::{Error, Result};

/// `Created -> Uploading -> (UploadFailed | Uploaded) -> Processing ->
/// (ProcessingFailed | Completed) -> Cleared`.
///
/// Upload and processing failures are terminal; there is no retry of a task.
/// The secondary file never processes, so its task goes `Uploaded -> Cleared`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Uploading,
    UploadFailed { message: String },
    Uploaded,
    Processing,
    ProcessingFailed { message: String },
    Completed,
    Cleared,
}

impl TaskState {
    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Uploading => "uploading",
            TaskState::UploadFailed { .. } => "upload_failed",
            TaskState::Uploaded => "uploaded",
            TaskState::Processing => "processing",
            TaskState::ProcessingFailed { .. } => "processing_failed",
            TaskState::Completed => "completed",
            TaskState::Cleared => "cleared",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::UploadFailed { .. }
                | TaskState::ProcessingFailed { .. }
                | TaskState::Completed
                | TaskState::Cleared
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Secondary,
    Primary,
}

/// One file's live submission state. Index 0 is the secondary file, primaries
/// are 1.. in selection order; the index is the stable handle front-ends key
/// their rendering on.
#[derive(Debug, Clone)]
pub struct FileTask {
    pub index: usize,
    pub kind: TaskKind,
    pub display_name: String,
    pub upload_progress: u8,
    /// Raw wire percentage string; `None` until the first poll answers.
    pub processing_progress: Option<String>,
    server_filename: Option<String>,
    state: TaskState,
}

impl FileTask {
    pub fn new(index: usize, kind: TaskKind, display_name: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            display_name: display_name.into(),
            upload_progress: 0,
            processing_progress: None,
            server_filename: None,
            state: TaskState::Created,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Only known after a successful upload response; polling keys off it.
    pub fn server_filename(&self) -> Option<&str> {
        self.server_filename.as_deref()
    }

    pub fn begin_upload(&mut self) -> Result<()> {
        self.expect(&[TaskState::Created], "uploading")?;
        self.state = TaskState::Uploading;
        Ok(())
    }

    pub fn fail_upload(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect(&[TaskState::Uploading], "upload_failed")?;
        self.state = TaskState::UploadFailed {
            message: message.into(),
        };
        Ok(())
    }

    pub fn finish_upload(&mut self, server_filename: Option<String>) -> Result<()> {
        self.expect(&[TaskState::Uploading], "uploaded")?;
        self.server_filename = server_filename;
        self.upload_progress = 100;
        self.state = TaskState::Uploaded;
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<()> {
        self.expect(&[TaskState::Uploaded], "processing")?;
        if self.server_filename.is_none() {
            return Err(Error::InvalidTransition {
                from: "uploaded (no processing key)".to_string(),
                to: "processing".to_string(),
            });
        }
        self.state = TaskState::Processing;
        Ok(())
    }

    /// Stores the polled value verbatim. Only meaningful while processing;
    /// late ticks after a terminal state are dropped.
    pub fn record_progress(&mut self, raw: &str) {
        if self.state == TaskState::Processing {
            self.processing_progress = Some(raw.to_string());
        }
    }

    pub fn fail_processing(&mut self, message: impl Into<String>) -> Result<()> {
        self.expect(&[TaskState::Processing], "processing_failed")?;
        self.state = TaskState::ProcessingFailed {
            message: message.into(),
        };
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.expect(&[TaskState::Processing], "completed")?;
        self.state = TaskState::Completed;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.expect(&[TaskState::Completed, TaskState::Uploaded], "cleared")?;
        self.state = TaskState::Cleared;
        Ok(())
    }

    pub fn into_report(self, summary: Option<SummaryEntry>) -> TaskReport {
        TaskReport {
            index: self.index,
            kind: self.kind,
            display_name: self.display_name,
            server_filename: self.server_filename,
            state: self.state,
            summary,
        }
    }

    fn expect(&self, allowed: &[TaskState], to: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state.name().to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// Final per-file outcome returned by a submission.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub index: usize,
    pub kind: TaskKind,
    pub display_name: String,
    pub server_filename: Option<String>,
    pub state: TaskState,
    pub summary: Option<SummaryEntry>,
}
