use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::{EventSink, TaskEvent};
use crate::poller::{PollSettings, poll_until_complete};
use crate::service::ProcessingService;
use crate::summary::SummaryEntry;
use crate::task::{FileTask, TaskKind, TaskReport};
use crate::{Error, Result};

pub const DEFAULT_SECONDARY_CLEAR_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_PRIMARY_CLEAR_DELAY: Duration = Duration::from_secs(5);

/// One selected file, by name and content.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation {
                message: format!("not a usable file name: {}", path.display()),
            })?
            .to_string();
        let bytes = std::fs::read(path)?;
        Ok(Self { filename, bytes })
    }
}

/// Everything one submission needs: the secondary file, the primary files in
/// selection order, and the timing knobs.
#[derive(Debug, Clone)]
pub struct SubmissionPlan {
    pub secondary: FilePayload,
    pub primaries: Vec<FilePayload>,
    pub polling: PollSettings,
    pub secondary_clear_delay: Duration,
    pub primary_clear_delay: Duration,
}

impl SubmissionPlan {
    pub fn new(secondary: FilePayload, primaries: Vec<FilePayload>) -> Self {
        Self {
            secondary,
            primaries,
            polling: PollSettings::default(),
            secondary_clear_delay: DEFAULT_SECONDARY_CLEAR_DELAY,
            primary_clear_delay: DEFAULT_PRIMARY_CLEAR_DELAY,
        }
    }
}

#[derive(Default)]
pub struct SubmitOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub events: Option<&'a dyn EventSink>,
}

#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub job_code: String,
    pub secondary_file_path: String,
    /// Index 0 is the secondary file, then one report per primary in
    /// selection order. Completed reports carry their summary entry.
    pub tasks: Vec<TaskReport>,
}

impl SubmissionResult {
    pub fn summaries(&self) -> Vec<SummaryEntry> {
        self.tasks
            .iter()
            .filter_map(|t| t.summary.clone())
            .collect()
    }
}

pub async fn run_submission<S: ProcessingService + Sync>(
    service: &S,
    plan: SubmissionPlan,
) -> Result<SubmissionResult> {
    run_submission_with(service, plan, SubmitOptions::default()).await
}

/// Runs one submission end to end: job code, secondary upload, concurrent
/// primary uploads, one polling loop per primary, details fetch per finished
/// file. The secondary upload completes before any primary upload is issued;
/// a job-code or secondary failure aborts the whole submission. Per-primary
/// failures land in that task's report and never abort their siblings.
pub async fn run_submission_with<S: ProcessingService + Sync>(
    service: &S,
    plan: SubmissionPlan,
    options: SubmitOptions<'_>,
) -> Result<SubmissionResult> {
    validate(&plan)?;

    let SubmissionPlan {
        secondary,
        primaries,
        polling,
        secondary_clear_delay,
        primary_clear_delay,
    } = plan;

    debug!(
        event = "submit.prepare",
        secondary = %secondary.filename,
        primaries = primaries.len(),
        "submit.prepare"
    );

    let job_code = service.fetch_job_code().await.map_err(|e| {
        error!(event = "submit.job_code_failed", error = %e, "submit.job_code_failed");
        e
    })?;
    debug!(event = "submit.job_code", job_code = %job_code, "submit.job_code");

    // Secondary upload is a hard sequencing dependency: primaries need its
    // stored path, so nothing else starts until this response is in.
    let mut secondary_task = FileTask::new(0, TaskKind::Secondary, secondary.filename.clone());
    emit(
        options.events,
        TaskEvent::TaskCreated {
            index: 0,
            display_name: secondary_task.display_name.clone(),
        },
    );
    secondary_task.begin_upload()?;
    emit(options.events, TaskEvent::UploadProgress { index: 0, percent: 0 });

    let secondary_file_path = match service
        .upload_secondary(&job_code, &secondary.filename, secondary.bytes)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            error!(
                event = "io.upload_failed",
                stage = "secondary",
                filename = %secondary.filename,
                error = %e,
                "io.upload_failed"
            );
            secondary_task.fail_upload(e.to_string())?;
            emit(
                options.events,
                TaskEvent::UploadFailed {
                    index: 0,
                    message: e.to_string(),
                },
            );
            return Err(e);
        }
    };
    secondary_task.finish_upload(None)?;
    emit(options.events, TaskEvent::UploadProgress { index: 0, percent: 100 });
    debug!(
        event = "submit.secondary_stored",
        file_path = %secondary_file_path,
        "submit.secondary_stored"
    );

    // The secondary's entry clears on its own timer while the primaries run,
    // mirroring the upload widget this service was built for.
    let events = options.events;
    let clear_secondary = async {
        tokio::time::sleep(secondary_clear_delay).await;
        secondary_task.clear()?;
        emit(events, TaskEvent::TaskCleared { index: 0 });
        Ok::<FileTask, Error>(secondary_task)
    };

    let primary_futures = primaries.into_iter().enumerate().map(|(i, payload)| {
        run_file_task(
            service,
            &job_code,
            &secondary_file_path,
            i + 1,
            payload,
            &polling,
            primary_clear_delay,
            options.cancel,
            events,
        )
    });

    let (secondary_task, primary_results) = tokio::join!(
        clear_secondary,
        futures::future::join_all(primary_futures)
    );
    let secondary_task = secondary_task?;

    let mut tasks = Vec::with_capacity(primary_results.len() + 1);
    tasks.push(secondary_task.into_report(None));
    for result in primary_results {
        tasks.push(result?);
    }

    debug!(
        event = "submit.finished",
        job_code = %job_code,
        completed = tasks.iter().filter(|t| t.summary.is_some()).count(),
        "submit.finished"
    );

    Ok(SubmissionResult {
        job_code,
        secondary_file_path,
        tasks,
    })
}

/// Upload one primary file, poll its processing to completion, fetch its
/// details. Failures terminate this task only; the report says what happened.
/// Only cancellation propagates as an error.
#[allow(clippy::too_many_arguments)]
async fn run_file_task<S: ProcessingService + Sync>(
    service: &S,
    job_code: &str,
    secondary_file_path: &str,
    index: usize,
    payload: FilePayload,
    polling: &PollSettings,
    clear_delay: Duration,
    cancel: Option<&CancellationToken>,
    events: Option<&dyn EventSink>,
) -> Result<TaskReport> {
    let mut task = FileTask::new(index, TaskKind::Primary, payload.filename.clone());
    emit(
        events,
        TaskEvent::TaskCreated {
            index,
            display_name: task.display_name.clone(),
        },
    );

    if let Some(cancel) = cancel
        && cancel.is_cancelled()
    {
        return Err(Error::Cancelled);
    }

    task.begin_upload()?;
    emit(events, TaskEvent::UploadProgress { index, percent: 0 });

    let server_filename = match service
        .upload_primary(job_code, secondary_file_path, &payload.filename, payload.bytes)
        .await
    {
        Ok(name) => name,
        Err(e) => {
            warn!(
                event = "io.upload_failed",
                stage = "primary",
                filename = %payload.filename,
                error = %e,
                "io.upload_failed"
            );
            task.fail_upload(e.to_string())?;
            emit(
                events,
                TaskEvent::UploadFailed {
                    index,
                    message: e.to_string(),
                },
            );
            return Ok(task.into_report(None));
        }
    };

    task.finish_upload(Some(server_filename.clone()))?;
    emit(events, TaskEvent::UploadProgress { index, percent: 100 });

    task.begin_processing()?;
    emit(
        events,
        TaskEvent::ProcessingStarted {
            index,
            server_filename: server_filename.clone(),
        },
    );

    let poll_result = poll_until_complete(
        service,
        job_code,
        &server_filename,
        polling,
        cancel,
        |raw| {
            task.record_progress(raw);
            emit(
                events,
                TaskEvent::ProcessingProgress {
                    index,
                    raw: raw.to_string(),
                },
            );
        },
    )
    .await;

    match poll_result {
        Ok(()) => {}
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            task.fail_processing(e.to_string())?;
            emit(
                events,
                TaskEvent::ProcessingFailed {
                    index,
                    message: e.to_string(),
                },
            );
            return Ok(task.into_report(None));
        }
    }

    let details = match service.fetch_details(job_code, &server_filename).await {
        Ok(details) => details,
        Err(e) => {
            warn!(
                event = "io.details_failed",
                filename = %server_filename,
                error = %e,
                "io.details_failed"
            );
            task.fail_processing(e.to_string())?;
            emit(
                events,
                TaskEvent::ProcessingFailed {
                    index,
                    message: e.to_string(),
                },
            );
            return Ok(task.into_report(None));
        }
    };

    let summary = SummaryEntry::from(details);
    task.complete()?;
    emit(
        events,
        TaskEvent::TaskCompleted {
            index,
            summary: summary.clone(),
        },
    );

    tokio::time::sleep(clear_delay).await;
    task.clear()?;
    emit(events, TaskEvent::TaskCleared { index });

    Ok(task.into_report(Some(summary)))
}

fn validate(plan: &SubmissionPlan) -> Result<()> {
    if plan.secondary.filename.is_empty() {
        return Err(Error::Validation {
            message: "a secondary file must be selected".to_string(),
        });
    }
    if plan.primaries.is_empty() {
        return Err(Error::Validation {
            message: "at least one primary file must be selected".to_string(),
        });
    }
    if let Some(unnamed) = plan.primaries.iter().position(|p| p.filename.is_empty()) {
        return Err(Error::Validation {
            message: format!("primary file #{} has no file name", unnamed + 1),
        });
    }
    Ok(())
}

fn emit(events: Option<&dyn EventSink>, event: TaskEvent) {
    if let Some(sink) = events {
        sink.on_event(event);
    }
}
