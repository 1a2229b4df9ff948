use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;

use videostack_core::{
    Error, EventSink, FilePayload, InMemoryProcessingService, OutputDetails, PollSettings,
    ProcessingService, Result, SubmissionPlan, SubmitOptions, SummaryList, TaskEvent, TaskState,
    run_submission, run_submission_with,
};

fn fast_plan(secondary: &str, primaries: &[&str]) -> SubmissionPlan {
    let mut plan = SubmissionPlan::new(
        FilePayload::new(secondary, b"ref-bytes".to_vec()),
        primaries
            .iter()
            .map(|name| FilePayload::new(*name, b"clip-bytes".to_vec()))
            .collect(),
    );
    plan.polling = PollSettings {
        interval: Duration::from_millis(1),
        failure_budget: 3,
    };
    plan.secondary_clear_delay = Duration::from_millis(1);
    plan.primary_clear_delay = Duration::from_millis(1);
    plan
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<TaskEvent>>);

impl RecordingSink {
    fn events(&self) -> Vec<TaskEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: TaskEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// Wraps the in-memory service and fails selected operations, leaving the
/// rest untouched.
struct FailingService<'a> {
    inner: &'a InMemoryProcessingService,
    fail_job_code: bool,
    fail_secondary: bool,
    fail_primary: Option<String>,
    malformed_primary: Option<String>,
}

impl<'a> FailingService<'a> {
    fn new(inner: &'a InMemoryProcessingService) -> Self {
        Self {
            inner,
            fail_job_code: false,
            fail_secondary: false,
            fail_primary: None,
            malformed_primary: None,
        }
    }

    fn injected(endpoint: &str) -> Error {
        Error::Service {
            endpoint: endpoint.to_string(),
            message: "injected failure".to_string(),
        }
    }

    fn injected_malformed(endpoint: &str) -> Error {
        Error::MalformedResponse {
            endpoint: endpoint.to_string(),
            message: "invalid json: body={\"status\":\"ok\"}".to_string(),
        }
    }
}

impl ProcessingService for FailingService<'_> {
    fn endpoint(&self) -> &'static str {
        self.inner.endpoint()
    }

    fn fetch_job_code<'b>(&'b self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'b>> {
        Box::pin(async move {
            if self.fail_job_code {
                return Err(Self::injected("get-job-code"));
            }
            self.inner.fetch_job_code().await
        })
    }

    fn upload_secondary<'b>(
        &'b self,
        job_code: &'b str,
        filename: &'b str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'b>> {
        Box::pin(async move {
            if self.fail_secondary {
                return Err(Self::injected("upload-secondary"));
            }
            self.inner.upload_secondary(job_code, filename, bytes).await
        })
    }

    fn upload_primary<'b>(
        &'b self,
        job_code: &'b str,
        secondary_file_path: &'b str,
        filename: &'b str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'b>> {
        Box::pin(async move {
            if self.fail_primary.as_deref() == Some(filename) {
                return Err(Self::injected("upload"));
            }
            if self.malformed_primary.as_deref() == Some(filename) {
                return Err(Self::injected_malformed("upload"));
            }
            self.inner
                .upload_primary(job_code, secondary_file_path, filename, bytes)
                .await
        })
    }

    fn poll_progress<'b>(
        &'b self,
        job_code: &'b str,
        filename: &'b str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'b>> {
        self.inner.poll_progress(job_code, filename)
    }

    fn fetch_details<'b>(
        &'b self,
        job_code: &'b str,
        filename: &'b str,
    ) -> Pin<Box<dyn Future<Output = Result<OutputDetails>> + Send + 'b>> {
        self.inner.fetch_details(job_code, filename)
    }

    fn fetch_output<'b>(
        &'b self,
        url: &'b str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'b>> {
        self.inner.fetch_output(url)
    }
}

#[tokio::test]
async fn missing_secondary_issues_no_requests() {
    let service = InMemoryProcessingService::new();
    let plan = fast_plan("", &["clip.mp4"]);

    let err = run_submission(&service, plan).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(service.total_calls(), 0);
}

#[tokio::test]
async fn zero_primaries_issues_no_requests() {
    let service = InMemoryProcessingService::new();
    let plan = fast_plan("ref.mp4", &[]);

    let err = run_submission(&service, plan).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(service.total_calls(), 0);
}

#[tokio::test]
async fn secondary_upload_completes_before_any_primary_upload() {
    let service = InMemoryProcessingService::new();
    let plan = fast_plan("ref.mp4", &["a.mp4", "b.mp4", "c.mp4"]);

    run_submission(&service, plan).await.unwrap();

    assert_eq!(service.job_codes_issued.load(Ordering::Relaxed), 1);
    assert_eq!(service.secondary_uploads.load(Ordering::Relaxed), 1);
    assert_eq!(service.primary_uploads.load(Ordering::Relaxed), 3);

    let log = service.call_log().await;
    assert_eq!(log[0], "get-job-code");
    assert_eq!(log[1], "upload-secondary ref.mp4");

    let secondary_pos = 1;
    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        let pos = log
            .iter()
            .position(|c| c == &format!("upload {name}"))
            .expect("primary upload issued");
        assert!(pos > secondary_pos, "{name} uploaded before secondary");
    }
}

#[tokio::test]
async fn job_code_failure_aborts_without_uploads() {
    let inner = InMemoryProcessingService::new();
    let mut service = FailingService::new(&inner);
    service.fail_job_code = true;

    let err = run_submission(&service, fast_plan("ref.mp4", &["a.mp4"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Service { .. }));
    assert_eq!(inner.secondary_uploads.load(Ordering::Relaxed), 0);
    assert_eq!(inner.primary_uploads.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn secondary_failure_aborts_before_any_primary_upload() {
    let inner = InMemoryProcessingService::new();
    let mut service = FailingService::new(&inner);
    service.fail_secondary = true;

    let err = run_submission(&service, fast_plan("ref.mp4", &["a.mp4", "b.mp4"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Service { .. }));
    assert_eq!(inner.job_codes_issued.load(Ordering::Relaxed), 1);
    assert_eq!(inner.primary_uploads.load(Ordering::Relaxed), 0);
    assert_eq!(inner.progress_polls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn polling_starts_only_after_the_upload_response() {
    let service = InMemoryProcessingService::new();
    service
        .script_progress_values("srv_a.mp4", &["50", "100"])
        .await;

    run_submission(&service, fast_plan("ref.mp4", &["a.mp4"]))
        .await
        .unwrap();

    let log = service.call_log().await;
    let upload_pos = log.iter().position(|c| c == "upload a.mp4").unwrap();
    let first_poll_pos = log.iter().position(|c| c == "progress srv_a.mp4").unwrap();
    assert!(first_poll_pos > upload_pos);
}

#[tokio::test]
async fn polling_stops_permanently_at_the_sentinel() {
    let service = InMemoryProcessingService::new();
    service
        .script_progress_values("srv_a.mp4", &["0", "50", "100"])
        .await;

    run_submission(&service, fast_plan("ref.mp4", &["a.mp4"]))
        .await
        .unwrap();

    // Three scripted values, three polls, nothing after "100".
    assert_eq!(service.progress_polls.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn completed_task_carries_the_details_as_its_summary() {
    let service = InMemoryProcessingService::new();
    service.script_progress_values("srv_clip.mp4", &["100"]).await;

    let result = run_submission(&service, fast_plan("ref.mp4", &["clip.mp4"]))
        .await
        .unwrap();

    assert_eq!(result.secondary_file_path, "data/ref.mp4");
    let summaries = result.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].primary_name, "clip.mp4");
    assert_eq!(summaries[0].secondary_name, "ref.mp4");
    assert_eq!(summaries[0].download_url, "/videos/out_srv_clip.mp4");
    assert_eq!(service.detail_fetches.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn primary_upload_failure_does_not_abort_its_siblings() {
    let inner = InMemoryProcessingService::new();
    inner.script_progress_values("srv_b.mp4", &["100"]).await;
    let mut service = FailingService::new(&inner);
    service.fail_primary = Some("a.mp4".to_string());

    let result = run_submission(&service, fast_plan("ref.mp4", &["a.mp4", "b.mp4"]))
        .await
        .unwrap();

    let failed = &result.tasks[1];
    assert_eq!(failed.display_name, "a.mp4");
    assert!(matches!(failed.state, TaskState::UploadFailed { .. }));
    assert!(failed.summary.is_none());

    let completed = &result.tasks[2];
    assert_eq!(completed.display_name, "b.mp4");
    assert_eq!(completed.state, TaskState::Cleared);
    assert!(completed.summary.is_some());
}

#[tokio::test]
async fn malformed_upload_response_fails_the_task_without_polling() {
    let inner = InMemoryProcessingService::new();
    inner.script_progress_values("srv_b.mp4", &["100"]).await;
    let mut service = FailingService::new(&inner);
    service.malformed_primary = Some("a.mp4".to_string());

    let result = run_submission(&service, fast_plan("ref.mp4", &["a.mp4", "b.mp4"]))
        .await
        .unwrap();

    // A 2xx with an unusable body is an upload failure for that task only.
    let failed = &result.tasks[1];
    assert_eq!(failed.display_name, "a.mp4");
    assert!(matches!(failed.state, TaskState::UploadFailed { .. }));
    assert!(failed.server_filename.is_none());
    assert!(failed.summary.is_none());

    let completed = &result.tasks[2];
    assert_eq!(completed.state, TaskState::Cleared);

    // Only b.mp4 ever gets polled.
    let log = inner.call_log().await;
    assert!(log.iter().all(|c| !c.contains("progress srv_a.mp4")));
    assert_eq!(inner.progress_polls.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn events_follow_the_task_lifecycle() {
    let service = InMemoryProcessingService::new();
    service
        .script_progress_values("srv_a.mp4", &["50", "100"])
        .await;

    let sink = RecordingSink::default();
    run_submission_with(
        &service,
        fast_plan("ref.mp4", &["a.mp4"]),
        SubmitOptions {
            cancel: None,
            events: Some(&sink),
        },
    )
    .await
    .unwrap();

    let for_task_1: Vec<String> = sink
        .events()
        .iter()
        .filter(|e| e.index() == 1)
        .map(|e| match e {
            TaskEvent::TaskCreated { .. } => "created".to_string(),
            TaskEvent::UploadProgress { percent, .. } => format!("upload:{percent}"),
            TaskEvent::UploadFailed { .. } => "upload_failed".to_string(),
            TaskEvent::ProcessingStarted { .. } => "processing".to_string(),
            TaskEvent::ProcessingProgress { raw, .. } => format!("progress:{raw}"),
            TaskEvent::ProcessingFailed { .. } => "processing_failed".to_string(),
            TaskEvent::TaskCompleted { .. } => "completed".to_string(),
            TaskEvent::TaskCleared { .. } => "cleared".to_string(),
        })
        .collect();

    assert_eq!(
        for_task_1,
        vec![
            "created",
            "upload:0",
            "upload:100",
            "processing",
            "progress:50",
            "progress:100",
            "completed",
            "cleared"
        ]
    );

    // The secondary's progress element exists before any primary's.
    let events = sink.events();
    let secondary_created = events
        .iter()
        .position(|e| matches!(e, TaskEvent::TaskCreated { index: 0, .. }))
        .unwrap();
    let primary_created = events
        .iter()
        .position(|e| matches!(e, TaskEvent::TaskCreated { index: 1, .. }))
        .unwrap();
    assert!(secondary_created < primary_created);
}

#[tokio::test]
async fn end_to_end_two_primaries_produce_two_summaries() {
    let service = InMemoryProcessingService::new();
    service
        .script_progress_values("srv_a.mp4", &["25", "75", "100"])
        .await;
    service.script_progress_values("srv_b.mp4", &["100"]).await;

    let result = run_submission(&service, fast_plan("ref.mp4", &["a.mp4", "b.mp4"]))
        .await
        .unwrap();

    assert_eq!(service.job_codes_issued.load(Ordering::Relaxed), 1);
    assert_eq!(service.secondary_uploads.load(Ordering::Relaxed), 1);
    assert_eq!(service.primary_uploads.load(Ordering::Relaxed), 2);
    // 3 polls for a.mp4, 1 for b.mp4, each loop independent.
    assert_eq!(service.progress_polls.load(Ordering::Relaxed), 4);

    assert_eq!(result.tasks.len(), 3);
    assert_eq!(result.tasks[0].state, TaskState::Cleared);

    let mut list = SummaryList::new();
    for summary in result.summaries() {
        list.push(summary);
    }
    assert_eq!(list.len(), 2);
    assert!(list.bulk_controls_visible());
    assert_eq!(
        list.download_targets(),
        vec!["/videos/out_srv_a.mp4", "/videos/out_srv_b.mp4"]
    );
}
