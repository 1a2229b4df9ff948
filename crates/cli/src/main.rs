use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use videostack_core::{
    APP_NAME, Error, EventSink, FilePayload, HttpProcessingService, HttpProcessingServiceConfig,
    PollSettings, ProcessingService, SubmissionPlan, SubmissionResult, SubmitOptions, SummaryList,
    TaskEvent, run_submission_with, start_run_log,
};

#[derive(Parser)]
#[command(name = "videostack")]
#[command(about = "VideoStack upload client", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    /// Emit task lifecycle events as NDJSON instead of human text.
    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one secondary file plus primaries and wait for processing.
    Submit {
        #[arg(long)]
        secondary: PathBuf,
        #[arg(long = "primary", required = true)]
        primaries: Vec<PathBuf>,
        /// Download every finished output into this directory, in list order.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Overrides the configured server base URL.
        #[arg(long)]
        server: Option<String>,
    },
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get,
    Set,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    server: ServerSettings,
    polling: PollingSettings,
    display: DisplaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerSettings {
    base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PollingSettings {
    interval_ms: u64,
    failure_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DisplaySettings {
    secondary_clear_delay_ms: u64,
    primary_clear_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                base_url: "http://127.0.0.1:5000".to_string(),
            },
            polling: PollingSettings {
                interval_ms: 500,
                failure_budget: 8,
            },
            display: DisplaySettings {
                secondary_clear_delay_ms: 3_000,
                primary_clear_delay_ms: 5_000,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    fn from_core(err: &Error) -> Self {
        match err {
            Error::Validation { .. } => Self::new("submit.validation", err.to_string()),
            Error::Service { .. } => Self::retryable("submit.service", err.to_string()),
            Error::MalformedResponse { .. } => Self::new("submit.bad_response", err.to_string()),
            Error::ProcessingStalled { .. } => Self::retryable("submit.stalled", err.to_string()),
            Error::Cancelled => Self::new("submit.cancelled", err.to_string()),
            _ => Self::new("submit.failed", err.to_string()),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e, json);
            1
        }
    };
    std::process::exit(code);
}

fn emit_error(err: &CliError, json: bool) {
    if json {
        eprintln!("{}", serde_json::json!({ "error": err }));
    } else {
        eprintln!("error [{}]: {}", err.code, err.message);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| {
            std::env::var("VIDEOSTACK_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(default_config_dir);
    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("VIDEOSTACK_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir);

    match cli.cmd {
        Command::Submit {
            secondary,
            primaries,
            output_dir,
            server,
        } => {
            submit_run(
                &config_dir,
                &data_dir,
                secondary,
                primaries,
                output_dir,
                server,
                cli.json,
                cli.events,
            )
            .await
        }
        Command::Settings { cmd } => match cmd {
            SettingsCmd::Get => settings_get(&config_dir, cli.json),
            SettingsCmd::Set => settings_set(&config_dir, cli.json),
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn submit_run(
    config_dir: &Path,
    data_dir: &Path,
    secondary: PathBuf,
    primaries: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    server: Option<String>,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let base_url = server.unwrap_or(settings.server.base_url);

    let run_id = format!("sub_{}", uuid::Uuid::new_v4().simple());
    let _log_guard = start_run_log(&run_id, data_dir)
        .map_err(|e| CliError::new("log.start_failed", e.to_string()))?;
    tracing::info!(event = "run.start", app = APP_NAME, run_id = %run_id, "run.start");

    let secondary_payload = FilePayload::from_path(&secondary)
        .map_err(|e| CliError::new("io.read_failed", e.to_string()))?;
    let mut primary_payloads = Vec::with_capacity(primaries.len());
    for path in &primaries {
        let payload = FilePayload::from_path(path)
            .map_err(|e| CliError::new("io.read_failed", e.to_string()))?;
        primary_payloads.push(payload);
    }

    let mut plan = SubmissionPlan::new(secondary_payload, primary_payloads);
    plan.polling = PollSettings {
        interval: Duration::from_millis(settings.polling.interval_ms),
        failure_budget: settings.polling.failure_budget,
    };
    plan.secondary_clear_delay = Duration::from_millis(settings.display.secondary_clear_delay_ms);
    plan.primary_clear_delay = Duration::from_millis(settings.display.primary_clear_delay_ms);

    let service = HttpProcessingService::new(HttpProcessingServiceConfig {
        base_url: base_url.clone(),
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let sink: Box<dyn EventSink> = if events {
        Box::new(NdjsonEventSink)
    } else {
        Box::new(TextEventSink::default())
    };

    let result = run_submission_with(
        &service,
        plan,
        SubmitOptions {
            cancel: Some(&cancel),
            events: Some(sink.as_ref()),
        },
    )
    .await;

    let result = match result {
        Ok(result) => {
            tracing::info!(
                event = "run.finish",
                run_id = %run_id,
                status = "succeeded",
                job_code = %result.job_code,
                "run.finish"
            );
            result
        }
        Err(e) => {
            tracing::error!(
                event = "run.finish",
                run_id = %run_id,
                status = "failed",
                error = %e,
                "run.finish"
            );
            return Err(CliError::from_core(&e));
        }
    };

    let mut list = SummaryList::new();
    for summary in result.summaries() {
        list.push(summary);
    }

    if json {
        print_json_report(&result, &list);
    } else {
        print_text_report(&result, &list);
    }

    if let Some(dir) = output_dir {
        download_outputs(&service, &list, &dir, json).await?;
    }

    Ok(())
}

fn print_json_report(result: &SubmissionResult, list: &SummaryList) {
    let tasks: Vec<serde_json::Value> = result
        .tasks
        .iter()
        .map(|t| {
            serde_json::json!({
                "index": t.index,
                "displayName": t.display_name,
                "serverFilename": t.server_filename,
                "state": t.state.name(),
            })
        })
        .collect();
    let summaries: Vec<serde_json::Value> = list
        .entries()
        .iter()
        .map(|s| {
            serde_json::json!({
                "primaryName": s.primary_name,
                "secondaryName": s.secondary_name,
                "downloadUrl": s.download_url,
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::json!({
            "jobCode": result.job_code,
            "tasks": tasks,
            "summaries": summaries,
            "bulkControls": list.bulk_controls_visible(),
        })
    );
}

fn print_text_report(result: &SubmissionResult, list: &SummaryList) {
    println!();
    println!("job {}: {} task(s)", result.job_code, result.tasks.len());
    for summary in list.entries() {
        println!(
            "  {} + {} -> {}",
            summary.primary_name, summary.secondary_name, summary.download_url
        );
    }
    if list.bulk_controls_visible() {
        println!(
            "  {} outputs ready; pass --output-dir to download them all",
            list.len()
        );
    }
}

async fn download_outputs(
    service: &HttpProcessingService,
    list: &SummaryList,
    dir: &Path,
    json: bool,
) -> Result<(), CliError> {
    std::fs::create_dir_all(dir).map_err(|e| CliError::new("io.write_failed", e.to_string()))?;

    // One independent download per entry, in list order; no zip batching.
    let targets = list.download_targets();
    let filenames = output_filenames(&targets);
    for (url, filename) in targets.iter().copied().zip(&filenames) {
        let bytes = service
            .fetch_output(url)
            .await
            .map_err(|e| CliError::retryable("download.failed", e.to_string()))?;

        let target = dir.join(filename);
        std::fs::write(&target, bytes)
            .map_err(|e| CliError::new("io.write_failed", e.to_string()))?;

        if json {
            println!(
                "{}",
                serde_json::json!({ "downloaded": url, "path": target.display().to_string() })
            );
        } else {
            println!("downloaded {} -> {}", url, target.display());
        }
    }
    Ok(())
}

/// Local filenames for a batch of download URLs. Uses the URL basename;
/// a repeated basename gets an index prefix so entries never overwrite
/// each other in the output directory.
fn output_filenames(targets: &[&str]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    targets
        .iter()
        .enumerate()
        .map(|(i, url)| {
            let base = url
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("output.mp4");
            if seen.insert(base.to_string()) {
                base.to_string()
            } else {
                format!("{i}_{base}")
            }
        })
        .collect()
}

fn settings_get(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    if json {
        println!("{}", serde_json::json!({ "settings": settings }));
    } else {
        let text = toml::to_string(&settings)
            .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn settings_set(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    let settings: Settings =
        toml::from_str(&input).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    validate_settings(&settings)?;
    save_settings(config_dir, &settings)?;

    if json {
        println!("{}", serde_json::json!({ "settings": settings }));
    }
    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<(), CliError> {
    if settings.server.base_url.is_empty() {
        return Err(CliError::new("config.invalid", "server.base_url is empty"));
    }
    if settings.polling.interval_ms == 0 {
        return Err(CliError::new(
            "config.invalid",
            "polling.interval_ms must be >= 1",
        ));
    }
    if settings.polling.failure_budget == 0 {
        return Err(CliError::new(
            "config.invalid",
            "polling.failure_budget must be >= 1",
        ));
    }
    Ok(())
}

fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join("settings.toml")
}

fn load_settings(config_dir: &Path) -> Result<Settings, CliError> {
    let path = settings_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CliError::new("config.read_failed", e.to_string()))?;
    toml::from_str(&text).map_err(|e| CliError::new("config.invalid", e.to_string()))
}

fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), CliError> {
    std::fs::create_dir_all(config_dir)
        .map_err(|e| CliError::new("config.write_failed", e.to_string()))?;
    let text =
        toml::to_string(settings).map_err(|e| CliError::new("config.invalid", e.to_string()))?;
    std::fs::write(settings_path(config_dir), text)
        .map_err(|e| CliError::new("config.write_failed", e.to_string()))
}

fn default_config_dir() -> PathBuf {
    home_dir().join(".config").join("videostack")
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("videostack")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// NDJSON rendering of task events, one line each, for front-ends to consume.
struct NdjsonEventSink;

impl EventSink for NdjsonEventSink {
    fn on_event(&self, event: TaskEvent) {
        let line = match &event {
            TaskEvent::TaskCreated {
                index,
                display_name,
            } => serde_json::json!({
                "type": "task.created", "index": index, "displayName": display_name
            }),
            TaskEvent::UploadProgress { index, percent } => serde_json::json!({
                "type": "task.uploadProgress", "index": index, "percent": percent
            }),
            TaskEvent::UploadFailed { index, message } => serde_json::json!({
                "type": "task.uploadFailed", "index": index, "message": message
            }),
            TaskEvent::ProcessingStarted {
                index,
                server_filename,
            } => serde_json::json!({
                "type": "task.processing", "index": index, "serverFilename": server_filename
            }),
            TaskEvent::ProcessingProgress { index, raw } => serde_json::json!({
                "type": "task.processingProgress", "index": index, "progress": raw
            }),
            TaskEvent::ProcessingFailed { index, message } => serde_json::json!({
                "type": "task.processingFailed", "index": index, "message": message
            }),
            TaskEvent::TaskCompleted { index, summary } => serde_json::json!({
                "type": "task.completed",
                "index": index,
                "primaryName": summary.primary_name,
                "secondaryName": summary.secondary_name,
                "downloadUrl": summary.download_url,
            }),
            TaskEvent::TaskCleared { index } => serde_json::json!({
                "type": "task.cleared", "index": index
            }),
        };
        println!("{line}");
    }
}

/// Human rendering; mirrors the status strings of the original upload page.
#[derive(Default)]
struct TextEventSink {
    names: Mutex<HashMap<usize, String>>,
}

impl TextEventSink {
    fn name(&self, index: usize) -> String {
        self.names
            .lock()
            .expect("event sink mutex poisoned")
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("file #{index}"))
    }
}

impl EventSink for TextEventSink {
    fn on_event(&self, event: TaskEvent) {
        match event {
            TaskEvent::TaskCreated {
                index,
                display_name,
            } => {
                self.names
                    .lock()
                    .expect("event sink mutex poisoned")
                    .insert(index, display_name);
            }
            TaskEvent::UploadProgress { index, percent } => {
                println!("Uploading {}: {percent}%", self.name(index));
            }
            TaskEvent::UploadFailed { index, .. } => {
                println!("Upload failed for {}.", self.name(index));
            }
            TaskEvent::ProcessingStarted { index, .. } => {
                println!("Upload complete for {}, processing...", self.name(index));
            }
            TaskEvent::ProcessingProgress { index, raw } => {
                println!("Processing {}: {raw}%", self.name(index));
            }
            TaskEvent::ProcessingFailed { index, message } => {
                println!("Processing failed for {}: {message}", self.name(index));
            }
            TaskEvent::TaskCompleted { index, .. } => {
                println!("{} processing complete!", self.name(index));
            }
            TaskEvent::TaskCleared { .. } => {}
        }
    }
}
