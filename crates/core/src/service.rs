use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Display names and download URL for one finished output, as reported by
/// `GET /details/{job}/{file}`. Field names are the wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDetails {
    pub video1: String,
    pub video2: String,
    pub out_video: String,
}

/// Client seam over the remote processing service. One method per endpoint;
/// the orchestrator never builds a request itself.
pub trait ProcessingService {
    fn endpoint(&self) -> &'static str;

    fn fetch_job_code<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Returns the stored path of the secondary file; every primary upload
    /// needs it.
    fn upload_secondary<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Returns the server-side filename used as the polling key.
    fn upload_primary<'a>(
        &'a self,
        job_code: &'a str,
        secondary_file_path: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Returns the processing percentage as the service reports it: a string,
    /// `"100"` meaning done.
    fn poll_progress<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    fn fetch_details<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OutputDetails>> + Send + 'a>>;

    /// Downloads a finished output by the URL the details response handed out.
    fn fetch_output<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct HttpProcessingServiceConfig {
    pub base_url: String,
}

pub struct HttpProcessingService {
    config: HttpProcessingServiceConfig,
    client: reqwest::Client,
}

impl HttpProcessingService {
    pub fn new(config: HttpProcessingServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Details responses hand out server-relative URLs like
    /// `/videos/out_x.mp4`; absolute URLs pass through untouched.
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.url(url)
        }
    }
}

impl ProcessingService for HttpProcessingService {
    fn endpoint(&self) -> &'static str {
        "videostack.http"
    }

    fn fetch_job_code<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(self.url("/get-job-code"))
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "get-job-code".to_string(),
                    message: format!("request failed: {e}"),
                })?;
            let parsed: JobCodeResponse = read_json("get-job-code", res).await?;
            Ok(parsed.job_code)
        })
    }

    fn upload_secondary<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
            let form = reqwest::multipart::Form::new()
                .text("job_code", job_code.to_string())
                .part("file", part);

            let res = self
                .client
                .post(self.url("/upload-secondary"))
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "upload-secondary".to_string(),
                    message: format!("request failed: {e}"),
                })?;
            let parsed: SecondaryUploadResponse = read_json("upload-secondary", res).await?;
            Ok(parsed.file_path)
        })
    }

    fn upload_primary<'a>(
        &'a self,
        job_code: &'a str,
        secondary_file_path: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
            let form = reqwest::multipart::Form::new()
                .text("secondary_file_path", secondary_file_path.to_string())
                .text("job_code", job_code.to_string())
                .part("file", part);

            let res = self
                .client
                .post(self.url("/upload"))
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "upload".to_string(),
                    message: format!("request failed: {e}"),
                })?;
            let parsed: PrimaryUploadResponse = read_json("upload", res).await?;
            Ok(parsed.file)
        })
    }

    fn poll_progress<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(self.url(&format!("/progress/{job_code}/{filename}")))
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "progress".to_string(),
                    message: format!("request failed: {e}"),
                })?;
            let parsed: ProgressResponse = read_json("progress", res).await?;
            Ok(parsed.processing_progress)
        })
    }

    fn fetch_details<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OutputDetails>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(self.url(&format!("/details/{job_code}/{filename}")))
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "details".to_string(),
                    message: format!("request failed: {e}"),
                })?;
            read_json("details", res).await
        })
    }

    fn fetch_output<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .get(self.absolute_url(url))
                .send()
                .await
                .map_err(|e| Error::Service {
                    endpoint: "download".to_string(),
                    message: format!("request failed: {e}"),
                })?;

            let status = res.status();
            let bytes = res.bytes().await.map_err(|e| Error::Service {
                endpoint: "download".to_string(),
                message: format!("read response failed: {e}"),
            })?;
            if !status.is_success() {
                return Err(Error::Service {
                    endpoint: "download".to_string(),
                    message: format!("http {status}"),
                });
            }
            Ok(bytes.to_vec())
        })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    res: reqwest::Response,
) -> Result<T> {
    let status = res.status();
    let body = res.text().await.map_err(|e| Error::Service {
        endpoint: endpoint.to_string(),
        message: format!("read response failed: {e}"),
    })?;
    decode_body(endpoint, status.is_success(), &status.to_string(), &body)
}

/// Error mapping for a finished response: non-2xx is a service failure, a
/// 2xx body that does not parse into `T` (bad json or a missing key) is a
/// malformed response.
fn decode_body<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    success: bool,
    status: &str,
    body: &str,
) -> Result<T> {
    if !success {
        return Err(Error::Service {
            endpoint: endpoint.to_string(),
            message: format!("http {status}: {body}"),
        });
    }

    serde_json::from_str(body).map_err(|e| Error::MalformedResponse {
        endpoint: endpoint.to_string(),
        message: format!("invalid json: {e}; body={body}"),
    })
}

#[derive(Debug, Deserialize)]
struct JobCodeResponse {
    job_code: String,
}

#[derive(Debug, Deserialize)]
struct SecondaryUploadResponse {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct PrimaryUploadResponse {
    file: String,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    processing_progress: String,
}

/// One scripted answer for a progress poll on the in-memory service.
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Value(String),
    Error(String),
}

impl ScriptedPoll {
    pub fn value(v: &str) -> Self {
        Self::Value(v.to_string())
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_string())
    }
}

/// Test double. Counts calls, keeps an ordered call log for sequencing
/// assertions, and answers progress polls from a per-filename script (the
/// last scripted value repeats once the script is exhausted).
#[derive(Debug, Default)]
pub struct InMemoryProcessingService {
    pub job_codes_issued: AtomicUsize,
    pub secondary_uploads: AtomicUsize,
    pub primary_uploads: AtomicUsize,
    pub progress_polls: AtomicUsize,
    pub detail_fetches: AtomicUsize,
    pub output_fetches: AtomicUsize,
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    calls: Vec<String>,
    progress_scripts: HashMap<String, VecDeque<ScriptedPoll>>,
    secondary_names: HashMap<String, String>,
    primary_names: HashMap<String, String>,
    outputs: HashMap<String, Vec<u8>>,
}

impl InMemoryProcessingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primary uploads answer with `srv_{filename}`; scripts are keyed by
    /// that server-side name.
    pub fn server_filename_for(filename: &str) -> String {
        format!("srv_{filename}")
    }

    pub async fn script_progress(&self, server_filename: &str, steps: Vec<ScriptedPoll>) {
        self.inner
            .lock()
            .await
            .progress_scripts
            .insert(server_filename.to_string(), steps.into());
    }

    pub async fn script_progress_values(&self, server_filename: &str, values: &[&str]) {
        let steps = values.iter().map(|v| ScriptedPoll::value(v)).collect();
        self.script_progress(server_filename, steps).await;
    }

    pub async fn call_log(&self) -> Vec<String> {
        self.inner.lock().await.calls.clone()
    }

    pub fn total_calls(&self) -> usize {
        self.job_codes_issued.load(Ordering::Relaxed)
            + self.secondary_uploads.load(Ordering::Relaxed)
            + self.primary_uploads.load(Ordering::Relaxed)
            + self.progress_polls.load(Ordering::Relaxed)
            + self.detail_fetches.load(Ordering::Relaxed)
            + self.output_fetches.load(Ordering::Relaxed)
    }
}

impl ProcessingService for InMemoryProcessingService {
    fn endpoint(&self) -> &'static str {
        "test.mem"
    }

    fn fetch_job_code<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.job_codes_issued.fetch_add(1, Ordering::Relaxed) + 1;
            let code = format!("job_{n:04}");
            self.inner.lock().await.calls.push("get-job-code".to_string());
            Ok(code)
        })
    }

    fn upload_secondary<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
        _bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.secondary_uploads.fetch_add(1, Ordering::Relaxed);
            let path = format!("data/{filename}");
            let mut inner = self.inner.lock().await;
            inner.calls.push(format!("upload-secondary {filename}"));
            inner
                .secondary_names
                .insert(job_code.to_string(), filename.to_string());
            Ok(path)
        })
    }

    fn upload_primary<'a>(
        &'a self,
        _job_code: &'a str,
        _secondary_file_path: &'a str,
        filename: &'a str,
        _bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.primary_uploads.fetch_add(1, Ordering::Relaxed);
            let server_name = Self::server_filename_for(filename);
            let mut inner = self.inner.lock().await;
            inner.calls.push(format!("upload {filename}"));
            inner
                .primary_names
                .insert(server_name.clone(), filename.to_string());
            Ok(server_name)
        })
    }

    fn poll_progress<'a>(
        &'a self,
        _job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.progress_polls.fetch_add(1, Ordering::Relaxed);
            let mut inner = self.inner.lock().await;
            inner.calls.push(format!("progress {filename}"));

            let step = match inner.progress_scripts.get_mut(filename) {
                // Unscripted files finish on the first poll.
                None => return Ok("100".to_string()),
                Some(script) => {
                    if script.len() > 1 {
                        script.pop_front().expect("non-empty script")
                    } else {
                        match script.front() {
                            Some(step) => step.clone(),
                            None => return Ok("100".to_string()),
                        }
                    }
                }
            };

            match step {
                ScriptedPoll::Value(v) => Ok(v),
                ScriptedPoll::Error(message) => Err(Error::Service {
                    endpoint: "progress".to_string(),
                    message,
                }),
            }
        })
    }

    fn fetch_details<'a>(
        &'a self,
        job_code: &'a str,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OutputDetails>> + Send + 'a>> {
        Box::pin(async move {
            self.detail_fetches.fetch_add(1, Ordering::Relaxed);
            let mut inner = self.inner.lock().await;
            inner.calls.push(format!("details {filename}"));

            let primary = inner
                .primary_names
                .get(filename)
                .cloned()
                .ok_or_else(|| Error::Service {
                    endpoint: "details".to_string(),
                    message: format!("unknown file: {filename}"),
                })?;
            let secondary = inner
                .secondary_names
                .get(job_code)
                .cloned()
                .unwrap_or_default();

            let out_video = format!("/videos/out_{filename}");
            inner
                .outputs
                .insert(out_video.clone(), format!("stacked:{primary}").into_bytes());

            Ok(OutputDetails {
                video1: primary,
                video2: secondary,
                out_video,
            })
        })
    }

    fn fetch_output<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.output_fetches.fetch_add(1, Ordering::Relaxed);
            let mut inner = self.inner.lock().await;
            inner.calls.push(format!("download {url}"));
            inner.outputs.get(url).cloned().ok_or_else(|| Error::Service {
                endpoint: "download".to_string(),
                message: format!("output not found: {url}"),
            })
        })
    }
}
