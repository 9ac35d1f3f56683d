//! The download pipeline: mirror failover, resumable transfers,
//! cooperative pause and staged extraction
//!
//! One run walks the mirror list in order. Per mirror: a lenient HEAD probe
//! learns the size and a suggested filename, the on-disk temp file decides
//! between a fresh GET, a ranged GET and skipping the body entirely, and the
//! byte stream flows through a pause-aware, rate-limited progress loop into
//! the version folder. Archives then unpack through the staging dance in
//! [`crate::extract`].
//!
//! Every emitted event is persisted to the metadata sidecar before it
//! reaches the subscriber sink, so a restart observes the last transition.

use crate::extract;
use crate::filename;
use crate::limiter::RateLimiter;
use crate::meta::MetadataStore;
use crate::{Error, Result};
use futures_util::StreamExt;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tooldock_core::{DownloadProgress, DownloadStatus, InstallKey, ProgressSink, USER_AGENT};

/// Floor between `downloading` emissions
const EMIT_INTERVAL: Duration = Duration::from_millis(500);

/// One download to perform
pub struct DownloadJob<'a> {
    pub key: &'a InstallKey,
    /// Ordered mirror list
    pub urls: &'a [String],
    /// Final version folder under the writable root
    pub folder: &'a Path,
    /// Staging folder for archive extraction
    pub staging: &'a Path,
    /// Cooperative pause flag, sampled before every read
    pub pause: Arc<AtomicBool>,
    /// Bytes/sec; 0 disables limiting
    pub limit_bps: u64,
}

/// Per-attempt event template
struct Attempt {
    index: u32,
    total: u32,
    url: String,
    failed_urls: Vec<String>,
    all_urls: Vec<String>,
}

impl Attempt {
    fn progress(&self, status: DownloadStatus) -> DownloadProgress {
        DownloadProgress {
            status,
            attempt_index: self.index,
            total_attempts: self.total,
            current_url: self.url.clone(),
            failed_urls: self.failed_urls.clone(),
            all_urls: self.all_urls.clone(),
            ..Default::default()
        }
    }
}

/// Persists each event, then forwards it to the subscriber sink
struct Emitter<'a> {
    key: &'a InstallKey,
    meta: &'a MetadataStore,
    sink: &'a dyn ProgressSink,
}

impl Emitter<'_> {
    async fn emit(&self, progress: DownloadProgress) {
        if let Err(error) = self.meta.record_progress(self.key, &progress) {
            tracing::warn!(key = %self.key, %error, "failed to persist download state");
        }
        self.sink.emit(progress.message(self.key)).await;
    }
}

/// HTTP download engine
pub struct DownloadEngine {
    client: reqwest::Client,
}

impl DownloadEngine {
    /// Create an engine with a default client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    /// Create an engine over an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The shared HTTP client (also used by the reverse proxy)
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Run the full attempt loop for a job
    ///
    /// Returns `Ok(())` when an artifact is in place, `Err(Paused)` when the
    /// cooperative pause flag stopped the transfer, and any other error when
    /// every mirror failed (a `failed` event has been emitted by then).
    pub async fn run(
        &self,
        job: &DownloadJob<'_>,
        meta: &MetadataStore,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        let emitter = Emitter {
            key: job.key,
            meta,
            sink,
        };
        let all_urls: Vec<String> = job.urls.to_vec();
        let total = all_urls.len() as u32;
        let mut failed_urls: Vec<String> = Vec::new();
        let mut last_error: Option<Error> = None;

        if all_urls.is_empty() {
            let error = Error::download_failed("", "no download URLs for this platform");
            let progress = DownloadProgress {
                status: DownloadStatus::Failed,
                error: Some(error.to_string()),
                ..Default::default()
            };
            emitter.emit(progress).await;
            return Err(error);
        }

        for (index, url) in all_urls.iter().enumerate() {
            let attempt = Attempt {
                index: index as u32 + 1,
                total,
                url: url.clone(),
                failed_urls: failed_urls.clone(),
                all_urls: all_urls.clone(),
            };
            emitter.emit(attempt.progress(DownloadStatus::Trying)).await;

            match self.attempt(job, &attempt, &emitter).await {
                Ok(()) => return Ok(()),
                Err(Error::Paused) => return Err(Error::Paused),
                Err(error @ Error::ExtractionFailed { .. }) => {
                    // A corrupt extraction aborts the install outright:
                    // staging has been cleaned and nothing was committed
                    let mut progress = attempt.progress(DownloadStatus::Failed);
                    progress.error = Some(error.to_string());
                    emitter.emit(progress).await;
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(key = %job.key, %url, %error, "mirror attempt failed");
                    failed_urls.push(url.clone());
                    last_error = Some(error);
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| Error::download_failed("", "all mirrors failed"));
        let progress = DownloadProgress {
            status: DownloadStatus::Failed,
            attempt_index: total,
            total_attempts: total,
            current_url: all_urls.last().cloned().unwrap_or_default(),
            failed_urls,
            all_urls,
            error: Some(error.to_string()),
            ..Default::default()
        };
        emitter.emit(progress).await;
        Err(error)
    }

    /// One mirror attempt: probe, transfer, extract
    async fn attempt(
        &self,
        job: &DownloadJob<'_>,
        attempt: &Attempt,
        emitter: &Emitter<'_>,
    ) -> Result<()> {
        let (server_size, disposition) = self.head_probe(&attempt.url).await;
        let file_name = filename::resolve(disposition.as_deref(), &attempt.url);

        std::fs::create_dir_all(job.folder)?;
        let temp = job.folder.join(&file_name);
        let mut local_size = file_len(&temp);

        if server_size > 0 && local_size > server_size {
            // Local truth defers to remote truth: an oversized temp file is
            // a leftover from some other payload
            tracing::warn!(
                key = %job.key,
                local = local_size,
                server = server_size,
                "temp file exceeds server size, restarting from scratch"
            );
            std::fs::remove_file(&temp)?;
            local_size = 0;
        }

        let complete = server_size > 0 && local_size == server_size;
        if !complete {
            self.fetch(job, attempt, &temp, local_size, server_size, emitter)
                .await?;
        }

        if extract::is_archive(&file_name) {
            let size = file_len(&temp);
            let mut progress = attempt.progress(DownloadStatus::Extracting);
            progress.total_bytes = size;
            progress.downloaded_bytes = size;
            emitter.emit(progress).await;

            extract::extract_staged(&temp, job.folder, job.staging)
                .map_err(|error| match error {
                    Error::ExtractionFailed { .. } => error,
                    other => Error::extraction_failed(&temp, other.to_string()),
                })?;
            // The archive vanished with the replaced folder; make sure
            let _ = std::fs::remove_file(&temp);
        }

        Ok(())
    }

    /// Transfer the body into `temp`, resuming from `resume_from` when
    /// non-zero
    async fn fetch(
        &self,
        job: &DownloadJob<'_>,
        attempt: &Attempt,
        temp: &Path,
        resume_from: u64,
        server_size: u64,
        emitter: &Emitter<'_>,
    ) -> Result<()> {
        let mut request = self.client.get(&attempt.url);
        if resume_from > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", resume_from));
        }
        let response = request
            .send()
            .await
            .map_err(|error| Error::download_failed(&attempt.url, error.to_string()))?;

        let status = response.status().as_u16();
        let (mut file, mut downloaded, total_bytes) = match status {
            200 => {
                let total = response.content_length().unwrap_or(server_size);
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(temp)?;
                (file, 0u64, total)
            }
            206 => {
                let total = response
                    .content_length()
                    .map(|length| resume_from + length)
                    .unwrap_or_else(|| server_size.max(resume_from));
                let file = std::fs::OpenOptions::new().create(true).append(true).open(temp)?;
                (file, resume_from, total)
            }
            416 => {
                // The range start equals the full size when the file is
                // already complete; confirm with a fresh HEAD
                let (head_size, _) = self.head_probe(&attempt.url).await;
                if head_size > 0 && head_size == resume_from {
                    return Ok(());
                }
                return Err(Error::download_failed(&attempt.url, "HTTP 416 Range Not Satisfiable"));
            }
            code => {
                return Err(Error::download_failed(&attempt.url, format!("HTTP {}", code)));
            }
        };

        let mut stream = response.bytes_stream();
        let mut limiter = RateLimiter::new(job.limit_bps);
        let mut last_emit = Instant::now();
        let mut bytes_at_last_emit = downloaded;
        let mut emitted_any = false;

        loop {
            // Cooperative pause, sampled before every read
            if job.pause.load(Ordering::Relaxed) {
                let mut progress = attempt.progress(DownloadStatus::Paused);
                progress.total_bytes = total_bytes.max(downloaded);
                progress.downloaded_bytes = downloaded;
                emitter.emit(progress).await;
                return Err(Error::Paused);
            }

            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk
                .map_err(|error| Error::download_failed(&attempt.url, format!("stream error: {}", error)))?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            limiter.throttle(chunk.len()).await;

            let elapsed = last_emit.elapsed();
            if !emitted_any || elapsed >= EMIT_INTERVAL {
                let speed = (downloaded - bytes_at_last_emit) as f64
                    / elapsed.as_secs_f64().max(0.001);
                let mut progress = attempt.progress(DownloadStatus::Downloading);
                progress.total_bytes = total_bytes.max(downloaded);
                progress.downloaded_bytes = downloaded;
                progress.speed_bytes_per_sec = speed as u64;
                emitter.emit(progress).await;
                last_emit = Instant::now();
                bytes_at_last_emit = downloaded;
                emitted_any = true;
            }
        }

        file.flush()?;
        Ok(())
    }

    /// Lenient HEAD probe: size 0 and no filename on any failure, the GET
    /// still gets its chance
    async fn head_probe(&self, url: &str) -> (u64, Option<String>) {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(0);
                let disposition = response
                    .headers()
                    .get(reqwest::header::CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .map(String::from);
                (size, disposition)
            }
            Ok(response) => {
                tracing::debug!(%url, status = %response.status(), "HEAD probe rejected");
                (0, None)
            }
            Err(error) => {
                tracing::debug!(%url, %error, "HEAD probe failed");
                (0, None)
            }
        }
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}
