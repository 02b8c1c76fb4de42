use std::io::SeekFrom;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::extract_rate_limit;
use crate::filename::extract_filename;
use crate::format::{duration_to_string, human_readable_size};
use crate::limiter::RateLimiter;
use crate::models::TaskSnapshot;

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed with status: {0}")]
    Status(StatusCode),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unable to determine filename")]
    MissingFilename,
    #[error("file already downloaded")]
    AlreadyDownloaded,
    #[error("short write: {0}")]
    ShortWrite(#[source] std::io::Error),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Options shared by every task of a run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Directory the files are written into.
    pub directory: PathBuf,
    /// Upper bound for a single body read.
    pub buffer_size: usize,
    /// How often the throughput is recomputed.
    pub sample_period: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            buffer_size: 32 * 1024,
            sample_period: Duration::from_secs(1),
        }
    }
}

/// One URL downloaded to one file.
///
/// A task is shared behind an `Arc`: the transfer loop is the only writer of
/// the progress fields, while the renderer and orchestrator read them at any
/// time. Once [`DownloadTask::wait`] returns, every field is final.
#[derive(Debug)]
pub struct DownloadTask {
    client: Client,
    url: Url,
    headers: HeaderMap,
    options: DownloadOptions,
    /// Bytes per second, 0 when unlimited.
    rate_limit: u64,
    file_name: OnceLock<String>,
    bytes_read: AtomicU64,
    /// 0 when the server did not announce a length.
    total_size: AtomicU64,
    bytes_per_second: Mutex<f64>,
    resumable: AtomicBool,
    started_at: OnceLock<Instant>,
    finished_at: OnceLock<Instant>,
    /// `Ok(())` is a clean end of stream.
    outcome: OnceLock<Result<(), DownloadError>>,
    done: CancellationToken,
}

impl DownloadTask {
    /// Creates a task from a raw command-line URL.
    ///
    /// An optional `"<limit>:"` prefix sets a KB/s ceiling. A prefix that is
    /// not a number is left in place and the whole string is used as the URL.
    pub fn new(
        raw_url: &str,
        headers: HeaderMap,
        client: Client,
        options: DownloadOptions,
    ) -> Result<Self, DownloadError> {
        let (limit_kb, url) = extract_rate_limit(raw_url);
        let url = Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;

        Ok(Self {
            client,
            url,
            headers,
            options,
            rate_limit: RateLimiter::from_kilobytes(limit_kb).limit(),
            file_name: OnceLock::new(),
            bytes_read: AtomicU64::new(0),
            total_size: AtomicU64::new(0),
            bytes_per_second: Mutex::new(0.0),
            resumable: AtomicBool::new(false),
            started_at: OnceLock::new(),
            finished_at: OnceLock::new(),
            outcome: OnceLock::new(),
            done: CancellationToken::new(),
        })
    }

    /// Runs the download to completion and fires the completion signal.
    ///
    /// The transfer runs in its own tokio task, so a panic inside it is
    /// recorded as [`DownloadError::Panicked`] instead of escaping.
    pub async fn start(self: Arc<Self>) {
        let transfer = Arc::clone(&self).transfer();
        self.run_guarded(transfer).await;
    }

    /// Drives `work` in its own tokio task and records whatever it ends with,
    /// a panic included, before firing the completion signal.
    async fn run_guarded<F>(&self, work: F)
    where
        F: Future<Output = Result<(), DownloadError>> + Send + 'static,
    {
        let result = match tokio::spawn(work).await {
            Ok(result) => result,
            Err(e) => Err(DownloadError::Panicked(panic_message(e))),
        };
        self.finish(result);
    }

    /// Waits until the task has finished, whatever the outcome.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    async fn transfer(self: Arc<Self>) -> Result<(), DownloadError> {
        let mut response = self.request(None).await?;

        let name = extract_filename(response.headers(), response.url())?;
        let _ = self.file_name.set(name.clone());
        let path = self.options.directory.join(&name);

        let mut resume_from = None;
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_file() {
                let existing = metadata.len();
                if response.content_length() == Some(existing) {
                    return Err(DownloadError::AlreadyDownloaded);
                }

                drop(response);
                response = self.request(Some(existing)).await?;
                if supports_ranges(response.headers()) {
                    info!("Resuming {} from byte {}", name, existing);
                    resume_from = Some(existing);
                } else {
                    info!("Server ignored the range request, overwriting {}", name);
                }
            }
        }

        let mut file = self.open_destination(&path, resume_from).await?;

        let total = match (response.content_length(), resume_from) {
            (Some(len), Some(offset)) if len > 0 => len + offset,
            (Some(len), _) => len,
            (None, _) => 0,
        };
        self.total_size.store(total, Ordering::SeqCst);

        let _ = self.started_at.set(Instant::now());
        tokio::spawn(Arc::clone(&self).sample_speed());

        let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let mut reader = StreamReader::new(body);

        let copied = self.copy(&mut reader, &mut file).await;
        let flushed = file.flush().await.map_err(DownloadError::ShortWrite);
        copied.and(flushed)
    }

    async fn request(&self, range_from: Option<u64>) -> Result<Response, DownloadError> {
        let mut headers = self.headers.clone();
        if range_from.is_some() {
            headers.remove(RANGE);
        }

        let mut request = self.client.get(self.url.clone()).headers(headers);
        if let Some(offset) = range_from {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        debug!("GET {} (range from {:?})", self.url, range_from);
        let response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::Status(status));
        }
        Ok(response)
    }

    async fn open_destination(&self, path: &Path, resume_from: Option<u64>) -> Result<File, DownloadError> {
        let Some(offset) = resume_from else {
            return Ok(File::create(path).await?);
        };

        let mut file = OpenOptions::new().read(true).write(true).open(path).await?;
        file.seek(SeekFrom::End(0)).await?;
        self.bytes_read.store(offset, Ordering::SeqCst);
        self.resumable.store(true, Ordering::SeqCst);
        Ok(file)
    }

    /// Copies the body into `writer`, one throttled read at a time.
    ///
    /// Returns `Ok(())` at end of stream. The byte counter only moves after a
    /// chunk has been fully written.
    async fn copy<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), DownloadError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut limiter = RateLimiter::new(self.rate_limit);
        let mut buffer = vec![0u8; self.options.buffer_size.max(1)];

        loop {
            if limiter.is_enabled() {
                limiter.wait(self.bytes_read()).await;
            }

            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                return Ok(());
            }

            writer
                .write_all(&buffer[..n])
                .await
                .map_err(DownloadError::ShortWrite)?;
            self.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
        }
    }

    async fn sample_speed(self: Arc<Self>) {
        let period = self.options.sample_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_check = Instant::now();
        let mut previous = self.bytes_read();

        loop {
            tokio::select! {
                _ = self.done.cancelled() => return,
                now = ticker.tick() => {
                    let elapsed = now.duration_since(last_check).as_secs_f64();
                    last_check = now;

                    let current = self.bytes_read();
                    let downloaded = current.saturating_sub(previous);
                    previous = current;

                    if elapsed > 0.0 {
                        *self.lock_speed() = downloaded as f64 / elapsed;
                    }
                }
            }
        }
    }

    fn finish(&self, result: Result<(), DownloadError>) {
        let _ = self.finished_at.set(Instant::now());

        let label = self.file_name().unwrap_or(self.url.as_str());
        match &result {
            Ok(()) => info!("{}: finished, {} bytes", label, self.bytes_read()),
            Err(DownloadError::AlreadyDownloaded) => info!("{}: already downloaded", label),
            Err(e) => warn!("{}: {}", label, e),
        }

        if self.outcome.set(result).is_err() {
            debug!("{}: outcome was already recorded", label);
        }
        self.done.cancel();
    }

    fn lock_speed(&self) -> MutexGuard<'_, f64> {
        self.bytes_per_second.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DownloadTask {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Resolved file name, once the server has answered.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.get().map(String::as_str)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    /// Expected size in bytes, 0 if unknown.
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::SeqCst)
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Configured ceiling in bytes per second, 0 when unlimited.
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit
    }

    /// Final outcome; `None` while the task is still running.
    pub fn result(&self) -> Option<&Result<(), DownloadError>> {
        self.outcome.get()
    }

    /// The captured error, if the task ended with one.
    pub fn error(&self) -> Option<&DownloadError> {
        self.outcome.get().and_then(|result| result.as_ref().err())
    }

    /// Time spent streaming the body so far, or in total once finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = *self.started_at.get()?;
        let until = self.finished_at.get().copied().unwrap_or_else(Instant::now);
        Some(until.saturating_duration_since(started))
    }

    /// Last measured throughput in bytes per second.
    pub fn speed(&self) -> f64 {
        *self.lock_speed()
    }

    pub fn speed_string(&self) -> String {
        human_readable_size(self.speed() as u64)
    }

    /// Remaining time at the current speed, or `N/A` without a total or a speed.
    pub fn eta_string(&self) -> String {
        let speed = self.speed();
        let total = self.total_size();
        if total == 0 || speed <= 0.0 {
            return "N/A".to_string();
        }

        let remaining = total.saturating_sub(self.bytes_read());
        duration_to_string((remaining as f64 / speed) as u64)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            file_name: self.file_name().unwrap_or_default().to_string(),
            bytes_read: self.bytes_read(),
            total_size: self.total_size(),
            error: self.error().map(ToString::to_string),
            eta: self.eta_string(),
            speed: self.speed_string(),
            finished: self.is_finished(),
        }
    }
}

fn supports_ranges(headers: &HeaderMap) -> bool {
    let accepts_bytes = headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("bytes"));
    accepts_bytes || headers.contains_key(CONTENT_RANGE)
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic occurred".to_string()),
        Err(err) => err.to_string(),
    }
}
