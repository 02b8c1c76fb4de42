// src/manager.rs

use crate::downloader::{DownloadError, DownloadOptions, DownloadTask};
use crate::render::{ProgressRenderer, RenderOptions};
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("cannot use output directory: {0}")]
    Directory(#[from] std::io::Error),
}

/// Owns the task set of one run: one download task per input URL.
///
/// Slots keep the input order; a URL that could not be turned into a task
/// leaves `None` in its slot so every line of the display stays in place.
pub struct DownloadManager {
    tasks: Arc<[Option<Arc<DownloadTask>>]>,
    render_options: RenderOptions,
}

impl DownloadManager {
    /// Builds the shared HTTP client and one task per URL.
    pub fn new(
        urls: &[String],
        headers: HeaderMap,
        options: DownloadOptions,
        render_options: RenderOptions,
    ) -> Result<Self, ManagerError> {
        // No timeout: a stalled transfer is only ended by the user.
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        if !options.directory.as_os_str().is_empty() {
            std::fs::create_dir_all(&options.directory)?;
        }

        let tasks = urls
            .iter()
            .map(|url| {
                match DownloadTask::new(url, headers.clone(), client.clone(), options.clone()) {
                    Ok(task) => Some(Arc::new(task)),
                    Err(e) => {
                        warn!("Skipping {}: {}", url, e);
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            tasks,
            render_options,
        })
    }

    pub fn tasks(&self) -> &[Option<Arc<DownloadTask>>] {
        &self.tasks
    }

    /// Launches every task concurrently.
    pub fn spawn_all(&self) {
        for task in self.tasks.iter().flatten() {
            debug!("Starting download of {}", task.url());
            tokio::spawn(Arc::clone(task).start());
        }
    }

    /// Waits for every task's completion signal, in input order.
    pub async fn wait_all(&self) {
        for task in self.tasks.iter().flatten() {
            task.wait().await;
        }
    }

    /// Runs all downloads with the live progress display and returns once
    /// every task has finished.
    pub async fn run(&self) {
        self.spawn_all();

        let shutdown = CancellationToken::new();
        let renderer = ProgressRenderer::new(self.render_options.clone());
        let render_handle = tokio::spawn(renderer.run(Arc::clone(&self.tasks), shutdown.clone()));

        self.wait_all().await;

        shutdown.cancel();
        if let Err(e) = render_handle.await {
            warn!("Progress display stopped unexpectedly: {}", e);
        }

        self.log_summary();
    }

    fn log_summary(&self) {
        for task in self.tasks.iter().flatten() {
            let elapsed = task.elapsed().unwrap_or_default();
            match task.result() {
                Some(Ok(())) => info!(
                    "{} -> {} ({} bytes in {:.1}s{})",
                    task.url(),
                    task.file_name().unwrap_or_default(),
                    task.bytes_read(),
                    elapsed.as_secs_f64(),
                    if task.is_resumable() { ", resumed" } else { "" }
                ),
                Some(Err(DownloadError::AlreadyDownloaded)) => {
                    info!("{} was already downloaded", task.url())
                }
                Some(Err(e)) => warn!("{} failed: {}", task.url(), e),
                None => warn!("{} did not report an outcome", task.url()),
            }
        }
    }

    /// Number of tasks that ended with an error other than "already downloaded".
    pub fn failures(&self) -> usize {
        let invalid = self.tasks.iter().filter(|slot| slot.is_none()).count();
        let failed = self
            .tasks
            .iter()
            .flatten()
            .filter(|task| !matches!(task.error(), None | Some(DownloadError::AlreadyDownloaded)))
            .count();
        invalid + failed
    }
}
