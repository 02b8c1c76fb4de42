//! # grab
//!
//! Concurrent HTTP(S) file downloads with a live terminal display.
//!
//! - one task per URL, all running in parallel
//! - resume of partial files through `Range` requests
//! - per-URL bandwidth limits (`"<KB/s>:<url>"`)
//! - custom request headers

pub mod cli;
pub mod downloader;
pub mod filename;
pub mod format;
pub mod limiter;
pub mod manager;
pub mod models;
pub mod render;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::downloader::{DownloadError, DownloadOptions, DownloadTask};
    pub use crate::limiter::RateLimiter;
    pub use crate::manager::{DownloadManager, ManagerError};
    pub use crate::models::TaskSnapshot;
    pub use crate::render::{ProgressRenderer, RenderOptions};
}
