// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use grab::cli::{parse_headers, Args};
use grab::prelude::*;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they do not fight with the progress block on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.urls.is_empty() {
        Args::command().print_help()?;
        return Ok(());
    }

    let headers = parse_headers(&args.headers);
    let options = DownloadOptions {
        directory: args.dir,
        ..DownloadOptions::default()
    };

    let manager = DownloadManager::new(&args.urls, headers, options, RenderOptions::default())
        .context("failed to set up downloads")?;
    manager.run().await;

    let failures = manager.failures();
    if failures > 0 {
        warn!("{} of {} downloads did not complete", failures, manager.tasks().len());
    }

    println!("Download completed.");
    Ok(())
}
