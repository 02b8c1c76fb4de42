//! Terminal progress display.
//!
//! Every task owns one line, in input order. The whole block is redrawn in
//! place once per refresh period from task snapshots.
use std::io;
use std::sync::Arc;
use std::time::Duration;

use console::Term;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::downloader::DownloadTask;
use crate::format::{fit_to_width, human_readable_size, visible_width};
use crate::models::TaskSnapshot;

/// Display settings for the progress block.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub refresh: Duration,
    /// Columns reserved for the file name at the start of each line.
    pub name_width: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(1),
            name_width: 20,
        }
    }
}

/// Formats one progress line. `None` stands for a task that could not be created.
///
/// With a known terminal width the line is padded or cut to exactly that many
/// columns, so redrawing over a longer previous line leaves nothing behind.
pub fn render_line(snapshot: Option<&TaskSnapshot>, width: Option<usize>, name_width: usize) -> String {
    let line = match snapshot {
        Some(snapshot) => describe(snapshot, width, name_width),
        None => "Error: invalid url".to_string(),
    };

    match width {
        Some(width) => fit_to_width(&line, width),
        None => line,
    }
}

fn describe(snapshot: &TaskSnapshot, width: Option<usize>, name_width: usize) -> String {
    if let Some(error) = &snapshot.error {
        return if snapshot.file_name.is_empty() {
            format!("Error: {}", error)
        } else {
            format!("{}: Error: {}", snapshot.file_name, error)
        };
    }

    if snapshot.bytes_read == 0 && !snapshot.finished {
        return "Waiting...".to_string();
    }

    let name = fit_to_width(&snapshot.file_name, name_width);
    let Some(ratio) = snapshot.progress() else {
        return format!("{}|{}", name, human_readable_size(snapshot.bytes_read));
    };

    let size = format!("|{}", human_readable_size(snapshot.total_size));
    let speed = format!("{}|{}/s", snapshot.eta, snapshot.speed);

    match width {
        Some(width) => {
            let used = visible_width(&size) + visible_width(&speed) + name_width;
            let bar_len = width.saturating_sub(used);
            if bar_len > 4 {
                format!("{}{}[{}]{}", name, size, progress_bar(bar_len - 2, ratio), speed)
            } else {
                format!("{}{}{}", name, size, speed)
            }
        }
        None => format!("{}{}|{:.2}%{}", name, size, ratio * 100.0, speed),
    }
}

/// `===>    ` style bar exactly `len` columns wide.
fn progress_bar(len: usize, ratio: f64) -> String {
    let filled = (len as f64 * ratio) as usize;
    if filled >= len {
        "=".repeat(len)
    } else {
        format!("{}>{}", "=".repeat(filled), " ".repeat(len - filled - 1))
    }
}

/// Redraws the progress block on stdout.
pub struct ProgressRenderer {
    term: Term,
    options: RenderOptions,
    lines_drawn: usize,
}

impl ProgressRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            term: Term::stdout(),
            options,
            lines_drawn: 0,
        }
    }

    /// Terminal width, when stdout is a terminal.
    fn width(&self) -> Option<usize> {
        if !self.term.is_term() {
            return None;
        }
        self.term.size_checked().map(|(_, cols)| cols as usize)
    }

    /// Replaces the previously drawn block with the current state.
    pub fn draw(&mut self, tasks: &[Option<Arc<DownloadTask>>]) -> io::Result<()> {
        let width = self.width();
        if self.lines_drawn > 0 && self.term.is_term() {
            self.term.clear_last_lines(self.lines_drawn)?;
        }

        for slot in tasks {
            let snapshot = slot.as_ref().map(|task| task.snapshot());
            self.term
                .write_line(&render_line(snapshot.as_ref(), width, self.options.name_width))?;
        }
        self.lines_drawn = tasks.len();
        Ok(())
    }

    /// Repaints every refresh period until `shutdown` fires, then draws once more.
    ///
    /// When stdout is not a terminal only the final state is printed.
    pub async fn run(mut self, tasks: Arc<[Option<Arc<DownloadTask>>]>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.refresh);
        let interactive = self.term.is_term();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if interactive {
                        if let Err(e) = self.draw(&tasks) {
                            warn!("Failed to draw progress: {}", e);
                        }
                    }
                }
            }
        }

        if let Err(e) = self.draw(&tasks) {
            warn!("Failed to draw progress: {}", e);
        }
    }
}
