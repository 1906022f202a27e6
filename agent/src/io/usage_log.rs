//! Durable usage summary under `<log_dir>/usage.log`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::core::usage::UsageTracker;
use crate::io::audit_log::append_text;

#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the run's elapsed seconds and token total. Called once, at clean shutdown.
    pub fn finalize(&self, tracker: &UsageTracker) -> Result<()> {
        let line = tracker.summary_line();
        info!(path = %self.path.display(), summary = %line, "writing usage summary");
        append_text(&self.path, &format!("{line}\n"))
    }
}
