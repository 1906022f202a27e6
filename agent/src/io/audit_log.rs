//! Append-only audit trail under `<log_dir>/actions.log`.
//!
//! Each event is written as two lines: a tab-separated summary for humans and a
//! JSON line with the full comment and params for tooling.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{Params, short_comment};

/// Local wall-clock timestamp used by every log line.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: &'a str,
    tokens: u64,
    comment: &'a str,
    action: &'a str,
    params: &'a Params,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. `tokens` is the running total at the time of the event.
    pub fn record(&self, action: &str, comment: &str, params: &Params, tokens: u64) -> Result<()> {
        let timestamp = timestamp_now();
        let summary = format!(
            "{timestamp}\t{action}\t{}\t{tokens}\t\n",
            short_comment(comment)
        );
        let record = AuditRecord {
            timestamp: &timestamp,
            tokens,
            comment,
            action,
            params,
        };
        let mut json = serde_json::to_string(&record).context("serialize audit record")?;
        json.push('\n');

        append_text(&self.path, &summary)?;
        append_text(&self.path, &json)
    }
}

/// Append `text` to `path`, creating the file and its parent directory on demand.
pub(crate) fn append_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush {}", path.display()))
}
