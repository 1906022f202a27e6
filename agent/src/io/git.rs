//! Git adapter for cloning target repositories.
//!
//! Clones are shallow (`--depth 1`) and fetch every branch.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Abstraction over repository checkout backends.
pub trait RepoCloner {
    /// Clone `url` into `dest`. `dest` does not exist when this is called.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}

impl<T: RepoCloner + ?Sized> RepoCloner for &T {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        (**self).clone_repo(url, dest)
    }
}

/// Cloner that spawns `git clone`.
#[derive(Debug, Clone)]
pub struct GitCloner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl GitCloner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl RepoCloner for GitCloner {
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth", "1", "--no-single-branch"])
            .arg(url)
            .arg(dest);

        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)?;
        if !output.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "git clone failed");
            return Err(anyhow!("git clone {url} failed: {}", stderr.trim()));
        }
        debug!("clone completed");
        Ok(())
    }
}

/// Directory name for a clone: the last non-empty path segment of the URL.
pub fn repo_dir_name(url: &str) -> Result<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .ok_or_else(|| anyhow!("cannot derive a directory name from url '{url}'"))
}
