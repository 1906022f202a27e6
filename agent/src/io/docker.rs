//! Container image builds through the `docker` CLI.

use std::fs;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Outcome of one image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub success: bool,
    /// Captured build output (stdout then stderr).
    pub log: String,
}

/// Abstraction over image build backends.
pub trait ImageBuilder {
    /// Build `dockerfile` against the daemon at `host`. `Err` means the build could not run
    /// at all; a failing build is `Ok` with `success == false`.
    fn build(&self, host: &str, dockerfile: &str, tag: &str) -> Result<BuildReport>;
}

impl<T: ImageBuilder + ?Sized> ImageBuilder for &T {
    fn build(&self, host: &str, dockerfile: &str, tag: &str) -> Result<BuildReport> {
        (**self).build(host, dockerfile, tag)
    }
}

/// Builder that spawns `docker -H <host> build` on a temporary context directory.
#[derive(Debug, Clone)]
pub struct DockerCliBuilder {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl DockerCliBuilder {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl ImageBuilder for DockerCliBuilder {
    #[instrument(skip_all, fields(host = %host, tag = %tag))]
    fn build(&self, host: &str, dockerfile: &str, tag: &str) -> Result<BuildReport> {
        let context_dir = tempfile::tempdir().context("create build context")?;
        let dockerfile_path = context_dir.path().join("Dockerfile");
        fs::write(&dockerfile_path, dockerfile)
            .with_context(|| format!("write {}", dockerfile_path.display()))?;

        let mut cmd = Command::new("docker");
        cmd.arg("-H")
            .arg(host)
            .args(["build", "--rm", "-t", tag])
            .arg(context_dir.path());

        info!("starting docker build");
        let output = run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .context("run docker build")?;
        let success = output.success();
        if success {
            debug!("docker build succeeded");
        } else {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "docker build failed");
        }
        Ok(BuildReport {
            success,
            log: output.combined_text(),
        })
    }
}
