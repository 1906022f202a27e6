//! Agent configuration: TOML file, then environment/flag overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::core::failure_guard::DEFAULT_MAX_BUILD_FAILURES;
use crate::core::types::Params;
use crate::core::usage::DEFAULT_TOKEN_QUOTA;

pub const DEFAULT_CONFIG_FILE: &str = "build-agent.toml";

/// Agent configuration (TOML).
///
/// Missing fields fall back to the defaults of the containerised deployment
/// (docker-in-docker and qdrant reachable by service name).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Container build service endpoint, passed to `docker -H`.
    pub docker_host: String,
    /// Qdrant REST endpoint.
    pub qdrant_url: String,
    /// Qdrant collection holding indexed chunks.
    pub collection: String,

    /// Chat model driving the loop.
    pub model: String,
    pub embedding_model: String,
    /// OpenAI-compatible API base (chat and embeddings).
    pub openai_base_url: String,
    pub temperature: f32,

    /// Consecutive failed builds before asking a human.
    pub max_build_failures: u32,
    /// Token total above which the loop asks a human.
    pub token_quota: u64,

    /// Directory repositories are cloned into.
    pub workspace_dir: PathBuf,
    /// Directory holding `actions.log` and `usage.log`.
    pub log_dir: PathBuf,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub request_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Truncate captured subprocess output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            docker_host: "tcp://dind:2375".to_string(),
            qdrant_url: "http://qdrant:6333".to_string(),
            collection: "hello-build-agent".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.2,
            max_build_failures: DEFAULT_MAX_BUILD_FAILURES,
            token_quota: DEFAULT_TOKEN_QUOTA,
            workspace_dir: PathBuf::from("/workspace"),
            log_dir: PathBuf::from("/build_logs"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            request_timeout_secs: 120,
            build_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Values supplied by flags or environment; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub docker_host: Option<String>,
    pub qdrant_url: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub max_build_failures: Option<u32>,
    pub token_quota: Option<u64>,
    pub workspace_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("docker_host", &self.docker_host),
            ("qdrant_url", &self.qdrant_url),
            ("collection", &self.collection),
            ("model", &self.model),
            ("embedding_model", &self.embedding_model),
            ("openai_base_url", &self.openai_base_url),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if self.max_build_failures == 0 {
            return Err(anyhow!("max_build_failures must be > 0"));
        }
        if self.token_quota == 0 {
            return Err(anyhow!("token_quota must be > 0"));
        }
        if self.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be > 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(anyhow!("chunk_overlap must be smaller than chunk_size"));
        }
        if self.request_timeout_secs == 0 || self.build_timeout_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// Apply flag/environment overrides on top of file values, then re-validate.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(value) = &overrides.docker_host {
            self.docker_host = value.clone();
        }
        if let Some(value) = &overrides.qdrant_url {
            self.qdrant_url = value.clone();
        }
        if let Some(value) = &overrides.model {
            self.model = value.clone();
        }
        if let Some(value) = &overrides.embedding_model {
            self.embedding_model = value.clone();
        }
        if let Some(value) = &overrides.openai_base_url {
            self.openai_base_url = value.clone();
        }
        if let Some(value) = overrides.max_build_failures {
            self.max_build_failures = value;
        }
        if let Some(value) = overrides.token_quota {
            self.token_quota = value;
        }
        if let Some(value) = &overrides.workspace_dir {
            self.workspace_dir = value.clone();
        }
        if let Some(value) = &overrides.log_dir {
            self.log_dir = value.clone();
        }
        self.validate()?;
        Ok(self)
    }

    /// Connection settings injected into every handler invocation.
    ///
    /// These keys win over model-supplied params of the same name.
    pub fn shared_context(&self) -> Params {
        let mut shared = Params::new();
        shared.insert("docker_host".into(), Value::from(self.docker_host.clone()));
        shared.insert("qdrant_url".into(), Value::from(self.qdrant_url.clone()));
        shared.insert("collection".into(), Value::from(self.collection.clone()));
        shared
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn actions_log_path(&self) -> PathBuf {
        self.log_dir.join("actions.log")
    }

    pub fn usage_log_path(&self) -> PathBuf {
        self.log_dir.join("usage.log")
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
