//! Dockerfile handlers: `generate_dockerfile`, `build` and `fix_dockerfile`.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::actions::{ActionHandler, Dispatch, HandlerContext, optional_str, required_str};
use crate::core::types::{ActionResult, Message, Params, ResultStatus, head_chars, tail_chars};
use crate::io::docker::ImageBuilder;
use crate::io::files::list_files;
use crate::io::llm::ModelBackend;
use crate::io::prompt::{DOCKERFILE_INSTRUCTION, PromptEngine};

/// Fallback used when the model synthesizes an empty Dockerfile.
pub const DEFAULT_DOCKERFILE: &str = "FROM alpine:latest\nCMD [\"echo\",\"hello\"]\n";
/// Longest file listing sent to the model for synthesis.
pub const LISTING_LIMIT_CHARS: usize = 8000;
/// Characters of build output reported back to the model.
pub const BUILD_TAIL_CHARS: usize = 400;
pub const DEFAULT_TAG: &str = "built";

/// Pass a Dockerfile through, or ask the model to write one for a checkout.
pub struct GenerateDockerfile<M> {
    model: M,
    prompts: PromptEngine,
}

impl<M: ModelBackend> GenerateDockerfile<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            prompts: PromptEngine::new(),
        }
    }

    fn synthesize(&self, repo_path: &Path) -> Result<String> {
        let listing = head_chars(&list_files(repo_path)?, LISTING_LIMIT_CHARS);
        let messages = [
            Message::system(DOCKERFILE_INSTRUCTION),
            Message::user(self.prompts.render_dockerfile_request(&listing)?),
        ];
        let reply = self.model.complete(&messages)?;
        let dockerfile = strip_code_fence(&reply.content);
        if dockerfile.is_empty() {
            warn!("model returned an empty dockerfile; using default");
            return Ok(DEFAULT_DOCKERFILE.to_string());
        }
        Ok(dockerfile.to_string())
    }
}

impl<M: ModelBackend> ActionHandler for GenerateDockerfile<M> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        if let Some(dockerfile) = optional_str(params, "dockerfile") {
            return Ok(ActionResult::ok().with("dockerfile", dockerfile).into());
        }
        let Some(repo_path) = optional_str(params, "repo_path") else {
            return Ok(ActionResult::error("need 'dockerfile' or 'repo_path'").into());
        };
        let dockerfile = self.synthesize(Path::new(repo_path))?;
        debug!(chars = dockerfile.len(), "synthesized dockerfile");
        Ok(ActionResult::ok().with("dockerfile", dockerfile).into())
    }
}

/// Drop a surrounding markdown fence (```` ```dockerfile ... ``` ````) if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Build the Dockerfile on the configured container host.
pub struct BuildImage<B> {
    builder: B,
}

impl<B: ImageBuilder> BuildImage<B> {
    pub fn new(builder: B) -> Self {
        Self { builder }
    }
}

impl<B: ImageBuilder> ActionHandler for BuildImage<B> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let dockerfile = required_str(params, "dockerfile")?;
        let host = required_str(params, "docker_host")?;
        let tag = optional_str(params, "tag").unwrap_or(DEFAULT_TAG);

        let report = self.builder.build(host, dockerfile, tag)?;
        let tail = tail_chars(&report.log, BUILD_TAIL_CHARS);
        let result = if report.success {
            ActionResult::ok().with("log_tail", tail)
        } else {
            ActionResult::error(tail)
        };
        Ok(result.into())
    }
}

/// Echo the failing Dockerfile and error so the model revises and rebuilds.
pub struct FixDockerfile;

impl ActionHandler for FixDockerfile {
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        Ok(ActionResult::ok()
            .with_status(ResultStatus::Patched)
            .with("dockerfile", optional_str(params, "dockerfile").unwrap_or_default())
            .with("error", optional_str(params, "error").unwrap_or_default())
            .into())
    }
}
