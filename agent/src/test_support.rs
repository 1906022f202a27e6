//! Scripted doubles and a loop harness for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::actions::{Backends, standard_registry};
use crate::core::chunk::TextSplitter;
use crate::core::history::History;
use crate::core::types::{Message, Params};
use crate::io::audit_log::AuditLog;
use crate::io::docker::{BuildReport, ImageBuilder};
use crate::io::git::RepoCloner;
use crate::io::human::{Confirm, DEFAULT_ANSWER};
use crate::io::llm::{ModelBackend, ModelReply};
use crate::io::qdrant::{SearchHit, VectorIndex};
use crate::io::usage_log::UsageLog;
use crate::looping::{ControlLoop, LoopEvent, LoopOutcome, LoopParts};

/// Single-line directive as the model would send it.
pub fn directive(action: &str, params: Value, comment: &str) -> String {
    json!({"action": action, "params": params, "comment": comment}).to_string()
}

/// Reply whose metadata reports `total_tokens` the way the chat endpoint does.
pub fn reply_with_usage(content: impl Into<String>, total_tokens: u64) -> ModelReply {
    ModelReply::text(content).with_metadata(json!({"usage": {"total_tokens": total_tokens}}))
}

/// Model backend that replays queued replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ModelReply>>,
    requests: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Replies without usage metadata (token counts are estimated).
    pub fn texts<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(ModelReply::text))
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl ModelBackend for ScriptedModel {
    fn complete(&self, messages: &[Message]) -> Result<ModelReply> {
        self.requests.borrow_mut().push(messages.to_vec());
        match self.replies.borrow_mut().pop_front() {
            Some(reply) => Ok(reply),
            None => bail!("scripted model has no more replies"),
        }
    }
}

/// Human double answering from a queue; answers `n` once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| DEFAULT_ANSWER.to_string()))
    }
}

/// Image builder that succeeds or fails per queued outcome.
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    outcomes: RefCell<VecDeque<bool>>,
    dockerfiles: RefCell<Vec<String>>,
}

impl ScriptedBuilder {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            dockerfiles: RefCell::new(Vec::new()),
        }
    }

    /// Dockerfiles received, in call order.
    pub fn dockerfiles(&self) -> Vec<String> {
        self.dockerfiles.borrow().clone()
    }
}

impl ImageBuilder for ScriptedBuilder {
    fn build(&self, _host: &str, dockerfile: &str, tag: &str) -> Result<BuildReport> {
        self.dockerfiles.borrow_mut().push(dockerfile.to_string());
        let Some(success) = self.outcomes.borrow_mut().pop_front() else {
            bail!("scripted builder has no more outcomes");
        };
        let log = if success {
            format!("Successfully tagged {tag}:latest")
        } else {
            "ERROR: failed to solve: process \"/bin/sh -c make\" did not complete".to_string()
        };
        Ok(BuildReport { success, log })
    }
}

/// Cloner that fabricates a tiny checkout instead of running git.
#[derive(Debug, Default)]
pub struct FakeCloner {
    urls: RefCell<Vec<String>>,
}

impl FakeCloner {
    pub fn urls(&self) -> Vec<String> {
        self.urls.borrow().clone()
    }
}

impl RepoCloner for FakeCloner {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest.join("src")).with_context(|| format!("create {}", dest.display()))?;
        fs::write(dest.join("Cargo.toml"), "[package]\nname = \"demo\"\n")?;
        fs::write(dest.join("src/main.rs"), "fn main() {}\n")?;
        self.urls.borrow_mut().push(url.to_string());
        Ok(())
    }
}

/// Vector index kept in memory; search is a substring match.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    splitter: TextSplitter,
    chunks: RefCell<Vec<String>>,
}

impl InMemoryIndex {
    pub fn chunks(&self) -> Vec<String> {
        self.chunks.borrow().clone()
    }
}

impl VectorIndex for InMemoryIndex {
    fn ingest(&self, _url: &str, _collection: &str, text: &str) -> Result<usize> {
        let chunks = self.splitter.split(text);
        let count = chunks.len();
        self.chunks.borrow_mut().extend(chunks);
        Ok(count)
    }

    fn search(
        &self,
        _url: &str,
        _collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(self
            .chunks
            .borrow()
            .iter()
            .filter(|chunk| chunk.contains(query))
            .take(limit)
            .map(|chunk| SearchHit {
                score: 1.0,
                text: chunk.clone(),
            })
            .collect())
    }
}

/// What a harness run left behind.
#[derive(Debug)]
pub struct HarnessRun {
    pub outcome: LoopOutcome,
    pub events: Vec<LoopEvent>,
    pub history: History,
    pub consecutive_failures: u32,
    pub tokens: u64,
}

/// A control loop wired to scripted doubles and a temporary workspace.
pub struct TestHarness {
    temp: TempDir,
    pub model: ScriptedModel,
    pub human: ScriptedConfirm,
    pub builder: ScriptedBuilder,
    pub cloner: FakeCloner,
    pub index: InMemoryIndex,
    pub token_quota: u64,
    pub max_build_failures: u32,
}

impl TestHarness {
    pub fn new(model: ScriptedModel) -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir().context("create harness dir")?,
            model,
            human: ScriptedConfirm::default(),
            builder: ScriptedBuilder::default(),
            cloner: FakeCloner::default(),
            index: InMemoryIndex::default(),
            token_quota: 10_000,
            max_build_failures: 3,
        })
    }

    pub fn with_human(mut self, human: ScriptedConfirm) -> Self {
        self.human = human;
        self
    }

    pub fn with_builder(mut self, builder: ScriptedBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_token_quota(mut self, token_quota: u64) -> Self {
        self.token_quota = token_quota;
        self
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root().join("workspace")
    }

    pub fn actions_log(&self) -> PathBuf {
        self.root().join("logs/actions.log")
    }

    pub fn usage_log(&self) -> PathBuf {
        self.root().join("logs/usage.log")
    }

    /// Connection settings merged into every invocation.
    pub fn shared(&self) -> Params {
        let mut shared = Params::new();
        shared.insert("docker_host".into(), json!("tcp://dind:2375"));
        shared.insert("qdrant_url".into(), json!("http://qdrant:6333"));
        shared.insert("collection".into(), json!("hello-build-agent"));
        shared
    }

    /// Run the loop from a history seeded with `system` and `repo_url`.
    pub fn run(&self, repo_url: &str) -> Result<HarnessRun> {
        let registry = standard_registry(
            Backends {
                model: &self.model,
                cloner: &self.cloner,
                index: &self.index,
                builder: &self.builder,
                human: &self.human,
            },
            &self.workspace_dir(),
        )?;
        let mut control = ControlLoop::new(
            LoopParts {
                model: &self.model,
                human: &self.human,
                registry,
                audit: AuditLog::new(self.actions_log()),
                usage_log: UsageLog::new(self.usage_log()),
                shared: self.shared(),
                token_quota: self.token_quota,
                max_build_failures: self.max_build_failures,
            },
            History::seeded("system prompt", repo_url),
        )?;

        let mut events = Vec::new();
        let outcome = control.run(|event| events.push(event.clone()))?;
        Ok(HarnessRun {
            outcome,
            events,
            history: control.history().clone(),
            consecutive_failures: control.failures().consecutive(),
            tokens: control.usage().tokens(),
        })
    }
}
