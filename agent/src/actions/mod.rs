//! Action registry and the handlers the model can invoke.
//!
//! Handlers receive the model's params merged with the shared connection
//! settings and return an [`ActionResult`] that is fed back to the model. They
//! may touch the outside world but never the loop's own state; the tracker is
//! visible to them read-only through [`HandlerContext`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::{Action, ActionKind, ActionResult, Params};
use crate::core::usage::UsageTracker;
use crate::io::docker::ImageBuilder;
use crate::io::git::RepoCloner;
use crate::io::human::Confirm;
use crate::io::llm::ModelBackend;
use crate::io::qdrant::VectorIndex;
use crate::io::usage_log::UsageLog;

pub mod dockerfile;
pub mod index;
pub mod repo;
pub mod session;

/// Whether the loop keeps going after this action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

/// Handler output: the result fed back to the model plus a control signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub result: ActionResult,
    pub control: Control,
}

impl Dispatch {
    pub fn exit(result: ActionResult) -> Self {
        Self {
            result,
            control: Control::Exit,
        }
    }
}

impl From<ActionResult> for Dispatch {
    fn from(result: ActionResult) -> Self {
        Self {
            result,
            control: Control::Continue,
        }
    }
}

/// Read-only loop state visible to handlers.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub usage: &'a UsageTracker,
    pub usage_log: &'a UsageLog,
}

pub trait ActionHandler {
    /// Run the action. `Err` is reported back to the model as an error result.
    fn handle(&self, params: &Params, ctx: &HandlerContext<'_>) -> Result<Dispatch>;
}

/// Maps each known action to exactly one handler.
#[derive(Default)]
pub struct ActionRegistry<'a> {
    handlers: BTreeMap<ActionKind, Box<dyn ActionHandler + 'a>>,
}

impl<'a> ActionRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, handler: impl ActionHandler + 'a) -> Result<()> {
        if self.handlers.contains_key(&kind) {
            bail!("action '{kind}' is already registered");
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Invoke the handler for `action`, falling back to the unknown-action result.
    pub fn dispatch(&self, action: &Action, params: &Params, ctx: &HandlerContext<'_>) -> Dispatch {
        let handler = match action {
            Action::Known(kind) => self.handlers.get(kind),
            Action::Unrecognized(_) => None,
        };
        let Some(handler) = handler else {
            debug!(action = action.name(), "no handler registered");
            return unknown_action(action.name(), params).into();
        };
        match handler.handle(params, ctx) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(action = action.name(), error = %message, "action failed");
                ActionResult::error(message).into()
            }
        }
    }
}

/// Result for actions nobody handles; echoes the invocation for diagnostics.
pub fn unknown_action(name: &str, params: &Params) -> ActionResult {
    ActionResult::error(format!(
        "unknown action {name} {}",
        Value::Object(params.clone())
    ))
}

/// Model params overlaid with shared settings; shared keys win.
pub fn merge_params(params: &Params, shared: &Params) -> Params {
    let mut merged = params.clone();
    merged.extend(shared.iter().map(|(key, value)| (key.clone(), value.clone())));
    merged
}

pub(crate) fn required_str<'p>(params: &'p Params, key: &str) -> Result<&'p str> {
    match params.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => bail!("param '{key}' must be a string, got {other}"),
        None => bail!("missing param '{key}'"),
    }
}

pub(crate) fn optional_str<'p>(params: &'p Params, key: &str) -> Option<&'p str> {
    params.get(key).and_then(Value::as_str)
}

#[cfg(test)]
pub(crate) fn with_test_context<R>(f: impl FnOnce(&HandlerContext<'_>) -> R) -> R {
    let temp = tempfile::tempdir().expect("tempdir");
    let usage = UsageTracker::new(100);
    let usage_log = UsageLog::new(temp.path().join("usage.log"));
    f(&HandlerContext {
        usage: &usage,
        usage_log: &usage_log,
    })
}

#[cfg(test)]
pub(crate) fn params_of(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// External services the standard handlers talk to.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub model: &'a dyn ModelBackend,
    pub cloner: &'a dyn RepoCloner,
    pub index: &'a dyn VectorIndex,
    pub builder: &'a dyn ImageBuilder,
    pub human: &'a dyn Confirm,
}

/// Registry with one handler per [`ActionKind`].
pub fn standard_registry<'a>(
    backends: Backends<'a>,
    workspace_dir: &Path,
) -> Result<ActionRegistry<'a>> {
    let mut registry = ActionRegistry::new();
    registry.register(
        ActionKind::CloneRepo,
        repo::CloneRepo::new(backends.cloner, workspace_dir),
    )?;
    registry.register(
        ActionKind::IngestFiletree,
        index::IngestFiletree::new(backends.index),
    )?;
    registry.register(ActionKind::IngestFile, index::IngestFile::new(backends.index))?;
    registry.register(ActionKind::QueryQdrant, index::QueryIndex::new(backends.index))?;
    registry.register(
        ActionKind::GenerateDockerfile,
        dockerfile::GenerateDockerfile::new(backends.model),
    )?;
    registry.register(ActionKind::Build, dockerfile::BuildImage::new(backends.builder))?;
    registry.register(ActionKind::FixDockerfile, dockerfile::FixDockerfile)?;
    registry.register(ActionKind::AskHuman, session::AskHuman::new(backends.human))?;
    registry.register(ActionKind::Exit, session::ExitRun)?;
    Ok(registry)
}
