//! Shared deterministic types for the control loop.
//!
//! These types define the contracts between the loop, the action registry and
//! the conversation history. They carry no I/O and serialize deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object passed to a handler (model params merged with shared config).
pub type Params = Map<String, Value>;

/// Longest comment rendered verbatim in log lines.
pub const COMMENT_LOG_CHARS: usize = 50;
/// Characters kept from an over-long comment before the ellipsis.
const COMMENT_KEEP_CHARS: usize = 46;

/// The closed set of actions the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CloneRepo,
    IngestFiletree,
    IngestFile,
    QueryQdrant,
    GenerateDockerfile,
    Build,
    FixDockerfile,
    AskHuman,
    Exit,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::CloneRepo,
        ActionKind::IngestFiletree,
        ActionKind::IngestFile,
        ActionKind::QueryQdrant,
        ActionKind::GenerateDockerfile,
        ActionKind::Build,
        ActionKind::FixDockerfile,
        ActionKind::AskHuman,
        ActionKind::Exit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::CloneRepo => "clone_repo",
            ActionKind::IngestFiletree => "ingest_filetree",
            ActionKind::IngestFile => "ingest_file",
            ActionKind::QueryQdrant => "query_qdrant",
            ActionKind::GenerateDockerfile => "generate_dockerfile",
            ActionKind::Build => "build",
            ActionKind::FixDockerfile => "fix_dockerfile",
            ActionKind::AskHuman => "ask_human",
            ActionKind::Exit => "exit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action named by a directive: a known variant, or the raw unrecognized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Known(ActionKind),
    Unrecognized(String),
}

impl Action {
    pub fn from_name(name: &str) -> Self {
        match ActionKind::from_name(name) {
            Some(kind) => Action::Known(kind),
            None => Action::Unrecognized(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Action::Known(kind) => kind.as_str(),
            Action::Unrecognized(name) => name,
        }
    }

    pub fn is(&self, kind: ActionKind) -> bool {
        matches!(self, Action::Known(k) if *k == kind)
    }
}

/// One parsed model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub action: Action,
    pub params: Params,
    pub comment: String,
}

/// Status field carried by every action result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
    /// `fix_dockerfile` marker: the model should revise and rebuild.
    Patched,
}

/// Structured output of a dispatched handler, serialized verbatim into history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ResultStatus,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            status: ResultStatus::Ok,
            fields: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::ok()
            .with_status(ResultStatus::Error)
            .with("error", message.into())
    }

    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Shorten a comment for single-line logs (`…` marks the cut).
pub fn short_comment(comment: &str) -> String {
    if comment.chars().count() <= COMMENT_LOG_CHARS {
        return comment.to_string();
    }
    let mut short: String = comment.chars().take(COMMENT_KEEP_CHARS).collect();
    short.push('…');
    short
}

/// Keep at most the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(max_chars)).collect()
}

/// Keep at most the first `max_chars` characters of `text`.
pub fn head_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
