//! Parsing of the single-line JSON directive the model emits each turn.

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{Action, Directive, Params};

const DIRECTIVE_SCHEMA: &str = include_str!("../../schemas/directive.schema.json");

#[derive(Debug, Deserialize)]
struct RawDirective {
    action: String,
    #[serde(default)]
    params: Params,
    #[serde(default)]
    comment: Value,
}

fn comment_text(comment: Value) -> String {
    match comment {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Validates model replies against the directive schema.
pub struct DirectiveParser {
    validator: Validator,
}

impl DirectiveParser {
    pub fn new() -> Result<Self> {
        let schema: Value =
            serde_json::from_str(DIRECTIVE_SCHEMA).context("parse directive schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("compile directive schema: {err}"))?;
        Ok(Self { validator })
    }

    /// Decode one reply. Any failure here is terminal for the loop.
    pub fn parse(&self, reply: &str) -> Result<Directive> {
        let value: Value = serde_json::from_str(reply).context("reply is not valid json")?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            bail!("directive schema violation:\n- {}", messages.join("\n- "));
        }
        let raw: RawDirective = serde_json::from_value(value).context("decode directive")?;
        Ok(Directive {
            action: Action::from_name(&raw.action),
            params: raw.params,
            comment: comment_text(raw.comment),
        })
    }
}
