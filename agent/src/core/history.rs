//! Append-only conversation history.

use anyhow::{Context, Result};

use crate::core::types::{ActionResult, Message};

/// Ordered message log sent to the model on every turn. Never pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    /// Seed a run with the system instructions and the operator's opening message.
    pub fn seeded(system: impl Into<String>, opening: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(opening)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Close a turn: the model's reply, then the JSON-encoded result as the human entry.
    pub fn append_turn(&mut self, reply: &str, result: &ActionResult) -> Result<()> {
        let encoded = result.to_json().context("encode action result")?;
        self.messages.push(Message::assistant(reply));
        self.messages.push(Message::user(encoded));
        Ok(())
    }
}
