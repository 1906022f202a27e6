//! Human confirmation capability used by escalations and `ask_human`.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

/// Answer used when the operator just presses enter.
pub const DEFAULT_ANSWER: &str = "n";

/// Ask a human a question and return their (normalised) answer.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<String>;
}

impl<T: Confirm + ?Sized> Confirm for &T {
    fn confirm(&self, prompt: &str) -> Result<String> {
        (**self).confirm(prompt)
    }
}

/// Reads a single answer from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleConfirm;

impl Confirm for ConsoleConfirm {
    fn confirm(&self, prompt: &str) -> Result<String> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "\n[LLM] {prompt} ").context("write prompt")?;
        stdout.flush().context("flush prompt")?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read operator answer")?;
        Ok(normalize_answer(&line))
    }
}

/// First character of the trimmed, lowercased reply; `n` when empty.
pub fn normalize_answer(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .next()
        .map_or_else(|| DEFAULT_ANSWER.to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_reduce_to_first_lowercase_char() {
        assert_eq!(normalize_answer("Yes please\n"), "y");
        assert_eq!(normalize_answer("  N "), "n");
    }

    #[test]
    fn empty_answer_defaults_to_no() {
        assert_eq!(normalize_answer("\n"), "n");
        assert_eq!(normalize_answer(""), "n");
    }
}
