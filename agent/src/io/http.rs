//! Shared blocking HTTP plumbing for the model, embedding and index services.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use serde_json::Value;

/// Longest response body quoted in an error message.
const ERROR_BODY_CHARS: usize = 500;

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")
}

/// Decode a JSON response, turning non-2xx statuses into errors that quote the body.
pub fn read_json(response: Response, what: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_CHARS).collect();
        return Err(anyhow!("{what} returned {status}: {}", body.trim()));
    }
    response
        .json::<Value>()
        .with_context(|| format!("decode {what} response"))
}

/// Join a base URL and a path without doubling slashes.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://qdrant:6333", "collections"),
            "http://qdrant:6333/collections"
        );
    }
}
