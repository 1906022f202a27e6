//! Text embeddings via an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::io::http::{build_client, endpoint, read_json};

/// Most inputs sent in one embeddings request.
pub const EMBED_BATCH_SIZE: usize = 1000;

pub trait Embedder {
    /// One vector per input, in input order.
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        self.embed(&[input.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding response was empty"))
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    #[instrument(skip_all, fields(model = %self.model, inputs = inputs.len()))]
    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .http
            .post(endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": inputs}))
            .send()
            .context("send embeddings request")?;
        let value = read_json(response, "embeddings")?;
        let vectors = parse_embeddings(&value, inputs.len())?;
        debug!(dimension = vectors.first().map(Vec::len), "embedded inputs");
        Ok(vectors)
    }
}

/// Embed `inputs` with at most [`EMBED_BATCH_SIZE`] per request, keeping input order.
pub fn embed_in_batches<E: Embedder + ?Sized>(
    embedder: &E,
    inputs: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(inputs.len());
    for (batch_no, batch) in inputs.chunks(EMBED_BATCH_SIZE).enumerate() {
        let embedded = embedder
            .embed(batch)
            .with_context(|| format!("embed batch {batch_no}"))?;
        if embedded.len() != batch.len() {
            return Err(anyhow!(
                "batch {batch_no}: expected {} embeddings, got {}",
                batch.len(),
                embedded.len()
            ));
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Order vectors by their `index` field and check one came back per input.
pub fn parse_embeddings(value: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = value
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("embeddings response has no data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map_or(position, |index| index as usize);
        let vector = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("embedding {position} is not an array"))?
            .iter()
            .map(|x| x.as_f64().map(|x| x as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| anyhow!("embedding {position} has non-numeric values"))?;
        indexed.push((index, vector));
    }
    if indexed.len() != expected {
        return Err(anyhow!(
            "expected {expected} embeddings, got {}",
            indexed.len()
        ));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Counting {
        calls: RefCell<Vec<usize>>,
    }

    impl Embedder for Counting {
        fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.borrow_mut().push(inputs.len());
            Ok(inputs.iter().map(|input| vec![input.len() as f32]).collect())
        }
    }

    #[test]
    fn large_inputs_are_split_into_bounded_requests() {
        let inputs: Vec<String> = (0..2500).map(|i| "x".repeat(i % 7 + 1)).collect();
        let embedder = Counting::default();
        let vectors = embed_in_batches(&embedder, &inputs).expect("embed");

        assert_eq!(*embedder.calls.borrow(), vec![1000, 1000, 500]);
        assert_eq!(vectors.len(), 2500);
        assert_eq!(vectors[1001], vec![(1001 % 7 + 1) as f32]);
    }

    #[test]
    fn no_inputs_means_no_requests() {
        let embedder = Counting::default();
        assert!(embed_in_batches(&embedder, &[]).expect("embed").is_empty());
        assert!(embedder.calls.borrow().is_empty());
    }

    #[test]
    fn short_batch_response_is_an_error() {
        struct Dropping;
        impl Embedder for Dropping {
            fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![1.0]])
            }
        }
        let inputs = vec!["a".to_string(), "b".to_string()];
        let err = embed_in_batches(&Dropping, &inputs).unwrap_err();
        assert!(err.to_string().contains("expected 2 embeddings, got 1"));
    }

    #[test]
    fn vectors_follow_index_order() {
        let value = json!({"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]});
        let vectors = parse_embeddings(&value, 2).expect("parse");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let value = json!({"data": [{"index": 0, "embedding": [1.0]}]});
        assert!(parse_embeddings(&value, 2).is_err());
    }
}
