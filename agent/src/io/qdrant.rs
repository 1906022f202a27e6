//! Vector index backed by the Qdrant REST API.
//!
//! Text is chunked, embedded and upserted with the chunk stored under the
//! `page_content` payload key. Collections are created on first use with cosine
//! distance and the embedding dimension.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::chunk::TextSplitter;
use crate::io::embeddings::{Embedder, embed_in_batches};
use crate::io::http::{build_client, endpoint, read_json};

/// Most points sent in one upsert request.
pub const UPSERT_BATCH_SIZE: usize = 64;

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub text: String,
}

/// Abstraction over the indexing service.
pub trait VectorIndex {
    /// Chunk, embed and store `text`; returns the number of chunks stored.
    fn ingest(&self, url: &str, collection: &str, text: &str) -> Result<usize>;

    /// Return up to `limit` chunks nearest to `query`.
    fn search(&self, url: &str, collection: &str, query: &str, limit: usize)
    -> Result<Vec<SearchHit>>;
}

impl<T: VectorIndex + ?Sized> VectorIndex for &T {
    fn ingest(&self, url: &str, collection: &str, text: &str) -> Result<usize> {
        (**self).ingest(url, collection, text)
    }

    fn search(
        &self,
        url: &str,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        (**self).search(url, collection, query, limit)
    }
}

pub struct QdrantIndex<E> {
    http: Client,
    embedder: E,
    splitter: TextSplitter,
}

impl<E: Embedder> QdrantIndex<E> {
    pub fn new(embedder: E, splitter: TextSplitter, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            embedder,
            splitter,
        })
    }

    fn ensure_collection(&self, url: &str, collection: &str, dimension: usize) -> Result<()> {
        let response = self
            .http
            .get(endpoint(url, "collections"))
            .send()
            .context("list qdrant collections")?;
        let listing = read_json(response, "qdrant list collections")?;
        if collection_exists(&listing, collection) {
            return Ok(());
        }

        info!(collection, dimension, "creating qdrant collection");
        let response = self
            .http
            .put(endpoint(url, &format!("collections/{collection}")))
            .json(&json!({"vectors": {"size": dimension, "distance": "Cosine"}}))
            .send()
            .context("create qdrant collection")?;
        read_json(response, "qdrant create collection")?;
        Ok(())
    }
}

impl<E: Embedder> VectorIndex for QdrantIndex<E> {
    #[instrument(skip_all, fields(collection = %collection, chars = text.len()))]
    fn ingest(&self, url: &str, collection: &str, text: &str) -> Result<usize> {
        let chunks = self.splitter.split(text);
        if chunks.is_empty() {
            debug!("nothing to ingest");
            return Ok(0);
        }
        let vectors = embed_in_batches(&self.embedder, &chunks)?;
        let dimension = vectors
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow!("no embeddings returned"))?;
        self.ensure_collection(url, collection, dimension)?;

        let points_url = endpoint(url, &format!("collections/{collection}/points?wait=true"));
        for (batch_no, body) in upsert_batches(&chunks, &vectors).iter().enumerate() {
            let response = self
                .http
                .put(&points_url)
                .json(body)
                .send()
                .with_context(|| format!("upsert qdrant points batch {batch_no}"))?;
            read_json(response, "qdrant upsert")?;
        }
        debug!(chunks = chunks.len(), "ingested chunks");
        Ok(chunks.len())
    }

    #[instrument(skip_all, fields(collection = %collection, limit = limit))]
    fn search(
        &self,
        url: &str,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed_one(query)?;
        let response = self
            .http
            .post(endpoint(
                url,
                &format!("collections/{collection}/points/search"),
            ))
            .json(&json!({"vector": vector, "limit": limit, "with_payload": true}))
            .send()
            .context("search qdrant points")?;
        let value = read_json(response, "qdrant search")?;
        parse_hits(&value)
    }
}

pub fn collection_exists(listing: &Value, name: &str) -> bool {
    listing
        .pointer("/result/collections")
        .and_then(Value::as_array)
        .is_some_and(|collections| {
            collections
                .iter()
                .any(|c| c.get("name").and_then(Value::as_str) == Some(name))
        })
}

pub fn upsert_body(chunks: &[String], vectors: &[Vec<f32>]) -> Value {
    let points: Vec<Value> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| {
            json!({
                "id": Uuid::new_v4().to_string(),
                "vector": vector,
                "payload": {"page_content": chunk},
            })
        })
        .collect();
    json!({ "points": points })
}

/// Upsert bodies holding at most [`UPSERT_BATCH_SIZE`] points each.
pub fn upsert_batches(chunks: &[String], vectors: &[Vec<f32>]) -> Vec<Value> {
    chunks
        .chunks(UPSERT_BATCH_SIZE)
        .zip(vectors.chunks(UPSERT_BATCH_SIZE))
        .map(|(chunks, vectors)| upsert_body(chunks, vectors))
        .collect()
}

pub fn parse_hits(value: &Value) -> Result<Vec<SearchHit>> {
    let results = value
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("qdrant search response has no result array"))?;
    Ok(results
        .iter()
        .map(|hit| SearchHit {
            score: hit.get("score").and_then(Value::as_f64).unwrap_or_default(),
            text: hit
                .pointer("/payload/page_content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect())
}
