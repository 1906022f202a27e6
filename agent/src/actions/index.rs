//! Indexing handlers: `ingest_filetree`, `ingest_file` and `query_qdrant`.
//!
//! The index endpoint and collection come from the shared settings merged into
//! every invocation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::actions::{ActionHandler, Dispatch, HandlerContext, required_str};
use crate::core::types::{ActionResult, Params, head_chars};
use crate::io::files::list_files;
use crate::io::qdrant::VectorIndex;

/// Hits returned by `query_qdrant`.
pub const SEARCH_LIMIT: usize = 5;
/// Characters of each hit's chunk echoed back to the model.
pub const HIT_PREVIEW_CHARS: usize = 120;

struct Target<'p> {
    url: &'p str,
    collection: &'p str,
}

fn target(params: &Params) -> Result<Target<'_>> {
    Ok(Target {
        url: required_str(params, "qdrant_url")?,
        collection: required_str(params, "collection")?,
    })
}

fn ingested(chunks: usize) -> Dispatch {
    ActionResult::ok()
        .with("result", format!("{chunks} chunks"))
        .into()
}

/// Index the repository's file listing.
pub struct IngestFiletree<I> {
    index: I,
}

impl<I: VectorIndex> IngestFiletree<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }
}

impl<I: VectorIndex> ActionHandler for IngestFiletree<I> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let repo_path = Path::new(required_str(params, "repo_path")?);
        let target = target(params)?;
        let listing = list_files(repo_path)?;
        let chunks = self
            .index
            .ingest(target.url, target.collection, &listing)?;
        debug!(chunks, repo_path = %repo_path.display(), "indexed file listing");
        Ok(ingested(chunks))
    }
}

/// Index the contents of one file.
pub struct IngestFile<I> {
    index: I,
}

impl<I: VectorIndex> IngestFile<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }
}

impl<I: VectorIndex> ActionHandler for IngestFile<I> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let path = Path::new(required_str(params, "file")?);
        if !path.is_file() {
            return Ok(ActionResult::error("file not found").into());
        }
        let target = target(params)?;
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        let chunks = self.index.ingest(target.url, target.collection, &text)?;
        debug!(chunks, file = %path.display(), "indexed file");
        Ok(ingested(chunks))
    }
}

/// Nearest-neighbour lookup over indexed chunks.
pub struct QueryIndex<I> {
    index: I,
}

impl<I: VectorIndex> QueryIndex<I> {
    pub fn new(index: I) -> Self {
        Self { index }
    }
}

impl<I: VectorIndex> ActionHandler for QueryIndex<I> {
    #[instrument(skip_all)]
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let query = required_str(params, "query")?;
        let target = target(params)?;
        let hits: Vec<Value> = self
            .index
            .search(target.url, target.collection, query, SEARCH_LIMIT)?
            .into_iter()
            .map(|hit| json!({"score": hit.score, "text": head_chars(&hit.text, HIT_PREVIEW_CHARS)}))
            .collect();
        Ok(ActionResult::ok().with("hits", hits).into())
    }
}
