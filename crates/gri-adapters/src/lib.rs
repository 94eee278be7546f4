// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter traits isolating the ingestion core from external capabilities,
//! plus deterministic in-memory implementations.
//!
//! The core treats vector and graph stores as opaque sinks behind these
//! interfaces, and PDF extraction / language models / embeddings as
//! pluggable capabilities. All sink writes are idempotent, keyed by stable
//! ids, so a pass may safely replay a batch after a transient failure.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Deterministic in-memory implementations for tests and the mock backend.
pub mod mock;

use async_trait::async_trait;
use gri_core::GraphDelta;
use gri_error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Layout role of a block coming out of the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// A heading line.
    Title,
    /// Body text.
    Paragraph,
    /// A bulleted or numbered list.
    List,
    /// Tabular content flattened to text.
    Table,
    /// Caption attached to an image.
    ImageCaption,
}

/// One text/layout block extracted from a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBlock {
    /// Page the block appears on (1-based).
    pub page: u32,
    /// Layout role.
    pub kind: BlockKind,
    /// Extracted text.
    pub text: String,
    /// Optional bounding box `[x0, y0, x1, y1]` in page coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

/// External PDF extraction capability.
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, path: &Path) -> Result<u32>;

    /// Extract all text/layout blocks, in page order.
    async fn extract(&self, path: &Path) -> Result<Vec<ExtractedBlock>>;

    /// Produce a standalone document containing the inclusive page range.
    /// Used by Pass B to materialize section-aligned parts.
    async fn slice_pages(&self, path: &Path, start: u32, end: u32) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Generation knobs forwarded to the language model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Preferred model identifier, when the adapter supports routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Response length cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature; structure-extraction prompts use 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// External language-model capability (heading recognition in Pass A).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt and return the raw response text.
    async fn complete(&self, prompt: &str, config: &LlmConfig) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// External embedding capability (Pass D).
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Stable identifier recorded in every vector record.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts; the result has one vector per input, in
    /// input order.
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Vector sink
// ---------------------------------------------------------------------------

/// One vector-sink upsert item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorItem {
    /// Stable key (the chunk id).
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Arbitrary metadata stored alongside.
    pub metadata: serde_json::Value,
}

/// Persistent vector store behind an idempotent upsert interface.
#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Insert or overwrite items by id. Replaying a batch is safe.
    async fn upsert(&self, items: &[VectorItem]) -> Result<()>;

    /// Flag entries as obsolete without removing them.
    async fn mark_obsolete(&self, ids: &[String]) -> Result<()>;

    /// Remove entries outright.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Number of live (non-obsolete) entries.
    async fn count(&self) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Graph sink
// ---------------------------------------------------------------------------

/// Persistent graph store behind an idempotent delta interface.
#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Apply a staged delta: node upserts first, then edge upserts, then
    /// removals. Replaying a delta is safe.
    async fn apply_delta(&self, delta: &GraphDelta) -> Result<()>;

    /// Ids of every node currently committed. Pass E consults this to
    /// guarantee it never writes dangling edges.
    async fn committed_node_ids(&self) -> Result<HashSet<String>>;

    /// Number of committed nodes.
    async fn node_count(&self) -> Result<u64>;

    /// Number of committed edges.
    async fn edge_count(&self) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The full set of adapters handed to a job via its pass context.
///
/// Modelled as explicit dependencies — there are no ambient singletons in
/// the core; a job sees exactly the capabilities it was given.
#[derive(Clone)]
pub struct Adapters {
    /// PDF extraction capability.
    pub extractor: Arc<dyn PdfExtractor>,
    /// Language-model capability.
    pub llm: Arc<dyn LanguageModel>,
    /// Embedding capability.
    pub embedder: Arc<dyn EmbeddingModel>,
    /// Vector sink.
    pub vector_sink: Arc<dyn VectorSink>,
    /// Graph sink.
    pub graph_sink: Arc<dyn GraphSink>,
}

impl Adapters {
    /// A bundle of deterministic in-memory adapters.
    #[must_use]
    pub fn mock() -> Self {
        Self {
            extractor: Arc::new(mock::ScriptedExtractor::new()),
            llm: Arc::new(mock::MockLanguageModel::new()),
            embedder: Arc::new(mock::HashEmbedder::default()),
            vector_sink: Arc::new(mock::MemoryVectorSink::new()),
            graph_sink: Arc::new(mock::MemoryGraphSink::new()),
        }
    }

    /// A mock bundle with a pre-scripted document registered for `path`.
    #[must_use]
    pub fn mock_with_document(path: &Path, pages: Vec<Vec<ExtractedBlock>>) -> Self {
        let extractor = mock::ScriptedExtractor::new();
        extractor.register(path, pages);
        Self {
            extractor: Arc::new(extractor),
            ..Self::mock()
        }
    }
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("embedder", &self.embedder.model_id())
            .finish_non_exhaustive()
    }
}
