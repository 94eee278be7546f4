// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic in-memory adapter implementations.
//!
//! These back the test suites and the CLI's mock backend. Every output is a
//! pure function of the inputs, so identical sources produce identical
//! artifacts across runs — the determinism the pass contract requires.

use crate::{
    BlockKind, EmbeddingModel, ExtractedBlock, GraphSink, LanguageModel, LlmConfig, PdfExtractor,
    VectorItem, VectorSink,
};
use async_trait::async_trait;
use gri_core::{GraphDelta, GraphNode};
use gri_error::{ErrorCode, IngestError, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes of source per synthesized page when no script is registered.
const SYNTH_PAGE_BYTES: u64 = 2048;

/// Header marking a part document produced by `slice_pages`.
const PART_MAGIC: &str = "%GRI-PART";

// ---------------------------------------------------------------------------
// ScriptedExtractor
// ---------------------------------------------------------------------------

/// A [`PdfExtractor`] that serves pre-registered page scripts, and
/// synthesizes deterministic blocks from raw bytes for everything else.
#[derive(Default)]
pub struct ScriptedExtractor {
    docs: Mutex<HashMap<PathBuf, Vec<Vec<ExtractedBlock>>>>,
    unreadable: Mutex<HashSet<PathBuf>>,
}

impl ScriptedExtractor {
    /// An extractor with no registered documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document as a list of pages, each a list of blocks.
    /// Block page numbers are overwritten from the page position.
    pub fn register(&self, path: &Path, pages: Vec<Vec<ExtractedBlock>>) {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, blocks)| {
                blocks
                    .into_iter()
                    .map(|mut b| {
                        b.page = i as u32 + 1;
                        b
                    })
                    .collect()
            })
            .collect();
        self.docs
            .lock()
            .expect("extractor script table poisoned")
            .insert(path.to_path_buf(), pages);
    }

    /// Make every call for `path` fail with `SOURCE_UNREADABLE`.
    pub fn mark_unreadable(&self, path: &Path) {
        self.unreadable
            .lock()
            .expect("extractor script table poisoned")
            .insert(path.to_path_buf());
    }

    fn check_readable(&self, path: &Path) -> Result<()> {
        let unreadable = self
            .unreadable
            .lock()
            .expect("extractor script table poisoned");
        if unreadable.contains(path) {
            return Err(IngestError::new(
                ErrorCode::SourceUnreadable,
                format!("malformed document: {}", path.display()),
            ));
        }
        Ok(())
    }

    fn scripted(&self, path: &Path) -> Option<Vec<Vec<ExtractedBlock>>> {
        self.docs
            .lock()
            .expect("extractor script table poisoned")
            .get(path)
            .cloned()
    }

    fn read_bytes(path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| {
            IngestError::new(
                ErrorCode::SourceUnreadable,
                format!("cannot read {}", path.display()),
            )
            .with_source(e)
        })
    }

    /// Deterministic blocks synthesized from raw bytes: one title on the
    /// first page, one paragraph per [`SYNTH_PAGE_BYTES`] window.
    fn synthesize(path: &Path, bytes: &[u8]) -> Vec<ExtractedBlock> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let mut blocks = Vec::new();
        if bytes.is_empty() {
            return blocks;
        }
        blocks.push(ExtractedBlock {
            page: 1,
            kind: BlockKind::Title,
            text: stem.clone(),
            bbox: None,
        });
        for (i, window) in bytes.chunks(SYNTH_PAGE_BYTES as usize).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(window);
            let digest = format!("{:x}", hasher.finalize());
            blocks.push(ExtractedBlock {
                page: i as u32 + 1,
                kind: BlockKind::Paragraph,
                text: format!("{stem} excerpt {} of digest {}", i + 1, &digest[..16]),
                bbox: None,
            });
        }
        blocks
    }

    /// Group flat blocks into contiguous 1-based pages.
    fn paginate(blocks: Vec<ExtractedBlock>) -> Vec<Vec<ExtractedBlock>> {
        let page_count = blocks.iter().map(|b| b.page).max().unwrap_or(0) as usize;
        let mut pages: Vec<Vec<ExtractedBlock>> = vec![Vec::new(); page_count];
        for block in blocks {
            let idx = block.page.max(1) as usize - 1;
            pages[idx].push(block);
        }
        pages
    }

    /// Parse a part document produced by [`slice_pages`](PdfExtractor::slice_pages).
    fn parse_part(bytes: &[u8]) -> Option<Vec<Vec<ExtractedBlock>>> {
        let text = std::str::from_utf8(bytes).ok()?;
        let rest = text.strip_prefix(PART_MAGIC)?;
        let (_, payload) = rest.split_once('\n')?;
        serde_json::from_str(payload).ok()
    }

    /// The page structure of any document this extractor understands:
    /// registered scripts, its own part documents, or synthesized bytes.
    fn pages_of(&self, path: &Path) -> Result<Vec<Vec<ExtractedBlock>>> {
        self.check_readable(path)?;
        if let Some(pages) = self.scripted(path) {
            return Ok(pages);
        }
        let bytes = Self::read_bytes(path)?;
        if let Some(pages) = Self::parse_part(&bytes) {
            return Ok(pages);
        }
        Ok(Self::paginate(Self::synthesize(path, &bytes)))
    }
}

#[async_trait]
impl PdfExtractor for ScriptedExtractor {
    async fn page_count(&self, path: &Path) -> Result<u32> {
        Ok((self.pages_of(path)?.len() as u32).max(1))
    }

    async fn extract(&self, path: &Path) -> Result<Vec<ExtractedBlock>> {
        Ok(self.pages_of(path)?.into_iter().flatten().collect())
    }

    /// Parts are standalone documents: a magic header line followed by the
    /// JSON page structure for the range, renumbered from page 1. Feeding a
    /// part back through [`extract`](PdfExtractor::extract) yields exactly
    /// those pages.
    async fn slice_pages(&self, path: &Path, start: u32, end: u32) -> Result<Vec<u8>> {
        let pages = self.pages_of(path)?;
        let start_idx = start.max(1) as usize - 1;
        let end_idx = (end as usize).min(pages.len());
        let window = if start_idx >= end_idx {
            &[][..]
        } else {
            &pages[start_idx..end_idx]
        };
        let renumbered: Vec<Vec<ExtractedBlock>> = window
            .iter()
            .enumerate()
            .map(|(i, page)| {
                page.iter()
                    .map(|block| {
                        let mut block = block.clone();
                        block.page = i as u32 + 1;
                        block
                    })
                    .collect()
            })
            .collect();
        let mut out = format!("{PART_MAGIC} pages {start}-{end}\n").into_bytes();
        out.extend(serde_json::to_vec(&renumbered).expect("part pages serialize"));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MockLanguageModel
// ---------------------------------------------------------------------------

/// A [`LanguageModel`] that answers heading-recognition prompts
/// deterministically.
///
/// Candidate lines of the form `- [page N] Title` are echoed back as the
/// JSON array Pass A expects. Canned replies and scripted transient
/// failures are available for failure-path tests.
#[derive(Default)]
pub struct MockLanguageModel {
    canned: Mutex<Vec<String>>,
    fail_remaining: AtomicU32,
}

impl MockLanguageModel {
    /// A model with no canned replies and no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned reply, served before any parsing behavior.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.canned
            .lock()
            .expect("mock llm canned lock poisoned")
            .push(reply.into());
    }

    /// Fail the next `n` calls with `EXTERNAL_UNAVAILABLE`.
    pub fn fail_times(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str, _config: &LlmConfig) -> Result<String> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::external("mock model unavailable"));
        }
        {
            let mut canned = self.canned.lock().expect("mock llm canned lock poisoned");
            if !canned.is_empty() {
                return Ok(canned.remove(0));
            }
        }
        // Echo candidate headings back as the JSON Pass A expects.
        let mut sections = Vec::new();
        for line in prompt.lines() {
            let Some(rest) = line.trim().strip_prefix("- [page ") else {
                continue;
            };
            let Some((page, title)) = rest.split_once("] ") else {
                continue;
            };
            let Ok(page) = page.trim().parse::<u32>() else {
                continue;
            };
            sections.push(serde_json::json!({
                "title": title.trim(),
                "start_page": page,
                "depth": 0,
            }));
        }
        Ok(serde_json::to_string(&sections).expect("candidate json serializes"))
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// An [`EmbeddingModel`] whose vectors are a pure function of the text:
/// SHA-256 bytes mapped into `[-1, 1]` components.
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    /// An embedder producing vectors of the given dimension (≤ 8).
    #[must_use]
    pub fn with_dim(dim: usize) -> Self {
        let dim = dim.clamp(1, 8);
        Self {
            model_id: format!("hash-embed-{dim}"),
            dim,
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::with_dim(8)
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(batch.len());
        for text in batch {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            let vector = digest
                .chunks(4)
                .take(self.dim)
                .map(|w| {
                    let x = u32::from_le_bytes([w[0], w[1], w[2], w[3]]);
                    (f64::from(x) / f64::from(u32::MAX) * 2.0 - 1.0) as f32
                })
                .collect();
            out.push(vector);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemoryVectorSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredVector {
    item: VectorItem,
    obsolete: bool,
}

/// An in-memory [`VectorSink`] with idempotent upserts and scriptable
/// transient failures.
#[derive(Default)]
pub struct MemoryVectorSink {
    entries: Mutex<BTreeMap<String, StoredVector>>,
    fail_remaining: AtomicU32,
}

impl MemoryVectorSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` upserts with `EXTERNAL_UNAVAILABLE`.
    pub fn fail_times(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Snapshot of a stored item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<VectorItem> {
        self.entries
            .lock()
            .expect("vector sink poisoned")
            .get(id)
            .map(|s| s.item.clone())
    }

    /// Ids currently flagged obsolete.
    #[must_use]
    pub fn obsolete_ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("vector sink poisoned")
            .iter()
            .filter(|(_, s)| s.obsolete)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Total entries including obsolete ones.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.entries.lock().expect("vector sink poisoned").len()
    }
}

#[async_trait]
impl VectorSink for MemoryVectorSink {
    async fn upsert(&self, items: &[VectorItem]) -> Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(IngestError::external("mock vector sink unavailable"));
        }
        let mut entries = self.entries.lock().expect("vector sink poisoned");
        for item in items {
            entries.insert(
                item.id.clone(),
                StoredVector {
                    item: item.clone(),
                    obsolete: false,
                },
            );
        }
        Ok(())
    }

    async fn mark_obsolete(&self, ids: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().expect("vector sink poisoned");
        for id in ids {
            if let Some(stored) = entries.get_mut(id) {
                stored.obsolete = true;
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().expect("vector sink poisoned");
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let entries = self.entries.lock().expect("vector sink poisoned");
        Ok(entries.values().filter(|s| !s.obsolete).count() as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryGraphSink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeSet<(String, String, String)>,
}

/// An in-memory [`GraphSink`] applying nodes before edges and refusing
/// dangling endpoints outright.
#[derive(Default)]
pub struct MemoryGraphSink {
    state: Mutex<GraphState>,
}

impl MemoryGraphSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the edge is committed.
    #[must_use]
    pub fn has_edge(&self, from: &str, to: &str, kind: &str) -> bool {
        self.state
            .lock()
            .expect("graph sink poisoned")
            .edges
            .contains(&(from.to_string(), to.to_string(), kind.to_string()))
    }

    /// `true` when the node is committed.
    #[must_use]
    pub fn has_node(&self, id: &str) -> bool {
        self.state
            .lock()
            .expect("graph sink poisoned")
            .nodes
            .contains_key(id)
    }
}

#[async_trait]
impl GraphSink for MemoryGraphSink {
    async fn apply_delta(&self, delta: &GraphDelta) -> Result<()> {
        let mut state = self.state.lock().expect("graph sink poisoned");
        // Nodes before edges, always.
        for node in &delta.nodes_upsert {
            state.nodes.insert(node.id.clone(), node.clone());
        }
        for edge in &delta.edges_upsert {
            if !state.nodes.contains_key(&edge.from) || !state.nodes.contains_key(&edge.to) {
                return Err(IngestError::new(
                    ErrorCode::IntegrityViolation,
                    format!("dangling edge {} -> {}", edge.from, edge.to),
                ));
            }
            let kind = serde_json::to_value(edge.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            state.edges.insert((edge.from.clone(), edge.to.clone(), kind));
        }
        for id in &delta.nodes_remove {
            state.nodes.remove(id);
            state.edges.retain(|(from, to, _)| from != id && to != id);
        }
        Ok(())
    }

    async fn committed_node_ids(&self) -> Result<HashSet<String>> {
        let state = self.state.lock().expect("graph sink poisoned");
        Ok(state.nodes.keys().cloned().collect())
    }

    async fn node_count(&self) -> Result<u64> {
        Ok(self.state.lock().expect("graph sink poisoned").nodes.len() as u64)
    }

    async fn edge_count(&self) -> Result<u64> {
        Ok(self.state.lock().expect("graph sink poisoned").edges.len() as u64)
    }
}
