// SPDX-License-Identifier: MIT OR Apache-2.0
//! Extracted chunks and their vector-enriched form.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inclusive page range covered by a chunk or section.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct PageSpan {
    /// First page (1-based).
    pub start: u32,
    /// Last page (1-based, inclusive).
    pub end: u32,
}

impl PageSpan {
    /// Span covering a single page.
    #[must_use]
    pub fn single(page: u32) -> Self {
        Self {
            start: page,
            end: page,
        }
    }

    /// Number of pages covered.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }

    /// `true` when the span covers no pages (end before start).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Number of pages shared with another span.
    #[must_use]
    pub fn overlap(&self, other: &Self) -> u32 {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        if hi < lo { 0 } else { hi - lo + 1 }
    }

    /// `true` when the spans share at least one page.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.overlap(other) > 0
    }
}

/// Layout role of an extracted block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
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

/// The smallest extracted unit, produced by Pass C. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Chunk {
    /// Content-derived identifier; see [`chunk_id`].
    pub chunk_id: String,
    /// The source document this chunk came from.
    pub source_id: String,
    /// The logical section this chunk belongs to.
    pub section_id: String,
    /// Pages the chunk's text spans.
    pub page_span: PageSpan,
    /// Extracted text.
    pub text: String,
    /// Layout role.
    pub kind: ChunkKind,
    /// Position of the chunk within its section, starting at 0.
    pub ordinal_in_section: u32,
}

impl Chunk {
    /// Build a chunk, deriving its id from the identity fields.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        section_id: impl Into<String>,
        page_span: PageSpan,
        text: impl Into<String>,
        kind: ChunkKind,
        ordinal_in_section: u32,
    ) -> Self {
        let source_id = source_id.into();
        let section_id = section_id.into();
        let text = text.into();
        let chunk_id = chunk_id(&source_id, &section_id, ordinal_in_section, &text);
        Self {
            chunk_id,
            source_id,
            section_id,
            page_span,
            text,
            kind,
            ordinal_in_section,
        }
    }
}

/// Stable chunk identifier: SHA-256 over
/// `source_id || section_id || ordinal || text`, separator byte `0x1f`.
#[must_use]
pub fn chunk_id(source_id: &str, section_id: &str, ordinal: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(section_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk augmented by Pass D with its embedding and lightweight analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VectorRecord {
    /// Chunk this record enriches; also the idempotent sink key.
    pub chunk_id: String,
    /// Identifier of the embedding model that produced the vector.
    pub embedding_model_id: String,
    /// The embedding itself.
    pub embedding: Vec<f32>,
    /// Frequency-ranked keywords from the chunk text.
    pub keywords: Vec<String>,
    /// Capitalized-phrase entities detected in the chunk text.
    pub entities: Vec<String>,
    /// SHA-256 of the chunk text at enrichment time.
    pub chunk_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable_and_input_sensitive() {
        let a = chunk_id("phb", "sec-1", 0, "Roll initiative.");
        let b = chunk_id("phb", "sec-1", 0, "Roll initiative.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, chunk_id("phb", "sec-1", 1, "Roll initiative."));
        assert_ne!(a, chunk_id("phb", "sec-2", 0, "Roll initiative."));
    }

    #[test]
    fn separator_prevents_field_bleed() {
        // Without a separator these two would collide.
        assert_ne!(chunk_id("ab", "c", 0, "x"), chunk_id("a", "bc", 0, "x"));
    }

    #[test]
    fn new_derives_matching_id() {
        let c = Chunk::new("phb", "sec-1", PageSpan::single(3), "Text.", ChunkKind::Paragraph, 2);
        assert_eq!(c.chunk_id, chunk_id("phb", "sec-1", 2, "Text."));
    }

    #[test]
    fn page_span_overlap() {
        let a = PageSpan { start: 1, end: 10 };
        let b = PageSpan { start: 8, end: 12 };
        let c = PageSpan { start: 11, end: 12 };
        assert_eq!(a.overlap(&b), 3);
        assert!(!a.overlaps(&c));
        assert_eq!(a.len(), 10);
    }
}
