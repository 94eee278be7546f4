// SPDX-License-Identifier: MIT OR Apache-2.0
//! Document structure: TOC sections and page/section fingerprints.

use crate::chunk::PageSpan;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One logical section discovered by Pass A.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TocSection {
    /// Stable section identifier, unique within the document.
    pub section_id: String,
    /// Heading text.
    pub title: String,
    /// First page of the section (1-based).
    pub start_page: u32,
    /// Last page of the section (1-based, inclusive).
    pub end_page: u32,
    /// Nesting depth; 0 for top-level sections.
    pub depth: u32,
    /// Enclosing section, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl TocSection {
    /// Pages covered by this section.
    #[must_use]
    pub fn page_span(&self) -> PageSpan {
        PageSpan {
            start: self.start_page,
            end: self.end_page,
        }
    }
}

/// Derive a stable section id from its ordinal and title:
/// `sec-<ordinal>-<slug>` where the slug keeps the first words of the title.
#[must_use]
pub fn section_id_for(ordinal: usize, title: &str) -> String {
    let mut slug = String::new();
    let mut last_was_sep = true;
    for ch in title.chars() {
        if slug.len() >= 32 {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('-');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("sec-{ordinal}")
    } else {
        format!("sec-{ordinal}-{slug}")
    }
}

/// The ordered output of Pass A, persisted as `pass_A/toc.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Toc {
    /// Sections in document order.
    pub sections: Vec<TocSection>,
}

impl Toc {
    /// A single top-level section spanning all pages, used when the
    /// document has no discoverable TOC.
    #[must_use]
    pub fn single_section(title: &str, page_count: u32) -> Self {
        Self {
            sections: vec![TocSection {
                section_id: section_id_for(0, title),
                title: title.to_string(),
                start_page: 1,
                end_page: page_count.max(1),
                depth: 0,
                parent_id: None,
            }],
        }
    }

    /// Find the section owning a page; nested sections win over parents.
    #[must_use]
    pub fn section_for_page(&self, page: u32) -> Option<&TocSection> {
        self.sections
            .iter()
            .filter(|s| s.start_page <= page && page <= s.end_page)
            .max_by_key(|s| s.depth)
    }
}

/// Fingerprint of one extracted page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PageFingerprint {
    /// Page number (1-based).
    pub page_number: u32,
    /// SHA-256 of the page's canonically-normalized text.
    pub page_sha: String,
    /// Owning section, when one covers the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
}

/// Fingerprint of one logical section.
///
/// Section SHAs are stable across runs iff the content is byte-identical
/// after canonical normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SectionFingerprint {
    /// Section identifier.
    pub section_id: String,
    /// Heading text, used for cross-run matching.
    pub title: String,
    /// Pages covered.
    pub page_range: PageSpan,
    /// SHA-256 over the section's ordered page SHAs.
    pub section_sha: String,
    /// Nesting depth, used for cross-run matching.
    pub depth: u32,
    /// Enclosing section, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// The `pass_C/page_fingerprints.json` artifact: page and section
/// fingerprints for the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FingerprintSet {
    /// Per-page fingerprints in page order.
    pub pages: Vec<PageFingerprint>,
    /// Per-section fingerprints in document order.
    pub sections: Vec<SectionFingerprint>,
}
