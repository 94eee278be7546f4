// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass A — TOC parser.
//!
//! Identifies the logical document structure. Candidate headings come from
//! the extractor's title blocks; the external language model structures
//! them into ordered sections. A document with no discoverable TOC yields
//! a single top-level section spanning all pages — a TOC-less document is
//! never a failure.

use crate::context::PassContext;
use crate::{ArtifactPayload, Pass, PassOutput, TOC_JSON};
use async_trait::async_trait;
use gri_adapters::{BlockKind, LlmConfig};
use gri_core::toc::section_id_for;
use gri_core::{PassId, Toc, TocSection};
use gri_error::IngestError;
use serde::Deserialize;
use tracing::{debug, warn};

/// Cap on candidate headings offered to the model in one prompt.
const MAX_CANDIDATES: usize = 256;

/// What the model is asked to return, one element per section.
#[derive(Debug, Deserialize)]
struct ModelSection {
    title: String,
    start_page: u32,
    #[serde(default)]
    depth: u32,
}

/// Pass A implementation.
pub struct TocParsePass;

#[async_trait]
impl Pass for TocParsePass {
    fn id(&self) -> PassId {
        PassId::A
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[TOC_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let extractor = &ctx.adapters.extractor;
        let page_count = extractor.page_count(&ctx.source.path).await?;
        let blocks = extractor.extract(&ctx.source.path).await?;

        let candidates: Vec<(u32, String)> = blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Title && !b.text.trim().is_empty())
            .take(MAX_CANDIDATES)
            .map(|b| (b.page, b.text.trim().to_string()))
            .collect();

        let toc = if candidates.is_empty() {
            debug!(target: "gri.pass.a", "no heading candidates; single-section fallback");
            Toc::single_section(&ctx.source.source_id, page_count)
        } else {
            ctx.check_cancelled()?;
            // A reply whose sections all fall outside the page range is as
            // TOC-less as an empty reply: build_toc drops them and the
            // single-section fallback applies to the result, not just the
            // raw reply.
            let recognized = self
                .recognize(ctx, &candidates)
                .await?
                .map(|sections| build_toc(sections, page_count))
                .filter(|toc| !toc.sections.is_empty());
            match recognized {
                Some(toc) => toc,
                None => {
                    warn!(target: "gri.pass.a", "model returned no usable sections; single-section fallback");
                    Toc::single_section(&ctx.source.source_id, page_count)
                }
            }
        };

        let processed_count = toc.sections.len() as u64;
        let mut metrics = std::collections::BTreeMap::new();
        metrics.insert("page_count".to_string(), serde_json::json!(page_count));
        metrics.insert(
            "candidate_count".to_string(),
            serde_json::json!(candidates.len()),
        );

        Ok(PassOutput {
            processed_count,
            artifacts: vec![ArtifactPayload::json(TOC_JSON, &toc)],
            skipped: false,
            metrics,
        })
    }
}

impl TocParsePass {
    /// Ask the language model to structure the candidate headings.
    ///
    /// Transient model failures are retried per policy; a reply that is not
    /// the expected JSON yields `None` so the caller can fall back rather
    /// than fail a structurally-valid document.
    async fn recognize(
        &self,
        ctx: &PassContext,
        candidates: &[(u32, String)],
    ) -> Result<Option<Vec<ModelSection>>, IngestError> {
        let prompt = build_prompt(&ctx.source.source_id, candidates);
        let config = LlmConfig {
            temperature: Some(0.0),
            ..LlmConfig::default()
        };
        let reply = ctx
            .retry
            .run("toc-recognition", || {
                let prompt = prompt.clone();
                let config = config.clone();
                let llm = ctx.adapters.llm.clone();
                async move { llm.complete(&prompt, &config).await }
            })
            .await?;

        match serde_json::from_str::<Vec<ModelSection>>(reply.trim()) {
            Ok(sections) => Ok(Some(sections)),
            Err(e) => {
                warn!(target: "gri.pass.a", error = %e, "model reply was not valid section json");
                Ok(None)
            }
        }
    }
}

/// The heading-recognition prompt. Candidates are one per line in a fixed
/// format so replies stay parseable and runs stay deterministic.
fn build_prompt(source_id: &str, candidates: &[(u32, String)]) -> String {
    let mut prompt = String::with_capacity(candidates.len() * 32 + 256);
    prompt.push_str(
        "You are given candidate headings from a TTRPG rulebook, one per line.\n\
         Return a JSON array of sections, each {\"title\", \"start_page\", \"depth\"},\n\
         in reading order. Merge duplicate headings; depth 0 is top level.\n\n",
    );
    prompt.push_str(&format!("Document: {source_id}\n\nCandidates:\n"));
    for (page, title) in candidates {
        prompt.push_str(&format!("- [page {page}] {title}\n"));
    }
    prompt
}

/// Turn model sections into a [`Toc`]: sort by page, derive end pages from
/// the next section at the same or shallower depth, wire parent links.
fn build_toc(mut sections: Vec<ModelSection>, page_count: u32) -> Toc {
    sections.sort_by(|a, b| a.start_page.cmp(&b.start_page).then(a.depth.cmp(&b.depth)));
    sections.retain(|s| s.start_page >= 1 && s.start_page <= page_count.max(1));

    let mut out: Vec<TocSection> = Vec::with_capacity(sections.len());
    for (i, section) in sections.iter().enumerate() {
        // The section ends where the next section at the same or a
        // shallower depth begins.
        let end_page = sections[i + 1..]
            .iter()
            .find(|n| n.depth <= section.depth)
            .map(|n| n.start_page.saturating_sub(1))
            .unwrap_or(page_count)
            .max(section.start_page);

        let parent_id = out
            .iter()
            .rev()
            .find(|p| p.depth < section.depth)
            .map(|p| p.section_id.clone());

        out.push(TocSection {
            section_id: section_id_for(i, &section.title),
            title: section.title.clone(),
            start_page: section.start_page,
            end_page,
            depth: section.depth,
            parent_id,
        });
    }
    Toc { sections: out }
}
