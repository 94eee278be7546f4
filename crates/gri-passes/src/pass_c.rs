// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass C — content extraction.
//!
//! Extracts text/layout blocks, buckets them by TOC section, and computes
//! page and section fingerprints. On delta-eligible runs it loads the
//! prior run's fingerprints, resolves the delta plan, and narrows chunking
//! to the changed sections.
//!
//! When Pass B split the document, extraction iterates the part documents
//! instead of the original source: each part is extracted standalone, its
//! part-relative pages are offset back into document coordinates, and the
//! chunk count aggregates across parts. Unsplit sources extract in one
//! shot.

use crate::context::PassContext;
use crate::pass_b::SplitIndex;
use crate::{
    ArtifactPayload, CHUNKS_JSONL, DELTA_PLAN_JSON, PAGE_FINGERPRINTS_JSON, Pass, PassOutput,
    SPLIT_INDEX_JSON, TOC_JSON,
};
use async_trait::async_trait;
use gri_adapters::{BlockKind, ExtractedBlock};
use gri_core::toc::FingerprintSet;
use gri_core::{Chunk, ChunkKind, PageFingerprint, PageSpan, PassId, SectionFingerprint, Toc};
use gri_delta::{DEFAULT_SIMILARITY_THRESHOLD, DeltaDecision};
use gri_error::{ErrorCode, IngestError};
use gri_fingerprint::{page_sha, section_sha};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Pass C implementation.
pub struct ExtractPass;

#[async_trait]
impl Pass for ExtractPass {
    fn id(&self) -> PassId {
        PassId::C
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[(PassId::A, TOC_JSON), (PassId::B, SPLIT_INDEX_JSON)]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[CHUNKS_JSONL, PAGE_FINGERPRINTS_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let toc: Toc = ctx.read_toc()?;
        let split: SplitIndex = ctx.read_json_artifact(PassId::B, SPLIT_INDEX_JSON)?;
        let (page_count, blocks) = self.extract_blocks(ctx, &split).await?;

        // Group block text by page; pages the extractor yielded nothing
        // for still get a fingerprint over empty text.
        let mut by_page: BTreeMap<u32, Vec<&ExtractedBlock>> = BTreeMap::new();
        for block in &blocks {
            by_page.entry(block.page).or_default().push(block);
        }

        ctx.check_cancelled()?;
        let mut page_shas: BTreeMap<u32, String> = BTreeMap::new();
        let mut pages: Vec<PageFingerprint> = Vec::with_capacity(page_count as usize);
        for page in 1..=page_count {
            let text = by_page
                .get(&page)
                .map(|blocks| {
                    blocks
                        .iter()
                        .map(|b| b.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            let sha = page_sha(&text);
            page_shas.insert(page, sha.clone());
            pages.push(PageFingerprint {
                page_number: page,
                page_sha: sha,
                section_id: toc.section_for_page(page).map(|s| s.section_id.clone()),
            });
        }

        let sections: Vec<SectionFingerprint> = toc
            .sections
            .iter()
            .map(|section| {
                let end = section.end_page.min(page_count);
                let ordered: Vec<String> = (section.start_page..=end)
                    .filter_map(|p| page_shas.get(&p).cloned())
                    .collect();
                SectionFingerprint {
                    section_id: section.section_id.clone(),
                    title: section.title.clone(),
                    page_range: PageSpan {
                        start: section.start_page,
                        end,
                    },
                    section_sha: section_sha(&ordered),
                    depth: section.depth,
                    parent_id: section.parent_id.clone(),
                }
            })
            .collect();

        let fingerprints = FingerprintSet {
            pages,
            sections: sections.clone(),
        };

        // Delta narrowing: only when a prior run's fingerprints exist.
        let (scope, delta_artifact, delta_metrics) =
            self.resolve_delta(ctx, &sections)?;

        ctx.check_cancelled()?;
        let mut chunks: Vec<Chunk> = Vec::new();
        for section in &toc.sections {
            if let Some(scope) = &scope
                && !scope.contains(section.section_id.as_str())
            {
                continue;
            }
            let mut ordinal = 0u32;
            for page in section.start_page..=section.end_page.min(page_count) {
                // A chunk belongs to the deepest section covering its page;
                // parents skip pages their children own.
                let owner = toc.section_for_page(page);
                if owner.map(|s| s.section_id.as_str()) != Some(section.section_id.as_str()) {
                    continue;
                }
                let Some(page_blocks) = by_page.get(&page) else {
                    continue;
                };
                for block in page_blocks {
                    let text = block.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    chunks.push(Chunk::new(
                        ctx.source.source_id.clone(),
                        section.section_id.clone(),
                        PageSpan::single(page),
                        text,
                        chunk_kind(block.kind),
                        ordinal,
                    ));
                    ordinal += 1;
                }
            }
        }

        let processed_count = chunks.len() as u64;
        // Integrity gate: a non-empty source that yields zero chunks on a
        // full extraction is a hard failure, not a quiet success.
        if processed_count == 0 && ctx.source.size_bytes > 0 && scope.is_none() {
            return Err(IngestError::new(
                ErrorCode::IntegrityViolation,
                "extraction produced zero chunks from a non-empty source",
            ));
        }

        let mut jsonl = String::new();
        for chunk in &chunks {
            jsonl.push_str(&serde_json::to_string(chunk).expect("chunk serializes"));
            jsonl.push('\n');
        }

        let mut artifacts = vec![
            ArtifactPayload::new(CHUNKS_JSONL, jsonl.into_bytes()),
            ArtifactPayload::json(PAGE_FINGERPRINTS_JSON, &fingerprints),
        ];
        if let Some(delta) = delta_artifact {
            artifacts.push(delta);
        }

        info!(
            target: "gri.pass.c",
            chunks = processed_count,
            pages = page_count,
            sections = sections.len(),
            narrowed = scope.is_some(),
            "extraction complete"
        );

        let mut metrics = delta_metrics;
        metrics.insert("page_count".to_string(), serde_json::json!(page_count));
        metrics.insert("section_count".to_string(), serde_json::json!(sections.len()));
        if !split.parts.is_empty() {
            metrics.insert("part_count".to_string(), serde_json::json!(split.parts.len()));
        }

        Ok(PassOutput {
            processed_count,
            artifacts,
            skipped: false,
            metrics,
        })
    }
}

impl ExtractPass {
    /// Extract the document's blocks in document coordinates.
    ///
    /// A split source is read part by part from Pass B's artifacts — never
    /// from the original file — with each part's 1-based pages offset by
    /// the part's start page. An unsplit source extracts in one shot.
    async fn extract_blocks(
        &self,
        ctx: &PassContext,
        split: &SplitIndex,
    ) -> Result<(u32, Vec<ExtractedBlock>), IngestError> {
        if split.parts.is_empty() {
            let page_count = ctx.adapters.extractor.page_count(&ctx.source.path).await?;
            let blocks = ctx.adapters.extractor.extract(&ctx.source.path).await?;
            return Ok((page_count, blocks));
        }

        let mut blocks: Vec<ExtractedBlock> = Vec::new();
        for part in &split.parts {
            ctx.check_cancelled()?;
            if !ctx.store.artifact_exists(&ctx.job_dir, PassId::B, &part.file) {
                return Err(IngestError::new(
                    ErrorCode::ArtifactMissing,
                    format!("split part {} is missing", part.file),
                ));
            }
            let part_path = ctx.store.artifact_path(&ctx.job_dir, PassId::B, &part.file);
            let mut part_blocks = ctx.adapters.extractor.extract(&part_path).await?;
            for block in &mut part_blocks {
                // Part pages are 1-based within the part document.
                block.page = block.page + part.start_page - 1;
            }
            debug!(
                target: "gri.pass.c",
                part = part.index,
                blocks = part_blocks.len(),
                "extracted part"
            );
            blocks.extend(part_blocks);
        }
        let page_count = split.parts.last().map(|p| p.end_page).unwrap_or(0);
        Ok((page_count, blocks))
    }

    /// Load prior fingerprints and resolve the delta plan, when a prior
    /// job exists and the policy allows deltas.
    #[allow(clippy::type_complexity)]
    fn resolve_delta(
        &self,
        ctx: &PassContext,
        current_sections: &[SectionFingerprint],
    ) -> Result<
        (
            Option<BTreeSet<String>>,
            Option<ArtifactPayload>,
            BTreeMap<String, serde_json::Value>,
        ),
        IngestError,
    > {
        let mut metrics = BTreeMap::new();
        if !ctx.policy.allow_delta || ctx.prior_job_dir.is_none() {
            return Ok((None, None, metrics));
        }
        let prior =
            ctx.read_prior_json::<FingerprintSet>(PassId::C, PAGE_FINGERPRINTS_JSON)?;
        let Some(prior) = prior else {
            warn!(target: "gri.pass.c", "prior job has no fingerprints; full extraction");
            return Ok((None, None, metrics));
        };

        let decision = gri_delta::plan(
            current_sections,
            &prior.sections,
            DEFAULT_SIMILARITY_THRESHOLD,
            ctx.policy.full_rebuild_threshold,
        );
        let artifact = ArtifactPayload::json(DELTA_PLAN_JSON, &decision);

        match decision {
            DeltaDecision::Selective(plan) => {
                metrics.insert(
                    "changed_sections".to_string(),
                    serde_json::json!(plan.changed_section_ids),
                );
                metrics.insert(
                    "obsolete_sections".to_string(),
                    serde_json::json!(plan.obsolete_section_ids),
                );
                metrics.insert(
                    "unchanged_sections".to_string(),
                    serde_json::json!(plan.unchanged_section_ids.len()),
                );
                let scope: BTreeSet<String> = plan.changed_section_ids.into_iter().collect();
                debug!(target: "gri.pass.c", changed = scope.len(), "delta narrowing active");
                Ok((Some(scope), Some(artifact), metrics))
            }
            DeltaDecision::FullRebuild { .. } => {
                metrics.insert("delta_fallback".to_string(), serde_json::json!("full_rebuild"));
                Ok((None, Some(artifact), metrics))
            }
        }
    }
}

fn chunk_kind(kind: BlockKind) -> ChunkKind {
    match kind {
        BlockKind::Title => ChunkKind::Title,
        BlockKind::Paragraph => ChunkKind::Paragraph,
        BlockKind::List => ChunkKind::List,
        BlockKind::Table => ChunkKind::Table,
        BlockKind::ImageCaption => ChunkKind::ImageCaption,
    }
}
