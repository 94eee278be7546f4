// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass B — logical splitter.
//!
//! Sources strictly larger than the split threshold are partitioned into
//! section-aligned parts; smaller sources skip the pass (recording an
//! empty split index). Parts tile the source's page range exactly: no
//! page is lost and none is duplicated, and every part carries the parent
//! `source_id`.

use crate::context::PassContext;
use crate::{ArtifactPayload, Pass, PassOutput, SPLIT_INDEX_JSON, TOC_JSON};
use async_trait::async_trait;
use gri_core::{PassId, Toc};
use gri_error::{ErrorCode, IngestError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One section-aligned part of a split source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPart {
    /// Zero-based part index.
    pub index: u32,
    /// Artifact name of the part document (relative to the pass dir).
    pub file: String,
    /// First page of the part (1-based).
    pub start_page: u32,
    /// Last page of the part (1-based, inclusive).
    pub end_page: u32,
    /// Top-level sections whose content lives in this part.
    pub section_ids: Vec<String>,
}

/// The `split_index.json` artifact: sections → parts. Empty when the
/// source was below the split threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndex {
    /// Parent document id, preserved on every part.
    pub source_id: String,
    /// Parts in page order.
    pub parts: Vec<SplitPart>,
}

/// Pass B implementation.
pub struct LogicalSplitPass;

#[async_trait]
impl Pass for LogicalSplitPass {
    fn id(&self) -> PassId {
        PassId::B
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[(PassId::A, TOC_JSON)]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[SPLIT_INDEX_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;

        // Strictly greater-than triggers the split; a source exactly at the
        // threshold is not split.
        if ctx.source.size_bytes <= ctx.policy.split_threshold_bytes {
            debug!(
                target: "gri.pass.b",
                size = ctx.source.size_bytes,
                threshold = ctx.policy.split_threshold_bytes,
                "below split threshold; skipping"
            );
            let index = SplitIndex {
                source_id: ctx.source.source_id.clone(),
                parts: Vec::new(),
            };
            return Ok(PassOutput {
                processed_count: 0,
                artifacts: vec![ArtifactPayload::json(SPLIT_INDEX_JSON, &index)],
                skipped: true,
                metrics: Default::default(),
            });
        }

        let toc: Toc = ctx.read_toc()?;
        let page_count = ctx.adapters.extractor.page_count(&ctx.source.path).await?;
        let parts = plan_parts(
            &toc,
            page_count,
            ctx.source.size_bytes,
            ctx.policy.split_threshold_bytes,
        )?;

        let mut artifacts = Vec::with_capacity(parts.len() + 1);
        for part in &parts {
            ctx.check_cancelled()?;
            let bytes = ctx
                .adapters
                .extractor
                .slice_pages(&ctx.source.path, part.start_page, part.end_page)
                .await?;
            artifacts.push(ArtifactPayload::new(part.file.clone(), bytes));
        }

        let index = SplitIndex {
            source_id: ctx.source.source_id.clone(),
            parts: parts.clone(),
        };
        artifacts.push(ArtifactPayload::json(SPLIT_INDEX_JSON, &index));

        info!(target: "gri.pass.b", parts = parts.len(), page_count, "source split");
        let mut metrics = std::collections::BTreeMap::new();
        metrics.insert("part_count".to_string(), serde_json::json!(parts.len()));

        Ok(PassOutput {
            processed_count: parts.len() as u64,
            artifacts,
            skipped: false,
            metrics,
        })
    }
}

/// Partition the document into page-aligned, section-aligned parts.
///
/// Parts tile `1..=page_count` exactly. Top-level sections are packed
/// greedily until a part's estimated byte size reaches the threshold; a
/// section is never split across parts.
fn plan_parts(
    toc: &Toc,
    page_count: u32,
    size_bytes: u64,
    threshold_bytes: u64,
) -> Result<Vec<SplitPart>, IngestError> {
    if page_count == 0 {
        return Err(IngestError::new(
            ErrorCode::SourceUnreadable,
            "cannot split a document with no pages",
        ));
    }
    let bytes_per_page = (size_bytes / u64::from(page_count)).max(1);
    let capacity_pages = (threshold_bytes / bytes_per_page).max(1) as u32;

    let top_level: Vec<_> = toc.sections.iter().filter(|s| s.depth == 0).collect();

    let mut parts: Vec<SplitPart> = Vec::new();
    let mut part_sections: Vec<String> = Vec::new();
    let mut part_start = 1u32;
    let mut prev_end = 0u32;

    for section in &top_level {
        let section_end = section.end_page.min(page_count).max(part_start);
        let prospective_pages = section_end - part_start + 1;
        // Close the open part before a section that would overflow it; a
        // section is never split across parts, so an oversized section
        // becomes a part of its own.
        if !part_sections.is_empty() && prospective_pages > capacity_pages {
            parts.push(SplitPart {
                index: parts.len() as u32,
                file: format!("parts/{:04}.pdf", parts.len()),
                start_page: part_start,
                end_page: prev_end,
                section_ids: std::mem::take(&mut part_sections),
            });
            part_start = prev_end + 1;
        }
        part_sections.push(section.section_id.clone());
        prev_end = section_end.max(part_start);
    }
    // The final part absorbs any trailing pages the TOC does not name.
    parts.push(SplitPart {
        index: parts.len() as u32,
        file: format!("parts/{:04}.pdf", parts.len()),
        start_page: part_start,
        end_page: page_count,
        section_ids: part_sections,
    });

    verify_tiling(&parts, page_count)?;
    Ok(parts)
}

/// Union of part page ranges must equal the source's page range with no
/// overlap.
fn verify_tiling(parts: &[SplitPart], page_count: u32) -> Result<(), IngestError> {
    let mut expected_start = 1u32;
    for part in parts {
        if part.start_page != expected_start || part.end_page < part.start_page {
            return Err(IngestError::new(
                ErrorCode::Internal,
                format!(
                    "split produced a gap or overlap at part {} (pages {}..={})",
                    part.index, part.start_page, part.end_page
                ),
            ));
        }
        expected_start = part.end_page + 1;
    }
    if expected_start != page_count + 1 {
        return Err(IngestError::new(
            ErrorCode::Internal,
            format!("split covers pages up to {}, source has {page_count}", expected_start - 1),
        ));
    }
    Ok(())
}
