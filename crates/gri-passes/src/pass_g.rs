// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass G — post-hoc validation.
//!
//! Re-checks counts, coverage, and structural invariants against the
//! artifacts and the (read-only) sink states, then writes
//! `validation_report.json` with a verdict. The orchestrator maps the
//! verdict to the job's final status: structural violations fail the job,
//! weak page coverage demotes it to `SUCCEEDED_WITH_WARNINGS` per the
//! policy thresholds.

use crate::context::PassContext;
use crate::{
    ArtifactPayload, CHUNKS_JSONL, DELTA_PLAN_JSON, GRAPH_DELTA_JSON, Pass, PassOutput,
    PAGE_FINGERPRINTS_JSON, RUN_SUMMARY_JSON, VALIDATION_REPORT_JSON, VECTORS_JSONL,
};
use async_trait::async_trait;
use gri_core::toc::FingerprintSet;
use gri_core::{GraphDelta, PassId};
use gri_delta::DeltaDecision;
use gri_error::{ErrorCode, IngestError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Verdict of the validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// All checks passed at full strength.
    Ok,
    /// Structure holds but quality is degraded (weak coverage).
    Warn,
    /// A structural invariant is violated; the job must fail.
    Fail,
}

/// One validation check's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Check name.
    pub name: String,
    /// Whether the check held.
    pub ok: bool,
    /// Human-readable detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The `validation_report.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Overall verdict.
    pub verdict: Verdict,
    /// Fraction of considered pages with at least one chunk.
    pub page_coverage: f64,
    /// Individual check outcomes.
    pub checks: Vec<CheckOutcome>,
    /// Live vector-sink count at validation time.
    pub vector_sink_count: u64,
    /// Graph-sink node count at validation time.
    pub graph_node_count: u64,
    /// Graph-sink edge count at validation time.
    pub graph_edge_count: u64,
}

/// Pass G implementation.
pub struct ValidatePass;

#[async_trait]
impl Pass for ValidatePass {
    fn id(&self) -> PassId {
        PassId::G
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[
            (PassId::C, CHUNKS_JSONL),
            (PassId::C, PAGE_FINGERPRINTS_JSON),
            (PassId::D, VECTORS_JSONL),
            (PassId::E, GRAPH_DELTA_JSON),
            (PassId::F, RUN_SUMMARY_JSON),
        ]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[VALIDATION_REPORT_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let manifest = ctx.shared.manifest().ok_or_else(|| {
            IngestError::new(ErrorCode::Internal, "validator requires a manifest snapshot")
        })?;
        let chunks = ctx.read_chunks()?;
        let records = ctx.read_vectors()?;
        let fingerprints: FingerprintSet =
            ctx.read_json_artifact(PassId::C, PAGE_FINGERPRINTS_JSON)?;
        let graph: GraphDelta = ctx.read_json_artifact(PassId::E, GRAPH_DELTA_JSON)?;
        let delta_plan = ctx
            .read_json_artifact::<DeltaDecision>(PassId::C, DELTA_PLAN_JSON)
            .ok();

        let mut checks: Vec<CheckOutcome> = Vec::new();
        let mut check = |name: &str, ok: bool, detail: Option<String>| {
            checks.push(CheckOutcome {
                name: name.to_string(),
                ok,
                detail,
            });
        };

        let recorded = manifest.processed_count(PassId::C);
        check(
            "chunk_count_matches_manifest",
            chunks.len() as u64 == recorded,
            Some(format!("{} on disk, {recorded} recorded", chunks.len())),
        );
        check(
            "vector_count_matches_chunks",
            records.len() == chunks.len(),
            Some(format!("{} vectors, {} chunks", records.len(), chunks.len())),
        );

        // Every graph edge endpoint must be resolvable against the sink.
        let committed = ctx.adapters.graph_sink.committed_node_ids().await?;
        let dangling = graph.validate_edges(&committed).err().unwrap_or_default();
        check(
            "graph_edges_resolve",
            dangling.is_empty(),
            (!dangling.is_empty()).then(|| format!("dangling: {}", dangling.join(", "))),
        );

        // The sink must hold at least as many live vectors as this run
        // produced (idempotent upserts may have been replayed).
        let vector_sink_count = ctx.adapters.vector_sink.count().await?;
        check(
            "vector_sink_covers_run",
            vector_sink_count >= chunks.len() as u64,
            Some(format!("{vector_sink_count} live in sink")),
        );

        let page_coverage = coverage(&fingerprints, &chunks, delta_plan.as_ref());
        let thresholds = ctx.policy.validation_thresholds;
        let structural_ok = checks.iter().all(|c| c.ok);
        let verdict = if !structural_ok || page_coverage < thresholds.min_page_coverage_fail {
            Verdict::Fail
        } else if page_coverage < thresholds.min_page_coverage_warn {
            Verdict::Warn
        } else {
            Verdict::Ok
        };

        if verdict != Verdict::Ok {
            warn!(
                target: "gri.pass.g",
                ?verdict,
                page_coverage,
                "validation found issues"
            );
        }

        let report = ValidationReport {
            verdict,
            page_coverage,
            checks,
            vector_sink_count,
            graph_node_count: ctx.adapters.graph_sink.node_count().await?,
            graph_edge_count: ctx.adapters.graph_sink.edge_count().await?,
        };

        info!(target: "gri.pass.g", ?verdict, page_coverage, "validation complete");
        let mut metrics = std::collections::BTreeMap::new();
        metrics.insert("verdict".to_string(), serde_json::to_value(verdict).expect("verdict serializes"));
        metrics.insert("page_coverage".to_string(), serde_json::json!(page_coverage));

        Ok(PassOutput {
            processed_count: report.checks.len() as u64,
            artifacts: vec![ArtifactPayload::json(VALIDATION_REPORT_JSON, &report)],
            skipped: false,
            metrics,
        })
    }
}

/// Fraction of considered pages carrying at least one chunk.
///
/// On selective delta runs only the changed sections' pages are
/// considered — the rest were deliberately not re-processed.
fn coverage(
    fingerprints: &FingerprintSet,
    chunks: &[gri_core::Chunk],
    delta_plan: Option<&DeltaDecision>,
) -> f64 {
    let changed_scope: Option<BTreeSet<&str>> = match delta_plan {
        Some(DeltaDecision::Selective(plan)) => Some(
            plan.changed_section_ids
                .iter()
                .map(String::as_str)
                .collect(),
        ),
        _ => None,
    };

    let considered: Vec<u32> = fingerprints
        .pages
        .iter()
        .filter(|p| match (&changed_scope, &p.section_id) {
            (Some(scope), Some(section)) => scope.contains(section.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        })
        .map(|p| p.page_number)
        .collect();
    if considered.is_empty() {
        return 1.0;
    }

    let covered: BTreeSet<u32> = chunks
        .iter()
        .flat_map(|c| c.page_span.start..=c.page_span.end)
        .collect();
    let hit = considered.iter().filter(|p| covered.contains(p)).count();
    hit as f64 / considered.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use gri_core::{Chunk, ChunkKind, PageFingerprint, PageSpan};

    fn fingerprints(pages: &[(u32, Option<&str>)]) -> FingerprintSet {
        FingerprintSet {
            pages: pages
                .iter()
                .map(|(n, section)| PageFingerprint {
                    page_number: *n,
                    page_sha: "x".repeat(64),
                    section_id: section.map(String::from),
                })
                .collect(),
            sections: vec![],
        }
    }

    fn chunk_on(page: u32) -> Chunk {
        Chunk::new("s", "sec-0", PageSpan::single(page), "text", ChunkKind::Paragraph, 0)
    }

    #[test]
    fn full_coverage_is_one() {
        let fp = fingerprints(&[(1, Some("sec-0")), (2, Some("sec-0"))]);
        let chunks = vec![chunk_on(1), chunk_on(2)];
        assert!((coverage(&fp, &chunks, None) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn uncovered_pages_reduce_coverage() {
        let fp = fingerprints(&[(1, Some("sec-0")), (2, Some("sec-0")), (3, Some("sec-0")), (4, Some("sec-0"))]);
        let chunks = vec![chunk_on(1), chunk_on(2)];
        assert!((coverage(&fp, &chunks, None) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn selective_delta_considers_changed_sections_only() {
        let fp = fingerprints(&[(1, Some("sec-0")), (2, Some("sec-1")), (3, Some("sec-1"))]);
        let plan = DeltaDecision::Selective(gri_delta::DeltaPlan {
            changed_section_ids: vec!["sec-1".to_string()],
            obsolete_section_ids: vec![],
            unchanged_section_ids: vec!["sec-0".to_string()],
        });
        let chunks = vec![chunk_on(2), chunk_on(3)];
        assert!((coverage(&fp, &chunks, Some(&plan)) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_consideration_set_counts_as_full() {
        let fp = fingerprints(&[]);
        assert!((coverage(&fp, &[], None) - 1.0).abs() < f64::EPSILON);
    }
}
