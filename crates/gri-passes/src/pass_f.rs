// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass F — finalizer.
//!
//! Enforces the integrity checks before the job may claim success: chunk
//! counts must match the manifest record, a non-empty source must have
//! produced chunks, Pass D must cover every chunk, and the audit chain
//! must verify end-to-end. Also purges obsoleted chunks from the vector
//! sink on delta runs, sweeps orphaned `.tmp` files, and writes the
//! aggregate run summary.

use crate::context::{PassContext, store_err};
use crate::{
    ArtifactPayload, CHUNKS_JSONL, DELTA_PLAN_JSON, GRAPH_DELTA_JSON, Pass, PassOutput,
    RUN_SUMMARY_JSON, VECTORS_JSONL,
};
use async_trait::async_trait;
use gri_core::{GraphDelta, ObsoletePolicy, PassId};
use gri_delta::DeltaDecision;
use gri_error::{ErrorCode, IngestError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// The `run_summary.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Owning job.
    pub job_id: String,
    /// Source document id.
    pub source_id: String,
    /// Chunks produced by Pass C.
    pub chunk_count: u64,
    /// Vector records produced by Pass D.
    pub vector_count: u64,
    /// Nodes upserted by Pass E.
    pub graph_node_count: u64,
    /// Edges upserted by Pass E.
    pub graph_edge_count: u64,
    /// Chunks purged from the vector sink (delta runs).
    pub purged_chunk_count: u64,
    /// Orphaned `.tmp` files removed.
    pub swept_tmp_count: u64,
    /// Per-pass processed counts, keyed by pass letter.
    pub pass_processed: BTreeMap<String, u64>,
    /// Integrity checks performed.
    pub checks_passed: u64,
}

/// Pass F implementation.
pub struct FinalizePass;

#[async_trait]
impl Pass for FinalizePass {
    fn id(&self) -> PassId {
        PassId::F
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[
            (PassId::C, CHUNKS_JSONL),
            (PassId::D, VECTORS_JSONL),
            (PassId::E, GRAPH_DELTA_JSON),
        ]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[RUN_SUMMARY_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let manifest = ctx.shared.manifest().ok_or_else(|| {
            IngestError::new(ErrorCode::Internal, "finalizer requires a manifest snapshot")
        })?;

        let chunks = ctx.read_chunks()?;
        let records = ctx.read_vectors()?;
        let graph: GraphDelta = ctx.read_json_artifact(PassId::E, GRAPH_DELTA_JSON)?;
        let delta_plan = ctx
            .read_json_artifact::<DeltaDecision>(PassId::C, DELTA_PLAN_JSON)
            .ok();
        let is_selective_delta =
            matches!(delta_plan, Some(DeltaDecision::Selective(_)));

        let mut checks_passed = 0u64;

        // Recorded counts must reflect real work: lines on disk equal the
        // manifest's processed_count for Pass C.
        let recorded = manifest.processed_count(PassId::C);
        if chunks.len() as u64 != recorded {
            return Err(IngestError::new(
                ErrorCode::IntegrityViolation,
                format!(
                    "chunks.jsonl has {} lines but the manifest recorded {recorded}",
                    chunks.len()
                ),
            ));
        }
        checks_passed += 1;

        // A pass claiming success with zero work on a non-empty source is
        // a contract violation (stubbed passes are forbidden).
        if recorded == 0 && ctx.source.size_bytes > 0 && !is_selective_delta {
            return Err(IngestError::new(
                ErrorCode::IntegrityViolation,
                "pass C claimed success with zero chunks on a non-empty source",
            ));
        }
        checks_passed += 1;

        // Every chunk must have been enriched.
        if records.len() != chunks.len() {
            return Err(IngestError::new(
                ErrorCode::IntegrityViolation,
                format!("{} chunks but {} vector records", chunks.len(), records.len()),
            ));
        }
        checks_passed += 1;

        // The audit chain must verify end-to-end.
        let audit_path = ctx.job_dir.join(gri_manifest::AUDIT_FILE);
        gri_manifest::verify_log(&audit_path).map_err(|e| {
            IngestError::new(ErrorCode::AuditChainBroken, "audit log failed verification")
                .with_source(e)
        })?;
        checks_passed += 1;

        // Purge obsoleted chunks from the vector sink on delta runs.
        let purged = self.purge_obsolete(ctx, delta_plan.as_ref()).await?;

        // Clean up anything a crashed writer left behind.
        let swept = ctx.store.sweep_tmp(&ctx.job_dir).map_err(store_err)? as u64;

        let pass_processed: BTreeMap<String, u64> = manifest
            .phases
            .iter()
            .map(|p| (p.as_str().to_string(), manifest.processed_count(*p)))
            .collect();

        let summary = RunSummary {
            job_id: manifest.job_id.clone(),
            source_id: manifest.source_id.clone(),
            chunk_count: chunks.len() as u64,
            vector_count: records.len() as u64,
            graph_node_count: graph.nodes_upsert.len() as u64,
            graph_edge_count: graph.edges_upsert.len() as u64,
            purged_chunk_count: purged,
            swept_tmp_count: swept,
            pass_processed,
            checks_passed,
        };

        info!(
            target: "gri.pass.f",
            chunks = summary.chunk_count,
            vectors = summary.vector_count,
            purged,
            swept,
            "finalization complete"
        );

        let mut metrics = BTreeMap::new();
        metrics.insert("chunk_count".to_string(), serde_json::json!(summary.chunk_count));
        metrics.insert("vector_count".to_string(), serde_json::json!(summary.vector_count));
        metrics.insert(
            "graph_node_count".to_string(),
            serde_json::json!(summary.graph_node_count),
        );
        metrics.insert(
            "graph_edge_count".to_string(),
            serde_json::json!(summary.graph_edge_count),
        );
        metrics.insert("purged_chunk_count".to_string(), serde_json::json!(purged));

        Ok(PassOutput {
            processed_count: checks_passed,
            artifacts: vec![ArtifactPayload::json(RUN_SUMMARY_JSON, &summary)],
            skipped: false,
            metrics,
        })
    }
}

impl FinalizePass {
    /// Remove (or soft-mark) the prior run's chunks for changed and
    /// obsoleted sections. Chunks re-written with identical content keep
    /// their ids and stay live.
    async fn purge_obsolete(
        &self,
        ctx: &PassContext,
        delta_plan: Option<&DeltaDecision>,
    ) -> Result<u64, IngestError> {
        let Some(DeltaDecision::Selective(plan)) = delta_plan else {
            return Ok(0);
        };
        let stale: std::collections::BTreeSet<&str> = plan
            .obsolete_section_ids
            .iter()
            .chain(plan.changed_section_ids.iter())
            .map(String::as_str)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let Some(prior_chunks) = ctx.read_prior_chunks()? else {
            warn!(target: "gri.pass.f", "stale sections but no prior chunks to purge");
            return Ok(0);
        };
        let current_ids: std::collections::BTreeSet<String> = ctx
            .read_chunks()?
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        let ids: Vec<String> = prior_chunks
            .iter()
            .filter(|c| stale.contains(c.section_id.as_str()))
            .filter(|c| !current_ids.contains(&c.chunk_id))
            .map(|c| c.chunk_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        ctx.check_cancelled()?;
        let sink = ctx.adapters.vector_sink.clone();
        let policy = ctx.policy.obsolete_policy;
        let ids_for_sink = ids.clone();
        ctx.retry
            .run("purge-obsolete", move || {
                let sink = sink.clone();
                let ids = ids_for_sink.clone();
                async move {
                    match policy {
                        ObsoletePolicy::SoftMark => sink.mark_obsolete(&ids).await,
                        ObsoletePolicy::HardDelete => sink.delete(&ids).await,
                    }
                }
            })
            .await?;

        info!(
            target: "gri.pass.f",
            purged = ids.len(),
            policy = ?policy,
            "obsolete chunks purged from vector sink"
        );
        Ok(ids.len() as u64)
    }
}
