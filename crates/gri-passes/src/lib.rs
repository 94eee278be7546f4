// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! gri-passes
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives shared by the engine and the orchestrator.
pub mod cancel;
/// Per-job execution context handed to every pass.
pub mod context;
/// The sequential pass engine with timeouts and manifest bookkeeping.
pub mod engine;
/// Pass A — TOC parser.
pub mod pass_a;
/// Pass B — logical splitter.
pub mod pass_b;
/// Pass C — content extraction.
pub mod pass_c;
/// Pass D — vector enrichment.
pub mod pass_d;
/// Pass E — graph builder.
pub mod pass_e;
/// Pass F — finalizer.
pub mod pass_f;
/// Pass G — post-hoc validation.
pub mod pass_g;
/// Keyword and entity heuristics shared by Passes D and E.
pub mod text;

use async_trait::async_trait;
use gri_core::PassId;
use gri_error::IngestError;
use std::collections::BTreeMap;

pub use cancel::{CancellationReason, CancellationToken};
pub use context::{PassContext, SharedJobState};
pub use engine::{EngineReport, PassEngine, PassResult};

// ---------------------------------------------------------------------------
// Artifact names (bit-exact; consumers depend on these)
// ---------------------------------------------------------------------------

/// Pass A output: ordered sections.
pub const TOC_JSON: &str = "toc.json";
/// Pass B output: section → part mapping (empty when the split is skipped).
pub const SPLIT_INDEX_JSON: &str = "split_index.json";
/// Pass C output: one chunk per line.
pub const CHUNKS_JSONL: &str = "chunks.jsonl";
/// Pass C output: page and section fingerprints.
pub const PAGE_FINGERPRINTS_JSON: &str = "page_fingerprints.json";
/// Pass C output on delta-eligible runs: the resolved delta plan.
pub const DELTA_PLAN_JSON: &str = "delta_plan.json";
/// Pass D output: chunk id → embedding, keywords, entities.
pub const VECTORS_JSONL: &str = "vectors.jsonl";
/// Pass E output: staged node/edge upserts.
pub const GRAPH_DELTA_JSON: &str = "graph_delta.json";
/// Pass F output: aggregate metrics for the job.
pub const RUN_SUMMARY_JSON: &str = "run_summary.json";
/// Pass G output: quality metrics and verdict.
pub const VALIDATION_REPORT_JSON: &str = "validation_report.json";

// ---------------------------------------------------------------------------
// Pass contract
// ---------------------------------------------------------------------------

/// One artifact a pass hands back to the engine for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPayload {
    /// Name relative to the pass directory; may contain subdirectories.
    pub name: String,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

impl ArtifactPayload {
    /// Build a payload.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Build a payload from a pretty-printed JSON document.
    pub fn json<T: serde::Serialize>(name: impl Into<String>, value: &T) -> Self {
        let bytes = serde_json::to_vec_pretty(value).expect("artifact serializes");
        Self::new(name, bytes)
    }
}

/// What a pass produced. The engine persists the artifacts, transitions the
/// manifest, and appends audit events.
#[derive(Debug, Default)]
pub struct PassOutput {
    /// Units of real work performed. A pass reporting success with zero
    /// work on non-empty input trips the Pass F integrity gate.
    pub processed_count: u64,
    /// Artifacts to persist, in write order.
    pub artifacts: Vec<ArtifactPayload>,
    /// `true` when the pass legitimately declined to run (Pass B below the
    /// split threshold); recorded as `skipped` rather than `succeeded`.
    pub skipped: bool,
    /// Free-form metrics merged into the pass result.
    pub metrics: BTreeMap<String, serde_json::Value>,
}

/// A single pipeline stage with an explicit input/output contract.
///
/// `execute` must be deterministic given identical inputs and
/// configuration: identical inputs produce artifacts with identical SHAs.
/// Side effects on external sinks must be idempotent via stable keys.
#[async_trait]
pub trait Pass: Send + Sync {
    /// Which pass this is.
    fn id(&self) -> PassId;

    /// Prior-pass artifacts this pass reads; verified to exist before
    /// execution.
    fn required_inputs(&self) -> &'static [(PassId, &'static str)];

    /// Artifact names this pass writes.
    fn produced_artifacts(&self) -> &'static [&'static str];

    /// Run the pass.
    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError>;
}
