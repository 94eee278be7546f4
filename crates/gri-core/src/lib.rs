// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! gri-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Grimoire ingestion core.

/// Tamper-evident audit events and the chained-digest computation.
pub mod audit;
/// Extracted chunks and their vector-enriched form.
pub mod chunk;
/// Graph delta model: node/edge upserts with dangling-edge validation.
pub mod graph;
/// Per-job manifest with forward-only pass-state transitions.
pub mod manifest;
/// Document structure: TOC sections and page/section fingerprints.
pub mod toc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use chunk::{Chunk, ChunkKind, PageSpan, VectorRecord, chunk_id};
pub use graph::{EdgeKind, GraphDelta, GraphEdge, GraphNode, NodeKind};
pub use manifest::{ArtifactRef, MANIFEST_VERSION, Manifest, ManifestError, PassState};
pub use toc::{FingerprintSet, PageFingerprint, SectionFingerprint, Toc, TocSection};

// ---------------------------------------------------------------------------
// Pass identifiers
// ---------------------------------------------------------------------------

/// Identifier of one of the seven pipeline passes.
///
/// Passes always execute in alphabetical order within a job; no pass
/// observes another pass's partial state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum PassId {
    /// TOC parser.
    A,
    /// Logical splitter.
    B,
    /// Content extraction.
    C,
    /// Vector enrichment.
    D,
    /// Graph builder.
    E,
    /// Finalizer.
    F,
    /// Post-hoc validation.
    G,
}

impl PassId {
    /// All passes in execution order.
    pub const ALL: [PassId; 7] = [
        PassId::A,
        PassId::B,
        PassId::C,
        PassId::D,
        PassId::E,
        PassId::F,
        PassId::G,
    ];

    /// Single-letter identifier, as recorded in the manifest `phases` list.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
            Self::G => "G",
        }
    }

    /// Name of the pass's artifact directory inside the job directory
    /// (e.g. `pass_C`).
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("pass_{}", self.as_str())
    }

    /// Parse a single-letter pass identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "E" => Some(Self::E),
            "F" => Some(Self::F),
            "G" => Some(Self::G),
            _ => None,
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Environments
// ---------------------------------------------------------------------------

/// Deployment environment a job runs in.
///
/// Job directories are namespaced per environment, and the Gate 0 cache
/// keys on `(source_sha, environment)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development.
    Dev,
    /// Automated test runs.
    Test,
    /// Production.
    Prod,
}

impl Environment {
    /// Lowercase directory / key name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }

    /// Parse a lowercase environment name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dev" => Some(Self::Dev),
            "test" => Some(Self::Test),
            "prod" => Some(Self::Prod),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// The input document for one ingestion job. Immutable per ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// Stable identifier across re-ingests, derived from the canonical
    /// filename (see [`Source::source_id_for`]).
    pub source_id: String,
    /// Absolute filesystem path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
    /// MIME type (always `application/pdf` for rulebook sources).
    pub mime_type: String,
}

impl Source {
    /// Derive the stable `source_id` from a filesystem path.
    ///
    /// The file stem is lowercased and every non-alphanumeric run collapses
    /// to a single underscore, so `Player's Handbook (2024).pdf` and
    /// `players_handbook_2024.pdf` map to the same id.
    #[must_use]
    pub fn source_id_for(path: &std::path::Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "source".to_string());
        let mut id = String::with_capacity(stem.len());
        let mut last_was_sep = true;
        for ch in stem.chars() {
            if ch.is_ascii_alphanumeric() {
                id.push(ch.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep {
                id.push('_');
                last_was_sep = true;
            }
        }
        let id = id.trim_end_matches('_').to_string();
        if id.is_empty() { "source".to_string() } else { id }
    }
}

/// Build a job id for a source at the given instant:
/// `<source_id>_<utc_timestamp>` with a second-resolution, lexically
/// sortable timestamp.
#[must_use]
pub fn job_id_for(source_id: &str, at: DateTime<Utc>) -> String {
    format!("{source_id}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Recover the source id from a job id by stripping the trailing
/// `_YYYYMMDD_HHMMSS` timestamp. Returns `None` for ids that do not carry
/// the expected shape.
#[must_use]
pub fn source_id_from_job_id(job_id: &str) -> Option<&str> {
    // "<source>_YYYYMMDD_HHMMSS": 16 trailing bytes including the leading
    // underscore.
    let (source, suffix) = job_id.split_at_checked(job_id.len().checked_sub(16)?)?;
    let bytes = suffix.as_bytes();
    let shaped = bytes[0] == b'_'
        && bytes[9] == b'_'
        && bytes[1..9].iter().all(u8::is_ascii_digit)
        && bytes[10..].iter().all(u8::is_ascii_digit);
    (shaped && !source.is_empty()).then_some(source)
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// Terminal and non-terminal states of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Admitted, no manifest written yet.
    Created,
    /// Manifest initialized; passes executing.
    Running,
    /// All passes succeeded (or were legitimately skipped).
    Succeeded,
    /// Pass G found non-fatal quality issues.
    SucceededWithWarnings,
    /// A pass failed or an integrity check tripped.
    Failed,
    /// Gate 0 short-circuited the job; no directory was created.
    Bypassed,
    /// Cooperative cancellation or timeout.
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::SucceededWithWarnings => "SUCCEEDED_WITH_WARNINGS",
            Self::Failed => "FAILED",
            Self::Bypassed => "BYPASSED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Per-pass status recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    /// Not started.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Terminated with an error.
    Failed,
    /// Deliberately not executed (Pass B below the split threshold).
    Skipped,
}

impl PassStatus {
    /// Whether the status is terminal for the pass.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Monotone rank used to enforce forward-only transitions.
    #[must_use]
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::Skipped => 2,
        }
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Gate 0
// ---------------------------------------------------------------------------

/// Outcome of the Gate 0 lookup for an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Gate0Decision {
    /// Unchanged source with a successful prior job: reuse it wholesale.
    Bypass {
        /// The prior successful job whose artifacts stand.
        prior_job_id: String,
    },
    /// No usable prior state (or a forced re-run): full pipeline.
    Proceed,
    /// Prior fingerprints exist and deltas are allowed: narrow the work.
    Delta {
        /// The prior successful job providing unchanged artifacts.
        prior_job_id: String,
        /// Section ids that must be re-processed.
        changed_sections: Vec<String>,
    },
}

impl Gate0Decision {
    /// Short tag for logs and the manifest (`bypass` / `proceed` / `delta`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bypass { .. } => "bypass",
            Self::Proceed => "proceed",
            Self::Delta { .. } => "delta",
        }
    }
}

// ---------------------------------------------------------------------------
// Requests, policy, results
// ---------------------------------------------------------------------------

/// How obsoleted chunks are treated in the vector sink after a delta ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObsoletePolicy {
    /// Flag the entries as obsolete but keep them queryable for audit.
    #[default]
    SoftMark,
    /// Remove the entries from the sink.
    HardDelete,
}

/// Severity thresholds applied by Pass G's validation report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationThresholds {
    /// Page coverage below this fraction demotes the job to
    /// `SUCCEEDED_WITH_WARNINGS`.
    pub min_page_coverage_warn: f64,
    /// Page coverage below this fraction fails the job outright.
    pub min_page_coverage_fail: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_page_coverage_warn: 0.9,
            min_page_coverage_fail: 0.5,
        }
    }
}

/// Per-request knobs controlling Gate 0, splitting, deltas, and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IngestPolicy {
    /// Ignore Gate 0 state and run the full pipeline.
    #[serde(default)]
    pub force_full: bool,
    /// Permit section-level delta re-processing when prior fingerprints exist.
    #[serde(default = "default_true")]
    pub allow_delta: bool,
    /// Pass B splits the source when strictly larger than this.
    #[serde(default = "default_split_threshold")]
    pub split_threshold_bytes: u64,
    /// Delta fraction at or above which the planner falls back to a full
    /// rebuild (inclusive boundary).
    #[serde(default = "default_full_rebuild_threshold")]
    pub full_rebuild_threshold: f64,
    /// Per-pass timeout overrides in milliseconds; passes not listed use
    /// the engine defaults.
    #[serde(default)]
    pub per_pass_timeouts_ms: BTreeMap<PassId, u64>,
    /// Pass B may only split on page boundaries.
    #[serde(default = "default_true")]
    pub split_must_be_page_aligned: bool,
    /// Treatment of obsoleted chunks after a delta ingest.
    #[serde(default)]
    pub obsolete_policy: ObsoletePolicy,
    /// Pass G severity thresholds.
    #[serde(default)]
    pub validation_thresholds: ValidationThresholds,
    /// Embedding batch size for Pass D.
    #[serde(default = "default_vector_batch")]
    pub vector_batch_size: usize,
    /// When a job for the same `(source_sha, environment)` is already
    /// running: `true` blocks until it completes, `false` returns
    /// `AlreadyInProgress`.
    #[serde(default = "default_true")]
    pub wait_for_inflight: bool,
}

fn default_true() -> bool {
    true
}

fn default_split_threshold() -> u64 {
    26_214_400
}

fn default_full_rebuild_threshold() -> f64 {
    0.5
}

fn default_vector_batch() -> usize {
    32
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            force_full: false,
            allow_delta: true,
            split_threshold_bytes: default_split_threshold(),
            full_rebuild_threshold: default_full_rebuild_threshold(),
            per_pass_timeouts_ms: BTreeMap::new(),
            split_must_be_page_aligned: true,
            obsolete_policy: ObsoletePolicy::default(),
            validation_thresholds: ValidationThresholds::default(),
            vector_batch_size: default_vector_batch(),
            wait_for_inflight: true,
        }
    }
}

/// One ingestion request: a source document plus an environment tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IngestRequest {
    /// Absolute path to the source document.
    pub source_path: PathBuf,
    /// Target environment.
    pub environment: Environment,
    /// Request policy; defaults apply field-wise.
    #[serde(default)]
    pub policy: IngestPolicy,
}

impl IngestRequest {
    /// A request with default policy.
    #[must_use]
    pub fn new(source_path: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            source_path: source_path.into(),
            environment,
            policy: IngestPolicy::default(),
        }
    }
}

/// Aggregate counts reported back to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IngestSummary {
    /// Chunks written by Pass C (or carried over on bypass).
    pub chunk_count: u64,
    /// Vector records written by Pass D.
    pub vector_count: u64,
    /// Graph nodes upserted by Pass E.
    pub graph_node_count: u64,
    /// Graph edges upserted by Pass E.
    pub graph_edge_count: u64,
    /// Wall-clock duration of the job in milliseconds.
    pub duration_ms: u64,
}

/// Outcome of one ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IngestResult {
    /// The job that ran (or, on bypass, the prior job that stands).
    pub job_id: String,
    /// Final lifecycle status.
    pub final_status: JobStatus,
    /// Path of the authoritative manifest for this result.
    pub manifest_path: PathBuf,
    /// Aggregate counts.
    pub summary: IngestSummary,
    /// Terminal reason string when the job did not succeed cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_ids_are_ordered_a_through_g() {
        let letters: Vec<&str> = PassId::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(letters, ["A", "B", "C", "D", "E", "F", "G"]);
        assert!(PassId::A < PassId::G);
    }

    #[test]
    fn pass_dir_names_match_layout() {
        assert_eq!(PassId::C.dir_name(), "pass_C");
        assert_eq!(PassId::parse("E"), Some(PassId::E));
        assert_eq!(PassId::parse("H"), None);
    }

    #[test]
    fn source_id_is_canonical() {
        use std::path::Path;
        assert_eq!(
            Source::source_id_for(Path::new("/books/Player's Handbook (2024).pdf")),
            "player_s_handbook_2024"
        );
        assert_eq!(
            Source::source_id_for(Path::new("/books/player_s_handbook_2024.pdf")),
            "player_s_handbook_2024"
        );
        assert_eq!(Source::source_id_for(Path::new("/x/---.pdf")), "source");
    }

    #[test]
    fn job_id_embeds_timestamp() {
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-04T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(job_id_for("phb", at), "phb_20240504_123000");
    }

    #[test]
    fn source_id_round_trips_through_job_id() {
        let at = Utc::now();
        let job = job_id_for("player_s_handbook_2024", at);
        assert_eq!(source_id_from_job_id(&job), Some("player_s_handbook_2024"));
        assert_eq!(source_id_from_job_id("phb"), None);
        assert_eq!(source_id_from_job_id("phb_2024x504_123000"), None);
    }

    #[test]
    fn job_status_terminality() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Bypassed.is_terminal());
        assert!(JobStatus::SucceededWithWarnings.is_terminal());
    }

    #[test]
    fn gate_decision_serializes_with_kind_tag() {
        let d = Gate0Decision::Delta {
            prior_job_id: "phb_20240504_123000".into(),
            changed_sections: vec!["sec-2".into()],
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["kind"], "delta");
        assert_eq!(v["changed_sections"][0], "sec-2");
        assert_eq!(d.kind(), "delta");
    }

    #[test]
    fn policy_defaults_match_contract() {
        let p = IngestPolicy::default();
        assert!(!p.force_full);
        assert!(p.allow_delta);
        assert_eq!(p.split_threshold_bytes, 26_214_400);
        assert!((p.full_rebuild_threshold - 0.5).abs() < f64::EPSILON);
        assert!(p.split_must_be_page_aligned);
        assert_eq!(p.obsolete_policy, ObsoletePolicy::SoftMark);
    }

    #[test]
    fn policy_deserializes_from_empty_object() {
        let p: IngestPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(p, IngestPolicy::default());
    }

    #[test]
    fn final_status_round_trips_screaming_case() {
        let json = serde_json::to_string(&JobStatus::SucceededWithWarnings).unwrap();
        assert_eq!(json, "\"SUCCEEDED_WITH_WARNINGS\"");
        let back: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobStatus::SucceededWithWarnings);
    }
}
