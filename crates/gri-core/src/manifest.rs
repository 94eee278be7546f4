// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job manifest with forward-only pass-state transitions.
//!
//! The manifest is the authoritative per-job state record. Writes only add
//! completed passes, never remove; pass states may only transition forward
//! (`pending → running → {succeeded|failed|skipped}`).

use crate::{Environment, Gate0Decision, JobStatus, PassId, PassStatus};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current manifest schema version. Readers reject other versions loudly.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors from manifest state logic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// A pass transition was requested from a state that is not current,
    /// or in a backward direction.
    #[error("illegal transition for pass {pass}: {from} -> {to} (current: {current})")]
    IllegalTransition {
        /// The pass being transitioned.
        pass: PassId,
        /// Expected current state supplied by the caller.
        from: PassStatus,
        /// Requested target state.
        to: PassStatus,
        /// Actual current state in the manifest.
        current: PassStatus,
    },
    /// The manifest does not track the named pass.
    #[error("unknown pass {pass} in manifest")]
    UnknownPass {
        /// The missing pass.
        pass: PassId,
    },
    /// Finalization to a success status was requested while a pass is
    /// still pending or running.
    #[error("cannot finalize as {status}: pass {pass} is {pass_status}")]
    NotFinalizable {
        /// Requested final status.
        status: JobStatus,
        /// First non-terminal pass.
        pass: PassId,
        /// Its current state.
        pass_status: PassStatus,
    },
    /// The manifest on disk carries an unsupported schema version.
    #[error("unsupported manifest_version {found} (supported: {MANIFEST_VERSION})")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u32,
    },
}

/// Reference to one artifact produced by a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    /// Artifact name relative to the pass directory (e.g. `toc.json`).
    pub name: String,
    /// Path relative to the job directory (e.g. `pass_A/toc.json`).
    pub path: String,
    /// Lowercase hex SHA-256 of the artifact bytes.
    pub sha256: String,
    /// Artifact size in bytes.
    pub bytes: u64,
}

/// State of one pass within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PassState {
    /// Current status.
    pub status: PassStatus,
    /// When the pass started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the pass reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Artifacts recorded for the pass.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Units of real work performed (chunks, parts, vectors, ...).
    #[serde(default)]
    pub processed_count: u64,
    /// Error string when the pass failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassState {
    fn pending() -> Self {
        Self {
            status: PassStatus::Pending,
            started_at: None,
            finished_at: None,
            artifacts: Vec::new(),
            processed_count: 0,
            error: None,
        }
    }
}

/// Fields a transition may set on the target [`PassState`].
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    /// Artifacts to record (terminal transitions).
    pub artifacts: Vec<ArtifactRef>,
    /// Processed-count to record (terminal transitions).
    pub processed_count: Option<u64>,
    /// Error string (failed transitions).
    pub error: Option<String>,
}

/// The per-job manifest document, serialized as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    /// Schema version; see [`MANIFEST_VERSION`].
    pub manifest_version: u32,
    /// Owning job.
    pub job_id: String,
    /// Stable source identifier.
    pub source_id: String,
    /// SHA-256 of the source file.
    pub source_sha: String,
    /// Environment the job ran in.
    pub environment: Environment,
    /// Ordered pass ids (`["A", …, "G"]`).
    pub phases: Vec<PassId>,
    /// Per-pass state.
    pub pass_states: BTreeMap<PassId, PassState>,
    /// Gate 0 decision that admitted this job.
    pub gate0_decision: Gate0Decision,
    /// Creation timestamp (RFC3339 UTC).
    pub created_at: DateTime<Utc>,
    /// Last write timestamp (RFC3339 UTC).
    pub updated_at: DateTime<Utc>,
    /// Mirror of the orchestrator's job state.
    pub final_status: JobStatus,
}

impl Manifest {
    /// A fresh manifest with all passes `pending` and status `RUNNING`.
    #[must_use]
    pub fn init(
        job_id: impl Into<String>,
        source_id: impl Into<String>,
        source_sha: impl Into<String>,
        environment: Environment,
        gate0_decision: Gate0Decision,
        now: DateTime<Utc>,
    ) -> Self {
        let phases: Vec<PassId> = PassId::ALL.to_vec();
        let pass_states = phases.iter().map(|p| (*p, PassState::pending())).collect();
        Self {
            manifest_version: MANIFEST_VERSION,
            job_id: job_id.into(),
            source_id: source_id.into(),
            source_sha: source_sha.into(),
            environment,
            phases,
            pass_states,
            gate0_decision,
            created_at: now,
            updated_at: now,
            final_status: JobStatus::Running,
        }
    }

    /// Reject manifests from a different schema version.
    pub fn check_version(&self) -> Result<(), ManifestError> {
        if self.manifest_version == MANIFEST_VERSION {
            Ok(())
        } else {
            Err(ManifestError::UnsupportedVersion {
                found: self.manifest_version,
            })
        }
    }

    /// Current state of a pass.
    pub fn pass_state(&self, pass: PassId) -> Result<&PassState, ManifestError> {
        self.pass_states
            .get(&pass)
            .ok_or(ManifestError::UnknownPass { pass })
    }

    /// Transition one pass forward, recording the supplied fields.
    ///
    /// Fails with [`ManifestError::IllegalTransition`] when `from` does not
    /// match the current state, when the direction is not forward, or when
    /// the target is unreachable from `from`.
    pub fn transition(
        &mut self,
        pass: PassId,
        from: PassStatus,
        to: PassStatus,
        fields: TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<(), ManifestError> {
        let state = self
            .pass_states
            .get_mut(&pass)
            .ok_or(ManifestError::UnknownPass { pass })?;

        let current = state.status;
        let legal = current == from
            && to.rank() > from.rank()
            && match (from, to) {
                (PassStatus::Pending, PassStatus::Running) => true,
                (PassStatus::Pending, PassStatus::Skipped) => true,
                (PassStatus::Running, PassStatus::Succeeded)
                | (PassStatus::Running, PassStatus::Failed)
                | (PassStatus::Running, PassStatus::Skipped) => true,
                _ => false,
            };
        if !legal {
            return Err(ManifestError::IllegalTransition {
                pass,
                from,
                to,
                current,
            });
        }

        state.status = to;
        match to {
            PassStatus::Running => state.started_at = Some(now),
            PassStatus::Succeeded | PassStatus::Failed | PassStatus::Skipped => {
                state.finished_at = Some(now);
                if !fields.artifacts.is_empty() {
                    state.artifacts = fields.artifacts;
                }
                if let Some(count) = fields.processed_count {
                    state.processed_count = count;
                }
                state.error = fields.error;
            }
            PassStatus::Pending => unreachable!("forward-only transitions never target pending"),
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record the terminal job status.
    ///
    /// Success statuses require every pass to be terminal; `FAILED` and
    /// `CANCELLED` are always allowed (downstream passes stay `pending`).
    pub fn finalize(
        &mut self,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ManifestError> {
        if matches!(status, JobStatus::Succeeded | JobStatus::SucceededWithWarnings) {
            for pass in &self.phases {
                let state = self.pass_state(*pass)?;
                if !state.status.is_terminal() {
                    return Err(ManifestError::NotFinalizable {
                        status,
                        pass: *pass,
                        pass_status: state.status,
                    });
                }
            }
        }
        self.final_status = status;
        self.updated_at = now;
        Ok(())
    }

    /// Record the resolved changed-section set on a delta admission.
    ///
    /// The admission decision marks delta eligibility before Pass C can
    /// know the concrete sections; once the plan is resolved the ids are
    /// added here. Additive only — a non-delta decision is left untouched.
    pub fn set_delta_sections(&mut self, sections: Vec<String>, now: DateTime<Utc>) {
        if let Gate0Decision::Delta {
            changed_sections, ..
        } = &mut self.gate0_decision
        {
            *changed_sections = sections;
            self.updated_at = now;
        }
    }

    /// Sum of `processed_count` for a pass, zero when the pass is absent.
    #[must_use]
    pub fn processed_count(&self, pass: PassId) -> u64 {
        self.pass_states
            .get(&pass)
            .map(|s| s.processed_count)
            .unwrap_or(0)
    }
}
