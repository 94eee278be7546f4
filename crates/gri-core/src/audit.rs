// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tamper-evident audit events and the chained-digest computation.
//!
//! Each audit line stores a digest of the previous line (or the well-known
//! seed for line 1), forming a hash chain. Verification recomputes the chain
//! end-to-end; any mismatch signals tampering.

use crate::PassId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Digest recorded by the first chain entry: 64 zero hex digits.
pub const AUDIT_CHAIN_SEED: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// What happened, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Job directory and manifest created.
    JobCreated,
    /// Gate 0 decision recorded.
    GateDecision,
    /// A pass began executing.
    PassStarted,
    /// A pass completed successfully.
    PassSucceeded,
    /// A pass failed.
    PassFailed,
    /// A pass was deliberately skipped.
    PassSkipped,
    /// An integrity check tripped after a pass claimed success.
    IntegrityViolation,
    /// Terminal job status recorded.
    JobFinalized,
}

/// One append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// Owning job.
    pub job_id: String,
    /// Pass the event concerns, when pass-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_id: Option<PassId>,
    /// What happened.
    pub event_type: AuditEventType,
    /// SHA-256 of the event payload (error text, decision JSON, counts).
    pub payload_digest: String,
    /// Digest of the previous serialized line, or [`AUDIT_CHAIN_SEED`].
    pub previous_entry_digest: String,
    /// When the event was recorded (RFC3339 UTC).
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event linked to the previous line's digest.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        pass_id: Option<PassId>,
        event_type: AuditEventType,
        payload: &[u8],
        previous_entry_digest: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            job_id: job_id.into(),
            pass_id,
            event_type,
            payload_digest: digest_hex(payload),
            previous_entry_digest: previous_entry_digest.into(),
            timestamp,
        }
    }
}

/// Lowercase hex SHA-256 of arbitrary bytes.
#[must_use]
pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Errors from audit chain verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditChainError {
    /// A line was not valid JSON for an [`AuditEvent`].
    #[error("unparseable audit line {line}")]
    Unparseable {
        /// 1-based line number.
        line: usize,
    },
    /// A line's `previous_entry_digest` does not match the digest of the
    /// preceding line.
    #[error("audit chain broken at line {line}")]
    BrokenChain {
        /// 1-based line number of the entry with the bad link.
        line: usize,
    },
}

/// Verify the hash chain over the raw ndjson lines of an audit log.
///
/// Returns the parsed events when the chain holds end-to-end. An empty log
/// verifies trivially.
pub fn verify_chain(lines: &[&str]) -> Result<Vec<AuditEvent>, AuditChainError> {
    let mut events = Vec::with_capacity(lines.len());
    let mut expected_prev = AUDIT_CHAIN_SEED.to_string();
    for (idx, line) in lines.iter().enumerate() {
        let event: AuditEvent =
            serde_json::from_str(line).map_err(|_| AuditChainError::Unparseable { line: idx + 1 })?;
        if event.previous_entry_digest != expected_prev {
            return Err(AuditChainError::BrokenChain { line: idx + 1 });
        }
        expected_prev = digest_hex(line.as_bytes());
        events.push(event);
    }
    Ok(events)
}
