// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the Grimoire
//! ingestion core.
//!
//! Every ingestion error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. Use the builder returned by
//! [`IngestError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Startup / configuration problems; no job is created.
    Preflight,
    /// Source document problems.
    Source,
    /// Transient or persistent failures from an external adapter.
    External,
    /// Filesystem artifact invariant violations.
    Artifact,
    /// Manifest state-machine violations.
    Manifest,
    /// Post-hoc integrity check failures.
    Integrity,
    /// Cooperative cancellation and timeouts.
    Cancel,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preflight => "preflight",
            Self::Source => "source",
            Self::External => "external",
            Self::Artifact => "artifact",
            Self::Manifest => "manifest",
            Self::Integrity => "integrity",
            Self::Cancel => "cancel",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Preflight --
    /// Required external capability missing, or invalid configuration.
    PreflightFailed,
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Source --
    /// The source document is corrupt or unsupported. No retries.
    SourceUnreadable,
    /// The source path does not exist or is not a regular file.
    SourceMissing,

    // -- External adapters --
    /// Transient adapter failure (network, rate limit). Retryable.
    ExternalUnavailable,
    /// The adapter returned output the pass cannot interpret.
    ExternalMalformed,

    // -- Artifacts --
    /// A job directory or artifact already exists where none may.
    ArtifactConflict,
    /// A required artifact is absent from the job directory.
    ArtifactMissing,

    // -- Manifest --
    /// A pass-state transition was requested backward or from a stale state.
    IllegalTransition,
    /// The manifest on disk carries an unsupported schema version.
    ManifestVersionUnsupported,

    // -- Integrity --
    /// A pass reported success but an integrity check failed (zero chunks
    /// on non-empty source, dangling edges, hash-chain break).
    IntegrityViolation,
    /// The audit log hash chain does not verify.
    AuditChainBroken,

    // -- Cancellation --
    /// Cooperative cancellation or per-pass timeout.
    Cancelled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PreflightFailed | Self::ConfigInvalid => ErrorCategory::Preflight,

            Self::SourceUnreadable | Self::SourceMissing => ErrorCategory::Source,

            Self::ExternalUnavailable | Self::ExternalMalformed => ErrorCategory::External,

            Self::ArtifactConflict | Self::ArtifactMissing => ErrorCategory::Artifact,

            Self::IllegalTransition | Self::ManifestVersionUnsupported => ErrorCategory::Manifest,

            Self::IntegrityViolation | Self::AuditChainBroken => ErrorCategory::Integrity,

            Self::Cancelled => ErrorCategory::Cancel,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"SOURCE_UNREADABLE"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreflightFailed => "PREFLIGHT_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::SourceUnreadable => "SOURCE_UNREADABLE",
            Self::SourceMissing => "SOURCE_MISSING",
            Self::ExternalUnavailable => "EXTERNAL_UNAVAILABLE",
            Self::ExternalMalformed => "EXTERNAL_MALFORMED",
            Self::ArtifactConflict => "ARTIFACT_CONFLICT",
            Self::ArtifactMissing => "ARTIFACT_MISSING",
            Self::IllegalTransition => "ILLEGAL_TRANSITION",
            Self::ManifestVersionUnsupported => "MANIFEST_VERSION_UNSUPPORTED",
            Self::IntegrityViolation => "INTEGRITY_VIOLATION",
            Self::AuditChainBroken => "AUDIT_CHAIN_BROKEN",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a pass should retry the failing operation with backoff.
    ///
    /// Only transient adapter failures are retryable; everything else is
    /// fatal for the job (or the process, for preflight codes).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IngestError
// ---------------------------------------------------------------------------

/// Unified ingestion error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use gri_error::{ErrorCode, IngestError};
///
/// let err = IngestError::new(ErrorCode::ExternalUnavailable, "embedding service timed out")
///     .with_context("adapter", "embedding")
///     .with_context("attempt", 2);
/// assert!(err.code.is_retryable());
/// ```
pub struct IngestError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl IngestError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Shorthand for a retryable adapter failure.
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalUnavailable, message)
    }

    /// Shorthand for a cancellation error with a reason string.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, reason)
    }

    /// Convert to a serializable detail record (drops the live cause,
    /// keeping its rendered text).
    #[must_use]
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code,
            category: self.code.category(),
            message: self.message.clone(),
            cause: self.source.as_ref().map(|s| s.to_string()),
            context: self.context.clone(),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl fmt::Debug for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .field("context", &self.context)
            .finish()
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serializable snapshot of an [`IngestError`] for manifests and results.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    /// Stable code.
    pub code: ErrorCode,
    /// Broad category.
    pub category: ErrorCategory,
    /// Human-readable description.
    pub message: String,
    /// Rendered cause text, when a cause was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Structured context.
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// Convenience alias for results carrying an [`IngestError`].
pub type Result<T> = std::result::Result<T, IngestError>;
