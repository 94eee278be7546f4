// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest persistence and the append-only, hash-chained audit log.
//!
//! The manifest is rewritten atomically (temp + rename) on every pass
//! transition, so readers observe a consistent snapshot at any moment.
//! The audit log is append-only: one ndjson line per event, written with
//! O_APPEND, each line chained to its predecessor by digest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use gri_core::audit::{
    AUDIT_CHAIN_SEED, AuditChainError, AuditEvent, AuditEventType, digest_hex, verify_chain,
};
use gri_core::{
    JobStatus, Manifest, ManifestError, PassId, PassStatus, manifest::TransitionFields,
};
use gri_store::atomic_write;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the manifest inside a job directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of the audit log inside a job directory.
pub const AUDIT_FILE: &str = "audit.ndjson";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from manifest persistence.
#[derive(Debug, thiserror::Error)]
pub enum ManifestStoreError {
    /// State-machine violation from the pure manifest logic.
    #[error(transparent)]
    State(#[from] ManifestError),

    /// The manifest file is absent.
    #[error("manifest missing at {path}")]
    Missing {
        /// Expected path.
        path: PathBuf,
    },

    /// The manifest file could not be parsed.
    #[error("manifest unparseable at {path}: {reason}")]
    Unparseable {
        /// Offending path.
        path: PathBuf,
        /// Parse error detail.
        reason: String,
    },

    /// Filesystem failure while reading or writing.
    #[error(transparent)]
    Store(#[from] gri_store::StoreError),

    /// Raw io failure on the audit log.
    #[error("audit io error at {path}: {source}")]
    AuditIo {
        /// Audit log path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The audit chain does not verify.
    #[error(transparent)]
    Chain(#[from] AuditChainError),
}

// ---------------------------------------------------------------------------
// ManifestStore
// ---------------------------------------------------------------------------

/// Atomic reader/writer for one job's `manifest.json`.
///
/// The store holds the manifest in memory between writes; the owning job is
/// the single writer, so the in-memory copy is authoritative while RUNNING.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    manifest: Manifest,
}

impl ManifestStore {
    /// Initialize a fresh manifest and persist it.
    pub fn init(job_dir: &Path, manifest: Manifest) -> Result<Self, ManifestStoreError> {
        let store = Self {
            path: job_dir.join(MANIFEST_FILE),
            manifest,
        };
        store.persist()?;
        Ok(store)
    }

    /// Load an existing manifest from a job directory, rejecting unknown
    /// schema versions.
    pub fn load(job_dir: &Path) -> Result<Self, ManifestStoreError> {
        let path = job_dir.join(MANIFEST_FILE);
        let manifest = read_manifest(&path)?;
        Ok(Self { path, manifest })
    }

    /// The current in-memory manifest.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a pass transition and persist atomically.
    pub fn transition(
        &mut self,
        pass: PassId,
        from: PassStatus,
        to: PassStatus,
        fields: TransitionFields,
    ) -> Result<(), ManifestStoreError> {
        self.manifest.transition(pass, from, to, fields, Utc::now())?;
        self.persist()?;
        debug!(target: "gri.manifest", pass = %pass, %to, "manifest transition");
        Ok(())
    }

    /// Record the resolved changed-section set for a delta job and persist.
    pub fn record_delta_sections(
        &mut self,
        sections: Vec<String>,
    ) -> Result<(), ManifestStoreError> {
        self.manifest.set_delta_sections(sections, Utc::now());
        self.persist()
    }

    /// Record the terminal job status and persist atomically.
    pub fn finalize(&mut self, status: JobStatus) -> Result<(), ManifestStoreError> {
        self.manifest.finalize(status, Utc::now())?;
        self.persist()?;
        debug!(target: "gri.manifest", %status, "manifest finalized");
        Ok(())
    }

    fn persist(&self) -> Result<(), ManifestStoreError> {
        let json = serde_json::to_vec_pretty(&self.manifest).expect("manifest serializes");
        atomic_write(&self.path, &json)?;
        Ok(())
    }
}

/// Read and version-check a manifest document.
pub fn read_manifest(path: &Path) -> Result<Manifest, ManifestStoreError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManifestStoreError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ManifestStoreError::Unparseable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    let manifest: Manifest =
        serde_json::from_slice(&bytes).map_err(|e| ManifestStoreError::Unparseable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    manifest.check_version()?;
    Ok(manifest)
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Append-only, hash-chained event log for one job directory.
pub struct AuditLog {
    path: PathBuf,
    job_id: String,
    last_digest: String,
}

impl AuditLog {
    /// Open (or create) the audit log for a job directory.
    ///
    /// Re-opening an existing log verifies the chain end-to-end first and
    /// resumes from the last line's digest.
    pub fn open(job_dir: &Path, job_id: impl Into<String>) -> Result<Self, ManifestStoreError> {
        let path = job_dir.join(AUDIT_FILE);
        let last_digest = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                verify_chain(&lines)?;
                lines
                    .last()
                    .map(|l| digest_hex(l.as_bytes()))
                    .unwrap_or_else(|| AUDIT_CHAIN_SEED.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AUDIT_CHAIN_SEED.to_string(),
            Err(e) => {
                return Err(ManifestStoreError::AuditIo {
                    path,
                    source: e,
                });
            }
        };
        Ok(Self {
            path,
            job_id: job_id.into(),
            last_digest,
        })
    }

    /// Append one event, linking it to the previous line.
    ///
    /// The payload itself is not stored — only its digest, which keeps the
    /// log compact while remaining tamper-evident.
    pub fn append(
        &mut self,
        pass_id: Option<PassId>,
        event_type: AuditEventType,
        payload: &[u8],
    ) -> Result<AuditEvent, ManifestStoreError> {
        let event = AuditEvent::new(
            self.job_id.clone(),
            pass_id,
            event_type,
            payload,
            self.last_digest.clone(),
            Utc::now(),
        );
        let line = serde_json::to_string(&event).expect("audit event serializes");

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ManifestStoreError::AuditIo {
                path: self.path.clone(),
                source: e,
            })?;
        writeln!(file, "{line}").map_err(|e| ManifestStoreError::AuditIo {
            path: self.path.clone(),
            source: e,
        })?;

        self.last_digest = digest_hex(line.as_bytes());
        Ok(event)
    }

    /// Verify the chain end-to-end, returning the parsed events.
    pub fn verify(&self) -> Result<Vec<AuditEvent>, ManifestStoreError> {
        verify_log(&self.path)
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Verify an audit log file's hash chain end-to-end.
///
/// A missing file verifies trivially (no events were recorded).
pub fn verify_log(path: &Path) -> Result<Vec<AuditEvent>, ManifestStoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ManifestStoreError::AuditIo {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    let lines: Vec<&str> = content.lines().collect();
    Ok(verify_chain(&lines)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gri_core::{Environment, Gate0Decision};

    fn fresh_manifest(job_id: &str) -> Manifest {
        Manifest::init(
            job_id,
            "phb",
            "a".repeat(64),
            Environment::Dev,
            Gate0Decision::Proceed,
            Utc::now(),
        )
    }

    #[test]
    fn init_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::init(dir.path(), fresh_manifest("phb_1")).unwrap();
        assert!(store.path().is_file());

        let reloaded = ManifestStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.manifest(), store.manifest());
    }

    #[test]
    fn transitions_are_visible_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ManifestStore::init(dir.path(), fresh_manifest("phb_1")).unwrap();
        store
            .transition(PassId::A, PassStatus::Pending, PassStatus::Running, TransitionFields::default())
            .unwrap();
        let reloaded = ManifestStore::load(dir.path()).unwrap();
        assert_eq!(
            reloaded.manifest().pass_state(PassId::A).unwrap().status,
            PassStatus::Running
        );
    }

    #[test]
    fn illegal_transition_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ManifestStore::init(dir.path(), fresh_manifest("phb_1")).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();
        let err = store
            .transition(PassId::A, PassStatus::Running, PassStatus::Succeeded, TransitionFields::default())
            .unwrap_err();
        assert!(matches!(err, ManifestStoreError::State(_)));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn unknown_version_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = fresh_manifest("phb_1");
        manifest.manifest_version = 7;
        let json = serde_json::to_vec(&manifest).unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), json).unwrap();
        let err = ManifestStore::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ManifestStoreError::State(ManifestError::UnsupportedVersion { found: 7 })
        ));
    }

    #[test]
    fn audit_appends_form_a_verifiable_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::open(dir.path(), "phb_1").unwrap();
        log.append(None, AuditEventType::JobCreated, b"{}").unwrap();
        log.append(Some(PassId::A), AuditEventType::PassStarted, b"").unwrap();
        log.append(Some(PassId::A), AuditEventType::PassSucceeded, b"3 sections")
            .unwrap();
        let events = log.verify().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].previous_entry_digest, AUDIT_CHAIN_SEED);
        assert_eq!(events[2].event_type, AuditEventType::PassSucceeded);
    }

    #[test]
    fn reopening_resumes_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = AuditLog::open(dir.path(), "phb_1").unwrap();
            log.append(None, AuditEventType::JobCreated, b"{}").unwrap();
        }
        {
            let mut log = AuditLog::open(dir.path(), "phb_1").unwrap();
            log.append(None, AuditEventType::JobFinalized, b"SUCCEEDED").unwrap();
        }
        let events = verify_log(&dir.path().join(AUDIT_FILE)).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::open(dir.path(), "phb_1").unwrap();
        log.append(None, AuditEventType::JobCreated, b"{}").unwrap();
        log.append(None, AuditEventType::JobFinalized, b"FAILED").unwrap();

        let path = dir.path().join(AUDIT_FILE);
        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("job_created", "gate_decision");
        std::fs::write(&path, tampered).unwrap();
        assert!(verify_log(&path).is_err());
    }

    #[test]
    fn missing_log_verifies_trivially() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify_log(&dir.path().join(AUDIT_FILE)).unwrap().is_empty());
    }
}
