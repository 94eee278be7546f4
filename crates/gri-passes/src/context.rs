// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-job execution context handed to every pass.
//!
//! All dependencies are explicit: adapters, policy, cancellation handle,
//! store, and the optional prior-job directory for delta runs. There are
//! no ambient singletons anywhere in the pipeline.

use crate::cancel::CancellationToken;
use gri_adapters::Adapters;
use gri_core::{Chunk, Environment, IngestPolicy, Manifest, PassId, Source, Toc};
use gri_error::{ErrorCode, IngestError};
use gri_retry::RetryPolicy;
use gri_store::ArtifactStore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Read-only view of the evolving manifest, refreshed by the engine before
/// each pass. Passes F and G use it to cross-check recorded counts.
#[derive(Clone, Default)]
pub struct SharedJobState {
    manifest: Arc<Mutex<Option<Manifest>>>,
}

impl SharedJobState {
    /// A state with no manifest snapshot yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot.
    pub fn set_manifest(&self, manifest: Manifest) {
        *self.manifest.lock().expect("job state poisoned") = Some(manifest);
    }

    /// The latest snapshot, if one was published.
    #[must_use]
    pub fn manifest(&self) -> Option<Manifest> {
        self.manifest.lock().expect("job state poisoned").clone()
    }
}

/// Everything a pass needs to run.
#[derive(Clone)]
pub struct PassContext {
    /// Absolute path of the job directory.
    pub job_dir: PathBuf,
    /// The source document.
    pub source: Source,
    /// Environment the job runs in.
    pub environment: Environment,
    /// Request policy.
    pub policy: IngestPolicy,
    /// External capabilities.
    pub adapters: Adapters,
    /// Artifact store (shared read access for all passes).
    pub store: ArtifactStore,
    /// Cooperative cancellation handle.
    pub cancel: CancellationToken,
    /// Retry policy for retryable adapter failures.
    pub retry: RetryPolicy,
    /// Job directory of the prior successful job, on delta-eligible runs.
    pub prior_job_dir: Option<PathBuf>,
    /// Evolving manifest snapshot, refreshed by the engine.
    pub shared: SharedJobState,
}

impl PassContext {
    /// Fail fast when the job has been cancelled.
    pub fn check_cancelled(&self) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            Err(IngestError::cancelled("job cancelled"))
        } else {
            Ok(())
        }
    }

    /// Read and deserialize a JSON artifact from this job's directory.
    pub fn read_json_artifact<T: serde::de::DeserializeOwned>(
        &self,
        pass: PassId,
        name: &str,
    ) -> Result<T, IngestError> {
        let bytes = self
            .store
            .read_artifact(&self.job_dir, pass, name)
            .map_err(store_err)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            IngestError::new(
                ErrorCode::Internal,
                format!("artifact {name} of pass {pass} is unparseable"),
            )
            .with_source(e)
        })
    }

    /// Read the TOC produced by Pass A.
    pub fn read_toc(&self) -> Result<Toc, IngestError> {
        self.read_json_artifact(PassId::A, crate::TOC_JSON)
    }

    /// Read the chunks produced by Pass C, one per jsonl line.
    pub fn read_chunks(&self) -> Result<Vec<Chunk>, IngestError> {
        let bytes = self
            .store
            .read_artifact(&self.job_dir, PassId::C, crate::CHUNKS_JSONL)
            .map_err(store_err)?;
        parse_chunk_lines(&bytes)
    }

    /// Read the vector records produced by Pass D, one per jsonl line.
    pub fn read_vectors(&self) -> Result<Vec<gri_core::VectorRecord>, IngestError> {
        let bytes = self
            .store
            .read_artifact(&self.job_dir, PassId::D, crate::VECTORS_JSONL)
            .map_err(store_err)?;
        let text = std::str::from_utf8(&bytes).map_err(|e| {
            IngestError::new(ErrorCode::Internal, "vectors.jsonl is not utf-8").with_source(e)
        })?;
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    IngestError::new(ErrorCode::Internal, "vector line is unparseable")
                        .with_source(e)
                })
            })
            .collect()
    }

    /// Read the chunks of the prior job, when one exists.
    pub fn read_prior_chunks(&self) -> Result<Option<Vec<Chunk>>, IngestError> {
        let Some(prior_dir) = &self.prior_job_dir else {
            return Ok(None);
        };
        let path = prior_dir.join(PassId::C.dir_name()).join(crate::CHUNKS_JSONL);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::new(
                    ErrorCode::Internal,
                    format!("cannot read prior chunks at {}", path.display()),
                )
                .with_source(e));
            }
        };
        parse_chunk_lines(&bytes).map(Some)
    }

    /// Read a JSON artifact from the prior job's directory.
    pub fn read_prior_json<T: serde::de::DeserializeOwned>(
        &self,
        pass: PassId,
        name: &str,
    ) -> Result<Option<T>, IngestError> {
        let Some(prior_dir) = &self.prior_job_dir else {
            return Ok(None);
        };
        let path = prior_dir.join(pass.dir_name()).join(name);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::new(
                    ErrorCode::Internal,
                    format!("cannot read prior artifact at {}", path.display()),
                )
                .with_source(e));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| {
                IngestError::new(
                    ErrorCode::Internal,
                    format!("prior artifact {name} is unparseable"),
                )
                .with_source(e)
            })
    }
}

/// Parse newline-delimited chunk records.
pub fn parse_chunk_lines(bytes: &[u8]) -> Result<Vec<Chunk>, IngestError> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        IngestError::new(ErrorCode::Internal, "chunks.jsonl is not utf-8").with_source(e)
    })?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                IngestError::new(ErrorCode::Internal, "chunk line is unparseable").with_source(e)
            })
        })
        .collect()
}

/// Map store errors to the taxonomy the engine branches on.
pub fn store_err(err: gri_store::StoreError) -> IngestError {
    let code = match &err {
        gri_store::StoreError::ArtifactConflict { .. } => ErrorCode::ArtifactConflict,
        gri_store::StoreError::ArtifactMissing { .. } => ErrorCode::ArtifactMissing,
        gri_store::StoreError::Io { .. } => ErrorCode::Internal,
    };
    IngestError::new(code, err.to_string()).with_source(err)
}
