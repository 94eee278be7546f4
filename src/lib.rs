// SPDX-License-Identifier: MIT OR Apache-2.0
//! Grimoire — deterministic multi-pass ingestion core for TTRPG rulebook
//! RAG.
//!
//! This facade crate re-exports the workspace members so integrators can
//! take a single dependency:
//!
//! - [`core`] — contract types (jobs, manifests, chunks, fingerprints)
//! - [`error`] — the unified error taxonomy
//! - [`config`] — TOML + environment configuration
//! - [`fingerprint`] — SHA-256 content fingerprinting
//! - [`store`] — the atomic artifact store
//! - [`manifest`] — manifest persistence and the audit hash chain
//! - [`gate`] — the Gate 0 bypass/delta cache
//! - [`delta`] — section-level delta planning
//! - [`retry`] — backoff policies for adapter calls
//! - [`adapters`] — external capability traits and mocks
//! - [`passes`] — the pass engine and Passes A–G
//! - [`runtime`] — the job orchestrator

#![deny(unsafe_code)]

pub use gri_adapters as adapters;
pub use gri_config as config;
pub use gri_core as core;
pub use gri_delta as delta;
pub use gri_error as error;
pub use gri_fingerprint as fingerprint;
pub use gri_gate as gate;
pub use gri_manifest as manifest;
pub use gri_passes as passes;
pub use gri_retry as retry;
pub use gri_runtime as runtime;
pub use gri_store as store;

pub use gri_core::{IngestPolicy, IngestRequest, IngestResult, JobStatus};
pub use gri_runtime::Orchestrator;
