// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! gri-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Run metrics collection.
pub mod telemetry;

use chrono::Utc;
use gri_adapters::Adapters;
use gri_config::IngestConfig;
use gri_core::{
    Environment, Gate0Decision, IngestRequest, IngestResult, IngestSummary, JobStatus, Manifest,
    PassId, Source, job_id_for,
};
use gri_error::{ErrorCode, IngestError};
use gri_gate::{Gate0Cache, GateError, GateKey};
use gri_manifest::{AuditLog, ManifestStore, ManifestStoreError};
use gri_passes::engine::PassEngine;
use gri_passes::{DELTA_PLAN_JSON, PassContext, SharedJobState};
use gri_retry::RetryPolicy;
use gri_store::{ArtifactStore, StoreError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use telemetry::{MetricsCollector, RunMetrics};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub use gri_passes::cancel::{CancellationReason, CancellationToken};
pub use telemetry::MetricsSummary;

use gri_core::audit::AuditEventType;

/// Errors from the orchestrator that prevent a job from being created or
/// recorded. Failures *inside* a created job surface through the
/// [`IngestResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Invalid configuration at startup.
    #[error("configuration rejected")]
    Config(#[source] gri_config::ConfigError),

    /// The request failed preflight (missing source, unsupported policy).
    #[error("preflight failed: {reason}")]
    Preflight {
        /// Why the request was rejected.
        reason: String,
    },

    /// A job for the same `(source_sha, environment)` is already running
    /// and the policy declined to wait.
    #[error(transparent)]
    AlreadyInProgress(#[from] GateError),

    /// Filesystem failure while setting the job up.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Manifest or audit persistence failure.
    #[error(transparent)]
    Manifest(#[from] ManifestStoreError),

    /// A worker task panicked; the slot was recovered.
    #[error("job panicked: {detail}")]
    JobPanicked {
        /// Rendered panic detail.
        detail: String,
    },
}

impl RuntimeError {
    /// Map to the unified taxonomy code.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Preflight { .. } => ErrorCode::PreflightFailed,
            Self::AlreadyInProgress(_) => ErrorCode::ArtifactConflict,
            Self::Store(StoreError::ArtifactConflict { .. }) => ErrorCode::ArtifactConflict,
            Self::Store(StoreError::ArtifactMissing { .. }) => ErrorCode::ArtifactMissing,
            Self::Store(_) => ErrorCode::Internal,
            Self::Manifest(ManifestStoreError::State(
                gri_core::ManifestError::IllegalTransition { .. },
            )) => ErrorCode::IllegalTransition,
            Self::Manifest(_) => ErrorCode::Internal,
            Self::JobPanicked { .. } => ErrorCode::Internal,
        }
    }
}

/// Drives jobs end-to-end and manages concurrency across them.
///
/// One tokio task per active job, bounded by the configured worker slots;
/// passes run sequentially inside their job's task.
pub struct Orchestrator {
    config: IngestConfig,
    store: ArtifactStore,
    gate: Gate0Cache,
    adapters: Adapters,
    metrics: MetricsCollector,
    slots: Arc<Semaphore>,
}

impl Orchestrator {
    /// Build an orchestrator, validating the configuration and hydrating
    /// Gate 0 from any finalized manifests under the artifacts root.
    pub fn new(config: IngestConfig, adapters: Adapters) -> Result<Self, RuntimeError> {
        let warnings = gri_config::validate(&config).map_err(RuntimeError::Config)?;
        for warning in &warnings {
            warn!(target: "gri.runtime", %warning, "config warning");
        }
        let store = ArtifactStore::new(config.artifacts_root.clone());
        let gate = Gate0Cache::new();
        if config.gate0_enabled {
            gate.hydrate(&store);
        }
        let slots = Arc::new(Semaphore::new(config.worker_slots));
        Ok(Self {
            config,
            store,
            gate,
            adapters,
            metrics: MetricsCollector::new(),
            slots,
        })
    }

    /// The run metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// The artifact store this orchestrator writes through.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Ingest one source end-to-end.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResult, RuntimeError> {
        self.ingest_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Ingest one source with an externally-controlled cancellation token.
    pub async fn ingest_with_cancel(
        &self,
        request: IngestRequest,
        cancel: CancellationToken,
    ) -> Result<IngestResult, RuntimeError> {
        self.ingest_inner(request, cancel, None).await
    }

    /// Shared ingest path. `job_dir_slot`, when present, receives the job
    /// directory as soon as it exists so a panicking worker's job can
    /// still be finalized by the batch driver.
    async fn ingest_inner(
        &self,
        request: IngestRequest,
        cancel: CancellationToken,
        job_dir_slot: Option<JobDirSlot>,
    ) -> Result<IngestResult, RuntimeError> {
        let started = Instant::now();
        let source = self.preflight(&request)?;
        info!(
            target: "gri.runtime",
            source_id = %source.source_id,
            environment = %request.environment,
            sha = %source.sha256,
            "request admitted"
        );

        // No two concurrent jobs for the same (source_sha, environment):
        // the guard is held for the whole job.
        let key = GateKey::new(source.sha256.clone(), request.environment);
        let _guard = if self.config.gate0_enabled {
            Some(
                self.gate
                    .acquire(&key, request.policy.wait_for_inflight)
                    .await?,
            )
        } else {
            None
        };

        let decision = if self.config.gate0_enabled {
            self.gate.decide(
                &source.sha256,
                &source.source_id,
                request.environment,
                &request.policy,
                |entry| prior_has_fingerprints(&entry.last_manifest_path),
            )
        } else {
            Gate0Decision::Proceed
        };

        if let Gate0Decision::Bypass { prior_job_id } = &decision {
            return Ok(self.bypass_result(&source, request.environment, prior_job_id, started));
        }

        self.run_job(request, source, decision, cancel, started, job_dir_slot)
            .await
    }

    /// Ingest a batch of sources across the worker pool.
    ///
    /// Results come back in request order. A panic in one job is isolated:
    /// the slot recovers by logging the incident, finalizing the abandoned
    /// manifest to `FAILED` when still writable, and returning to the
    /// pool; that request reports [`RuntimeError::JobPanicked`] while
    /// every other job proceeds.
    pub async fn ingest_batch(
        self: &Arc<Self>,
        requests: Vec<IngestRequest>,
    ) -> Vec<Result<IngestResult, RuntimeError>> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let orchestrator = Arc::clone(self);
            let slots = Arc::clone(&self.slots);
            let slot = JobDirSlot::default();
            let task_slot = slot.clone();
            let handle = tokio::spawn(async move {
                let _permit = slots.acquire_owned().await.expect("worker pool closed");
                orchestrator
                    .ingest_inner(request, CancellationToken::new(), Some(task_slot))
                    .await
            });
            handles.push((handle, slot));
        }
        let mut results = Vec::with_capacity(handles.len());
        for (handle, slot) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    error!(target: "gri.runtime", error = %join_error, "worker slot recovered from panic");
                    if let Some(job_dir) = slot.take() {
                        finalize_abandoned(&job_dir);
                    }
                    results.push(Err(RuntimeError::JobPanicked {
                        detail: join_error.to_string(),
                    }));
                }
            }
        }
        results
    }

    // -- internals ---------------------------------------------------------

    /// Admission checks that run before any job state exists.
    fn preflight(&self, request: &IngestRequest) -> Result<Source, RuntimeError> {
        let path = &request.source_path;
        let metadata = std::fs::metadata(path).map_err(|e| RuntimeError::Preflight {
            reason: format!("source not readable at {}: {e}", path.display()),
        })?;
        if !metadata.is_file() {
            return Err(RuntimeError::Preflight {
                reason: format!("source is not a regular file: {}", path.display()),
            });
        }
        if !request.policy.split_must_be_page_aligned {
            return Err(RuntimeError::Preflight {
                reason: "mid-page splitting is not supported; \
                         split_must_be_page_aligned must stay true"
                    .to_string(),
            });
        }
        if !(0.0..=1.0).contains(&request.policy.full_rebuild_threshold) {
            return Err(RuntimeError::Preflight {
                reason: format!(
                    "full_rebuild_threshold {} outside [0, 1]",
                    request.policy.full_rebuild_threshold
                ),
            });
        }
        let sha256 = gri_fingerprint::file_sha(path).map_err(|e| RuntimeError::Preflight {
            reason: format!("cannot hash source: {e}"),
        })?;
        Ok(Source {
            source_id: Source::source_id_for(path),
            path: path.clone(),
            size_bytes: metadata.len(),
            sha256,
            mime_type: "application/pdf".to_string(),
        })
    }

    /// Result for a Gate 0 bypass: the prior job stands, no new directory
    /// is created.
    fn bypass_result(
        &self,
        source: &Source,
        environment: Environment,
        prior_job_id: &str,
        started: Instant,
    ) -> IngestResult {
        let entry = self.gate.entry(&source.sha256, environment);
        let manifest_path = entry
            .as_ref()
            .map(|e| e.last_manifest_path.clone())
            .unwrap_or_else(|| {
                self.store
                    .job_dir(environment, prior_job_id)
                    .join(gri_manifest::MANIFEST_FILE)
            });

        // Prior counts come from the prior run's summary artifact when it
        // is still on disk.
        let prior_dir = self.store.job_dir(environment, prior_job_id);
        let summary_path = prior_dir
            .join(PassId::F.dir_name())
            .join(gri_passes::RUN_SUMMARY_JSON);
        let mut summary = IngestSummary {
            chunk_count: entry.as_ref().map(|e| e.last_chunk_count).unwrap_or(0),
            ..IngestSummary::default()
        };
        if let Ok(bytes) = std::fs::read(&summary_path)
            && let Ok(prior) = serde_json::from_slice::<gri_passes::pass_f::RunSummary>(&bytes)
        {
            summary.chunk_count = prior.chunk_count;
            summary.vector_count = prior.vector_count;
            summary.graph_node_count = prior.graph_node_count;
            summary.graph_edge_count = prior.graph_edge_count;
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            target: "gri.runtime",
            prior_job = prior_job_id,
            chunk_count = summary.chunk_count,
            "gate0 bypass"
        );
        self.metrics.record(RunMetrics {
            job_id: prior_job_id.to_string(),
            environment: environment.to_string(),
            final_status: JobStatus::Bypassed,
            duration_ms: summary.duration_ms,
            chunk_count: summary.chunk_count,
            vector_count: summary.vector_count,
            graph_node_count: summary.graph_node_count,
            graph_edge_count: summary.graph_edge_count,
            pass_durations_ms: Default::default(),
        });

        IngestResult {
            job_id: prior_job_id.to_string(),
            final_status: JobStatus::Bypassed,
            manifest_path,
            summary,
            error: None,
        }
    }

    /// Run the full pipeline for an admitted request.
    async fn run_job(
        &self,
        request: IngestRequest,
        source: Source,
        decision: Gate0Decision,
        cancel: CancellationToken,
        started: Instant,
        job_dir_slot: Option<JobDirSlot>,
    ) -> Result<IngestResult, RuntimeError> {
        let environment = request.environment;

        // Job ids are second-resolution; on a same-second re-run, bump the
        // timestamp rather than fail the admission.
        let mut stamp = Utc::now();
        let mut attempts = 0u8;
        let (job_id, job_dir) = loop {
            let candidate = job_id_for(&source.source_id, stamp);
            match self.store.create_job_dir(environment, &candidate) {
                Ok(dir) => break (candidate, dir),
                Err(e @ StoreError::ArtifactConflict { .. }) => {
                    attempts += 1;
                    if attempts > 5 {
                        return Err(RuntimeError::Store(e));
                    }
                    stamp += chrono::Duration::seconds(1);
                }
                Err(e) => return Err(RuntimeError::Store(e)),
            }
        };
        if let Some(slot) = &job_dir_slot {
            slot.set(job_dir.clone());
        }

        let prior_job_dir = match &decision {
            Gate0Decision::Delta { prior_job_id, .. } => {
                Some(self.store.job_dir(environment, prior_job_id))
            }
            _ => None,
        };

        let manifest = Manifest::init(
            &job_id,
            &source.source_id,
            &source.sha256,
            environment,
            decision.clone(),
            Utc::now(),
        );
        let mut manifest = ManifestStore::init(&job_dir, manifest)?;
        let mut audit = AuditLog::open(&job_dir, &job_id)?;
        audit.append(
            None,
            AuditEventType::JobCreated,
            &serde_json::to_vec(&source).expect("source serializes"),
        )?;
        audit.append(
            None,
            AuditEventType::GateDecision,
            &serde_json::to_vec(&decision).expect("decision serializes"),
        )?;

        let ctx = PassContext {
            job_dir: job_dir.clone(),
            source: source.clone(),
            environment,
            policy: request.policy.clone(),
            adapters: self.adapters.clone(),
            store: self.store.clone(),
            cancel,
            retry: RetryPolicy::from_settings(
                self.config.retry.max_attempts,
                self.config.retry.base_delay_ms,
                self.config.retry.max_delay_ms,
            ),
            prior_job_dir,
            shared: SharedJobState::new(),
        };

        let engine = PassEngine::standard();
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;

        // Delta jobs record the resolved changed-section set once Pass C
        // has planned it.
        if matches!(decision, Gate0Decision::Delta { .. })
            && let Ok(gri_delta::DeltaDecision::Selective(plan)) = read_delta_plan(&self.store, &job_dir)
        {
            manifest.record_delta_sections(plan.changed_section_ids)?;
        }

        let (final_status, error_text) = resolve_final_status(&report);
        manifest.finalize(final_status)?;
        audit.append(
            None,
            AuditEventType::JobFinalized,
            final_status.to_string().as_bytes(),
        )?;

        let summary = build_summary(&report, started);
        if matches!(
            final_status,
            JobStatus::Succeeded | JobStatus::SucceededWithWarnings
        ) {
            self.gate.record_success(
                &source.sha256,
                environment,
                &job_id,
                summary.chunk_count,
                manifest.path().to_path_buf(),
            );
        }

        let pass_durations_ms = report
            .results
            .iter()
            .map(|r| (r.pass_id.as_str().to_string(), r.duration_ms))
            .collect();
        self.metrics.record(RunMetrics {
            job_id: job_id.clone(),
            environment: environment.to_string(),
            final_status,
            duration_ms: summary.duration_ms,
            chunk_count: summary.chunk_count,
            vector_count: summary.vector_count,
            graph_node_count: summary.graph_node_count,
            graph_edge_count: summary.graph_edge_count,
            pass_durations_ms,
        });

        info!(
            target: "gri.runtime",
            job_id = %job_id,
            status = %final_status,
            chunks = summary.chunk_count,
            duration_ms = summary.duration_ms,
            "job finished"
        );

        Ok(IngestResult {
            job_id,
            final_status,
            manifest_path: manifest.path().to_path_buf(),
            summary,
            error: error_text,
        })
    }
}

/// Shared cell through which a worker task publishes its job directory,
/// so the batch driver can finalize the manifest if the task panics.
#[derive(Clone, Default)]
struct JobDirSlot {
    inner: Arc<Mutex<Option<PathBuf>>>,
}

impl JobDirSlot {
    fn set(&self, job_dir: PathBuf) {
        *self.inner.lock().expect("job dir slot poisoned") = Some(job_dir);
    }

    fn take(&self) -> Option<PathBuf> {
        self.inner.lock().expect("job dir slot poisoned").take()
    }
}

/// Best-effort finalization for a job whose worker panicked mid-run.
///
/// The manifest may be unreadable or already terminal (the panic can land
/// after finalization); both cases are logged and left alone.
fn finalize_abandoned(job_dir: &Path) {
    match ManifestStore::load(job_dir) {
        Ok(mut manifest) => {
            if manifest.manifest().final_status.is_terminal() {
                return;
            }
            match manifest.finalize(JobStatus::Failed) {
                Ok(()) => {
                    warn!(
                        target: "gri.runtime",
                        job_dir = %job_dir.display(),
                        "abandoned job finalized as FAILED"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "gri.runtime",
                        job_dir = %job_dir.display(),
                        error = %e,
                        "could not finalize abandoned manifest"
                    );
                }
            }
        }
        Err(e) => {
            warn!(
                target: "gri.runtime",
                job_dir = %job_dir.display(),
                error = %e,
                "abandoned manifest unreadable"
            );
        }
    }
}

/// `true` when the prior job directory still carries Pass C fingerprints.
fn prior_has_fingerprints(manifest_path: &std::path::Path) -> bool {
    manifest_path
        .parent()
        .map(|dir| {
            dir.join(PassId::C.dir_name())
                .join(gri_passes::PAGE_FINGERPRINTS_JSON)
                .is_file()
        })
        .unwrap_or(false)
}

/// Load the delta plan Pass C wrote, when one exists.
fn read_delta_plan(
    store: &ArtifactStore,
    job_dir: &std::path::Path,
) -> Result<gri_delta::DeltaDecision, IngestError> {
    let bytes = store
        .read_artifact(job_dir, PassId::C, DELTA_PLAN_JSON)
        .map_err(gri_passes::context::store_err)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IngestError::new(ErrorCode::Internal, "delta plan unparseable").with_source(e))
}

/// Map the engine report to the job's terminal status.
fn resolve_final_status(report: &gri_passes::EngineReport) -> (JobStatus, Option<String>) {
    if let Some(err) = &report.error {
        let status = if err.code == ErrorCode::Cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        return (status, Some(err.to_string()));
    }
    // Pass G's verdict demotes or fails an otherwise-clean run.
    let verdict = report
        .result_for(PassId::G)
        .and_then(|r| r.metrics.get("verdict"))
        .and_then(|v| v.as_str())
        .unwrap_or("ok");
    match verdict {
        "fail" => (
            JobStatus::Failed,
            Some("validation failed; see validation_report.json".to_string()),
        ),
        "warn" => (JobStatus::SucceededWithWarnings, None),
        _ => (JobStatus::Succeeded, None),
    }
}

/// Aggregate counts from the engine report.
fn build_summary(report: &gri_passes::EngineReport, started: Instant) -> IngestSummary {
    let metric = |pass: PassId, key: &str| -> u64 {
        report
            .result_for(pass)
            .and_then(|r| r.metrics.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    IngestSummary {
        chunk_count: report
            .result_for(PassId::C)
            .map(|r| r.processed_count)
            .unwrap_or(0),
        vector_count: report
            .result_for(PassId::D)
            .map(|r| r.processed_count)
            .unwrap_or(0),
        graph_node_count: metric(PassId::E, "node_count"),
        graph_edge_count: metric(PassId::E, "edge_count"),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gri_core::IngestPolicy;

    fn config(root: &std::path::Path) -> IngestConfig {
        IngestConfig {
            artifacts_root: root.to_path_buf(),
            worker_slots: 2,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn preflight_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config(dir.path()), Adapters::mock()).unwrap();
        let request = IngestRequest::new(dir.path().join("ghost.pdf"), Environment::Dev);
        let err = orch.ingest(request).await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::PreflightFailed);
    }

    #[tokio::test]
    async fn preflight_rejects_mid_page_splitting() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"content").unwrap();
        let orch = Orchestrator::new(config(dir.path()), Adapters::mock()).unwrap();
        let mut request = IngestRequest::new(&source, Environment::Dev);
        request.policy = IngestPolicy {
            split_must_be_page_aligned: false,
            ..IngestPolicy::default()
        };
        let err = orch.ingest(request).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Preflight { .. }));
    }

    #[tokio::test]
    async fn zero_worker_slots_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.worker_slots = 0;
        assert!(matches!(
            Orchestrator::new(cfg, Adapters::mock()),
            Err(RuntimeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn small_document_ingests_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("primer.pdf");
        std::fs::write(&source, vec![0x42u8; 4096]).unwrap();
        let orch = Orchestrator::new(config(&dir.path().join("artifacts")), Adapters::mock()).unwrap();

        let result = orch
            .ingest(IngestRequest::new(&source, Environment::Dev))
            .await
            .unwrap();
        assert_eq!(result.final_status, JobStatus::Succeeded);
        assert!(result.summary.chunk_count > 0);
        assert_eq!(result.summary.vector_count, result.summary.chunk_count);
        assert!(result.manifest_path.is_file());
        assert_eq!(orch.metrics().len(), 1);
    }

    #[tokio::test]
    async fn panicked_job_manifest_is_finalized_failed() {
        use gri_adapters::mock::{
            HashEmbedder, MemoryGraphSink, MemoryVectorSink, ScriptedExtractor,
        };
        use gri_adapters::{LanguageModel, LlmConfig};

        /// Simulates a defective adapter that takes down its worker task.
        struct PanickingModel;

        #[async_trait::async_trait]
        impl LanguageModel for PanickingModel {
            async fn complete(
                &self,
                _prompt: &str,
                _config: &LlmConfig,
            ) -> Result<String, IngestError> {
                panic!("model adapter blew up");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("primer.pdf");
        std::fs::write(&source, vec![0x42u8; 4096]).unwrap();
        let adapters = Adapters {
            extractor: Arc::new(ScriptedExtractor::new()),
            llm: Arc::new(PanickingModel),
            embedder: Arc::new(HashEmbedder::default()),
            vector_sink: Arc::new(MemoryVectorSink::new()),
            graph_sink: Arc::new(MemoryGraphSink::new()),
        };
        let orch = Arc::new(
            Orchestrator::new(config(&dir.path().join("artifacts")), adapters).unwrap(),
        );

        let results = orch
            .ingest_batch(vec![IngestRequest::new(&source, Environment::Dev)])
            .await;
        assert!(matches!(
            results[0],
            Err(RuntimeError::JobPanicked { .. })
        ));

        // The abandoned job's manifest was finalized to FAILED, not left
        // dangling in a non-terminal state.
        let dirs = orch.store().list_job_dirs(Environment::Dev, "primer").unwrap();
        assert_eq!(dirs.len(), 1);
        let manifest = gri_manifest::ManifestStore::load(&dirs[0]).unwrap();
        assert_eq!(manifest.manifest().final_status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn identical_re_ingest_bypasses() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("primer.pdf");
        std::fs::write(&source, vec![0x42u8; 4096]).unwrap();
        let orch = Orchestrator::new(config(&dir.path().join("artifacts")), Adapters::mock()).unwrap();

        let first = orch
            .ingest(IngestRequest::new(&source, Environment::Dev))
            .await
            .unwrap();
        assert_eq!(first.final_status, JobStatus::Succeeded);

        let second = orch
            .ingest(IngestRequest::new(&source, Environment::Dev))
            .await
            .unwrap();
        assert_eq!(second.final_status, JobStatus::Bypassed);
        assert_eq!(second.job_id, first.job_id);
        assert_eq!(second.summary.chunk_count, first.summary.chunk_count);
        // No new job directory was created.
        assert_eq!(
            orch.store().list_job_dirs(Environment::Dev, "primer").unwrap().len(),
            1
        );
    }
}
