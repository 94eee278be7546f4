// SPDX-License-Identifier: MIT OR Apache-2.0
//! The sequential pass engine.
//!
//! Drives passes A→G in order inside one job. For each pass the engine
//! verifies required inputs, transitions the manifest forward, invokes the
//! pass under a bounded timeout racing the cancellation token, persists
//! its artifacts atomically, and appends audit events. Any failure halts
//! the pipeline; downstream passes remain `pending`.

use crate::cancel::CancellationReason;
use crate::context::{PassContext, store_err};
use crate::{Pass, PassOutput};
use gri_core::audit::AuditEventType;
use gri_core::manifest::TransitionFields;
use gri_core::{ArtifactRef, PassId, PassStatus};
use gri_error::{ErrorCode, IngestError};
use gri_manifest::{AuditLog, ManifestStore, ManifestStoreError};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Grace period a running pass gets after a cancel signal before it is
/// forcibly dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one pass as observed by the engine.
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Which pass ran.
    pub pass_id: PassId,
    /// Terminal status.
    pub status: PassStatus,
    /// Units of real work performed.
    pub processed_count: u64,
    /// Number of artifacts written.
    pub artifact_count: u64,
    /// Persisted artifact references.
    pub artifacts: Vec<ArtifactRef>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Pass-supplied metrics.
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Error text when the pass failed.
    pub error: Option<String>,
}

/// What the engine observed across the whole run.
#[derive(Debug)]
pub struct EngineReport {
    /// Results for every pass that reached a terminal state, in order.
    pub results: Vec<PassResult>,
    /// The error that halted the pipeline, when one did.
    pub error: Option<IngestError>,
}

impl EngineReport {
    /// `true` when every pass reached `succeeded` or `skipped`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// The result for one pass, when it ran.
    #[must_use]
    pub fn result_for(&self, pass: PassId) -> Option<&PassResult> {
        self.results.iter().find(|r| r.pass_id == pass)
    }
}

/// Uniform invocation engine for the seven pipeline passes.
pub struct PassEngine {
    passes: Vec<Box<dyn Pass>>,
}

impl PassEngine {
    /// The standard A→G pipeline.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            passes: vec![
                Box::new(crate::pass_a::TocParsePass),
                Box::new(crate::pass_b::LogicalSplitPass),
                Box::new(crate::pass_c::ExtractPass),
                Box::new(crate::pass_d::VectorizePass),
                Box::new(crate::pass_e::GraphBuildPass),
                Box::new(crate::pass_f::FinalizePass),
                Box::new(crate::pass_g::ValidatePass),
            ],
        }
    }

    /// A custom pass sequence (used by engine tests).
    #[must_use]
    pub fn with_passes(passes: Vec<Box<dyn Pass>>) -> Self {
        Self { passes }
    }

    /// Default per-pass timeout when neither config nor request policy
    /// overrides it.
    #[must_use]
    pub fn default_timeout_ms(pass: PassId) -> u64 {
        match pass {
            PassId::A | PassId::B | PassId::F | PassId::G => 600_000,
            PassId::C => 1_800_000,
            PassId::D => 2_700_000,
            PassId::E => 900_000,
        }
    }

    fn timeout_for(ctx: &PassContext, pass: PassId) -> Duration {
        let ms = ctx
            .policy
            .per_pass_timeouts_ms
            .get(&pass)
            .copied()
            .unwrap_or_else(|| Self::default_timeout_ms(pass));
        Duration::from_millis(ms)
    }

    /// Drive all passes sequentially, stopping at the first failure.
    pub async fn run(
        &self,
        ctx: &PassContext,
        manifest: &mut ManifestStore,
        audit: &mut AuditLog,
    ) -> EngineReport {
        let mut report = EngineReport {
            results: Vec::with_capacity(self.passes.len()),
            error: None,
        };

        for pass in &self.passes {
            let pass_id = pass.id();
            ctx.shared.set_manifest(manifest.manifest().clone());

            // A cancel between passes leaves this pass pending.
            if ctx.cancel.is_cancelled() {
                report.error = Some(IngestError::cancelled("job cancelled"));
                break;
            }

            match self.run_one(pass.as_ref(), pass_id, ctx, manifest, audit).await {
                Ok(result) => {
                    report.results.push(result);
                }
                Err((result, err)) => {
                    if let Some(result) = result {
                        report.results.push(result);
                    }
                    report.error = Some(err);
                    break;
                }
            }
        }

        report
    }

    /// Execute one pass under the full policy. On failure returns the
    /// recorded result (when the pass got far enough to have one) plus the
    /// halting error.
    async fn run_one(
        &self,
        pass: &dyn Pass,
        pass_id: PassId,
        ctx: &PassContext,
        manifest: &mut ManifestStore,
        audit: &mut AuditLog,
    ) -> Result<PassResult, (Option<PassResult>, IngestError)> {
        // Required inputs must exist before the pass transitions to running.
        let missing_input = pass
            .required_inputs()
            .iter()
            .find(|(p, name)| !ctx.store.artifact_exists(&ctx.job_dir, *p, name));

        transition(manifest, pass_id, PassStatus::Pending, PassStatus::Running, TransitionFields::default())
            .map_err(|e| (None, e))?;
        append_audit(audit, Some(pass_id), AuditEventType::PassStarted, &[]);

        if let Some((p, name)) = missing_input {
            let err = IngestError::new(
                ErrorCode::ArtifactMissing,
                format!("pass {pass_id} requires {} from pass {p}", name),
            );
            return Err(self.record_failure(pass_id, ctx, manifest, audit, err, 0));
        }

        info!(target: "gri.engine", pass = %pass_id, "pass started");
        let started = Instant::now();
        let outcome = self.execute_bounded(pass, ctx, pass_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                return Err(self.record_failure(pass_id, ctx, manifest, audit, err, duration_ms));
            }
        };

        // Persist artifacts through the store; a write failure fails the
        // pass like any other error.
        let mut refs = Vec::with_capacity(output.artifacts.len());
        for artifact in &output.artifacts {
            let written = ctx
                .store
                .write_artifact(&ctx.job_dir, pass_id, &artifact.name, &artifact.bytes)
                .map_err(store_err);
            match written {
                Ok(written) => refs.push(ArtifactRef {
                    name: artifact.name.clone(),
                    path: format!("{}/{}", pass_id.dir_name(), artifact.name),
                    sha256: written.sha256,
                    bytes: written.bytes,
                }),
                Err(err) => {
                    return Err(self.record_failure(pass_id, ctx, manifest, audit, err, duration_ms));
                }
            }
        }

        let to_state = if output.skipped {
            PassStatus::Skipped
        } else {
            PassStatus::Succeeded
        };
        let fields = TransitionFields {
            artifacts: refs.clone(),
            processed_count: Some(output.processed_count),
            error: None,
        };
        transition(manifest, pass_id, PassStatus::Running, to_state, fields)
            .map_err(|e| (None, e))?;

        let event_type = if output.skipped {
            AuditEventType::PassSkipped
        } else {
            AuditEventType::PassSucceeded
        };
        let payload = serde_json::json!({
            "processed_count": output.processed_count,
            "artifact_count": refs.len(),
        });
        append_audit(audit, Some(pass_id), event_type, payload.to_string().as_bytes());

        info!(
            target: "gri.engine",
            pass = %pass_id,
            status = %to_state,
            processed = output.processed_count,
            artifacts = refs.len(),
            duration_ms,
            "pass finished"
        );

        Ok(PassResult {
            pass_id,
            status: to_state,
            processed_count: output.processed_count,
            artifact_count: refs.len() as u64,
            artifacts: refs,
            duration_ms,
            metrics: output.metrics,
            error: None,
        })
    }

    /// Invoke the pass under its timeout, racing the cancellation token.
    /// A cancelled pass gets [`CANCEL_GRACE`] to finish cooperatively.
    async fn execute_bounded(
        &self,
        pass: &dyn Pass,
        ctx: &PassContext,
        pass_id: PassId,
    ) -> Result<PassOutput, IngestError> {
        let timeout = Self::timeout_for(ctx, pass_id);
        let fut = pass.execute(ctx);
        tokio::pin!(fut);

        let bounded = tokio::time::timeout(timeout, async {
            tokio::select! {
                result = &mut fut => result,
                () = ctx.cancel.cancelled() => {
                    warn!(target: "gri.engine", pass = %pass_id, "cancel signalled; grace period");
                    match tokio::time::timeout(CANCEL_GRACE, &mut fut).await {
                        Ok(result) => result,
                        Err(_) => Err(IngestError::cancelled("job cancelled")
                            .with_context("reason", CancellationReason::Requested.as_str())),
                    }
                }
            }
        })
        .await;

        match bounded {
            Ok(result) => result,
            Err(_) => Err(IngestError::cancelled(format!(
                "pass {pass_id} exceeded its {} ms timeout",
                timeout.as_millis()
            ))
            .with_context("reason", CancellationReason::Timeout.as_str())),
        }
    }

    fn record_failure(
        &self,
        pass_id: PassId,
        _ctx: &PassContext,
        manifest: &mut ManifestStore,
        audit: &mut AuditLog,
        err: IngestError,
        duration_ms: u64,
    ) -> (Option<PassResult>, IngestError) {
        error!(target: "gri.engine", pass = %pass_id, error = %err, "pass failed");
        let error_text = err.to_string();
        let fields = TransitionFields {
            error: Some(error_text.clone()),
            ..Default::default()
        };
        if let Err(e) = transition(manifest, pass_id, PassStatus::Running, PassStatus::Failed, fields) {
            // The original failure wins; the bookkeeping error is logged.
            error!(target: "gri.engine", pass = %pass_id, error = %e, "failed-state bookkeeping error");
        }
        append_audit(audit, Some(pass_id), AuditEventType::PassFailed, error_text.as_bytes());
        let result = PassResult {
            pass_id,
            status: PassStatus::Failed,
            processed_count: 0,
            artifact_count: 0,
            artifacts: Vec::new(),
            duration_ms,
            metrics: BTreeMap::new(),
            error: Some(error_text),
        };
        (Some(result), err)
    }
}

/// Manifest transition with taxonomy mapping.
fn transition(
    manifest: &mut ManifestStore,
    pass: PassId,
    from: PassStatus,
    to: PassStatus,
    fields: TransitionFields,
) -> Result<(), IngestError> {
    manifest
        .transition(pass, from, to, fields)
        .map_err(manifest_err)
}

/// Map persistence-layer errors into the unified taxonomy.
pub fn manifest_err(err: ManifestStoreError) -> IngestError {
    let code = match &err {
        ManifestStoreError::State(gri_core::ManifestError::IllegalTransition { .. }) => {
            ErrorCode::IllegalTransition
        }
        ManifestStoreError::State(gri_core::ManifestError::UnsupportedVersion { .. }) => {
            ErrorCode::ManifestVersionUnsupported
        }
        ManifestStoreError::Chain(_) => ErrorCode::AuditChainBroken,
        _ => ErrorCode::Internal,
    };
    IngestError::new(code, err.to_string()).with_source(err)
}

/// Append an audit event; the engine never lets audit io mask the primary
/// pipeline outcome.
fn append_audit(
    audit: &mut AuditLog,
    pass: Option<PassId>,
    event_type: AuditEventType,
    payload: &[u8],
) {
    if let Err(e) = audit.append(pass, event_type, payload) {
        error!(target: "gri.engine", error = %e, "audit append failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedJobState;
    use crate::{ArtifactPayload, PassOutput};
    use async_trait::async_trait;
    use gri_adapters::Adapters;
    use gri_core::{Environment, Gate0Decision, IngestPolicy, Manifest, Source};
    use gri_retry::RetryPolicy;
    use gri_store::ArtifactStore;
    use std::path::Path;

    struct StaticPass {
        id: PassId,
        output: fn() -> Result<PassOutput, IngestError>,
        inputs: &'static [(PassId, &'static str)],
    }

    #[async_trait]
    impl Pass for StaticPass {
        fn id(&self) -> PassId {
            self.id
        }
        fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
            self.inputs
        }
        fn produced_artifacts(&self) -> &'static [&'static str] {
            &[]
        }
        async fn execute(&self, _ctx: &PassContext) -> Result<PassOutput, IngestError> {
            (self.output)()
        }
    }

    fn harness(dir: &Path) -> (PassContext, ManifestStore, AuditLog) {
        let store = ArtifactStore::new(dir.join("root"));
        let job_dir = store.create_job_dir(Environment::Dev, "phb_20240101_000000").unwrap();
        let manifest = Manifest::init(
            "phb_20240101_000000",
            "phb",
            "a".repeat(64),
            Environment::Dev,
            Gate0Decision::Proceed,
            chrono::Utc::now(),
        );
        let manifest = ManifestStore::init(&job_dir, manifest).unwrap();
        let audit = AuditLog::open(&job_dir, "phb_20240101_000000").unwrap();
        let ctx = PassContext {
            job_dir,
            source: Source {
                source_id: "phb".into(),
                path: dir.join("phb.pdf"),
                size_bytes: 1024,
                sha256: "a".repeat(64),
                mime_type: "application/pdf".into(),
            },
            environment: Environment::Dev,
            policy: IngestPolicy::default(),
            adapters: Adapters::mock(),
            store,
            cancel: crate::CancellationToken::new(),
            retry: RetryPolicy::no_retries(),
            prior_job_dir: None,
            shared: SharedJobState::new(),
        };
        (ctx, manifest, audit)
    }

    fn ok_output() -> Result<PassOutput, IngestError> {
        Ok(PassOutput {
            processed_count: 1,
            artifacts: vec![ArtifactPayload::new("out.json", b"{}".to_vec())],
            ..Default::default()
        })
    }

    fn err_output() -> Result<PassOutput, IngestError> {
        Err(IngestError::new(ErrorCode::SourceUnreadable, "boom"))
    }

    #[tokio::test]
    async fn happy_path_records_success_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manifest, mut audit) = harness(dir.path());
        let engine = PassEngine::with_passes(vec![
            Box::new(StaticPass { id: PassId::A, output: ok_output, inputs: &[] }),
        ]);
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;
        assert!(report.succeeded());
        let result = report.result_for(PassId::A).unwrap();
        assert_eq!(result.status, PassStatus::Succeeded);
        assert_eq!(result.artifact_count, 1);
        assert!(ctx.store.artifact_exists(&ctx.job_dir, PassId::A, "out.json"));
        assert_eq!(
            manifest.manifest().pass_state(PassId::A).unwrap().status,
            PassStatus::Succeeded
        );
        assert_eq!(audit.verify().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failure_halts_and_leaves_downstream_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manifest, mut audit) = harness(dir.path());
        let engine = PassEngine::with_passes(vec![
            Box::new(StaticPass { id: PassId::A, output: err_output, inputs: &[] }),
            Box::new(StaticPass { id: PassId::B, output: ok_output, inputs: &[] }),
        ]);
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;
        assert!(!report.succeeded());
        assert_eq!(report.error.as_ref().unwrap().code, ErrorCode::SourceUnreadable);
        assert_eq!(
            manifest.manifest().pass_state(PassId::A).unwrap().status,
            PassStatus::Failed
        );
        assert_eq!(
            manifest.manifest().pass_state(PassId::B).unwrap().status,
            PassStatus::Pending
        );
    }

    #[tokio::test]
    async fn missing_required_input_fails_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manifest, mut audit) = harness(dir.path());
        let engine = PassEngine::with_passes(vec![Box::new(StaticPass {
            id: PassId::C,
            output: ok_output,
            inputs: &[(PassId::A, "toc.json")],
        })]);
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;
        assert_eq!(report.error.as_ref().unwrap().code, ErrorCode::ArtifactMissing);
        assert_eq!(
            manifest.manifest().pass_state(PassId::C).unwrap().status,
            PassStatus::Failed
        );
    }

    #[tokio::test]
    async fn skipped_passes_are_recorded_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manifest, mut audit) = harness(dir.path());
        fn skipped() -> Result<PassOutput, IngestError> {
            Ok(PassOutput {
                skipped: true,
                artifacts: vec![ArtifactPayload::new("split_index.json", b"{}".to_vec())],
                ..Default::default()
            })
        }
        let engine = PassEngine::with_passes(vec![
            Box::new(StaticPass { id: PassId::B, output: skipped, inputs: &[] }),
        ]);
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;
        assert!(report.succeeded());
        assert_eq!(
            manifest.manifest().pass_state(PassId::B).unwrap().status,
            PassStatus::Skipped
        );
    }

    #[tokio::test]
    async fn cancel_before_start_leaves_pass_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut manifest, mut audit) = harness(dir.path());
        ctx.cancel.cancel();
        let engine = PassEngine::with_passes(vec![
            Box::new(StaticPass { id: PassId::A, output: ok_output, inputs: &[] }),
        ]);
        let report = engine.run(&ctx, &mut manifest, &mut audit).await;
        assert_eq!(report.error.as_ref().unwrap().code, ErrorCode::Cancelled);
        assert_eq!(
            manifest.manifest().pass_state(PassId::A).unwrap().status,
            PassStatus::Pending
        );
    }
}
