// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation and timeout behavior: cooperative cancel mid-pipeline,
//! pre-cancelled jobs, and per-pass timeouts.

mod common;

use async_trait::async_trait;
use common::{harness, rulebook_pages};
use grimoire::adapters::{LanguageModel, LlmConfig};
use grimoire::core::{Environment, IngestRequest, JobStatus, PassId, PassStatus};
use grimoire::error::IngestError;
use grimoire::manifest::ManifestStore;
use grimoire::runtime::CancellationToken;
use std::sync::Arc;
use std::time::Duration;

/// A language model that hangs long enough for cancellation to win.
struct StallingModel;

#[async_trait]
impl LanguageModel for StallingModel {
    async fn complete(&self, _prompt: &str, _config: &LlmConfig) -> Result<String, IngestError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok("[]".to_string())
    }
}

fn stalling_harness() -> common::Harness {
    let mut h = harness("primer.pdf", &vec![0x11u8; 2048], rulebook_pages(false));
    // Swap the language model for one that never returns in time.
    let adapters = grimoire::adapters::Adapters {
        extractor: h.extractor.clone(),
        llm: Arc::new(StallingModel),
        embedder: Arc::new(grimoire::adapters::mock::HashEmbedder::default()),
        vector_sink: h.vector_sink.clone(),
        graph_sink: h.graph_sink.clone(),
    };
    let config = grimoire::config::IngestConfig {
        artifacts_root: h.artifacts_root(),
        ..grimoire::config::IngestConfig::default()
    };
    h.orchestrator = Arc::new(grimoire::runtime::Orchestrator::new(config, adapters).unwrap());
    h
}

#[tokio::test]
async fn cancel_mid_pass_finalizes_the_job_cancelled() {
    let h = stalling_harness();
    let token = CancellationToken::new();
    let request = IngestRequest::new(&h.source, Environment::Dev);

    let orchestrator = h.orchestrator.clone();
    let job_token = token.clone();
    let job = tokio::spawn(async move {
        orchestrator.ingest_with_cancel(request, job_token).await
    });

    // Let the job reach the stalled model, then cancel.
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();

    let result = job.await.unwrap().unwrap();
    assert_eq!(result.final_status, JobStatus::Cancelled);
    assert!(result.error.as_deref().unwrap().contains("CANCELLED"));

    // The pass that was running is failed with the cancel reason; nothing
    // downstream started.
    let manifest = ManifestStore::load(&h.job_dir(&result.job_id)).unwrap();
    let a_state = manifest.manifest().pass_state(PassId::A).unwrap();
    assert_eq!(a_state.status, PassStatus::Failed);
    assert!(a_state.error.as_deref().unwrap().contains("cancelled"));
    for pass in [PassId::B, PassId::C, PassId::D] {
        assert_eq!(
            manifest.manifest().pass_state(pass).unwrap().status,
            PassStatus::Pending
        );
    }
    assert_eq!(manifest.manifest().final_status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_twice_is_a_no_op() {
    let token = CancellationToken::new();
    token.cancel();
    token.cancel();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn pre_cancelled_jobs_never_start_a_pass() {
    let h = harness("primer.pdf", &vec![0x11u8; 2048], rulebook_pages(false));
    let token = CancellationToken::new();
    token.cancel();

    let result = h
        .orchestrator
        .ingest_with_cancel(IngestRequest::new(&h.source, Environment::Dev), token)
        .await
        .unwrap();
    assert_eq!(result.final_status, JobStatus::Cancelled);

    let manifest = ManifestStore::load(&h.job_dir(&result.job_id)).unwrap();
    for pass in PassId::ALL {
        assert_eq!(
            manifest.manifest().pass_state(pass).unwrap().status,
            PassStatus::Pending
        );
    }
}

#[tokio::test]
async fn pass_timeout_cancels_with_timeout_reason() {
    let h = stalling_harness();
    let mut request = IngestRequest::new(&h.source, Environment::Dev);
    request.policy.per_pass_timeouts_ms.insert(PassId::A, 100);

    let result = h.orchestrator.ingest(request).await.unwrap();
    assert_eq!(result.final_status, JobStatus::Cancelled);
    assert!(result.error.as_deref().unwrap().contains("timeout"));

    let manifest = ManifestStore::load(&h.job_dir(&result.job_id)).unwrap();
    let a_state = manifest.manifest().pass_state(PassId::A).unwrap();
    assert_eq!(a_state.status, PassStatus::Failed);
}
