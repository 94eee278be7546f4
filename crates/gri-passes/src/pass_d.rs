// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass D — vector enrichment.
//!
//! Embeds chunks in configurable batches, extracts lightweight keywords
//! and entities, writes `vectors.jsonl`, and upserts to the vector sink
//! keyed by `chunk_id`. Upserts are idempotent, so a batch interrupted by
//! a transient failure is safe to replay. The cancel flag is checked
//! before every batch and before every external call.

use crate::context::PassContext;
use crate::text::{extract_entities, extract_keywords};
use crate::{ArtifactPayload, CHUNKS_JSONL, Pass, PassOutput, VECTORS_JSONL};
use async_trait::async_trait;
use gri_adapters::VectorItem;
use gri_core::{Chunk, PassId, VectorRecord};
use gri_error::IngestError;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Keywords recorded per chunk.
const KEYWORDS_PER_CHUNK: usize = 5;

/// Pass D implementation.
pub struct VectorizePass;

#[async_trait]
impl Pass for VectorizePass {
    fn id(&self) -> PassId {
        PassId::D
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[(PassId::C, CHUNKS_JSONL)]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[VECTORS_JSONL]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let chunks = ctx.read_chunks()?;
        let batch_size = ctx.policy.vector_batch_size.max(1);
        let model_id = ctx.adapters.embedder.model_id().to_string();

        let mut records: Vec<VectorRecord> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            ctx.check_cancelled()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let embedder = ctx.adapters.embedder.clone();
            let embeddings = ctx
                .retry
                .run("embed-batch", || {
                    let texts = texts.clone();
                    let embedder = embedder.clone();
                    async move { embedder.embed(&texts).await }
                })
                .await?;

            let batch_records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| enrich(chunk, embedding, &model_id))
                .collect();

            // Sink writes are idempotent by chunk_id; replaying after a
            // transient failure cannot half-commit a batch.
            ctx.check_cancelled()?;
            let items: Vec<VectorItem> = batch_records
                .iter()
                .map(|record| VectorItem {
                    id: record.chunk_id.clone(),
                    vector: record.embedding.clone(),
                    metadata: sink_metadata(batch, record),
                })
                .collect();
            let sink = ctx.adapters.vector_sink.clone();
            ctx.retry
                .run("vector-upsert", || {
                    let items = items.clone();
                    let sink = sink.clone();
                    async move { sink.upsert(&items).await }
                })
                .await?;

            debug!(target: "gri.pass.d", batch = batch_records.len(), "batch vectorized");
            records.extend(batch_records);
        }

        let mut jsonl = String::new();
        for record in &records {
            jsonl.push_str(&serde_json::to_string(record).expect("vector record serializes"));
            jsonl.push('\n');
        }

        info!(target: "gri.pass.d", vectors = records.len(), model = %model_id, "vector enrichment complete");
        let mut metrics = std::collections::BTreeMap::new();
        metrics.insert("embedding_model_id".to_string(), serde_json::json!(model_id));
        metrics.insert("batch_size".to_string(), serde_json::json!(batch_size));

        Ok(PassOutput {
            processed_count: records.len() as u64,
            artifacts: vec![ArtifactPayload::new(VECTORS_JSONL, jsonl.into_bytes())],
            skipped: false,
            metrics,
        })
    }
}

/// Build the enriched record for one chunk.
fn enrich(chunk: &Chunk, embedding: Vec<f32>, model_id: &str) -> VectorRecord {
    let mut hasher = Sha256::new();
    hasher.update(chunk.text.as_bytes());
    VectorRecord {
        chunk_id: chunk.chunk_id.clone(),
        embedding_model_id: model_id.to_string(),
        embedding,
        keywords: extract_keywords(&chunk.text, KEYWORDS_PER_CHUNK),
        entities: extract_entities(&chunk.text),
        chunk_hash: format!("{:x}", hasher.finalize()),
    }
}

/// Metadata stored alongside the vector for query-time filtering.
fn sink_metadata(batch: &[Chunk], record: &VectorRecord) -> serde_json::Value {
    let chunk = batch
        .iter()
        .find(|c| c.chunk_id == record.chunk_id)
        .expect("record derives from batch");
    serde_json::json!({
        "source_id": chunk.source_id,
        "section_id": chunk.section_id,
        "kind": chunk.kind,
        "page_start": chunk.page_span.start,
        "page_end": chunk.page_span.end,
        "keywords": record.keywords,
        "entities": record.entities,
    })
}
