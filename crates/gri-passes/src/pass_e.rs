// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pass E — graph builder.
//!
//! Stages a pure [`GraphDelta`] — section, chunk, entity, and concept node
//! upserts plus `contains` / `part_of` / `refers_to` / `cites` edges —
//! then applies it to the graph sink. Every edge endpoint is either a node
//! in the same delta or already committed in the sink; dangling edges are
//! an integrity violation, never a write.

use crate::context::PassContext;
use crate::{
    ArtifactPayload, CHUNKS_JSONL, DELTA_PLAN_JSON, GRAPH_DELTA_JSON, Pass, PassOutput,
    VECTORS_JSONL,
};
use async_trait::async_trait;
use gri_core::graph::{chunk_node_id, concept_node_id, entity_node_id, section_node_id};
use gri_core::{EdgeKind, GraphDelta, GraphEdge, GraphNode, NodeKind, PassId, Toc};
use gri_delta::DeltaDecision;
use gri_error::{ErrorCode, IngestError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// A keyword must appear in this many chunks to become a concept node.
const CONCEPT_MIN_CHUNKS: usize = 2;

/// Chunk node labels keep this many characters of the text.
const CHUNK_LABEL_LEN: usize = 48;

/// Pass E implementation.
pub struct GraphBuildPass;

#[async_trait]
impl Pass for GraphBuildPass {
    fn id(&self) -> PassId {
        PassId::E
    }

    fn required_inputs(&self) -> &'static [(PassId, &'static str)] {
        &[(PassId::C, CHUNKS_JSONL), (PassId::D, VECTORS_JSONL)]
    }

    fn produced_artifacts(&self) -> &'static [&'static str] {
        &[GRAPH_DELTA_JSON]
    }

    async fn execute(&self, ctx: &PassContext) -> Result<PassOutput, IngestError> {
        ctx.check_cancelled()?;
        let toc: Toc = ctx.read_toc()?;
        let chunks = ctx.read_chunks()?;
        let records = ctx.read_vectors()?;
        let by_chunk: BTreeMap<&str, &gri_core::VectorRecord> =
            records.iter().map(|r| (r.chunk_id.as_str(), r)).collect();

        let mut delta = GraphDelta::default();
        let mut node_ids: BTreeSet<String> = BTreeSet::new();
        let mut push_node = |delta: &mut GraphDelta, node: GraphNode| {
            if node_ids.insert(node.id.clone()) {
                delta.nodes_upsert.push(node);
            }
        };

        // Section nodes and their part_of hierarchy.
        for section in &toc.sections {
            let mut properties = BTreeMap::new();
            properties.insert("start_page".to_string(), serde_json::json!(section.start_page));
            properties.insert("end_page".to_string(), serde_json::json!(section.end_page));
            properties.insert("depth".to_string(), serde_json::json!(section.depth));
            push_node(
                &mut delta,
                GraphNode {
                    id: section_node_id(&section.section_id),
                    kind: NodeKind::Section,
                    label: section.title.clone(),
                    properties,
                },
            );
        }
        for section in &toc.sections {
            if let Some(parent) = &section.parent_id {
                delta.edges_upsert.push(GraphEdge {
                    from: section_node_id(&section.section_id),
                    to: section_node_id(parent),
                    kind: EdgeKind::PartOf,
                });
            }
        }

        // Chunk nodes, containment, and reference edges.
        let mut concept_support: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for chunk in &chunks {
            ctx.check_cancelled()?;
            let chunk_node = chunk_node_id(&chunk.chunk_id);
            let mut properties = BTreeMap::new();
            properties.insert("section_id".to_string(), serde_json::json!(chunk.section_id));
            properties.insert("page_start".to_string(), serde_json::json!(chunk.page_span.start));
            properties.insert("kind".to_string(), serde_json::json!(chunk.kind));
            push_node(
                &mut delta,
                GraphNode {
                    id: chunk_node.clone(),
                    kind: NodeKind::Chunk,
                    label: truncate_label(&chunk.text),
                    properties,
                },
            );
            delta.edges_upsert.push(GraphEdge {
                from: section_node_id(&chunk.section_id),
                to: chunk_node.clone(),
                kind: EdgeKind::Contains,
            });

            if let Some(record) = by_chunk.get(chunk.chunk_id.as_str()) {
                for entity in &record.entities {
                    let entity_id = entity_node_id(entity);
                    push_node(
                        &mut delta,
                        GraphNode {
                            id: entity_id.clone(),
                            kind: NodeKind::Entity,
                            label: entity.clone(),
                            properties: BTreeMap::new(),
                        },
                    );
                    delta.edges_upsert.push(GraphEdge {
                        from: chunk_node.clone(),
                        to: entity_id,
                        kind: EdgeKind::RefersTo,
                    });
                }
                for keyword in &record.keywords {
                    concept_support
                        .entry(keyword.clone())
                        .or_default()
                        .push(chunk_node.clone());
                }
            }

            // Cross-references: a chunk citing another section by title.
            for section in &toc.sections {
                if section.section_id == chunk.section_id || section.title.len() < 4 {
                    continue;
                }
                if chunk.text.contains(&section.title) {
                    delta.edges_upsert.push(GraphEdge {
                        from: chunk_node.clone(),
                        to: section_node_id(&section.section_id),
                        kind: EdgeKind::Cites,
                    });
                }
            }
        }

        // Concepts: keywords shared across enough chunks.
        for (keyword, supporters) in &concept_support {
            if supporters.len() < CONCEPT_MIN_CHUNKS {
                continue;
            }
            let concept_id = concept_node_id(keyword);
            push_node(
                &mut delta,
                GraphNode {
                    id: concept_id.clone(),
                    kind: NodeKind::Concept,
                    label: keyword.clone(),
                    properties: BTreeMap::new(),
                },
            );
            for chunk_node in supporters {
                delta.edges_upsert.push(GraphEdge {
                    from: chunk_node.clone(),
                    to: concept_id.clone(),
                    kind: EdgeKind::RefersTo,
                });
            }
        }

        self.stage_removals(ctx, &mut delta)?;
        dedupe_edges(&mut delta);

        // No dangling edges, ever: endpoints resolve within the delta or
        // against nodes already committed in the sink.
        let committed = ctx.adapters.graph_sink.committed_node_ids().await?;
        if let Err(dangling) = delta.validate_edges(&committed) {
            return Err(IngestError::new(
                ErrorCode::IntegrityViolation,
                format!("graph delta references unknown nodes: {}", dangling.join(", ")),
            ));
        }

        ctx.check_cancelled()?;
        let sink = ctx.adapters.graph_sink.clone();
        let delta_for_sink = delta.clone();
        ctx.retry
            .run("graph-apply", || {
                let sink = sink.clone();
                let delta = delta_for_sink.clone();
                async move { sink.apply_delta(&delta).await }
            })
            .await?;

        let node_count = delta.nodes_upsert.len();
        let edge_count = delta.edges_upsert.len();
        info!(
            target: "gri.pass.e",
            nodes = node_count,
            edges = edge_count,
            removals = delta.nodes_remove.len(),
            "graph delta applied"
        );

        let mut metrics = BTreeMap::new();
        metrics.insert("node_count".to_string(), serde_json::json!(node_count));
        metrics.insert("edge_count".to_string(), serde_json::json!(edge_count));
        metrics.insert(
            "removal_count".to_string(),
            serde_json::json!(delta.nodes_remove.len()),
        );

        Ok(PassOutput {
            processed_count: (node_count + edge_count) as u64,
            artifacts: vec![ArtifactPayload::json(GRAPH_DELTA_JSON, &delta)],
            skipped: false,
            metrics,
        })
    }
}

impl GraphBuildPass {
    /// On delta runs, stage removals: obsoleted section nodes, plus the
    /// prior run's chunks for changed and obsoleted sections that were not
    /// re-written by this run.
    fn stage_removals(&self, ctx: &PassContext, delta: &mut GraphDelta) -> Result<(), IngestError> {
        let decision =
            ctx.read_json_artifact::<DeltaDecision>(PassId::C, DELTA_PLAN_JSON);
        let Ok(DeltaDecision::Selective(plan)) = decision else {
            return Ok(());
        };
        let stale: BTreeSet<&str> = plan
            .obsolete_section_ids
            .iter()
            .chain(plan.changed_section_ids.iter())
            .map(String::as_str)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        for section_id in &plan.obsolete_section_ids {
            delta.nodes_remove.push(section_node_id(section_id));
        }
        if let Some(prior_chunks) = ctx.read_prior_chunks()? {
            let current_ids: BTreeSet<String> = delta
                .nodes_upsert
                .iter()
                .map(|n| n.id.clone())
                .collect();
            for chunk in prior_chunks {
                if stale.contains(chunk.section_id.as_str()) {
                    let node = chunk_node_id(&chunk.chunk_id);
                    // A chunk re-written with identical content keeps its
                    // id and must not be removed.
                    if !current_ids.contains(&node) {
                        delta.nodes_remove.push(node);
                    }
                }
            }
        }
        debug!(target: "gri.pass.e", removals = delta.nodes_remove.len(), "staged removals");
        Ok(())
    }
}

fn truncate_label(text: &str) -> String {
    let mut label: String = text.chars().take(CHUNK_LABEL_LEN).collect();
    if text.chars().count() > CHUNK_LABEL_LEN {
        label.push('…');
    }
    label
}

fn dedupe_edges(delta: &mut GraphDelta) {
    let mut seen: BTreeSet<(String, String, EdgeKind)> = BTreeSet::new();
    delta
        .edges_upsert
        .retain(|e| seen.insert((e.from.clone(), e.to.clone(), e.kind)));
}
