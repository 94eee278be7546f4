// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph delta model: node/edge upserts with dangling-edge validation.
//!
//! A [`GraphDelta`] is a pure value staged by Pass E: two sets (nodes to
//! upsert, edges to upsert) plus removals. The sink adapter applies nodes
//! before edges, so no in-memory cyclic ownership is required.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Kind of a graph node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A logical document section.
    Section,
    /// An extracted chunk.
    Chunk,
    /// A canonicalized named entity.
    Entity,
    /// A recurring concept keyword.
    Concept,
}

/// Kind of a graph edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Section contains chunk.
    Contains,
    /// Chunk cites a section (cross-reference in the text).
    Cites,
    /// Chunk refers to an entity or concept.
    RefersTo,
    /// Section is part of its parent section.
    PartOf,
}

/// One node upsert, keyed by a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphNode {
    /// Stable node id (`section:…`, `chunk:…`, `entity:…`, `concept:…`).
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Display label.
    pub label: String,
    /// Arbitrary scalar properties (deterministic ordering).
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// One edge upsert between two stable node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge kind.
    pub kind: EdgeKind,
}

/// Pass E's staged output, persisted as `pass_E/graph_delta.json` and
/// applied to the graph sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GraphDelta {
    /// Nodes to upsert; applied before edges.
    pub nodes_upsert: Vec<GraphNode>,
    /// Edges to upsert.
    pub edges_upsert: Vec<GraphEdge>,
    /// Node ids to remove (obsoleted sections/chunks on delta ingest).
    #[serde(default)]
    pub nodes_remove: Vec<String>,
}

impl GraphDelta {
    /// `true` when the delta carries no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes_upsert.is_empty() && self.edges_upsert.is_empty() && self.nodes_remove.is_empty()
    }

    /// Verify that every edge endpoint is either a node in this delta or
    /// already committed in the sink.
    ///
    /// Returns the dangling endpoint ids on failure, each at most once.
    pub fn validate_edges(&self, committed: &HashSet<String>) -> Result<(), Vec<String>> {
        let local: HashSet<&str> = self.nodes_upsert.iter().map(|n| n.id.as_str()).collect();
        let mut dangling: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for edge in &self.edges_upsert {
            for endpoint in [edge.from.as_str(), edge.to.as_str()] {
                if !local.contains(endpoint)
                    && !committed.contains(endpoint)
                    && seen.insert(endpoint)
                {
                    dangling.push(endpoint.to_string());
                }
            }
        }
        if dangling.is_empty() { Ok(()) } else { Err(dangling) }
    }
}

/// Canonicalize an entity surface form to a stable node id.
///
/// Lowercases, collapses non-alphanumeric runs to single hyphens, so
/// `"Mind Flayer"` and `"mind-flayer"` share the id `entity:mind-flayer`.
#[must_use]
pub fn entity_node_id(surface: &str) -> String {
    format!("entity:{}", slugify(surface))
}

/// Stable id for a concept keyword.
#[must_use]
pub fn concept_node_id(keyword: &str) -> String {
    format!("concept:{}", slugify(keyword))
}

/// Stable id for a section node.
#[must_use]
pub fn section_node_id(section_id: &str) -> String {
    format!("section:{section_id}")
}

/// Stable id for a chunk node.
#[must_use]
pub fn chunk_node_id(chunk_id: &str) -> String {
    format!("chunk:{chunk_id}")
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_sep = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
