// SPDX-License-Identifier: MIT OR Apache-2.0
//! Human-readable output helpers.

use gri_core::{IngestResult, Manifest};
use std::path::Path;

/// One-line summary of an ingest result.
pub fn result_line(source: &Path, result: &IngestResult) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source.display().to_string());
    let mut line = format!(
        "{name}: {} job={} chunks={} vectors={} nodes={} edges={} ({})",
        result.final_status,
        result.job_id,
        result.summary.chunk_count,
        result.summary.vector_count,
        result.summary.graph_node_count,
        result.summary.graph_edge_count,
        human_duration(result.summary.duration_ms),
    );
    if let Some(error) = &result.error {
        line.push_str(&format!(" — {error}"));
    }
    line
}

/// One-line summary of a stored job.
pub fn job_line(manifest: &Manifest) -> String {
    format!(
        "{}  {}  {}  created {}",
        manifest.job_id,
        manifest.final_status,
        manifest.gate0_decision.kind(),
        manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Render a millisecond duration compactly.
pub fn human_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
