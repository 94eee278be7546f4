// SPDX-License-Identifier: MIT OR Apache-2.0
//! Section-level delta planning against a prior run's fingerprints.
//!
//! The tracker matches sections across runs by `(title, depth, page-range
//! overlap)`, compares section SHAs on matched pairs, and classifies every
//! section as changed, unchanged, or obsolete. When the changed fraction
//! reaches the full-rebuild threshold (inclusive boundary) the planner
//! falls back to full processing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use gri_core::SectionFingerprint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Minimum page-overlap ratio for two sections to be considered the same
/// section across runs.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// Classified sections after matching a current run against a prior one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPlan {
    /// Sections whose content changed, plus entirely new sections. These
    /// must be re-processed.
    pub changed_section_ids: Vec<String>,
    /// Prior sections with no counterpart in the current run; their chunks
    /// in the sinks must be purged.
    pub obsolete_section_ids: Vec<String>,
    /// Sections with byte-identical normalized content.
    pub unchanged_section_ids: Vec<String>,
}

impl DeltaPlan {
    /// Fraction of current sections that changed, in `[0, 1]`.
    ///
    /// A run with no current sections counts as fully changed.
    #[must_use]
    pub fn changed_fraction(&self) -> f64 {
        let total = self.changed_section_ids.len() + self.unchanged_section_ids.len();
        if total == 0 {
            return 1.0;
        }
        self.changed_section_ids.len() as f64 / total as f64
    }

    /// `true` when nothing needs re-processing or purging.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed_section_ids.is_empty() && self.obsolete_section_ids.is_empty()
    }
}

/// Outcome of delta planning for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaDecision {
    /// Re-process only the plan's changed sections.
    Selective(DeltaPlan),
    /// Too much changed; run the full pipeline.
    FullRebuild {
        /// The plan that tripped the threshold, kept for diagnostics.
        plan: DeltaPlan,
    },
}

/// Match current sections against a prior run and classify them.
///
/// Matching is positional-independent: a current section pairs with the
/// prior section sharing its `(title, depth)` whose page range overlaps by
/// at least `similarity_threshold` (overlap pages divided by the larger of
/// the two ranges). Each prior section pairs at most once.
#[must_use]
pub fn diff_sections(
    current: &[SectionFingerprint],
    prior: &[SectionFingerprint],
    similarity_threshold: f64,
) -> DeltaPlan {
    let mut plan = DeltaPlan::default();
    let mut prior_matched = vec![false; prior.len()];

    for cur in current {
        let mut best: Option<(usize, f64)> = None;
        for (idx, old) in prior.iter().enumerate() {
            if prior_matched[idx] || old.title != cur.title || old.depth != cur.depth {
                continue;
            }
            let ratio = overlap_ratio(cur, old);
            if ratio >= similarity_threshold
                && best.map(|(_, b)| ratio > b).unwrap_or(true)
            {
                best = Some((idx, ratio));
            }
        }
        match best {
            Some((idx, ratio)) => {
                prior_matched[idx] = true;
                if prior[idx].section_sha == cur.section_sha {
                    debug!(target: "gri.delta", section = %cur.section_id, ratio, "unchanged");
                    plan.unchanged_section_ids.push(cur.section_id.clone());
                } else {
                    debug!(target: "gri.delta", section = %cur.section_id, ratio, "changed");
                    plan.changed_section_ids.push(cur.section_id.clone());
                }
            }
            None => {
                debug!(target: "gri.delta", section = %cur.section_id, "new");
                plan.changed_section_ids.push(cur.section_id.clone());
            }
        }
    }

    for (idx, old) in prior.iter().enumerate() {
        if !prior_matched[idx] {
            plan.obsolete_section_ids.push(old.section_id.clone());
        }
    }

    plan
}

/// Plan the work for a delta-eligible job.
///
/// Falls back to [`DeltaDecision::FullRebuild`] when the changed fraction
/// is at or above `full_rebuild_threshold` (the boundary is inclusive).
#[must_use]
pub fn plan(
    current: &[SectionFingerprint],
    prior: &[SectionFingerprint],
    similarity_threshold: f64,
    full_rebuild_threshold: f64,
) -> DeltaDecision {
    let plan = diff_sections(current, prior, similarity_threshold);
    let fraction = plan.changed_fraction();
    if fraction >= full_rebuild_threshold {
        info!(
            target: "gri.delta",
            changed = plan.changed_section_ids.len(),
            unchanged = plan.unchanged_section_ids.len(),
            fraction,
            "changed fraction at threshold: full rebuild"
        );
        DeltaDecision::FullRebuild { plan }
    } else {
        info!(
            target: "gri.delta",
            changed = plan.changed_section_ids.len(),
            obsolete = plan.obsolete_section_ids.len(),
            unchanged = plan.unchanged_section_ids.len(),
            "selective re-pass planned"
        );
        DeltaDecision::Selective(plan)
    }
}

/// Page-overlap ratio between two sections: shared pages divided by the
/// larger of the two page ranges.
fn overlap_ratio(a: &SectionFingerprint, b: &SectionFingerprint) -> f64 {
    let shared = a.page_range.overlap(&b.page_range);
    let larger = a.page_range.len().max(b.page_range.len());
    if larger == 0 {
        return 0.0;
    }
    shared as f64 / larger as f64
}
