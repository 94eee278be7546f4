// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gate 0: SHA → prior-artifact lookup and bypass decision for unchanged
//! inputs.
//!
//! The cache is the only shared mutable state in the core. Access is
//! serialized per `(source_sha, environment)` key: no two concurrent jobs
//! may run for the same key. The second caller either waits for the first
//! to finish or receives [`GateError::AlreadyInProgress`], per policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use gri_core::{Environment, Gate0Decision, IngestPolicy, JobStatus};
use gri_store::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Keys and entries
// ---------------------------------------------------------------------------

/// Cache key: one source content hash in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateKey {
    /// SHA-256 of the source file.
    pub source_sha: String,
    /// Environment tag.
    pub environment: Environment,
}

impl GateKey {
    /// Build a key.
    pub fn new(source_sha: impl Into<String>, environment: Environment) -> Self {
        Self {
            source_sha: source_sha.into(),
            environment,
        }
    }
}

/// What the cache remembers about the last successful job for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate0Entry {
    /// SHA-256 of the source file at success time.
    pub source_sha: String,
    /// Environment the job ran in.
    pub environment: Environment,
    /// The last job that reached `SUCCEEDED`.
    pub last_successful_job_id: String,
    /// Chunk count that job produced.
    pub last_chunk_count: u64,
    /// Path of that job's manifest.
    pub last_manifest_path: PathBuf,
}

/// Errors from Gate 0 operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Another job for the same key is running and the policy declined to
    /// wait.
    #[error("ingest already in progress for source {source_sha} in {environment}")]
    AlreadyInProgress {
        /// Source hash of the contended key.
        source_sha: String,
        /// Environment of the contended key.
        environment: Environment,
    },
}

// ---------------------------------------------------------------------------
// Gate0Cache
// ---------------------------------------------------------------------------

/// Process-wide bypass/delta cache with per-key serialization.
#[derive(Debug, Default)]
pub struct Gate0Cache {
    entries: Mutex<HashMap<GateKey, Gate0Entry>>,
    locks: Mutex<HashMap<GateKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holding this guard makes the caller the only active job for its key.
/// Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl Gate0Cache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize on a key.
    ///
    /// With `wait=true` the call blocks until any in-flight job for the key
    /// completes. With `wait=false` it returns
    /// [`GateError::AlreadyInProgress`] instead of blocking.
    pub async fn acquire(&self, key: &GateKey, wait: bool) -> Result<KeyGuard, GateError> {
        let lock = {
            let mut locks = self.locks.lock().expect("gate lock table poisoned");
            locks.entry(key.clone()).or_default().clone()
        };
        if wait {
            Ok(KeyGuard {
                _guard: lock.lock_owned().await,
            })
        } else {
            match lock.try_lock_owned() {
                Ok(guard) => Ok(KeyGuard { _guard: guard }),
                Err(_) => Err(GateError::AlreadyInProgress {
                    source_sha: key.source_sha.clone(),
                    environment: key.environment,
                }),
            }
        }
    }

    /// Decide how to treat an ingestion request.
    ///
    /// Decision order:
    /// 1. Forced full runs always proceed.
    /// 2. No prior entry: first-time ingest, proceed.
    /// 3. Prior entry with a matching SHA and a non-empty chunk count:
    ///    bypass to the prior job.
    /// 4. Prior entry whose manifest carries fingerprints, with deltas
    ///    allowed: delta against the prior job. The concrete changed-section
    ///    set is resolved by the delta planner once the new source's
    ///    fingerprints exist; the admission decision records eligibility.
    /// 5. Otherwise: proceed with a full run.
    pub fn decide(
        &self,
        source_sha: &str,
        source_id: &str,
        environment: Environment,
        policy: &IngestPolicy,
        prior_has_fingerprints: impl Fn(&Gate0Entry) -> bool,
    ) -> Gate0Decision {
        if policy.force_full {
            debug!(target: "gri.gate", source_sha, "force_full: proceeding");
            return Gate0Decision::Proceed;
        }
        let key = GateKey::new(source_sha, environment);
        let entries = self.entries.lock().expect("gate entry table poisoned");
        // Exact-SHA entry: the candidate for a wholesale bypass.
        if let Some(entry) = entries.get(&key) {
            if entry.last_chunk_count > 0 {
                info!(
                    target: "gri.gate",
                    source_sha,
                    prior_job = %entry.last_successful_job_id,
                    "bypass: unchanged source"
                );
                return Gate0Decision::Bypass {
                    prior_job_id: entry.last_successful_job_id.clone(),
                };
            }
            warn!(
                target: "gri.gate",
                source_sha,
                prior_job = %entry.last_successful_job_id,
                "prior job recorded zero chunks; proceeding"
            );
            return Gate0Decision::Proceed;
        }
        // Changed bytes: look for a prior job of the same document in this
        // environment whose manifest carries fingerprints to delta against.
        if policy.allow_delta
            && let Some(prior) = entries
                .values()
                .filter(|e| e.environment == environment)
                .filter(|e| {
                    gri_core::source_id_from_job_id(&e.last_successful_job_id)
                        == Some(source_id)
                })
                .filter(|e| prior_has_fingerprints(e))
                .max_by(|a, b| a.last_successful_job_id.cmp(&b.last_successful_job_id))
        {
            info!(
                target: "gri.gate",
                source_sha,
                prior_job = %prior.last_successful_job_id,
                "delta-eligible: changed source with prior fingerprints"
            );
            return Gate0Decision::Delta {
                prior_job_id: prior.last_successful_job_id.clone(),
                changed_sections: Vec::new(),
            };
        }
        debug!(target: "gri.gate", source_sha, "no prior state: proceeding");
        Gate0Decision::Proceed
    }

    /// Record a successful job for its key.
    ///
    /// When multiple prior jobs exist for the same source SHA, the most
    /// recent `SUCCEEDED` job wins — later records overwrite earlier ones.
    pub fn record_success(
        &self,
        source_sha: &str,
        environment: Environment,
        job_id: &str,
        chunk_count: u64,
        manifest_path: PathBuf,
    ) {
        let key = GateKey::new(source_sha, environment);
        let entry = Gate0Entry {
            source_sha: source_sha.to_string(),
            environment,
            last_successful_job_id: job_id.to_string(),
            last_chunk_count: chunk_count,
            last_manifest_path: manifest_path,
        };
        let mut entries = self.entries.lock().expect("gate entry table poisoned");
        entries.insert(key, entry);
    }

    /// Look up the entry for a key.
    #[must_use]
    pub fn entry(&self, source_sha: &str, environment: Environment) -> Option<Gate0Entry> {
        let key = GateKey::new(source_sha, environment);
        self.entries
            .lock()
            .expect("gate entry table poisoned")
            .get(&key)
            .cloned()
    }

    /// Entry for the most recent successful job of an environment,
    /// regardless of source SHA. Used to locate prior fingerprints for
    /// delta planning.
    #[must_use]
    pub fn latest_for_env(&self, environment: Environment) -> Option<Gate0Entry> {
        self.entries
            .lock()
            .expect("gate entry table poisoned")
            .values()
            .filter(|e| e.environment == environment)
            .max_by(|a, b| a.last_successful_job_id.cmp(&b.last_successful_job_id))
            .cloned()
    }

    /// Rebuild the cache by scanning finalized manifests under the
    /// artifacts root. Returns the number of entries hydrated.
    ///
    /// Only `SUCCEEDED` (and warning-succeeded) manifests are considered;
    /// job ids sort lexically by timestamp, so the newest job per key wins.
    pub fn hydrate(&self, store: &ArtifactStore) -> usize {
        let mut hydrated = 0;
        for environment in [Environment::Dev, Environment::Test, Environment::Prod] {
            let Ok(mut dirs) = store.list_all_job_dirs(environment) else {
                continue;
            };
            // Oldest first, so newer jobs overwrite older entries.
            dirs.reverse();
            for dir in dirs {
                let Ok(ms) = gri_manifest::ManifestStore::load(&dir) else {
                    continue;
                };
                let manifest = ms.manifest();
                if !matches!(
                    manifest.final_status,
                    JobStatus::Succeeded | JobStatus::SucceededWithWarnings
                ) {
                    continue;
                }
                let chunk_count = manifest.processed_count(gri_core::PassId::C);
                self.record_success(
                    &manifest.source_sha,
                    environment,
                    &manifest.job_id,
                    chunk_count,
                    ms.path().to_path_buf(),
                );
                hydrated += 1;
            }
        }
        if hydrated > 0 {
            info!(target: "gri.gate", hydrated, "gate0 cache hydrated from manifests");
        }
        hydrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry_policy() -> IngestPolicy {
        IngestPolicy::default()
    }

    #[test]
    fn first_time_ingest_proceeds() {
        let gate = Gate0Cache::new();
        let d = gate.decide("a1", "phb", Environment::Dev, &entry_policy(), |_| true);
        assert_eq!(d, Gate0Decision::Proceed);
    }

    #[test]
    fn unchanged_source_bypasses() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 42, "m.json".into());
        let d = gate.decide("a1", "phb", Environment::Dev, &entry_policy(), |_| true);
        assert_eq!(
            d,
            Gate0Decision::Bypass {
                prior_job_id: "phb_20240101_000000".into()
            }
        );
    }

    #[test]
    fn force_full_overrides_bypass() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 42, "m.json".into());
        let mut policy = entry_policy();
        policy.force_full = true;
        assert_eq!(
            gate.decide("a1", "phb", Environment::Dev, &policy, |_| true),
            Gate0Decision::Proceed
        );
    }

    #[test]
    fn zero_chunk_prior_does_not_bypass() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 0, "m.json".into());
        assert_eq!(
            gate.decide("a1", "phb", Environment::Dev, &entry_policy(), |_| true),
            Gate0Decision::Proceed
        );
    }

    #[test]
    fn changed_source_with_fingerprints_is_delta_eligible() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 42, "m.json".into());
        let d = gate.decide("b2", "phb", Environment::Dev, &entry_policy(), |_| true);
        assert_eq!(
            d,
            Gate0Decision::Delta {
                prior_job_id: "phb_20240101_000000".into(),
                changed_sections: vec![]
            }
        );
    }

    #[test]
    fn delta_requires_allow_delta_and_fingerprints() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 42, "m.json".into());

        let mut no_delta = entry_policy();
        no_delta.allow_delta = false;
        assert_eq!(
            gate.decide("b2", "phb", Environment::Dev, &no_delta, |_| true),
            Gate0Decision::Proceed
        );
        assert_eq!(
            gate.decide("b2", "phb", Environment::Dev, &entry_policy(), |_| false),
            Gate0Decision::Proceed
        );
    }

    #[test]
    fn environments_are_isolated() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 42, "m.json".into());
        assert_eq!(
            gate.decide("a1", "phb", Environment::Prod, &entry_policy(), |_| true),
            Gate0Decision::Proceed
        );
    }

    #[test]
    fn most_recent_success_wins() {
        let gate = Gate0Cache::new();
        gate.record_success("a1", Environment::Dev, "phb_20240101_000000", 10, "m1.json".into());
        gate.record_success("a1", Environment::Dev, "phb_20240301_000000", 12, "m2.json".into());
        let entry = gate.entry("a1", Environment::Dev).unwrap();
        assert_eq!(entry.last_successful_job_id, "phb_20240301_000000");
        assert_eq!(entry.last_chunk_count, 12);
    }

    #[tokio::test]
    async fn second_acquire_blocks_until_release() {
        let gate = Arc::new(Gate0Cache::new());
        let key = GateKey::new("a1", Environment::Dev);

        let guard = gate.acquire(&key, true).await.unwrap();
        let gate2 = gate.clone();
        let key2 = key.clone();
        let waiter = tokio::spawn(async move { gate2.acquire(&key2, true).await.unwrap() });

        // The waiter cannot finish while the guard is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn non_waiting_acquire_reports_in_progress() {
        let gate = Gate0Cache::new();
        let key = GateKey::new("a1", Environment::Dev);
        let _guard = gate.acquire(&key, true).await.unwrap();
        let err = gate.acquire(&key, false).await.unwrap_err();
        assert!(matches!(err, GateError::AlreadyInProgress { .. }));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let gate = Gate0Cache::new();
        let a = GateKey::new("a1", Environment::Dev);
        let b = GateKey::new("a1", Environment::Prod);
        let _ga = gate.acquire(&a, false).await.unwrap();
        let _gb = gate.acquire(&b, false).await.unwrap();
    }
}
