// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed artifact store with atomic temp-file + rename writes.
//!
//! The store owns the on-disk layout consumers depend on:
//!
//! ```text
//! {artifacts_root}/{environment}/{job_id}/
//!   manifest.json
//!   audit.ndjson
//!   pass_A/toc.json
//!   pass_B/split_index.json
//!   ...
//! ```
//!
//! Artifact directories are single-writer (the owning job); readers outside
//! the pipeline must only read artifacts recorded as `succeeded` in the
//! manifest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use gri_core::{Environment, PassId};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors from artifact store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A job directory (or artifact) already exists where none may.
    #[error("artifact conflict: {path} already exists")]
    ArtifactConflict {
        /// Conflicting path.
        path: PathBuf,
    },

    /// A requested artifact is absent.
    #[error("artifact missing: {path}")]
    ArtifactMissing {
        /// Missing path.
        path: PathBuf,
    },

    /// Underlying filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of an artifact write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    /// Final path of the artifact.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the bytes written.
    pub sha256: String,
    /// Number of bytes written.
    pub bytes: u64,
}

/// Filesystem layout owner for all job artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at the artifacts root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The artifacts root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a job directory (whether or not it exists).
    #[must_use]
    pub fn job_dir(&self, environment: Environment, job_id: &str) -> PathBuf {
        self.root.join(environment.as_str()).join(job_id)
    }

    /// Create a fresh job directory.
    ///
    /// # Errors
    ///
    /// [`StoreError::ArtifactConflict`] if the directory already exists.
    pub fn create_job_dir(
        &self,
        environment: Environment,
        job_id: &str,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.job_dir(environment, job_id);
        if dir.exists() {
            return Err(StoreError::ArtifactConflict { path: dir });
        }
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        debug!(target: "gri.store", dir = %dir.display(), "created job dir");
        Ok(dir)
    }

    /// Write one artifact atomically into `{job_dir}/pass_{id}/{name}`.
    ///
    /// The name may contain subdirectories (e.g. `parts/0001.pdf`). Bytes
    /// land in `{path}.tmp` first, are fsynced, then renamed into place;
    /// the SHA-256 is computed during the write.
    pub fn write_artifact(
        &self,
        job_dir: &Path,
        pass: PassId,
        name: &str,
        bytes: &[u8],
    ) -> Result<WrittenArtifact, StoreError> {
        let final_path = job_dir.join(pass.dir_name()).join(name);
        let written = atomic_write(&final_path, bytes)?;
        debug!(
            target: "gri.store",
            pass = %pass,
            name,
            bytes = written.bytes,
            sha = %written.sha256,
            "wrote artifact"
        );
        Ok(written)
    }

    /// Read one artifact's bytes.
    ///
    /// # Errors
    ///
    /// [`StoreError::ArtifactMissing`] if the file is absent.
    pub fn read_artifact(
        &self,
        job_dir: &Path,
        pass: PassId,
        name: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let path = job_dir.join(pass.dir_name()).join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ArtifactMissing { path })
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Path of a named artifact inside a job directory (whether or not it
    /// exists).
    #[must_use]
    pub fn artifact_path(&self, job_dir: &Path, pass: PassId, name: &str) -> PathBuf {
        job_dir.join(pass.dir_name()).join(name)
    }

    /// `true` when the named artifact exists in the job directory.
    #[must_use]
    pub fn artifact_exists(&self, job_dir: &Path, pass: PassId, name: &str) -> bool {
        self.artifact_path(job_dir, pass, name).is_file()
    }

    /// Job directories for a source in an environment, newest first.
    ///
    /// Job ids embed a lexically-sortable UTC timestamp, so a reverse name
    /// sort yields creation-time-descending order.
    pub fn list_job_dirs(
        &self,
        environment: Environment,
        source_id: &str,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let env_dir = self.root.join(environment.as_str());
        let entries = match std::fs::read_dir(&env_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(env_dir, e)),
        };
        let prefix = format!("{source_id}_");
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&env_dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && let Some(rest) = name.strip_prefix(&prefix)
                && is_timestamp_suffix(rest)
            {
                dirs.push(path);
            }
        }
        dirs.sort();
        dirs.reverse();
        Ok(dirs)
    }

    /// All job directories in an environment, newest first per source.
    pub fn list_all_job_dirs(&self, environment: Environment) -> Result<Vec<PathBuf>, StoreError> {
        let env_dir = self.root.join(environment.as_str());
        let entries = match std::fs::read_dir(&env_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(env_dir, e)),
        };
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&env_dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        dirs.reverse();
        Ok(dirs)
    }

    /// Remove orphaned `.tmp` files left by interrupted writes under a job
    /// directory. Returns the number of files removed.
    pub fn sweep_tmp(&self, job_dir: &Path) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut stack = vec![job_dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir, e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            warn!(target: "gri.store", path = %path.display(), "swept orphan tmp");
                            removed += 1;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(StoreError::io(path, e)),
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Write bytes atomically to `path`: `{path}.tmp` + fsync + rename.
///
/// The rename is atomic on the same filesystem, so readers observe either
/// the old content or the new content, never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<WrittenArtifact, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp_path = tmp_path_for(path);

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let sha256 = format!("{:x}", hasher.finalize());

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;

    Ok(WrittenArtifact {
        path: path.to_path_buf(),
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// `true` when `s` is the `YYYYMMDD_HHMMSS` tail of a job id. Source ids may
/// themselves contain underscores, so a plain prefix test over-matches.
fn is_timestamp_suffix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'_'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..].iter().all(u8::is_ascii_digit)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn job_dir_layout_is_env_scoped() {
        let (_t, s) = store();
        let dir = s.job_dir(Environment::Dev, "phb_20240504_123000");
        assert!(dir.ends_with("dev/phb_20240504_123000"));
    }

    #[test]
    fn create_job_dir_rejects_existing() {
        let (_t, s) = store();
        s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        let err = s.create_job_dir(Environment::Dev, "phb_1").unwrap_err();
        assert!(matches!(err, StoreError::ArtifactConflict { .. }));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_t, s) = store();
        let dir = s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        let written = s
            .write_artifact(&dir, PassId::A, "toc.json", b"{\"sections\":[]}")
            .unwrap();
        assert_eq!(written.bytes, 15);
        assert_eq!(written.sha256.len(), 64);
        assert!(written.path.ends_with("pass_A/toc.json"));
        let bytes = s.read_artifact(&dir, PassId::A, "toc.json").unwrap();
        assert_eq!(bytes, b"{\"sections\":[]}");
    }

    #[test]
    fn nested_artifact_names_create_directories() {
        let (_t, s) = store();
        let dir = s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        let written = s
            .write_artifact(&dir, PassId::B, "parts/0001.pdf", b"%PDF-part")
            .unwrap();
        assert!(written.path.ends_with("pass_B/parts/0001.pdf"));
        assert!(s.artifact_exists(&dir, PassId::B, "parts/0001.pdf"));
    }

    #[test]
    fn missing_artifact_is_distinguished_from_io() {
        let (_t, s) = store();
        let dir = s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        let err = s.read_artifact(&dir, PassId::C, "chunks.jsonl").unwrap_err();
        assert!(matches!(err, StoreError::ArtifactMissing { .. }));
    }

    #[test]
    fn no_tmp_file_survives_a_successful_write() {
        let (_t, s) = store();
        let dir = s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        s.write_artifact(&dir, PassId::A, "toc.json", b"{}").unwrap();
        assert!(!dir.join("pass_A/toc.json.tmp").exists());
    }

    #[test]
    fn list_job_dirs_filters_by_source_and_sorts_newest_first() {
        let (_t, s) = store();
        s.create_job_dir(Environment::Dev, "phb_20240101_000000").unwrap();
        s.create_job_dir(Environment::Dev, "phb_20240301_000000").unwrap();
        s.create_job_dir(Environment::Dev, "dmg_20240201_000000").unwrap();
        let dirs = s.list_job_dirs(Environment::Dev, "phb").unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("phb_20240301_000000"));
        assert!(dirs[1].ends_with("phb_20240101_000000"));
    }

    #[test]
    fn listing_unknown_env_is_empty() {
        let (_t, s) = store();
        assert!(s.list_job_dirs(Environment::Prod, "phb").unwrap().is_empty());
    }

    #[test]
    fn prefix_filter_does_not_match_longer_source_ids() {
        let (_t, s) = store();
        s.create_job_dir(Environment::Dev, "phb_20240101_000000").unwrap();
        s.create_job_dir(Environment::Dev, "phb_errata_20240101_000000").unwrap();
        // "phb" must not claim "phb_errata" jobs even though it is a prefix.
        let dirs = s.list_job_dirs(Environment::Dev, "phb").unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].ends_with("phb_20240101_000000"));
        let dirs = s.list_job_dirs(Environment::Dev, "phb_errata").unwrap();
        assert_eq!(dirs.len(), 1);
    }

    #[test]
    fn sweep_removes_only_tmp_files() {
        let (_t, s) = store();
        let dir = s.create_job_dir(Environment::Dev, "phb_1").unwrap();
        s.write_artifact(&dir, PassId::A, "toc.json", b"{}").unwrap();
        std::fs::create_dir_all(dir.join("pass_C")).unwrap();
        std::fs::write(dir.join("pass_C/chunks.jsonl.tmp"), b"partial").unwrap();
        std::fs::write(dir.join("pass_C/keep.json"), b"{}").unwrap();
        let removed = s.sweep_tmp(&dir).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.join("pass_C/chunks.jsonl.tmp").exists());
        assert!(dir.join("pass_C/keep.json").exists());
        assert!(dir.join("pass_A/toc.json").exists());
    }
}
