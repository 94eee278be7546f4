// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stable SHA-256 content fingerprinting for files, pages, and sections.
//!
//! All hashes are lowercase hex, 64 characters. Page hashing applies the
//! canonical normalization (Unicode NFC, whitespace runs collapsed to a
//! single space, leading/trailing whitespace stripped) before hashing;
//! that normalization is the sole source of truth for "unchanged content"
//! across the system.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Block size for streamed file hashing.
const FILE_BLOCK_BYTES: usize = 64 * 1024;

/// Separator byte between page SHAs when hashing a section.
const SECTION_SEPARATOR: u8 = 0x1f;

/// Errors from fingerprinting operations.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The file could not be opened or read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path being hashed.
        path: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },
}

/// SHA-256 of a file's bytes, streamed in 64 KiB blocks.
///
/// Never loads the whole file into memory, so multi-hundred-megabyte
/// rulebooks hash in constant space.
pub fn file_sha(path: &Path) -> Result<String, FingerprintError> {
    let mut file = std::fs::File::open(path).map_err(|source| FingerprintError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_BLOCK_BYTES];
    loop {
        let n = file.read(&mut buf).map_err(|source| FingerprintError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Canonical text normalization: Unicode NFC, runs of whitespace collapsed
/// to a single space, leading/trailing whitespace stripped.
#[must_use]
pub fn normalize_page(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.nfc() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(ch);
        }
    }
    out
}

/// SHA-256 of a page's canonically-normalized text.
#[must_use]
pub fn page_sha(page_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_page(page_text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 over the concatenation of ordered page SHAs, one separator byte
/// between each.
#[must_use]
pub fn section_sha(ordered_page_shas: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, sha) in ordered_page_shas.iter().enumerate() {
        if i > 0 {
            hasher.update([SECTION_SEPARATOR]);
        }
        hasher.update(sha.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn file_sha_matches_known_vector() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();
        assert_eq!(
            file_sha(f.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_sha_streams_large_input() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        // Three blocks plus change, to cross the 64 KiB boundary.
        let data = vec![0x5au8; FILE_BLOCK_BYTES * 3 + 17];
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        let streamed = file_sha(f.path()).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&data);
        assert_eq!(streamed, format!("{:x}", hasher.finalize()));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(file_sha(Path::new("/no/such/file.pdf")).is_err());
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(normalize_page("  a\t\tb \n c  "), "a b c");
        assert_eq!(normalize_page("\n\n"), "");
        assert_eq!(normalize_page(""), "");
    }

    #[test]
    fn normalization_applies_nfc() {
        // U+0065 U+0301 (e + combining acute) composes to U+00E9.
        assert_eq!(normalize_page("cafe\u{0301}"), "caf\u{00e9}");
        assert_eq!(page_sha("cafe\u{0301}"), page_sha("caf\u{00e9}"));
    }

    #[test]
    fn page_sha_ignores_layout_only_changes() {
        assert_eq!(page_sha("Roll  for\ninitiative"), page_sha("Roll for initiative"));
        assert_ne!(page_sha("Roll for initiative"), page_sha("Roll for Initiative"));
    }

    #[test]
    fn section_sha_is_order_sensitive() {
        let a = page_sha("first");
        let b = page_sha("second");
        assert_ne!(
            section_sha(&[a.clone(), b.clone()]),
            section_sha(&[b, a])
        );
    }

    #[test]
    fn section_separator_prevents_boundary_bleed() {
        // Two single-page lists whose concatenations collide without a
        // separator must still hash differently.
        let ab = section_sha(&["ab".to_string()]);
        let a_b = section_sha(&["a".to_string(), "b".to_string()]);
        assert_ne!(ab, a_b);
    }

    #[test]
    fn hashes_are_64_lowercase_hex() {
        for h in [page_sha("x"), section_sha(&[page_sha("x")])] {
            assert_eq!(h.len(), 64);
            assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(s in "\\PC{0,200}") {
            let once = normalize_page(&s);
            prop_assert_eq!(normalize_page(&once), once);
        }

        #[test]
        fn normalized_text_has_no_whitespace_runs(s in "\\PC{0,200}") {
            let n = normalize_page(&s);
            prop_assert!(!n.contains("  "));
            prop_assert_eq!(n.trim(), &n);
        }

        #[test]
        fn page_sha_is_deterministic(s in "\\PC{0,200}") {
            prop_assert_eq!(page_sha(&s), page_sha(&s));
        }
    }
}
