//! Content-hash verification for downloaded and patched map files.
//!
//! The catalog records a base64-encoded SHA-1 digest per leaf file. The
//! digest is recomputed with fixed-size chunked reads after every full-data
//! download and after every successful diff application; on mismatch the
//! caller must delete the file and treat the attempt as failed, never trust
//! partially-hashed content.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Buffer size for reading files during hash calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Errors from integrity validation.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("digest mismatch for {filename}: expected {expected}, got {actual}")]
    DigestMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
}

/// Calculate the base64-encoded SHA-1 digest of a file.
pub fn calculate_sha1_base64(path: &Path) -> Result<String, IntegrityError> {
    let mut file = File::open(path).map_err(|e| IntegrityError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| IntegrityError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(BASE64.encode(hasher.finalize()))
}

/// Verify that a file matches the digest recorded in the catalog.
///
/// Returns `Ok(())` when the digest matches; the mismatch error carries both
/// digests for logging.
pub fn verify(path: &Path, expected_sha1_base64: &str) -> Result<(), IntegrityError> {
    let actual = calculate_sha1_base64(path)?;
    if actual != expected_sha1_base64 {
        return Err(IntegrityError::DigestMismatch {
            filename: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            expected: expected_sha1_base64.to_string(),
            actual,
        });
    }
    Ok(())
}
