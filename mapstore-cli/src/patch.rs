//! Replacement patcher for mirrors that publish whole-file diffs.
//!
//! The simplest diff payload a mirror can serve is the complete target file.
//! This patcher streams it through unchanged, which keeps the diff pipeline
//! (staged output, integrity check, atomic swap) fully exercised without
//! committing the binary to any particular delta encoding.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use mapstore::diffs::{DiffPatcher, DiffStream, PatchError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Treats the diff payload as the complete target file.
pub struct ReplacementPatcher;

impl DiffPatcher for ReplacementPatcher {
    fn open(&self, _old: &Path, diff: &Path) -> Result<Box<dyn DiffStream>, PatchError> {
        let reader = File::open(diff)?;
        Ok(Box::new(ReplacementStream { reader }))
    }
}

struct ReplacementStream {
    reader: File,
}

impl DiffStream for ReplacementStream {
    fn next_chunk(&mut self) -> Result<Option<Bytes>, PatchError> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = self.reader.read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_streams_payload_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let diff = dir.path().join("payload.bin");
        let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        File::create(&diff).unwrap().write_all(&payload).unwrap();

        let mut stream = ReplacementPatcher
            .open(Path::new("unused"), &diff)
            .unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next_chunk().unwrap() {
            assert!(chunk.len() <= CHUNK_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, payload);
    }
}
