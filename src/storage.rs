//! On-disk persistence: the `write_piece` contract of the design's §4.2.
//!
//! A thin collaborator by design — the spec treats file I/O as an external
//! concern and only prescribes the write contract itself (open/create, seek,
//! write a slice). Directory creation happens here, at first write, rather
//! than being the metainfo loader's duty.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Writes `chunk` at `file_offset` within `path`, creating the file (and its
/// parent directory) if necessary. Per-file failures are the caller's to
/// log; they are not treated as fatal to the owning piece.
pub fn write_slice(path: &Path, file_offset: u64, chunk: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.seek(SeekFrom::Start(file_offset))?;
    file.write_all(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_slice_creates_parent_dirs_and_seeks() {
        let dir = std::env::temp_dir().join("leech-core-test-storage");
        let path = dir.join("nested").join("f.bin");
        let _ = std::fs::remove_dir_all(&dir);

        write_slice(&path, 10, b"hello").unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[10..15], b"hello");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_slice_second_write_does_not_truncate_first() {
        let dir = std::env::temp_dir().join("leech-core-test-storage-append");
        let path = dir.join("f.bin");
        let _ = std::fs::remove_dir_all(&dir);

        write_slice(&path, 0, b"AAAA").unwrap();
        write_slice(&path, 4, b"BBBB").unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[..], b"AAAABBBB");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
