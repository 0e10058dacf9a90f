//! Append-only, checksum-protected journal backing the Time-Series Store.
//!
//! Uses atomic temp-file-then-rename persistence, generalized from "a bounded ring buffer of
//! outgoing metrics" into "a durable write-ahead log of every table row the store has ever
//! appended." Each frame
//! is `[len: u32][checksum: u32][payload: len bytes]`; the checksum is the first four bytes of
//! the payload's SHA-256 digest, enough to detect truncation or bit rot without the cost of a
//! full digest compare on every read.

use crate::error::{ControllerError, Result};
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const FRAME_HEADER_LEN: usize = 8;

fn checksum(payload: &[u8]) -> u32 {
    let digest = Sha256::digest(payload);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Journal {
    /// Opens (creating if absent) the journal at `path` for appending.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ControllerError::IntegrityViolation(format!("failed to open journal {}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Appends one record, fsyncing before returning so a crash never loses an acknowledged write.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() as u32;
        let sum = checksum(payload);
        self.writer
            .write_all(&len.to_be_bytes())
            .and_then(|_| self.writer.write_all(&sum.to_be_bytes()))
            .and_then(|_| self.writer.write_all(payload))
            .and_then(|_| self.writer.flush())
            .map_err(|e| ControllerError::IntegrityViolation(format!("journal append failed: {e}")))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| ControllerError::IntegrityViolation(format!("journal fsync failed: {e}")))?;
        Ok(())
    }

    /// Replays every valid frame in file order. Stops at the first corrupt or truncated frame
    /// and truncates the on-disk file to the last good offset, so a torn write from a crash
    /// during append never blocks future appends.
    pub fn replay(path: &Path) -> Result<Vec<Vec<u8>>> {
        let file = match OpenOptions::new().read(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ControllerError::IntegrityViolation(format!("failed to open journal {}: {e}", path.display()))),
        };

        if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            return Ok(Vec::new());
        }

        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| ControllerError::IntegrityViolation(format!("failed to mmap journal: {e}")))?
        };

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut good_offset = 0usize;

        while offset + FRAME_HEADER_LEN <= mmap.len() {
            let len = u32::from_be_bytes(mmap[offset..offset + 4].try_into().unwrap()) as usize;
            let expected_sum = u32::from_be_bytes(mmap[offset + 4..offset + 8].try_into().unwrap());
            let payload_start = offset + FRAME_HEADER_LEN;
            let payload_end = payload_start + len;

            if payload_end > mmap.len() {
                break;
            }
            let payload = &mmap[payload_start..payload_end];
            if checksum(payload) != expected_sum {
                break;
            }

            records.push(payload.to_vec());
            offset = payload_end;
            good_offset = offset;
        }

        drop(mmap);
        if good_offset < file.metadata().map(|m| m.len() as usize).unwrap_or(0) {
            file.set_len(good_offset as u64)
                .map_err(|e| ControllerError::IntegrityViolation(format!("failed to truncate torn journal tail: {e}")))?;
        }

        Ok(records)
    }

    /// Rewrites the journal from scratch with only `records`, via an atomic temp-then-rename
    /// swap so a crash mid-compaction never leaves a half-written file visible to readers.
    pub fn compact(path: &Path, records: &[Vec<u8>]) -> Result<()> {
        let tmp_path = path.with_extension("journal.tmp");
        {
            let mut tmp = BufWriter::new(
                File::create(&tmp_path)
                    .map_err(|e| ControllerError::IntegrityViolation(format!("failed to create compaction temp file: {e}")))?,
            );
            for payload in records {
                let len = payload.len() as u32;
                let sum = checksum(payload);
                tmp.write_all(&len.to_be_bytes())
                    .and_then(|_| tmp.write_all(&sum.to_be_bytes()))
                    .and_then(|_| tmp.write_all(payload))
                    .map_err(|e| ControllerError::IntegrityViolation(format!("compaction write failed: {e}")))?;
            }
            tmp.flush().map_err(|e| ControllerError::IntegrityViolation(format!("compaction flush failed: {e}")))?;
            tmp.get_ref()
                .sync_all()
                .map_err(|e| ControllerError::IntegrityViolation(format!("compaction fsync failed: {e}")))?;
        }
        std::fs::rename(&tmp_path, path)
            .map_err(|e| ControllerError::IntegrityViolation(format!("compaction rename failed: {e}")))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopens the writer after an external `compact()` rewrote the underlying file.
    pub fn reopen(&mut self) -> Result<()> {
        *self = Self::open(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(b"hello").unwrap();
        journal.append(b"world").unwrap();

        let records = Journal::replay(&path).unwrap();
        assert_eq!(records, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn replay_on_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let records = Journal::replay(&path).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn replay_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(b"good-record").unwrap();
        }
        // Simulate a torn write: a trailing partial frame with a bogus checksum.
        {
            use std::io::Write as _;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0, 0, 0, 10, 0xDE, 0xAD, 0xBE, 0xEF, b'x', b'y']).unwrap();
        }

        let before_len = std::fs::metadata(&path).unwrap().len();
        let records = Journal::replay(&path).unwrap();
        let after_len = std::fs::metadata(&path).unwrap().len();

        assert_eq!(records, vec![b"good-record".to_vec()]);
        assert!(after_len < before_len);
    }

    #[test]
    fn compact_rewrites_with_only_given_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.bin");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(b"one").unwrap();
            journal.append(b"two").unwrap();
            journal.append(b"three").unwrap();
        }

        Journal::compact(&path, &[b"two".to_vec()]).unwrap();
        let records = Journal::replay(&path).unwrap();
        assert_eq!(records, vec![b"two".to_vec()]);
    }
}
