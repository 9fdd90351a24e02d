//! Append-only commit log with crash recovery.

use super::durability::DurabilityMode;
use super::format::{
    declared_record_size, header_bytes, is_valid_header, CommitBatch, WalRecordError,
    WAL_HEADER_SIZE,
};
use evstore_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of replaying a WAL file on open
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Intact batches, in commit order
    pub batches: Vec<CommitBatch>,
    /// Bytes discarded from a torn tail
    pub truncated_bytes: u64,
}

/// Write-ahead log for one table
///
/// Every commit is appended as a single framed record before it becomes
/// visible. On open the log is replayed; an incomplete final record (torn
/// write) or a zero-filled tail is truncated away, while damage before the
/// tail is reported as corruption.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Length of the intact prefix of the file
    len: u64,
    mode: DurabilityMode,
    unsynced: u64,
}

impl WriteAheadLog {
    /// Open or create the log at `path` and replay its contents
    pub fn open<P: AsRef<Path>>(path: P, mode: DurabilityMode) -> Result<(Self, WalReplay)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (replay, valid_len) = if contents.len() < WAL_HEADER_SIZE {
            // New file, or a crash before the header reached disk
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header_bytes())?;
            file.sync_all()?;
            (WalReplay::default(), WAL_HEADER_SIZE as u64)
        } else {
            if !is_valid_header(&contents) {
                return Err(Error::Corruption(format!(
                    "{} is not an evstore WAL file",
                    path.display()
                )));
            }
            replay(&path, &contents)?
        };

        if valid_len < contents.len() as u64 && contents.len() >= WAL_HEADER_SIZE {
            warn!(
                target: "evstore::wal",
                path = %path.display(),
                truncated_bytes = replay.truncated_bytes,
                "Truncating torn WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        debug!(
            target: "evstore::wal",
            path = %path.display(),
            batches = replay.batches.len(),
            "WAL opened"
        );

        Ok((
            WriteAheadLog {
                path,
                writer: BufWriter::new(file),
                len: valid_len,
                mode,
                unsynced: 0,
            },
            replay,
        ))
    }

    /// Append one commit
    ///
    /// On error the file is rolled back to its previous length so that a
    /// failed append never leaves a partial record ahead of later commits.
    pub fn append(&mut self, batch: &CommitBatch) -> Result<()> {
        let bytes = batch
            .to_bytes()
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if let Err(e) = self.write_and_sync(&bytes) {
            self.rollback();
            return Err(Error::storage_unavailable(format!(
                "WAL append failed at offset {}: {}",
                self.len, e
            )));
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn write_and_sync(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        match self.mode {
            DurabilityMode::Always => self.writer.get_ref().sync_data()?,
            DurabilityMode::Buffered { batch_size } => {
                self.unsynced += 1;
                if self.unsynced >= batch_size {
                    self.writer.get_ref().sync_data()?;
                    self.unsynced = 0;
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        // Discard whatever the BufWriter still holds, then cut the file back
        let file = self.writer.get_mut();
        let _ = file.set_len(self.len);
        let _ = file.seek(SeekFrom::Start(self.len));
        let fresh = match file.try_clone() {
            Ok(f) => f,
            Err(_) => return,
        };
        let old = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        let _ = old.into_parts();
    }

    /// Re-read every intact batch from disk, in commit order
    ///
    /// Flushes buffered writes first, so the result covers every append
    /// acknowledged so far.
    pub fn read_batches(&mut self) -> Result<Vec<CommitBatch>> {
        self.writer.flush()?;
        let mut contents = Vec::with_capacity(self.len as usize);
        File::open(&self.path)?
            .take(self.len)
            .read_to_end(&mut contents)?;
        if !is_valid_header(&contents) {
            return Err(Error::Corruption(format!(
                "{} lost its WAL header",
                self.path.display()
            )));
        }
        let (replay, _) = replay(&self.path, &contents)?;
        Ok(replay.batches)
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Size of the intact log in bytes
    pub fn size(&self) -> u64 {
        self.len
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured durability mode
    pub fn durability_mode(&self) -> DurabilityMode {
        self.mode
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        let _ = self.sync();
    }
}

/// Decode every record after the header
///
/// Returns the replayed batches and the length of the intact prefix.
fn replay(path: &Path, contents: &[u8]) -> Result<(WalReplay, u64)> {
    let mut replay = WalReplay::default();
    let mut offset = WAL_HEADER_SIZE;

    while offset < contents.len() {
        let rest = &contents[offset..];
        // Space the filesystem extended but never wrote; no record starts here
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        match CommitBatch::from_bytes(rest) {
            Ok((batch, consumed)) => {
                replay.batches.push(batch);
                offset += consumed;
            }
            Err(WalRecordError::InsufficientData) => break,
            // A bad checksum on the final record is a torn write; anywhere else
            // it means committed data was damaged
            Err(WalRecordError::ChecksumMismatch { .. })
                if declared_record_size(rest) == Some(rest.len()) =>
            {
                break
            }
            Err(e) => {
                return Err(Error::Corruption(format!(
                    "{} at offset {}: {}",
                    path.display(),
                    offset,
                    e
                )));
            }
        }
    }

    replay.truncated_bytes = (contents.len() - offset) as u64;
    Ok((replay, offset as u64))
}
