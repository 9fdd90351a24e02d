//! Durable record of how far the pipeline has published
//!
//! The checkpoint holds the highest commit version whose changes have all
//! been handled (published or filtered). On start the pipeline reads back
//! every commit after it from the WAL, so commits made while no pipeline
//! was running, or lost in a crash before publication, are still notified.
//!
//! The file is small JSON, replaced atomically (temp + fsync + rename).

use evstore_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// File name of the checkpoint inside a data directory
pub const CHECKPOINT_FILE_NAME: &str = "pipeline.checkpoint";

const CHECKPOINT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointData {
    format: u32,
    last_sequence: u64,
}

/// Persisted last-handled commit version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    /// Checkpoint stored at `path`
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Checkpoint { path: path.into() }
    }

    /// Checkpoint stored under `dir` as [`CHECKPOINT_FILE_NAME`]
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::at(dir.as_ref().join(CHECKPOINT_FILE_NAME))
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last stored commit version; 0 if nothing was stored yet
    pub fn load(&self) -> Result<u64> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let data: CheckpointData = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Corruption(format!("{}: {}", self.path.display(), e))
        })?;
        if data.format != CHECKPOINT_FORMAT {
            return Err(Error::Corruption(format!(
                "{}: unsupported checkpoint format {}",
                self.path.display(),
                data.format
            )));
        }
        Ok(data.last_sequence)
    }

    /// Replace the stored commit version
    pub fn store(&self, last_sequence: u64) -> Result<()> {
        let bytes = serde_json::to_vec(&CheckpointData {
            format: CHECKPOINT_FORMAT,
            last_sequence,
        })
        .map_err(|e| Error::Serialization(e.to_string()))?;

        let tmp_path = self.path.with_extension("checkpoint.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
