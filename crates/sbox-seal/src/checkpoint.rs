//! Resume checkpoints, persisted at `<target>.checkpoint`.
//!
//! `load` never fails: a checkpoint that cannot be trusted is reported and
//! treated as absent, which means the run starts over from byte 0.

use std::path::{Path, PathBuf};

use sbox_core::types::{now_secs, ArtifactPaths, Checkpoint};
use sbox_core::{SboxError, SboxResult};

use crate::state::{remove_if_exists, write_json_atomic};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    target: PathBuf,
    path: PathBuf,
}

impl CheckpointStore {
    pub fn for_target(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            path: ArtifactPaths::for_target(target).checkpoint,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Overwrite the checkpoint. Callers must have made the first
    /// `output_bytes` of the output durable before calling this.
    pub fn save(
        &self,
        bytes_written: u64,
        chunk_index: u64,
        output_bytes: u64,
    ) -> SboxResult<Checkpoint> {
        let checkpoint = Checkpoint {
            bytes_written,
            chunk_index,
            output_bytes,
            timestamp: now_secs(),
            target: self.target.clone(),
        };
        write_json_atomic(&self.path, &checkpoint)?;
        tracing::debug!(bytes_written, chunk_index, output_bytes, "checkpoint saved");
        Ok(checkpoint)
    }

    pub fn load(&self) -> Option<Checkpoint> {
        match self.try_load() {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring checkpoint: {e}");
                None
            }
        }
    }

    fn try_load(&self) -> SboxResult<Option<Checkpoint>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SboxError::CheckpointCorrupt(format!("unreadable: {e}"))),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| SboxError::CheckpointCorrupt(e.to_string()))?;
        if checkpoint.target != self.target {
            return Err(SboxError::CheckpointCorrupt(format!(
                "recorded for {}, not {}",
                checkpoint.target.display(),
                self.target.display()
            )));
        }
        Ok(Some(checkpoint))
    }

    pub fn clear(&self) -> SboxResult<()> {
        remove_if_exists(&self.path)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
