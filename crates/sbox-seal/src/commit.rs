//! Atomic backup commit.
//!
//! The producer writes into `<target>.partial` in the target's directory.
//! Only a producer that returns `Ok` gets its output hashed and renamed onto
//! the target, so the target path either does not exist or holds a
//! complete artifact matching `<target>.sha256`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use sbox_core::types::{sidecar, ArtifactPaths, BackupProgress, BackupStatus, Checkpoint};
use sbox_core::SboxResult;

use crate::checkpoint::CheckpointStore;
use crate::integrity::{sha256_file, write_digest};
use crate::state::{remove_if_exists, StateStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub target: PathBuf,
    pub digest: String,
    pub artifact_bytes: u64,
    pub resumed: bool,
}

/// Commits one target.
///
/// There is no file locking: running two committers against the same target
/// at once is the caller's problem.
pub struct AtomicCommitter {
    paths: ArtifactPaths,
    checkpoints: CheckpointStore,
    state: StateStore,
}

impl AtomicCommitter {
    pub fn for_target(target: &Path) -> Self {
        Self {
            paths: ArtifactPaths::for_target(target),
            checkpoints: CheckpointStore::for_target(target),
            state: StateStore::for_target(target),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run `writer` against the staging file and commit its output.
    ///
    /// The writer receives the staging path and, when resuming, the
    /// checkpoint it must continue from.
    pub fn commit<F>(&self, resume: bool, writer: F) -> SboxResult<CommitReport>
    where
        F: FnOnce(&Path, Option<&Checkpoint>) -> SboxResult<()>,
    {
        let checkpoint = if resume {
            self.usable_checkpoint()
        } else {
            None
        };
        if checkpoint.is_none() {
            self.discard_stale()?;
        }

        self.state.write(
            BackupStatus::InProgress,
            checkpoint.as_ref().map(BackupProgress::from),
        )?;

        let resumed = checkpoint.is_some();
        let result = writer(&self.paths.partial, checkpoint.as_ref())
            .and_then(|()| self.finish(resumed));

        if let Err(e) = &result {
            warn!(artifact = %self.paths.target.display(), "commit failed: {e}");
            self.abandon();
        }
        result
    }

    /// A checkpoint is only worth resuming if the staging file still holds
    /// every byte it vouches for.
    fn usable_checkpoint(&self) -> Option<Checkpoint> {
        let Some(cp) = self.checkpoints.load() else {
            info!("no checkpoint found, starting fresh");
            return None;
        };
        let staged = fs::metadata(&self.paths.partial).map(|m| m.len()).ok();
        match staged {
            Some(len) if len >= cp.output_bytes => {
                info!(
                    chunk_index = cp.chunk_index,
                    bytes_written = cp.bytes_written,
                    "resuming from checkpoint"
                );
                Some(cp)
            }
            _ => {
                warn!(
                    partial = %self.paths.partial.display(),
                    expected = cp.output_bytes,
                    found = ?staged,
                    "staging file does not cover the checkpoint, discarding it"
                );
                None
            }
        }
    }

    /// Clear leftovers of an earlier run before starting from scratch.
    fn discard_stale(&self) -> SboxResult<()> {
        if let Some(prev) = self.state.load() {
            if prev.status == BackupStatus::InProgress {
                if self.checkpoints.exists() {
                    warn!(
                        artifact = %self.paths.target.display(),
                        "previous run did not finish cleanly; a checkpoint existed (--resume could have continued it)"
                    );
                } else {
                    warn!(
                        artifact = %self.paths.target.display(),
                        "previous run did not finish cleanly"
                    );
                }
            }
            self.state.clear()?;
        }
        self.checkpoints.clear()?;
        remove_if_exists(&self.paths.partial)
    }

    fn finish(&self, resumed: bool) -> SboxResult<CommitReport> {
        let digest = sha256_file(&self.paths.partial)?;
        move_into_place(&self.paths)?;
        write_digest(&self.paths, &digest)?;
        self.state.write(BackupStatus::Completed, None)?;
        self.checkpoints.clear()?;

        let artifact_bytes = fs::metadata(&self.paths.target)?.len();
        info!(
            artifact = %self.paths.target.display(),
            digest = %digest,
            bytes = artifact_bytes,
            "backup committed"
        );
        Ok(CommitReport {
            target: self.paths.target.clone(),
            digest,
            artifact_bytes,
            resumed,
        })
    }

    /// Failure path. The staging file survives only when a checkpoint can
    /// pick it up again.
    fn abandon(&self) {
        if self.checkpoints.exists() {
            info!(
                partial = %self.paths.partial.display(),
                "keeping staging file for --resume"
            );
            return;
        }
        if let Err(e) = remove_if_exists(&self.paths.partial) {
            warn!(partial = %self.paths.partial.display(), "failed to remove staging file: {e}");
        }
    }
}

/// Rename the staging file onto the target, copying through
/// `<target>.incoming` when the two sit on different filesystems.
fn move_into_place(paths: &ArtifactPaths) -> SboxResult<()> {
    let (staging, target) = (&paths.partial, &paths.target);
    match fs::rename(staging, target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let incoming = sidecar(target, "incoming");
            warn!(
                artifact = %target.display(),
                "staging file on another device, copying via {}",
                incoming.display()
            );
            fs::copy(staging, &incoming)?;
            File::open(&incoming)?.sync_all()?;
            fs::rename(&incoming, target)?;
            fs::remove_file(staging)?;
        }
        Err(e) => return Err(e.into()),
    }

    File::open(target)?.sync_all()?;
    #[cfg(unix)]
    File::open(paths.dir())?.sync_all()?;
    Ok(())
}
