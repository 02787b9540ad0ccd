//! `.state` sidecar: whether the last run on a target finished.
//!
//! JSON, replaced atomically via temp+rename. A missing or unreadable file
//! loads as `None`; a corrupt state file never blocks a new run.

use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use sbox_core::types::{
    now_secs, sidecar, ArtifactPaths, BackupProgress, BackupState, BackupStatus,
};
use sbox_core::SboxResult;

pub struct StateStore {
    target: PathBuf,
    path: PathBuf,
}

impl StateStore {
    pub fn for_target(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            path: ArtifactPaths::for_target(target).state,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(
        &self,
        status: BackupStatus,
        progress: Option<BackupProgress>,
    ) -> SboxResult<BackupState> {
        let state = BackupState {
            status,
            timestamp: now_secs(),
            target: self.target.clone(),
            progress,
        };
        write_json_atomic(&self.path, &state)?;
        tracing::debug!(path = %self.path.display(), %status, "state written");
        Ok(state)
    }

    pub fn load(&self) -> Option<BackupState> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "unreadable state file: {e}");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "corrupt state file ignored: {e}");
                None
            }
        }
    }

    pub fn clear(&self) -> SboxResult<()> {
        remove_if_exists(&self.path)
    }
}

/// Serialize `value` as pretty JSON and swap it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> SboxResult<()> {
    let json = serde_json::to_vec_pretty(value).context("serializing sidecar")?;
    write_atomic(path, &json)
}

/// Write `bytes` to `<path>.tmp`, sync it and rename it over `path`. Readers
/// see either the old contents or the new ones, never a torn file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> SboxResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }

    let tmp_path = sidecar(path, "tmp");
    let mut file = std::fs::File::create(&tmp_path)
        .with_context(|| format!("creating temp: {}", tmp_path.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming into place: {}", path.display()))?;
    Ok(())
}

/// Delete a file; absence is not an error.
pub(crate) fn remove_if_exists(path: &Path) -> SboxResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
