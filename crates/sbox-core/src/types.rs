use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resume state persisted next to the output every N emitted chunks.
///
/// Every input byte before `bytes_written` is encrypted into chunks
/// `0..chunk_index`, and those frames (plus the artifact header, if any)
/// occupy exactly the first `output_bytes` bytes of the staging file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub bytes_written: u64,
    pub chunk_index: u64,
    pub output_bytes: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub target: PathBuf,
}

/// Lifecycle of one backup target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStatus {
    InProgress,
    Completed,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::InProgress => write!(f, "in-progress"),
            BackupStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupProgress {
    pub bytes_written: u64,
    pub chunk_index: u64,
}

impl From<&Checkpoint> for BackupProgress {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            bytes_written: cp.bytes_written,
            chunk_index: cp.chunk_index,
        }
    }
}

/// Contents of the `.state` sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupState {
    pub status: BackupStatus,
    pub timestamp: u64,
    pub target: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<BackupProgress>,
}

/// Every file that belongs to one sealed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub target: PathBuf,
    pub sha256: PathBuf,
    pub state: PathBuf,
    pub checkpoint: PathBuf,
    /// Committer staging file, renamed onto `target` on success
    pub partial: PathBuf,
    /// Archived plaintext of the source folder
    pub staging_tar: PathBuf,
}

impl ArtifactPaths {
    pub fn for_target(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        Self {
            sha256: sidecar(&target, "sha256"),
            state: sidecar(&target, "state"),
            checkpoint: sidecar(&target, "checkpoint"),
            partial: sidecar(&target, "partial"),
            staging_tar: sidecar(&target, "tar"),
            target,
        }
    }

    /// Directory holding the target; every sidecar lives here too.
    pub fn dir(&self) -> &Path {
        match self.target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

/// `data.bin` + `sha256` -> `data.bin.sha256`
pub fn sidecar(target: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Append `.bin` unless the name already carries a `bin` extension.
pub fn artifact_path(name: impl AsRef<Path>) -> PathBuf {
    let path = name.as_ref();
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("bin") => path.to_path_buf(),
        _ => sidecar(path, "bin"),
    }
}

/// Current wall-clock time in unix seconds (0 if the clock is before 1970).
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
