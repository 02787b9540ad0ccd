//! SHA-256 digests of committed artifacts (`<target>.sha256`, lowercase hex,
//! no trailing newline).

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

use sbox_core::types::{ArtifactPaths, BackupState};
use sbox_core::{SboxError, SboxResult};

use crate::state::{write_atomic, StateStore};

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub digest: String,
    pub state: Option<BackupState>,
}

/// Stream a file through SHA-256.
pub fn sha256_file(path: &Path) -> SboxResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Replace `<target>.sha256` atomically.
pub fn write_digest(paths: &ArtifactPaths, digest: &str) -> SboxResult<()> {
    write_atomic(&paths.sha256, digest.as_bytes())
}

pub fn read_digest(paths: &ArtifactPaths) -> SboxResult<String> {
    match std::fs::read_to_string(&paths.sha256) {
        Ok(s) => Ok(s.trim().to_ascii_lowercase()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(SboxError::MissingDigest(paths.sha256.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Recompute the artifact digest and compare it with the sidecar.
pub fn verify_artifact(target: &Path) -> SboxResult<VerifyReport> {
    let paths = ArtifactPaths::for_target(target);
    let expected = read_digest(&paths)?;
    let actual = sha256_file(target)?;
    if expected != actual {
        return Err(SboxError::IntegrityMismatch { expected, actual });
    }
    tracing::debug!(artifact = %target.display(), digest = %actual, "digest verified");
    Ok(VerifyReport {
        digest: actual,
        state: StateStore::for_target(target).load(),
    })
}
