//! Lock and unlock sessions.
//!
//! A `LockSession` archives a folder and commits its encryption onto a
//! target. An `UnlockSession` verifies and decrypts an artifact into a
//! workspace and hands back an [`UnlockedFolder`]; whether and when to
//! re-seal it is up to the caller.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;
use tracing::{info, warn};

use sbox_core::config::{CheckpointConfig, CryptoConfig, KdfMode};
use sbox_core::types::ArtifactPaths;
use sbox_core::SboxResult;
use sbox_crypto::{
    check_params, derive_key, derive_legacy_key, generate_salt, ArtifactHeader, KdfParams,
    SealKey, HEADER_LEN,
};

use crate::archive::{pack_folder, unpack_archive};
use crate::commit::{AtomicCommitter, CommitReport};
use crate::crypto_error;
use crate::decrypt::{check_key, decrypt_artifact, key_for_artifact};
use crate::integrity::verify_artifact;
use crate::pipeline::{EncryptionPipeline, ResumePoint};
use crate::progress::ProgressFn;
use crate::state::remove_if_exists;
use crate::tuning::Tuning;

/// Name of the decrypted archive inside an unlock workspace
const UNLOCK_TAR: &str = ".sbox-unlock.tar";

pub fn kdf_params(crypto: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: crypto.argon2_mem_cost_kib,
        time_cost: crypto.argon2_time_cost,
        parallelism: crypto.argon2_parallelism,
    }
}

pub struct LockSession {
    pub source: PathBuf,
    pub target: PathBuf,
    pub password: SecretString,
    pub tuning: Tuning,
    pub crypto: CryptoConfig,
    pub checkpoint_interval: u64,
}

impl LockSession {
    pub fn new(source: &Path, target: &Path, password: SecretString, tuning: Tuning) -> Self {
        Self {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            password,
            tuning,
            crypto: CryptoConfig::default(),
            checkpoint_interval: CheckpointConfig::default().interval_chunks,
        }
    }

    pub fn with_crypto(mut self, crypto: CryptoConfig) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Archive the source and commit its encryption onto the target.
    ///
    /// With `resume`, a staged archive and checkpoint left by an interrupted
    /// run are picked up; the archive is reused as is so the resumed run
    /// reads the same plaintext. The password must open the frames already
    /// staged, otherwise the run fails with `Authentication` at chunk 0 and
    /// the checkpoint is left for another attempt.
    pub fn run(&self, resume: bool, progress: Option<&ProgressFn>) -> SboxResult<CommitReport> {
        let committer = AtomicCommitter::for_target(&self.target);
        let tar = committer.paths().staging_tar.clone();

        let reuse = resume && tar.exists() && committer.checkpoints().exists();
        if reuse {
            info!(tar = %tar.display(), "reusing staged archive");
        } else {
            if resume {
                warn!("nothing to resume from, starting fresh");
            }
            info!(source = %self.source.display(), "archiving folder");
            pack_folder(&self.source, &tar)?;
        }

        let pipeline = EncryptionPipeline::new(
            self.tuning.chunk_size,
            self.tuning.max_workers,
            self.checkpoint_interval,
        );

        let result = committer.commit(reuse, |staging, checkpoint| {
            let (key, start) = match checkpoint {
                Some(cp) => {
                    let (key, data_offset) = key_for_artifact(staging, &self.password)?;
                    check_key(staging, &key, data_offset)?;
                    (key, ResumePoint::from(cp))
                }
                None => {
                    let (key, header_len) = self.start_artifact(staging)?;
                    (key, ResumePoint::start(header_len))
                }
            };
            pipeline
                .encrypt_file(
                    &key,
                    &tar,
                    staging,
                    start,
                    Some(committer.checkpoints()),
                    progress,
                )
                .map(|_| ())
        });

        match &result {
            Ok(_) => remove_if_exists(&tar)?,
            Err(_) if committer.checkpoints().exists() => {
                info!(tar = %tar.display(), "keeping staged archive for --resume");
            }
            Err(_) => remove_if_exists(&tar)?,
        }
        result
    }

    /// Create the staging file for a fresh run and derive its key. Returns
    /// the key and the number of header bytes written.
    fn start_artifact(&self, staging: &Path) -> SboxResult<(SealKey, u64)> {
        let mut file = File::create(staging)?;
        match self.crypto.kdf {
            KdfMode::Argon2id => {
                let params = kdf_params(&self.crypto);
                check_params(&params).map_err(|e| crypto_error(0, 0, e))?;
                let header = ArtifactHeader::new(params, generate_salt());
                let key = derive_key(&self.password, &header.salt, &header.params)
                    .map_err(|e| crypto_error(0, 0, e))?;
                file.write_all(&header.encode())?;
                file.sync_data()?;
                Ok((key, HEADER_LEN as u64))
            }
            KdfMode::LegacySha256 => {
                warn!("legacy-sha256 key derivation selected: no salt, no work factor");
                Ok((derive_legacy_key(&self.password), 0))
            }
        }
    }
}

enum Workspace {
    Temp(TempDir),
    Dir(PathBuf),
}

impl Workspace {
    fn path(&self) -> &Path {
        match self {
            Workspace::Temp(t) => t.path(),
            Workspace::Dir(p) => p,
        }
    }
}

pub struct UnlockSession {
    pub artifact: PathBuf,
    pub password: SecretString,
    pub crypto: CryptoConfig,
    pub checkpoint_interval: u64,
}

impl UnlockSession {
    pub fn new(artifact: &Path, password: SecretString) -> Self {
        Self {
            artifact: artifact.to_path_buf(),
            password,
            crypto: CryptoConfig::default(),
            checkpoint_interval: CheckpointConfig::default().interval_chunks,
        }
    }

    pub fn with_crypto(mut self, crypto: CryptoConfig) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Decrypt and extract the artifact.
    ///
    /// `dest` is created if needed; without it a fresh temporary directory
    /// (prefix `SECURE_`) is used and removed again by
    /// [`UnlockedFolder::close`]. When a `.sha256` sidecar exists the
    /// artifact is verified against it first.
    pub fn open(
        self,
        dest: Option<&Path>,
        progress: Option<&ProgressFn>,
    ) -> SboxResult<UnlockedFolder> {
        let paths = ArtifactPaths::for_target(&self.artifact);
        if paths.sha256.exists() {
            verify_artifact(&self.artifact)?;
        } else {
            warn!(artifact = %self.artifact.display(), "no digest sidecar, skipping verification");
        }

        let workspace = match dest {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Workspace::Dir(dir.to_path_buf())
            }
            None => Workspace::Temp(tempfile::Builder::new().prefix("SECURE_").tempdir()?),
        };

        let tar = workspace.path().join(UNLOCK_TAR);
        let unpacked = decrypt_artifact(&self.artifact, &self.password, &tar, progress)
            .and_then(|_| unpack_archive(&tar, workspace.path()));
        remove_if_exists(&tar)?;
        unpacked?;

        info!(workspace = %workspace.path().display(), "folder unlocked");
        Ok(UnlockedFolder {
            workspace,
            artifact: self.artifact,
            password: self.password,
            crypto: self.crypto,
            checkpoint_interval: self.checkpoint_interval,
        })
    }
}

/// A decrypted folder, open for inspection or edits.
pub struct UnlockedFolder {
    workspace: Workspace,
    artifact: PathBuf,
    password: SecretString,
    crypto: CryptoConfig,
    checkpoint_interval: u64,
}

impl UnlockedFolder {
    pub fn path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Seal the workspace contents back onto the artifact with the same
    /// password.
    pub fn reseal(&self, tuning: Tuning, progress: Option<&ProgressFn>) -> SboxResult<CommitReport> {
        info!(artifact = %self.artifact.display(), "re-sealing workspace");
        LockSession::new(
            self.path(),
            &self.artifact,
            SecretString::from(self.password.expose_secret()),
            tuning,
        )
        .with_crypto(self.crypto.clone())
        .with_checkpoint_interval(self.checkpoint_interval)
        .run(false, progress)
    }

    /// Remove a temporary workspace. A caller-chosen `dest` is left in place.
    pub fn close(self) -> SboxResult<()> {
        match self.workspace {
            Workspace::Temp(dir) => {
                dir.close()?;
                info!("workspace removed");
            }
            Workspace::Dir(dir) => {
                info!(workspace = %dir.display(), "workspace left in place");
            }
        }
        Ok(())
    }
}
