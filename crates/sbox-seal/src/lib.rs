//! sbox-seal: the sealing engine
//!
//! Archive a folder, encrypt the archive chunk-by-chunk on a worker pool,
//! checkpoint progress so an interrupted run can resume, and commit the
//! result atomically next to its digest and state sidecars.

pub mod archive;
pub mod checkpoint;
pub mod commit;
pub mod decrypt;
pub mod integrity;
pub mod pipeline;
pub mod progress;
pub mod reorder;
pub mod session;
pub mod state;
pub mod tuning;

pub use checkpoint::CheckpointStore;
pub use commit::{AtomicCommitter, CommitReport};
pub use decrypt::{
    check_key, decrypt_artifact, key_for_artifact, DecryptReport, DecryptionPipeline,
};
pub use integrity::{sha256_file, verify_artifact, VerifyReport};
pub use pipeline::{EncryptionPipeline, PipelineReport, ResumePoint};
pub use progress::{ProgressEvent, ProgressFn};
pub use session::{LockSession, UnlockSession, UnlockedFolder};
pub use state::StateStore;
pub use tuning::{HostSnapshot, Tuning};

use sbox_core::SboxError;
use sbox_crypto::CryptoError;

/// Attach stream position to a codec error.
pub(crate) fn crypto_error(chunk_index: u64, offset: u64, err: CryptoError) -> SboxError {
    match err {
        CryptoError::Authentication => SboxError::Authentication {
            chunk_index,
            offset,
        },
        CryptoError::OversizeChunk { len } => SboxError::OversizeChunk { chunk_index, len },
        CryptoError::MalformedFrame(reason) => SboxError::MalformedFrame {
            chunk_index,
            reason,
        },
        CryptoError::Header(msg) => SboxError::Header(msg),
        CryptoError::Kdf(msg) => SboxError::Other(anyhow::anyhow!("key derivation: {msg}")),
    }
}
