use thiserror::Error;

/// Failures raised by the codec, KDF and header parser.
///
/// These carry no stream position; the pipelines in `sbox-seal` attach the
/// chunk index and byte offset when lifting them into `SboxError`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// GCM tag mismatch: wrong key, corrupted or tampered ciphertext.
    #[error("authentication failed: wrong password or corrupted data")]
    Authentication,

    #[error("chunk too large: {len} ciphertext bytes exceeds the 32-bit frame limit")]
    OversizeChunk { len: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("invalid artifact header: {0}")]
    Header(String),
}
