//! sbox-crypto: chunk-level authenticated encryption for SecureBox artifacts
//!
//! Architecture: Archive-then-Chunk-then-Encrypt with AES-256-GCM
//!
//! Frame format (repeated until EOF, no global chunk count):
//! ```text
//! [4 bytes: ciphertext_len, big-endian][12 bytes: random nonce][ciphertext_len bytes: ciphertext || 16-byte tag]
//! ```
//!
//! Key schemes:
//! ```text
//! argon2id       : key = Argon2id(password, salt, params); salt + params live in a 38-byte header
//! legacy-sha256  : key = SHA-256(password); no header, frames start at offset 0
//! ```

pub mod chunk;
pub mod error;
pub mod header;
pub mod kdf;

pub use chunk::{decrypt_chunk, decrypt_parts, encrypt_chunk, ChunkRecord};
pub use error::CryptoError;
pub use header::{check_params, ArtifactHeader, HEADER_LEN, MAGIC};
pub use kdf::{derive_key, derive_legacy_key, generate_salt, KdfParams, SealKey};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the big-endian ciphertext length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// Per-frame overhead on top of the plaintext: prefix + nonce + tag
pub const FRAME_OVERHEAD: usize = LEN_PREFIX_SIZE + NONCE_SIZE + TAG_SIZE;

/// Hard ceiling on ciphertext length imposed by the 32-bit length prefix
pub const MAX_CIPHERTEXT_LEN: usize = u32::MAX as usize;

/// Largest plaintext chunk whose ciphertext still fits the length prefix
pub const MAX_PLAINTEXT_LEN: usize = MAX_CIPHERTEXT_LEN - TAG_SIZE;

/// Size of an Argon2id salt
pub const SALT_SIZE: usize = 16;
