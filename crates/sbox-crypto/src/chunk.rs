//! Per-chunk AES-256-GCM encryption/decryption
//!
//! Encrypted chunk frame (binary):
//! ```text
//! [4 bytes: ciphertext_len, u32 big-endian][12 bytes: random nonce][ciphertext_len bytes: ciphertext || 16-byte tag]
//! ```
//!
//! No associated data is bound. Stream order is carried by position in the
//! artifact alone, so the writer must emit frames in index order.

use std::io::{self, Write};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::kdf::SealKey;
use crate::{LEN_PREFIX_SIZE, MAX_CIPHERTEXT_LEN, MAX_PLAINTEXT_LEN, NONCE_SIZE, TAG_SIZE};

/// One encrypted chunk, ready to be framed onto the output stream.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    index: u64,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl ChunkRecord {
    /// Assemble a record from parts read off disk.
    pub fn from_parts(
        index: u64,
        nonce: [u8; NONCE_SIZE],
        ciphertext: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        check_ciphertext_len(ciphertext.len())?;
        Ok(Self {
            index,
            nonce,
            ciphertext,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext including the trailing GCM tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Value of the length prefix. Bounded by construction.
    pub fn ciphertext_len(&self) -> u32 {
        self.ciphertext.len() as u32
    }

    /// Number of bytes this record occupies on disk.
    pub fn encoded_len(&self) -> usize {
        LEN_PREFIX_SIZE + NONCE_SIZE + self.ciphertext.len()
    }

    /// Serialize as `len || nonce || ciphertext`.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.encoded_len());
        frame.extend_from_slice(&self.ciphertext_len().to_be_bytes());
        frame.extend_from_slice(&self.nonce);
        frame.extend_from_slice(&self.ciphertext);
        frame
    }

    /// Write the frame without building an intermediate buffer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.ciphertext_len().to_be_bytes())?;
        w.write_all(&self.nonce)?;
        w.write_all(&self.ciphertext)
    }
}

impl std::fmt::Debug for ChunkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRecord")
            .field("index", &self.index)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

/// Reject ciphertext lengths the 32-bit prefix cannot describe.
pub fn check_ciphertext_len(len: usize) -> Result<(), CryptoError> {
    if len > MAX_CIPHERTEXT_LEN {
        return Err(CryptoError::OversizeChunk { len });
    }
    Ok(())
}

/// Encrypt a single chunk with AES-256-GCM under a fresh random nonce.
///
/// - `key`: the session key
/// - `index`: zero-based position of this chunk in the stream
/// - `plaintext`: at most [`MAX_PLAINTEXT_LEN`] bytes
pub fn encrypt_chunk(
    key: &SealKey,
    index: u64,
    plaintext: &[u8],
) -> Result<ChunkRecord, CryptoError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(CryptoError::OversizeChunk {
            len: plaintext.len() + TAG_SIZE,
        });
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Authentication)?;

    Ok(ChunkRecord {
        index,
        nonce,
        ciphertext,
    })
}

/// Decrypt one complete frame (`len || nonce || ciphertext`).
pub fn decrypt_chunk(key: &SealKey, framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let header_len = LEN_PREFIX_SIZE + NONCE_SIZE;
    if framed.len() < header_len + TAG_SIZE {
        return Err(CryptoError::MalformedFrame(format!(
            "frame too short: {} bytes (minimum {})",
            framed.len(),
            header_len + TAG_SIZE
        )));
    }

    let (prefix, rest) = framed.split_at(LEN_PREFIX_SIZE);
    let declared = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
    if ciphertext.len() != declared {
        return Err(CryptoError::MalformedFrame(format!(
            "length prefix says {declared} bytes, frame carries {}",
            ciphertext.len()
        )));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    decrypt_parts(key, &nonce, ciphertext)
}

/// Decrypt an already-split nonce and ciphertext.
pub fn decrypt_parts(
    key: &SealKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::MalformedFrame(format!(
            "ciphertext shorter than the {TAG_SIZE}-byte tag"
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}
