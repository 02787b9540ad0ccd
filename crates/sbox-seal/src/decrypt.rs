//! Decryption pipeline: the single-threaded reverse of the sealing pipeline.
//!
//! Frames are read back-to-back until a clean end of file on a length
//! prefix. Any other short read is a truncated artifact. Decryption stops at
//! the first failing frame; nothing after it is recovered.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use secrecy::SecretString;
use tracing::{debug, info};

use sbox_core::{SboxError, SboxResult};
use sbox_crypto::{
    decrypt_parts, derive_key, derive_legacy_key, ArtifactHeader, ChunkRecord, SealKey,
    HEADER_LEN, LEN_PREFIX_SIZE, NONCE_SIZE, TAG_SIZE,
};

use crate::crypto_error;
use crate::progress::{emit, ProgressEvent, ProgressFn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptReport {
    pub chunks_read: u64,
    pub plaintext_bytes: u64,
}

pub struct DecryptionPipeline;

impl DecryptionPipeline {
    /// Decrypt frames from `input` into `output`.
    ///
    /// `data_offset` is the artifact offset `input` is positioned at (the
    /// header length, or 0), used for error positions. `total_len` is the
    /// full artifact length; pass `u64::MAX` when it is unknown.
    pub fn decrypt<R: Read, W: Write>(
        key: &SealKey,
        mut input: R,
        data_offset: u64,
        mut output: W,
        total_len: u64,
        progress: Option<&ProgressFn>,
    ) -> SboxResult<DecryptReport> {
        let mut offset = data_offset;
        let mut chunk_index = 0u64;
        let mut plaintext_bytes = 0u64;

        while let Some(record) = read_frame(&mut input, chunk_index, offset, total_len)? {
            let plaintext = decrypt_parts(key, record.nonce(), record.ciphertext())
                .map_err(|e| crypto_error(chunk_index, offset, e))?;
            output.write_all(&plaintext)?;

            offset += record.encoded_len() as u64;
            plaintext_bytes += plaintext.len() as u64;
            emit(
                progress,
                ProgressEvent::ChunkWritten {
                    chunk_index,
                    bytes_done: offset,
                    total_bytes: total_len,
                },
            );
            chunk_index += 1;
        }

        output.flush()?;
        emit(
            progress,
            ProgressEvent::Finished {
                chunks: chunk_index,
                bytes: plaintext_bytes,
            },
        );
        Ok(DecryptReport {
            chunks_read: chunk_index,
            plaintext_bytes,
        })
    }
}

/// Work out the key for an artifact from its first bytes.
///
/// A header means Argon2id with the salt and parameters it carries; no
/// header means the legacy SHA-256 scheme. Returns the key and the offset
/// of the first frame.
pub fn key_for_artifact(path: &Path, password: &SecretString) -> SboxResult<(SealKey, u64)> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; HEADER_LEN];
    let n = read_full(&mut file, &mut prefix)?;

    match ArtifactHeader::parse(&prefix[..n]).map_err(|e| crypto_error(0, 0, e))? {
        Some(header) => {
            debug!(
                mem_cost_kib = header.params.mem_cost_kib,
                time_cost = header.params.time_cost,
                "argon2id artifact"
            );
            let key = derive_key(password, &header.salt, &header.params)
                .map_err(|e| crypto_error(0, 0, e))?;
            Ok((key, HEADER_LEN as u64))
        }
        None => {
            debug!("headerless artifact, using legacy key derivation");
            Ok((derive_legacy_key(password), 0))
        }
    }
}

/// Check `key` against the first frame of a partly written artifact.
///
/// A resumed run appends to frames sealed by an earlier one, so the key it
/// derived must open them. A mismatch is reported as an authentication
/// failure at chunk 0 and nothing is written.
pub fn check_key(path: &Path, key: &SealKey, data_offset: u64) -> SboxResult<()> {
    let total_len = std::fs::metadata(path)?.len();
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(data_offset))?;
    let mut input = BufReader::new(file);

    let record = read_frame(&mut input, 0, data_offset, total_len)?
        .ok_or(SboxError::TruncatedStream {
            chunk_index: 0,
            offset: data_offset,
        })?;
    decrypt_parts(key, record.nonce(), record.ciphertext())
        .map_err(|e| crypto_error(0, data_offset, e))?;
    debug!(path = %path.display(), "key opens the staged frames");
    Ok(())
}

/// Decrypt a sealed artifact into `out_path`.
pub fn decrypt_artifact(
    artifact: &Path,
    password: &SecretString,
    out_path: &Path,
    progress: Option<&ProgressFn>,
) -> SboxResult<DecryptReport> {
    let (key, data_offset) = key_for_artifact(artifact, password)?;
    let total_len = std::fs::metadata(artifact)?.len();

    let mut file = File::open(artifact)?;
    file.seek(SeekFrom::Start(data_offset))?;
    let input = BufReader::new(file);

    let output = BufWriter::new(File::create(out_path)?);
    let report =
        DecryptionPipeline::decrypt(&key, input, data_offset, output, total_len, progress)?;
    info!(
        artifact = %artifact.display(),
        chunks = report.chunks_read,
        bytes = report.plaintext_bytes,
        "artifact decrypted"
    );
    Ok(report)
}

/// Fill as much of `buf` as the reader allows; returns bytes read.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read the frame starting at `offset`. `None` on a clean end of stream.
fn read_frame<R: Read>(
    input: &mut R,
    chunk_index: u64,
    offset: u64,
    total_len: u64,
) -> SboxResult<Option<ChunkRecord>> {
    let mut prefix = [0u8; LEN_PREFIX_SIZE];
    match read_full(input, &mut prefix)? {
        0 => return Ok(None),
        LEN_PREFIX_SIZE => {}
        _ => return Err(SboxError::TruncatedStream { chunk_index, offset }),
    }

    let len = u32::from_be_bytes(prefix) as u64;
    if len < TAG_SIZE as u64 {
        return Err(SboxError::MalformedFrame {
            chunk_index,
            reason: format!("ciphertext length {len} is shorter than the tag"),
        });
    }
    // checked before the buffer is allocated
    let frame_len = (LEN_PREFIX_SIZE + NONCE_SIZE) as u64 + len;
    if offset.saturating_add(frame_len) > total_len {
        return Err(SboxError::TruncatedStream { chunk_index, offset });
    }

    let mut nonce = [0u8; NONCE_SIZE];
    let mut ciphertext = vec![0u8; len as usize];
    read_exact_or_truncated(input, &mut nonce, chunk_index, offset)?;
    read_exact_or_truncated(input, &mut ciphertext, chunk_index, offset)?;

    ChunkRecord::from_parts(chunk_index, nonce, ciphertext)
        .map(Some)
        .map_err(|e| crypto_error(chunk_index, offset, e))
}

fn read_exact_or_truncated<R: Read>(
    input: &mut R,
    buf: &mut [u8],
    chunk_index: u64,
    offset: u64,
) -> SboxResult<()> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(SboxError::TruncatedStream { chunk_index, offset })
        }
        Err(e) => Err(e.into()),
    }
}
