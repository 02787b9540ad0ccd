//! Artifact header for Argon2id-keyed artifacts
//!
//! ```text
//! [8 bytes: "SBOXSEAL"][1: version][1: kdf id][4: mem_cost_kib BE][4: time_cost BE][4: parallelism BE][16: salt]
//! ```
//!
//! Legacy artifacts have no header; their first four bytes are a frame length
//! prefix. "SBOX" read as a big-endian u32 is ~1.3 GiB, far above any chunk
//! size the tuner produces, so the magic cannot be mistaken for a frame.

use crate::error::CryptoError;
use crate::kdf::KdfParams;
use crate::SALT_SIZE;

pub const MAGIC: &[u8; 8] = b"SBOXSEAL";
pub const HEADER_VERSION: u8 = 1;
pub const KDF_ARGON2ID: u8 = 1;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8 + 1 + 1 + 4 + 4 + 4 + SALT_SIZE;

/// Upper bounds on header KDF parameters (4 GiB of memory).
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_TIME_COST: u32 = 64;
pub const MAX_PARALLELISM: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub params: KdfParams,
    pub salt: [u8; SALT_SIZE],
}

impl ArtifactHeader {
    pub fn new(params: KdfParams, salt: [u8; SALT_SIZE]) -> Self {
        Self { params, salt }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(MAGIC);
        out[8] = HEADER_VERSION;
        out[9] = KDF_ARGON2ID;
        out[10..14].copy_from_slice(&self.params.mem_cost_kib.to_be_bytes());
        out[14..18].copy_from_slice(&self.params.time_cost.to_be_bytes());
        out[18..22].copy_from_slice(&self.params.parallelism.to_be_bytes());
        out[22..].copy_from_slice(&self.salt);
        out
    }

    /// Whether the given artifact prefix starts with the header magic.
    pub fn sniff(prefix: &[u8]) -> bool {
        prefix.len() >= MAGIC.len() && &prefix[..MAGIC.len()] == MAGIC
    }

    /// Parse the start of an artifact.
    ///
    /// Returns `Ok(None)` when the bytes carry no magic (a legacy, headerless
    /// artifact), and an error when the magic is present but the rest is not
    /// a header this version understands.
    pub fn parse(prefix: &[u8]) -> Result<Option<Self>, CryptoError> {
        if !Self::sniff(prefix) {
            return Ok(None);
        }
        if prefix.len() < HEADER_LEN {
            return Err(CryptoError::Header(format!(
                "header truncated: {} of {HEADER_LEN} bytes",
                prefix.len()
            )));
        }
        if prefix[8] != HEADER_VERSION {
            return Err(CryptoError::Header(format!(
                "unsupported header version {}",
                prefix[8]
            )));
        }
        if prefix[9] != KDF_ARGON2ID {
            return Err(CryptoError::Header(format!("unsupported kdf id {}", prefix[9])));
        }

        let word = |at: usize| {
            u32::from_be_bytes([prefix[at], prefix[at + 1], prefix[at + 2], prefix[at + 3]])
        };
        let params = KdfParams {
            mem_cost_kib: word(10),
            time_cost: word(14),
            parallelism: word(18),
        };
        check_params(&params)?;
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&prefix[22..HEADER_LEN]);

        Ok(Some(Self { params, salt }))
    }
}

/// Reject KDF parameters above the header limits.
///
/// Header bytes are untrusted: they are checked before any memory is
/// allocated for Argon2id.
pub fn check_params(params: &KdfParams) -> Result<(), CryptoError> {
    if params.mem_cost_kib > MAX_MEM_COST_KIB {
        return Err(CryptoError::Header(format!(
            "argon2 memory cost {} KiB exceeds {MAX_MEM_COST_KIB} KiB",
            params.mem_cost_kib
        )));
    }
    if params.time_cost > MAX_TIME_COST {
        return Err(CryptoError::Header(format!(
            "argon2 time cost {} exceeds {MAX_TIME_COST}",
            params.time_cost
        )));
    }
    if params.parallelism > MAX_PARALLELISM {
        return Err(CryptoError::Header(format!(
            "argon2 parallelism {} exceeds {MAX_PARALLELISM}",
            params.parallelism
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = ArtifactHeader::new(
            KdfParams {
                mem_cost_kib: 2048,
                time_cost: 2,
                parallelism: 1,
            },
            [0x42; SALT_SIZE],
        );
        let bytes = header.encode();
        assert_eq!(bytes.len(), 38);
        assert_eq!(ArtifactHeader::parse(&bytes).unwrap(), Some(header));
    }

    #[test]
    fn test_legacy_prefix_is_not_a_header() {
        // A legacy artifact starts with a big-endian frame length
        let legacy = [0u8, 0, 0, 80, 1, 2, 3, 4, 5, 6, 7, 8];
        assert!(!ArtifactHeader::sniff(&legacy));
        assert_eq!(ArtifactHeader::parse(&legacy).unwrap(), None);
        assert_eq!(ArtifactHeader::parse(&[]).unwrap(), None);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = ArtifactHeader::new(KdfParams::default(), [1; SALT_SIZE]).encode();
        assert!(matches!(
            ArtifactHeader::parse(&bytes[..20]),
            Err(CryptoError::Header(_))
        ));
    }

    #[test]
    fn test_oversized_kdf_params_rejected() {
        let good = ArtifactHeader::new(KdfParams::default(), [1; SALT_SIZE]).encode();

        // flipped high byte of mem_cost_kib
        let mut bytes = good;
        bytes[10] = 0xff;
        assert!(matches!(
            ArtifactHeader::parse(&bytes),
            Err(CryptoError::Header(_))
        ));

        let mut bytes = good;
        bytes[14..18].copy_from_slice(&(MAX_TIME_COST + 1).to_be_bytes());
        assert!(matches!(
            ArtifactHeader::parse(&bytes),
            Err(CryptoError::Header(_))
        ));

        let mut bytes = good;
        bytes[18..22].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            ArtifactHeader::parse(&bytes),
            Err(CryptoError::Header(_))
        ));
    }

    #[test]
    fn test_params_at_limits_accepted() {
        let params = KdfParams {
            mem_cost_kib: MAX_MEM_COST_KIB,
            time_cost: MAX_TIME_COST,
            parallelism: MAX_PARALLELISM,
        };
        let bytes = ArtifactHeader::new(params, [3; SALT_SIZE]).encode();
        assert_eq!(ArtifactHeader::parse(&bytes).unwrap().unwrap().params, params);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = ArtifactHeader::new(KdfParams::default(), [1; SALT_SIZE]).encode();
        bytes[8] = 9;
        assert!(matches!(
            ArtifactHeader::parse(&bytes),
            Err(CryptoError::Header(_))
        ));
    }
}
