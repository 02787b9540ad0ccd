use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{SboxError, SboxResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SboxConfig {
    pub tuning: TuningConfig,
    pub crypto: CryptoConfig,
    pub checkpoint: CheckpointConfig,
    pub logging: LoggingConfig,
}

impl SboxConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> SboxResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SboxError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuningMode {
    /// Derive chunk size and worker count from folder size and host resources
    Auto,
    /// Use `chunk_size` / `max_workers` as written
    Manual,
}

/// Encryption throughput tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub mode: TuningMode,
    /// Chunk size in bytes for manual mode (default: 8 MiB)
    pub chunk_size: u64,
    /// Worker thread count for manual mode (default: 4)
    pub max_workers: usize,
    /// Lower clamp for auto chunk size, MiB
    pub min_chunk_mb: u64,
    /// Upper clamp for auto chunk size, MiB
    pub max_chunk_mb: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            mode: TuningMode::Auto,
            chunk_size: 8 * 1024 * 1024,
            max_workers: 4,
            min_chunk_mb: 8,
            max_chunk_mb: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfMode {
    /// Argon2id with a random salt kept in the artifact header
    Argon2id,
    /// Unsalted SHA-256 of the password, headerless artifacts
    LegacySha256,
}

/// Key derivation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub kdf: KdfMode,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf: KdfMode::Argon2id,
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Persist resume state every N emitted chunks (default: 10)
    pub interval_chunks: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { interval_chunks: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[tuning]
mode = "manual"
chunk_size = 1048576
max_workers = 8
min_chunk_mb = 4
max_chunk_mb = 256

[crypto]
kdf = "legacy-sha256"
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 2

[checkpoint]
interval_chunks = 25

[logging]
level = "debug"
format = "json"
"#;
        let config: SboxConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.tuning.mode, TuningMode::Manual);
        assert_eq!(config.tuning.chunk_size, 1048576);
        assert_eq!(config.tuning.max_workers, 8);
        assert_eq!(config.tuning.max_chunk_mb, 256);
        assert_eq!(config.crypto.kdf, KdfMode::LegacySha256);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
        assert_eq!(config.checkpoint.interval_chunks, 25);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: SboxConfig = toml::from_str("").unwrap();

        assert_eq!(config.tuning.mode, TuningMode::Auto);
        assert_eq!(config.tuning.chunk_size, 8 * 1024 * 1024);
        assert_eq!(config.tuning.min_chunk_mb, 8);
        assert_eq!(config.tuning.max_chunk_mb, 512);
        assert_eq!(config.crypto.kdf, KdfMode::Argon2id);
        assert_eq!(config.crypto.argon2_time_cost, 3);
        assert_eq!(config.checkpoint.interval_chunks, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[tuning]
max_workers = 2
"#;
        let config: SboxConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.tuning.max_workers, 2);
        // Defaults
        assert_eq!(config.tuning.mode, TuningMode::Auto);
        assert_eq!(config.crypto.argon2_parallelism, 4);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SboxConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SboxConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.tuning.chunk_size, parsed.tuning.chunk_size);
        assert_eq!(config.crypto.kdf, parsed.crypto.kdf);
        assert_eq!(config.logging.format, parsed.logging.format);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SboxConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.checkpoint.interval_chunks, 10);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tuning\nmode = ").unwrap();
        assert!(matches!(SboxConfig::load(&path), Err(SboxError::Config(_))));
    }
}
