//! Chunk size and worker count for a sealing run.

use sbox_core::config::{TuningConfig, TuningMode};
use sbox_crypto::MAX_PLAINTEXT_LEN;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;
/// Chunk sizes for small folders are rounded up to this granularity.
const SMALL_CHUNK_STEP: u64 = 64 * 1024;

/// Host resources the auto mode sizes itself against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSnapshot {
    pub available_bytes: u64,
    pub cores: usize,
}

impl HostSnapshot {
    pub fn probe() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        Self {
            available_bytes: sys.available_memory(),
            cores: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub chunk_size: usize,
    pub max_workers: usize,
}

impl Tuning {
    pub fn resolve(cfg: &TuningConfig, folder_bytes: u64, host: &HostSnapshot) -> Self {
        let tuning = match cfg.mode {
            TuningMode::Manual => Self {
                chunk_size: clamp_chunk(cfg.chunk_size),
                max_workers: cfg.max_workers.max(1),
            },
            TuningMode::Auto => Self::auto(cfg, folder_bytes, host),
        };
        tracing::debug!(
            mode = ?cfg.mode,
            chunk_size = tuning.chunk_size,
            max_workers = tuning.max_workers,
            "tuning resolved"
        );
        tuning
    }

    fn auto(cfg: &TuningConfig, folder_bytes: u64, host: &HostSnapshot) -> Self {
        let cores = host.cores.max(1) as u64;
        let available_mib = host.available_bytes / MIB;
        let min_mb = cfg.min_chunk_mb.max(1);
        let max_mb = cfg.max_chunk_mb.max(min_mb);

        let chunk_mb = (available_mib / cores / 2).clamp(min_mb, max_mb);
        let mut chunk_bytes = chunk_mb * MIB;

        if folder_bytes < chunk_bytes {
            chunk_bytes = folder_bytes
                .div_ceil(SMALL_CHUNK_STEP)
                .max(1)
                .saturating_mul(SMALL_CHUNK_STEP);
        }

        let by_memory = (host.available_bytes / GIB / 2) as usize;
        let max_workers = host.cores.max(1).min(by_memory).max(2);

        Self {
            chunk_size: clamp_chunk(chunk_bytes),
            max_workers,
        }
    }

    /// `--threads N`
    pub fn with_threads(self, n: usize) -> Self {
        Self {
            max_workers: n.max(1),
            ..self
        }
    }

    /// `--no-threading`: encrypt inline on the controller thread.
    pub fn single_threaded(self) -> Self {
        Self {
            max_workers: 1,
            ..self
        }
    }
}

fn clamp_chunk(bytes: u64) -> usize {
    bytes.clamp(1, MAX_PLAINTEXT_LEN as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(gib: u64, cores: usize) -> HostSnapshot {
        HostSnapshot {
            available_bytes: gib * GIB,
            cores,
        }
    }

    const BIG: u64 = 100 * GIB;

    #[test]
    fn test_auto_chunk_from_memory_per_core() {
        // 16 GiB / 8 cores / 2 = 1024 MiB, clamped to 512
        let t = Tuning::resolve(&TuningConfig::default(), BIG, &host(16, 8));
        assert_eq!(t.chunk_size as u64, 512 * MIB);
        assert_eq!(t.max_workers, 8);

        // 4 GiB / 8 cores / 2 = 256 MiB, workers limited by memory: 4 / 2 = 2
        let t = Tuning::resolve(&TuningConfig::default(), BIG, &host(4, 8));
        assert_eq!(t.chunk_size as u64, 256 * MIB);
        assert_eq!(t.max_workers, 2);
    }

    #[test]
    fn test_auto_floor() {
        // 1 GiB / 64 cores / 2 = 8 MiB; workers never below 2
        let t = Tuning::resolve(&TuningConfig::default(), BIG, &host(1, 64));
        assert_eq!(t.chunk_size as u64, 8 * MIB);
        assert_eq!(t.max_workers, 2);

        let t = Tuning::resolve(
            &TuningConfig::default(),
            BIG,
            &HostSnapshot {
                available_bytes: 10 * MIB,
                cores: 1,
            },
        );
        assert_eq!(t.chunk_size as u64, 8 * MIB);
        assert_eq!(t.max_workers, 2);
    }

    #[test]
    fn test_small_folder_shrinks_chunk() {
        let cfg = TuningConfig::default();
        let t = Tuning::resolve(&cfg, 100_000, &host(16, 8));
        assert_eq!(t.chunk_size, 131_072);

        let t = Tuning::resolve(&cfg, 0, &host(16, 8));
        assert_eq!(t.chunk_size, 65_536);
    }

    #[test]
    fn test_manual_mode() {
        let cfg = TuningConfig {
            mode: TuningMode::Manual,
            chunk_size: 64,
            max_workers: 3,
            ..Default::default()
        };
        let t = Tuning::resolve(&cfg, BIG, &host(16, 8));
        assert_eq!(t, Tuning { chunk_size: 64, max_workers: 3 });
    }

    #[test]
    fn test_overrides() {
        let t = Tuning {
            chunk_size: 1024,
            max_workers: 8,
        };
        assert_eq!(t.with_threads(3).max_workers, 3);
        assert_eq!(t.with_threads(0).max_workers, 1);
        assert_eq!(t.single_threaded().max_workers, 1);
        assert_eq!(t.single_threaded().chunk_size, 1024);
    }
}
