//! Parallel encryption must produce the same plaintext stream as inline
//! encryption, whatever order the workers finish in.

use std::io::Cursor;

use rand::{Rng, RngCore};
use tempfile::TempDir;

use sbox_crypto::{SealKey, FRAME_OVERHEAD};
use sbox_seal::{DecryptionPipeline, EncryptionPipeline, ResumePoint};

fn decrypt_file(key: &SealKey, path: &std::path::Path) -> Vec<u8> {
    let bytes = std::fs::read(path).unwrap();
    let mut out = Vec::new();
    let report =
        DecryptionPipeline::decrypt(key, &bytes[..], 0, &mut out, bytes.len() as u64, None)
            .unwrap();
    assert_eq!(report.plaintext_bytes as usize, out.len());
    out
}

#[test]
fn parallel_output_matches_inline_over_randomized_runs() {
    let tmp = TempDir::new().unwrap();
    let mut rng = rand::thread_rng();

    for run in 0..12 {
        let key = SealKey::from_bytes(rng.gen());
        let chunk_size = rng.gen_range(16..512);
        let chunks = rng.gen_range(5..60);
        let mut data = vec![0u8; chunk_size * chunks + rng.gen_range(0..chunk_size)];
        rng.fill_bytes(&mut data);
        let workers = rng.gen_range(2..9);

        let parallel = tmp.path().join(format!("parallel-{run}"));
        let inline = tmp.path().join(format!("inline-{run}"));

        let report = EncryptionPipeline::new(chunk_size, workers, 10)
            .encrypt(
                &key,
                Cursor::new(&data),
                &parallel,
                ResumePoint::start(0),
                None,
                None,
            )
            .unwrap();
        EncryptionPipeline::new(chunk_size, 1, 10)
            .encrypt(
                &key,
                Cursor::new(&data),
                &inline,
                ResumePoint::start(0),
                None,
                None,
            )
            .unwrap();

        let expected_chunks = data.len().div_ceil(chunk_size);
        assert_eq!(report.chunks_written as usize, expected_chunks);
        assert_eq!(
            report.output_bytes as usize,
            data.len() + expected_chunks * FRAME_OVERHEAD
        );

        let from_parallel = decrypt_file(&key, &parallel);
        let from_inline = decrypt_file(&key, &inline);
        assert_eq!(from_parallel, data, "run {run}: {workers} workers, chunk {chunk_size}");
        assert_eq!(from_parallel, from_inline);
    }
}

#[test]
fn many_workers_small_chunks_stay_ordered() {
    let tmp = TempDir::new().unwrap();
    let key = SealKey::from_bytes([7u8; 32]);
    let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 241) as u8).collect();
    let out = tmp.path().join("out");

    EncryptionPipeline::new(1024, 8, 4)
        .encrypt(&key, Cursor::new(&data), &out, ResumePoint::start(0), None, None)
        .unwrap();

    assert_eq!(decrypt_file(&key, &out), data);
}
