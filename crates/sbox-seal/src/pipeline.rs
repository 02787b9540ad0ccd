//! Sequenced encryption pipeline
//!
//! The controller thread reads the input in `chunk_size` pieces, hands each
//! piece to a rayon pool and writes finished records through a reorder
//! buffer, so frames land on disk in strictly increasing index order no
//! matter which worker finishes first. The controller is the only writer.
//!
//! At most `2 × max_workers` chunks are outstanding (dispatched but not yet
//! written). Every `checkpoint_interval` written chunks the output is synced
//! and only then is the checkpoint saved.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use crossbeam::channel;
use tracing::{debug, info};

use sbox_core::types::Checkpoint;
use sbox_core::{SboxError, SboxResult};
use sbox_crypto::{encrypt_chunk, ChunkRecord, CryptoError, SealKey, TAG_SIZE};

use crate::checkpoint::CheckpointStore;
use crate::crypto_error;
use crate::progress::{emit, ProgressEvent, ProgressFn};
use crate::reorder::ReorderBuffer;

/// Where a run starts: input offset, next chunk index, and how many bytes of
/// the output file are already valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub bytes_written: u64,
    pub chunk_index: u64,
    pub output_bytes: u64,
}

impl ResumePoint {
    /// A fresh run whose output already holds `header_len` bytes of header.
    pub fn start(header_len: u64) -> Self {
        Self {
            bytes_written: 0,
            chunk_index: 0,
            output_bytes: header_len,
        }
    }

    pub fn is_resume(&self) -> bool {
        self.chunk_index > 0
    }
}

impl From<&Checkpoint> for ResumePoint {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            bytes_written: cp.bytes_written,
            chunk_index: cp.chunk_index,
            output_bytes: cp.output_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Chunks written by this run (not counting resumed ones)
    pub chunks_written: u64,
    /// Input bytes consumed by this run
    pub bytes_read: u64,
    /// Final length of the output file
    pub output_bytes: u64,
    /// Chunk index the run resumed from, if any
    pub resumed_from: Option<u64>,
}

/// Per-chunk encryption step run by the workers.
type SealFn = fn(&SealKey, u64, &[u8]) -> Result<ChunkRecord, CryptoError>;

#[derive(Debug, Clone)]
pub struct EncryptionPipeline {
    pub chunk_size: usize,
    pub max_workers: usize,
    pub checkpoint_interval: u64,
    seal: SealFn,
}

impl EncryptionPipeline {
    pub fn new(chunk_size: usize, max_workers: usize, checkpoint_interval: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_workers: max_workers.max(1),
            checkpoint_interval: checkpoint_interval.max(1),
            seal: encrypt_chunk,
        }
    }

    /// Encrypt the file at `input_path` into `output_path`.
    pub fn encrypt_file(
        &self,
        key: &SealKey,
        input_path: &Path,
        output_path: &Path,
        start: ResumePoint,
        checkpoints: Option<&CheckpointStore>,
        progress: Option<&ProgressFn>,
    ) -> SboxResult<PipelineReport> {
        let input = File::open(input_path)?;
        self.encrypt(key, input, output_path, start, checkpoints, progress)
    }

    /// Encrypt `input` from `start.bytes_written` onward, appending frames to
    /// `output_path` after its first `start.output_bytes` bytes.
    pub fn encrypt<R: Read + Seek>(
        &self,
        key: &SealKey,
        mut input: R,
        output_path: &Path,
        start: ResumePoint,
        checkpoints: Option<&CheckpointStore>,
        progress: Option<&ProgressFn>,
    ) -> SboxResult<PipelineReport> {
        let total_len = input.seek(SeekFrom::End(0))?;
        if start.bytes_written > total_len {
            return Err(SboxError::ResumeMismatch(format!(
                "checkpoint is at input byte {} but the input is only {total_len} bytes",
                start.bytes_written
            )));
        }
        input.seek(SeekFrom::Start(start.bytes_written))?;

        let output = open_output(output_path, start.output_bytes)?;

        emit(
            progress,
            ProgressEvent::Started {
                total_bytes: total_len,
                chunk_size: self.chunk_size,
                workers: self.max_workers,
            },
        );
        if start.is_resume() {
            info!(
                bytes_written = start.bytes_written,
                chunk_index = start.chunk_index,
                "resuming encryption"
            );
            emit(
                progress,
                ProgressEvent::Resumed {
                    bytes_written: start.bytes_written,
                    chunk_index: start.chunk_index,
                },
            );
        }

        let mut writer = FrameWriter {
            out: BufWriter::new(output),
            bytes_written: start.bytes_written,
            output_bytes: start.output_bytes,
            next_index: start.chunk_index,
            chunks_written: 0,
            since_checkpoint: 0,
            interval: self.checkpoint_interval,
            total_len,
            checkpoints,
            progress,
        };

        if self.max_workers > 1 {
            self.run_pooled(key, &mut input, &mut writer)?;
        } else {
            self.run_inline(key, &mut input, &mut writer)?;
        }

        let output_bytes = writer.finish()?;
        let report = PipelineReport {
            chunks_written: writer.chunks_written,
            bytes_read: writer.bytes_written - start.bytes_written,
            output_bytes,
            resumed_from: start.is_resume().then_some(start.chunk_index),
        };
        info!(
            chunks = report.chunks_written,
            bytes = report.bytes_read,
            output_bytes,
            "encryption finished"
        );
        emit(
            progress,
            ProgressEvent::Finished {
                chunks: writer.next_index,
                bytes: writer.bytes_written,
            },
        );
        Ok(report)
    }

    fn run_inline<R: Read>(
        &self,
        key: &SealKey,
        input: &mut R,
        writer: &mut FrameWriter<'_>,
    ) -> SboxResult<()> {
        let mut index = writer.next_index;
        loop {
            let chunk = read_chunk(input, self.chunk_size)?;
            if chunk.is_empty() {
                return Ok(());
            }
            let record = (self.seal)(key, index, &chunk)
                .map_err(|e| crypto_error(index, writer.bytes_written, e))?;
            writer.write_record(record)?;
            index += 1;
            if chunk.len() < self.chunk_size {
                return Ok(());
            }
        }
    }

    fn run_pooled<R: Read>(
        &self,
        key: &SealKey,
        input: &mut R,
        writer: &mut FrameWriter<'_>,
    ) -> SboxResult<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(|i| format!("sbox-seal-{i}"))
            .build()
            .map_err(|e| anyhow!("building worker pool: {e}"))?;

        let key = Arc::new(key.clone());
        // (chunk index, input offset of the chunk, result)
        let (tx, rx) = channel::unbounded::<(u64, u64, Result<ChunkRecord, CryptoError>)>();
        let limit = 2 * self.max_workers;

        let mut reorder = ReorderBuffer::new(writer.next_index);
        let mut dispatched = writer.next_index;
        let mut read_offset = writer.bytes_written;
        let mut most_parked = 0usize;
        let mut eof = false;

        debug!(workers = self.max_workers, limit, "worker pool started");

        loop {
            // dispatched but not yet written, parked records included
            let mut in_flight = (dispatched - reorder.next_index()) as usize;
            while !eof && in_flight < limit {
                let chunk = read_chunk(input, self.chunk_size)?;
                if chunk.len() < self.chunk_size {
                    eof = true;
                }
                if chunk.is_empty() {
                    break;
                }
                let (index, offset) = (dispatched, read_offset);
                read_offset += chunk.len() as u64;
                let key = Arc::clone(&key);
                let tx = tx.clone();
                let seal = self.seal;
                pool.spawn(move || {
                    let result = seal(&key, index, &chunk);
                    // receiver gone means the controller already failed
                    let _ = tx.send((index, offset, result));
                });
                dispatched += 1;
                in_flight += 1;
            }

            if in_flight == 0 {
                debug!(most_parked, "worker pool drained");
                return Ok(());
            }

            let (index, offset, result) = rx
                .recv()
                .map_err(|_| anyhow!("worker pool hung up with {in_flight} chunks outstanding"))?;
            let record = result.map_err(|e| crypto_error(index, offset, e))?;
            reorder
                .insert(index, record)
                .map_err(|_| anyhow!("chunk {index} delivered twice"))?;
            most_parked = most_parked.max(reorder.pending_len());

            while let Some(record) = reorder.pop_ready() {
                writer.write_record(record)?;
            }
        }
    }
}

/// Open the output without truncation and cut it back to the last durable
/// offset.
fn open_output(path: &Path, valid_len: u64) -> SboxResult<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let existing = file.metadata()?.len();
    if existing < valid_len {
        return Err(SboxError::ResumeMismatch(format!(
            "{} is {existing} bytes, expected at least {valid_len}",
            path.display()
        )));
    }
    if existing > valid_len {
        debug!(
            discarded = existing - valid_len,
            "truncating frames written after the last checkpoint"
        );
        file.set_len(valid_len)?;
    }
    file.seek(SeekFrom::Start(valid_len))?;
    Ok(file)
}

/// Read up to `size` bytes, topping up short reads until full or EOF.
fn read_chunk<R: Read>(input: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Single owner of the output handle.
struct FrameWriter<'a> {
    out: BufWriter<File>,
    bytes_written: u64,
    output_bytes: u64,
    next_index: u64,
    chunks_written: u64,
    since_checkpoint: u64,
    interval: u64,
    total_len: u64,
    checkpoints: Option<&'a CheckpointStore>,
    progress: Option<&'a ProgressFn>,
}

impl FrameWriter<'_> {
    fn write_record(&mut self, record: ChunkRecord) -> SboxResult<()> {
        if record.index() != self.next_index {
            return Err(anyhow!(
                "out-of-order write: chunk {} while expecting {}",
                record.index(),
                self.next_index
            )
            .into());
        }

        record.write_to(&mut self.out)?;
        self.bytes_written += record.ciphertext_len() as u64 - TAG_SIZE as u64;
        self.output_bytes += record.encoded_len() as u64;
        self.next_index += 1;
        self.chunks_written += 1;
        self.since_checkpoint += 1;

        emit(
            self.progress,
            ProgressEvent::ChunkWritten {
                chunk_index: record.index(),
                bytes_done: self.bytes_written,
                total_bytes: self.total_len,
            },
        );

        if self.since_checkpoint >= self.interval {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> SboxResult<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok(())
    }

    fn checkpoint(&mut self) -> SboxResult<()> {
        self.since_checkpoint = 0;
        let Some(store) = self.checkpoints else {
            return Ok(());
        };
        // frames must be durable before the checkpoint that vouches for them
        self.sync()?;
        store.save(self.bytes_written, self.next_index, self.output_bytes)?;
        emit(
            self.progress,
            ProgressEvent::CheckpointSaved {
                chunk_index: self.next_index,
                bytes_written: self.bytes_written,
            },
        );
        Ok(())
    }

    fn finish(&mut self) -> SboxResult<u64> {
        self.sync()?;
        Ok(self.output_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbox_crypto::{decrypt_chunk, FRAME_OVERHEAD};

    fn key() -> SealKey {
        SealKey::from_bytes([0x11; 32])
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Split an output file into frames and decrypt each one.
    fn decrypt_all(bytes: &[u8], key: &SealKey) -> Vec<u8> {
        let mut pos = 0;
        let mut out = Vec::new();
        while pos < bytes.len() {
            let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            let end = pos + 16 + len;
            out.extend(decrypt_chunk(key, &bytes[pos..end]).unwrap());
            pos = end;
        }
        out
    }

    #[test]
    fn test_read_chunk_tops_up_short_reads() {
        struct Dribble(Vec<u8>);
        impl Read for Dribble {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }
        let mut src = Dribble(sample(10));
        assert_eq!(read_chunk(&mut src, 4).unwrap().len(), 4);
        assert_eq!(read_chunk(&mut src, 4).unwrap().len(), 4);
        assert_eq!(read_chunk(&mut src, 4).unwrap().len(), 2);
        assert!(read_chunk(&mut src, 4).unwrap().is_empty());
    }

    #[test]
    fn test_inline_and_pooled_produce_same_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample(10_000);

        for workers in [1, 4] {
            let out = dir.path().join(format!("out-{workers}"));
            let report = EncryptionPipeline::new(1000, workers, 10)
                .encrypt(
                    &key(),
                    io::Cursor::new(&data),
                    &out,
                    ResumePoint::start(0),
                    None,
                    None,
                )
                .unwrap();
            assert_eq!(report.chunks_written, 10);
            assert_eq!(report.bytes_read, 10_000);
            assert_eq!(report.output_bytes, (10_000 + 10 * FRAME_OVERHEAD) as u64);
            assert_eq!(report.resumed_from, None);

            let bytes = std::fs::read(&out).unwrap();
            assert_eq!(decrypt_all(&bytes, &key()), data);
        }
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let report = EncryptionPipeline::new(64, 2, 10)
            .encrypt(
                &key(),
                io::Cursor::new(Vec::<u8>::new()),
                &out,
                ResumePoint::start(0),
                None,
                None,
            )
            .unwrap();
        assert_eq!(report.chunks_written, 0);
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 0);
    }

    #[test]
    fn test_header_bytes_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::write(&out, b"HEADER").unwrap();

        EncryptionPipeline::new(64, 1, 10)
            .encrypt(
                &key(),
                io::Cursor::new(sample(100)),
                &out,
                ResumePoint::start(6),
                None,
                None,
            )
            .unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[..6], b"HEADER");
        assert_eq!(decrypt_all(&bytes[6..], &key()), sample(100));
    }

    #[test]
    fn test_checkpoint_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin.partial");
        let store = CheckpointStore::for_target(&dir.path().join("data.bin"));

        EncryptionPipeline::new(10, 3, 4)
            .encrypt(
                &key(),
                io::Cursor::new(sample(95)),
                &out,
                ResumePoint::start(0),
                Some(&store),
                None,
            )
            .unwrap();

        // 10 chunks: checkpoints after 4 and 8
        let cp = store.load().unwrap();
        assert_eq!(cp.chunk_index, 8);
        assert_eq!(cp.bytes_written, 80);
        assert_eq!(cp.output_bytes, 8 * (10 + FRAME_OVERHEAD as u64));
    }

    #[test]
    fn test_resume_rejects_short_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::write(&out, vec![0u8; 10]).unwrap();

        let result = EncryptionPipeline::new(64, 1, 10).encrypt(
            &key(),
            io::Cursor::new(sample(500)),
            &out,
            ResumePoint {
                bytes_written: 128,
                chunk_index: 2,
                output_bytes: 192,
            },
            None,
            None,
        );
        assert!(matches!(result, Err(SboxError::ResumeMismatch(_))));
    }

    #[test]
    fn test_resume_past_end_of_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let result = EncryptionPipeline::new(64, 1, 10).encrypt(
            &key(),
            io::Cursor::new(sample(10)),
            &out,
            ResumePoint {
                bytes_written: 64,
                chunk_index: 1,
                output_bytes: 0,
            },
            None,
            None,
        );
        assert!(matches!(result, Err(SboxError::ResumeMismatch(_))));
    }

    #[test]
    fn test_progress_events() {
        use std::sync::Mutex;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("data.bin.partial");
        let store = CheckpointStore::for_target(&dir.path().join("data.bin"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: ProgressFn = Box::new(move |ev: &ProgressEvent| sink.lock().unwrap().push(ev.clone()));

        EncryptionPipeline::new(16, 2, 2)
            .encrypt(
                &key(),
                io::Cursor::new(sample(64)),
                &out,
                ResumePoint::start(0),
                Some(&store),
                Some(&cb),
            )
            .unwrap();

        let events = seen.lock().unwrap();
        assert!(matches!(events[0], ProgressEvent::Started { total_bytes: 64, .. }));
        let written = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::ChunkWritten { .. }))
            .count();
        let saved = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::CheckpointSaved { .. }))
            .count();
        assert_eq!(written, 4);
        assert_eq!(saved, 2);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finished {
                chunks: 4,
                bytes: 64
            })
        );
    }

    /// Fails chunk 3 the way a codec error would.
    fn fail_chunk_three(
        key: &SealKey,
        index: u64,
        plaintext: &[u8],
    ) -> Result<ChunkRecord, CryptoError> {
        if index == 3 {
            return Err(CryptoError::Authentication);
        }
        encrypt_chunk(key, index, plaintext)
    }

    #[test]
    fn test_codec_error_reports_chunk_input_offset() {
        for workers in [1, 4] {
            let dir = tempfile::tempdir().unwrap();
            let out = dir.path().join("out.partial");
            let mut pipeline = EncryptionPipeline::new(64, workers, 100);
            pipeline.seal = fail_chunk_three;

            let err = pipeline
                .encrypt(
                    &key(),
                    io::Cursor::new(sample(64 * 10)),
                    &out,
                    ResumePoint::start(0),
                    None,
                    None,
                )
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    SboxError::Authentication {
                        chunk_index: 3,
                        offset: 192
                    }
                ),
                "workers={workers}: {err:?}"
            );
        }
    }
}
