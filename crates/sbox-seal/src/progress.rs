//! Advisory progress events.
//!
//! Callbacks observe the pipelines; nothing they do affects control flow.

/// One observable step of an encryption or decryption run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        total_bytes: u64,
        chunk_size: usize,
        workers: usize,
    },
    Resumed {
        bytes_written: u64,
        chunk_index: u64,
    },
    /// `bytes_done` counts input consumed so far (plaintext when sealing,
    /// artifact bytes when unsealing).
    ChunkWritten {
        chunk_index: u64,
        bytes_done: u64,
        total_bytes: u64,
    },
    CheckpointSaved {
        chunk_index: u64,
        bytes_written: u64,
    },
    Finished {
        chunks: u64,
        bytes: u64,
    },
}

/// Progress callback type
pub type ProgressFn = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

pub(crate) fn emit(progress: Option<&ProgressFn>, event: ProgressEvent) {
    if let Some(cb) = progress {
        cb(&event);
    }
}
