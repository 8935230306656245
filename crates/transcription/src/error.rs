use thiserror::Error;

/// Errors surfaced by the chunked transcription pipeline.
///
/// Remote-collaborator traits (`RemoteTranscriptionClient`,
/// `AudioSource`) report `anyhow::Error`; the pipeline wraps those at
/// its boundary so callers always see which chunk failed and why.
#[derive(Error, Debug)]
pub enum TranscriptionError {
    /// A chunk exhausted its retry budget (including the split
    /// fallback). Fatal to the whole run: no partial transcript is
    /// produced.
    #[error("chunk {index} failed permanently: {message}")]
    ChunkFailed { index: usize, message: String },

    #[error("audio export failed for range {start_ms}..{end_ms} ms: {cause}")]
    AudioExport {
        start_ms: u64,
        end_ms: u64,
        cause: anyhow::Error,
    },

    #[error("remote transcription service error: {0}")]
    Remote(anyhow::Error),

    #[error("operation record I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid operation record at {path}: {message}")]
    InvalidRecord { path: String, message: String },

    /// Scheduling finished without producing a transcript for a chunk.
    /// Indicates a bug in the scheduler, not a remote failure.
    #[error("no result collected for chunk {index}")]
    MissingChunk { index: usize },

    /// A worker task panicked or was aborted before reporting a result.
    #[error("chunk worker task aborted: {0}")]
    TaskAborted(String),
}

pub type Result<T> = std::result::Result<T, TranscriptionError>;
