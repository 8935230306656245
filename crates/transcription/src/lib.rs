//! Chunked long-audio transcription with cross-chunk speaker
//! reconciliation and resumable remote jobs.
//!
//! Audio longer than the provider's single-request limit is split into
//! overlapping windows, each submitted as an independent long-running
//! remote job. Per-job state is persisted so a restarted process picks
//! up where it left off, and per-chunk transcripts are folded back into
//! one coherent, speaker-consistent transcript.

pub mod audio;
pub mod chunk;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use audio::AudioSource;
pub use chunk::{plan_chunks, ChunkWindow};
pub use config::TranscriptionConfig;
pub use error::{Result, TranscriptionError};
pub use pipeline::{ChunkedTranscriptionPipeline, DebugSink, JsonDebugSink};
pub use progress::{progress_channel, spawn_progress_logger, ProgressEvent};
pub use record::{OperationRecord, OperationState, RECORD_SCHEMA_VERSION};
pub use remote::{
    transcript_from_remote, OperationHandle, RemoteResult, RemoteStatus,
    RemoteTranscriptionClient, RemoteWord, SubmitOptions,
};
pub use scheduler::ChunkScheduler;
pub use store::OperationStore;
pub use worker::ChunkWorker;
