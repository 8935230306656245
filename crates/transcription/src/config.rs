use serde::{Deserialize, Serialize};

/// Configuration for the chunked transcription pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Maximum chunk length in milliseconds accepted by the remote
    /// provider in a single request.
    pub max_chunk_ms: u64,
    /// Target overlap between adjacent chunks in milliseconds.
    pub overlap_ms: u64,
    /// Maximum number of concurrently submitted remote jobs, enforced
    /// across restarts.
    pub parallelism: usize,
    /// Sleep between status polls, in seconds.
    pub poll_interval_secs: u64,
    /// Network timeout for a single status/submit/fetch request, in
    /// seconds. Much smaller than the per-chunk budget.
    pub request_timeout_secs: u64,
    /// Wall-clock budget for one chunk's remote job, in seconds.
    /// Exceeding it triggers the split-and-retry fallback.
    pub chunk_timeout_secs: u64,
    /// Attempts per chunk before a submit error or explicit remote
    /// failure becomes fatal.
    pub max_chunk_attempts: u32,
    /// Maximum recursive bisection depth for timed-out chunks.
    pub max_split_depth: u32,
    /// Lower bound on the overlap used between the two halves of a
    /// split chunk, in milliseconds.
    pub split_overlap_floor_ms: u64,
    /// Maximum |start difference| in seconds for overlap words to count
    /// as the same utterance during speaker reconciliation.
    pub match_window_secs: f64,
    /// Minimum matched-word votes before a speaker rename is accepted.
    pub min_votes: usize,
    /// Time proximity in seconds under which an identical overlap word
    /// is treated as a duplicate during merge.
    pub dedup_window_secs: f64,
    /// Language hint for the remote recognizer (e.g. "en"). None = auto.
    pub language: Option<String>,
    /// Request per-word speaker labels from the remote recognizer.
    pub diarization: bool,
    /// Optional diarization bounds passed through to the provider.
    pub min_speaker_count: Option<u32>,
    pub max_speaker_count: Option<u32>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            max_chunk_ms: 1_800_000,
            overlap_ms: 60_000,
            parallelism: 4,
            poll_interval_secs: 30,
            request_timeout_secs: 30,
            chunk_timeout_secs: 1_800,
            max_chunk_attempts: 2,
            max_split_depth: 2,
            split_overlap_floor_ms: 10_000,
            match_window_secs: 1.0,
            min_votes: 3,
            dedup_window_secs: 0.5,
            language: None,
            diarization: true,
            min_speaker_count: None,
            max_speaker_count: None,
        }
    }
}
