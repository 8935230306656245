//! Interface to the remote transcription capability.
//!
//! The provider is opaque: it accepts an audio slice, runs a possibly
//! long-running recognition job, and eventually yields word-level
//! timestamped, speaker-tagged output. Everything vendor-specific
//! lives behind [`RemoteTranscriptionClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use podscribe_transcript::{Provenance, Transcript, Word};

/// Opaque handle identifying one remote recognition job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote job status as reported by a single status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteStatus {
    Pending,
    Done,
    Failed { message: String },
}

/// Recognition options passed through to the provider.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Language hint (ISO 639-1, e.g. "en", "de"). None = auto-detect.
    pub language_hint: Option<String>,
    /// Request per-word speaker labels.
    pub diarization: bool,
    pub min_speaker_count: Option<u32>,
    pub max_speaker_count: Option<u32>,
}

/// One word of the raw remote payload. Times are seconds relative to
/// the submitted slice, not to the original audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteWord {
    pub text: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub speaker_label: Option<String>,
    pub confidence: Option<f64>,
}

/// Raw result of a finished remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResult {
    pub words: Vec<RemoteWord>,
    pub language: Option<String>,
}

/// Trait for pluggable remote transcription providers.
#[async_trait]
pub trait RemoteTranscriptionClient: Send + Sync + 'static {
    /// Submits an audio slice and returns a handle to the started job.
    async fn submit(
        &self,
        audio: Vec<u8>,
        options: &SubmitOptions,
    ) -> anyhow::Result<OperationHandle>;

    /// Queries job status once. Never blocks until completion.
    async fn status(&self, handle: &OperationHandle) -> anyhow::Result<RemoteStatus>;

    /// Downloads the result of a job whose status is `Done`.
    async fn fetch(&self, handle: &OperationHandle) -> anyhow::Result<RemoteResult>;

    /// Best-effort cancellation. `Ok(false)` means the job could not be
    /// cancelled (already finished or expired) — callers stop tracking
    /// it locally either way.
    async fn cancel(&self, handle: &OperationHandle) -> anyhow::Result<bool>;

    /// Human-readable provider name, recorded in transcript provenance.
    fn name(&self) -> &str;
}

/// Converts a raw remote payload into a chunk-relative [`Transcript`].
///
/// Known recognizer placeholder tokens are dropped before
/// segmentation. The caller still has to shift timestamps by the
/// chunk's absolute start.
pub fn transcript_from_remote(
    result: RemoteResult,
    audio_ref: String,
    diarization_enabled: bool,
    provider: &str,
) -> Transcript {
    let words: Vec<Word> = result
        .words
        .into_iter()
        .filter(|w| !is_placeholder(&w.text))
        .map(|w| Word {
            text: w.text,
            start: w.start,
            end: w.end,
            confidence: w.confidence,
            speaker: w.speaker_label,
        })
        .collect();

    Transcript::from_words(
        words,
        audio_ref,
        result.language,
        diarization_enabled,
        Provenance {
            provider: Some(provider.to_string()),
            model: None,
            split_recovered: false,
        },
    )
}

/// Returns true for non-speech placeholder tokens some recognizers emit.
fn is_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    matches!(
        lower.as_str(),
        "[blank_audio]" | "[silence]" | "[music]" | "[noise]" | "(silence)" | "(music)"
    )
}
