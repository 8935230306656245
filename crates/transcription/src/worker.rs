use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use podscribe_transcript::{merge_transcripts, reconcile_speakers, ReconcileParams, Transcript};

use crate::audio::AudioSource;
use crate::chunk::ChunkWindow;
use crate::config::TranscriptionConfig;
use crate::error::{Result, TranscriptionError};
use crate::progress::{emit, ProgressEvent};
use crate::record::OperationRecord;
use crate::remote::{
    transcript_from_remote, OperationHandle, RemoteStatus, RemoteTranscriptionClient,
    SubmitOptions,
};
use crate::store::OperationStore;

/// Drives one chunk through submit → persist → poll → fetch.
///
/// Workers are stateless: one is constructed per scheduled task from
/// shared handles and configuration, holds no cross-chunk state, and
/// is dropped when its chunk resolves. A timed-out chunk is recovered
/// by bisecting it into two overlapping halves and reprocessing each
/// through the same path; the caller cannot tell a split-recovered
/// chunk from a directly successful one except by its provenance tag.
pub struct ChunkWorker {
    client: Arc<dyn RemoteTranscriptionClient>,
    store: Arc<OperationStore>,
    config: TranscriptionConfig,
    episode_id: String,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

/// Outcome of one submit-and-poll attempt.
enum Attempt {
    Done(Transcript),
    TimedOut,
}

enum PollOutcome {
    Done,
    Failed(String),
    TimedOut,
}

impl ChunkWorker {
    pub fn new(
        client: Arc<dyn RemoteTranscriptionClient>,
        store: Arc<OperationStore>,
        config: TranscriptionConfig,
        episode_id: String,
        progress_tx: broadcast::Sender<ProgressEvent>,
    ) -> Self {
        Self {
            client,
            store,
            config,
            episode_id,
            progress_tx,
        }
    }

    /// Transcribes one planned chunk. The returned transcript's
    /// timestamps are absolute to the original audio.
    pub async fn process(
        &self,
        audio: &dyn AudioSource,
        window: &ChunkWindow,
        total_chunks: usize,
    ) -> Result<Transcript> {
        self.process_range(
            audio,
            window.index,
            window.start_ms,
            window.end_ms,
            self.config.overlap_ms,
            0,
            total_chunks,
        )
        .await
    }

    /// Adopts a still-pending record from a prior run: polls the
    /// existing remote job without resubmitting it. Falls back to a
    /// fresh submission when the resumed job turns out to be dead.
    pub async fn resume(
        &self,
        audio: &dyn AudioSource,
        window: &ChunkWindow,
        record: OperationRecord,
        total_chunks: usize,
    ) -> Result<Transcript> {
        let index = window.index;
        let deadline = Instant::now() + Duration::from_secs(self.config.chunk_timeout_secs);
        match self.drive(audio, index, window.start_ms, &record, deadline).await {
            Ok(Attempt::Done(transcript)) => Ok(transcript),
            Ok(Attempt::TimedOut) => {
                if self.config.max_split_depth == 0 {
                    return Err(TranscriptionError::ChunkFailed {
                        index,
                        message: "resumed remote job timed out".to_string(),
                    });
                }
                emit(
                    &self.progress_tx,
                    ProgressEvent::ChunkSplit { index, depth: 1 },
                );
                self.split(
                    audio,
                    index,
                    window.start_ms,
                    window.end_ms,
                    self.config.overlap_ms,
                    0,
                    total_chunks,
                )
                .await
            }
            Err(e) => {
                warn!(chunk = index, error = %e, "Resumed job unusable, resubmitting chunk");
                emit(&self.progress_tx, ProgressEvent::ChunkRequeued { index });
                self.process(audio, window, total_chunks).await
            }
        }
    }

    /// Submit/poll with the retry budget and the timeout-split
    /// fallback. Boxed because the split path recurses.
    fn process_range<'a>(
        &'a self,
        audio: &'a dyn AudioSource,
        index: usize,
        start_ms: u64,
        end_ms: u64,
        overlap_ms: u64,
        depth: u32,
        total_chunks: usize,
    ) -> BoxFuture<'a, Result<Transcript>> {
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self
                    .attempt_once(audio, index, start_ms, end_ms, total_chunks)
                    .await
                {
                    Ok(Attempt::Done(transcript)) => return Ok(transcript),
                    Ok(Attempt::TimedOut) => {
                        if depth >= self.config.max_split_depth {
                            let message = format!(
                                "remote job for {start_ms}..{end_ms} ms timed out at split depth {depth}"
                            );
                            emit(
                                &self.progress_tx,
                                ProgressEvent::ChunkFailed {
                                    index,
                                    message: message.clone(),
                                },
                            );
                            return Err(TranscriptionError::ChunkFailed { index, message });
                        }
                        emit(
                            &self.progress_tx,
                            ProgressEvent::ChunkSplit {
                                index,
                                depth: depth + 1,
                            },
                        );
                        return self
                            .split(audio, index, start_ms, end_ms, overlap_ms, depth, total_chunks)
                            .await;
                    }
                    Err(e) if attempt < self.config.max_chunk_attempts => {
                        warn!(chunk = index, attempt, error = %e, "Chunk attempt failed, retrying");
                    }
                    Err(e) => {
                        let message = e.to_string();
                        emit(
                            &self.progress_tx,
                            ProgressEvent::ChunkFailed {
                                index,
                                message: message.clone(),
                            },
                        );
                        return Err(TranscriptionError::ChunkFailed { index, message });
                    }
                }
            }
        })
    }

    async fn attempt_once(
        &self,
        audio: &dyn AudioSource,
        index: usize,
        start_ms: u64,
        end_ms: u64,
        total_chunks: usize,
    ) -> Result<Attempt> {
        let bytes = audio
            .export_range(start_ms, end_ms)
            .map_err(|cause| TranscriptionError::AudioExport {
                start_ms,
                end_ms,
                cause,
            })?;

        let options = self.submit_options();
        let handle = match tokio::time::timeout(
            self.request_timeout(),
            self.client.submit(bytes, &options),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(TranscriptionError::Remote(e)),
            Err(_) => {
                return Err(TranscriptionError::Remote(anyhow::anyhow!(
                    "submit request timed out"
                )))
            }
        };

        let window = ChunkWindow {
            index,
            start_ms,
            end_ms,
        };
        let record = OperationRecord::new(&self.episode_id, &window, total_chunks, handle.clone());
        self.store.save(&record)?;
        emit(
            &self.progress_tx,
            ProgressEvent::ChunkSubmitted {
                index,
                operation_id: record.operation_id.clone(),
            },
        );
        debug!(chunk = index, handle = %handle, "Remote job started");

        // One deadline per chunk; every poll site works from it.
        let deadline = Instant::now() + Duration::from_secs(self.config.chunk_timeout_secs);
        self.drive(audio, index, start_ms, &record, deadline).await
    }

    /// Polls a submitted job to an outcome. Shared by fresh submissions
    /// and records adopted from a prior run.
    async fn drive(
        &self,
        audio: &dyn AudioSource,
        index: usize,
        start_ms: u64,
        record: &OperationRecord,
        deadline: Instant,
    ) -> Result<Attempt> {
        match self.poll_until(&record.remote_handle, index, deadline).await {
            PollOutcome::Done => {
                let transcript = self.download(audio.reference(), index, start_ms, record).await?;
                emit(&self.progress_tx, ProgressEvent::ChunkCompleted { index });
                Ok(Attempt::Done(transcript))
            }
            PollOutcome::Failed(message) => {
                self.store.delete(&record.operation_id)?;
                Err(TranscriptionError::Remote(anyhow::anyhow!(
                    "remote job reported failure: {message}"
                )))
            }
            PollOutcome::TimedOut => {
                self.cancel_best_effort(&record.remote_handle, index).await;
                self.store.delete(&record.operation_id)?;
                Ok(Attempt::TimedOut)
            }
        }
    }

    /// Fetches a finished job's payload and converts it into an
    /// absolute-time transcript. The record is deleted in every case:
    /// a failed fetch leads to resubmission, and a lingering record
    /// must not shadow the fresh one.
    pub(crate) async fn download(
        &self,
        audio_ref: &str,
        index: usize,
        start_ms: u64,
        record: &OperationRecord,
    ) -> Result<Transcript> {
        let fetched = tokio::time::timeout(
            self.request_timeout(),
            self.client.fetch(&record.remote_handle),
        )
        .await;
        let result = match fetched {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.store.delete(&record.operation_id)?;
                return Err(TranscriptionError::Remote(e));
            }
            Err(_) => {
                self.store.delete(&record.operation_id)?;
                return Err(TranscriptionError::Remote(anyhow::anyhow!(
                    "fetch request timed out"
                )));
            }
        };
        self.store.delete(&record.operation_id)?;

        debug!(chunk = index, words = result.words.len(), "Downloaded chunk result");
        let transcript = transcript_from_remote(
            result,
            audio_ref.to_string(),
            self.config.diarization,
            self.client.name(),
        );
        Ok(transcript.shift_timestamps(start_ms as f64 / 1000.0))
    }

    async fn poll_until(
        &self,
        handle: &OperationHandle,
        index: usize,
        deadline: Instant,
    ) -> PollOutcome {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            match tokio::time::timeout(self.request_timeout(), self.client.status(handle)).await {
                Ok(Ok(RemoteStatus::Done)) => return PollOutcome::Done,
                Ok(Ok(RemoteStatus::Failed { message })) => return PollOutcome::Failed(message),
                Ok(Ok(RemoteStatus::Pending)) => {
                    debug!(chunk = index, "Remote job still running");
                }
                Ok(Err(e)) => {
                    warn!(chunk = index, error = %e, "Status poll failed, will retry");
                }
                Err(_) => {
                    warn!(chunk = index, "Status poll timed out, will retry");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PollOutcome::TimedOut;
            }
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }
    }

    /// Bisects a timed-out range into two overlapping halves,
    /// reprocesses each through the same submit/poll path, then
    /// reconciles and merges the results.
    async fn split(
        &self,
        audio: &dyn AudioSource,
        index: usize,
        start_ms: u64,
        end_ms: u64,
        overlap_ms: u64,
        depth: u32,
        total_chunks: usize,
    ) -> Result<Transcript> {
        let (first_end, second_start, sub_overlap) =
            split_bounds(start_ms, end_ms, overlap_ms, self.config.split_overlap_floor_ms);
        info!(
            chunk = index,
            depth = depth + 1,
            first = ?(start_ms, first_end),
            second = ?(second_start, end_ms),
            "Reprocessing timed-out range as two halves"
        );

        let left = self
            .process_range(audio, index, start_ms, first_end, sub_overlap, depth + 1, total_chunks)
            .await?;
        let right = self
            .process_range(audio, index, second_start, end_ms, sub_overlap, depth + 1, total_chunks)
            .await?;

        let params = ReconcileParams {
            match_window: self.config.match_window_secs,
            min_votes: self.config.min_votes,
        };
        let mapping = reconcile_speakers(
            &left,
            &right,
            second_start as f64 / 1000.0,
            first_end as f64 / 1000.0,
            &params,
        );
        let right = right.rename_speakers(&mapping);

        let mut merged = merge_transcripts(&left, &right, self.config.dedup_window_secs);
        merged.provenance.split_recovered = true;
        Ok(merged)
    }

    async fn cancel_best_effort(&self, handle: &OperationHandle, index: usize) {
        match tokio::time::timeout(self.request_timeout(), self.client.cancel(handle)).await {
            Ok(Ok(true)) => info!(chunk = index, "Cancelled remote job"),
            Ok(Ok(false)) => {
                debug!(chunk = index, "Remote job not cancellable, dropping local tracking")
            }
            Ok(Err(e)) => {
                warn!(chunk = index, error = %e, "Cancel failed, dropping local tracking")
            }
            Err(_) => warn!(chunk = index, "Cancel timed out, dropping local tracking"),
        }
    }

    fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            language_hint: self.config.language.clone(),
            diarization: self.config.diarization,
            min_speaker_count: self.config.min_speaker_count,
            max_speaker_count: self.config.max_speaker_count,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

/// Computes the half boundaries for a split: the sub-overlap is half
/// the parent overlap with a configured floor, capped at a quarter of
/// the range so both halves stay meaningfully shorter than the parent.
fn split_bounds(
    start_ms: u64,
    end_ms: u64,
    parent_overlap_ms: u64,
    floor_ms: u64,
) -> (u64, u64, u64) {
    let range = end_ms - start_ms;
    let sub_overlap = (parent_overlap_ms / 2).max(floor_ms).min(range / 4);
    let mid = start_ms + range / 2;
    let first_end = (mid + sub_overlap / 2).min(end_ms);
    let second_start = first_end - sub_overlap;
    (first_end, second_start, sub_overlap)
}
