//! Top-level coordinator: plan → schedule → fold.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use podscribe_transcript::{merge_transcripts, reconcile_speakers, ReconcileParams, Transcript};

use crate::audio::AudioSource;
use crate::chunk::plan_chunks;
use crate::config::TranscriptionConfig;
use crate::error::{Result, TranscriptionError};
use crate::progress::{emit, progress_channel, ProgressEvent};
use crate::record::{OperationRecord, OperationState};
use crate::remote::{RemoteStatus, RemoteTranscriptionClient};
use crate::scheduler::ChunkScheduler;
use crate::store::OperationStore;
use crate::worker::ChunkWorker;

/// Receives per-chunk intermediate transcripts for inspection. Never
/// required for correctness.
pub trait DebugSink: Send + Sync {
    fn record_chunk(&self, index: usize, transcript: &Transcript);
}

/// Debug sink writing one JSON file per chunk transcript.
pub struct JsonDebugSink {
    dir: PathBuf,
}

impl JsonDebugSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl DebugSink for JsonDebugSink {
    fn record_chunk(&self, index: usize, transcript: &Transcript) {
        let path = self.dir.join(format!("chunk-{index:04}.json"));
        let write = serde_json::to_vec_pretty(transcript)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(anyhow::Error::from));
        if let Err(e) = write {
            warn!(chunk = index, path = %path.display(), error = %e, "Debug sink write failed");
        }
    }
}

/// Coordinates one episode's chunked transcription end to end.
///
/// Chunk workers run concurrently under the parallelism limit; the
/// merge fold is strictly sequential and in chunk-index order because
/// each reconciliation step depends on the labels the previous step
/// settled on.
pub struct ChunkedTranscriptionPipeline {
    client: Arc<dyn RemoteTranscriptionClient>,
    store: Arc<OperationStore>,
    config: TranscriptionConfig,
    episode_id: String,
    progress_tx: broadcast::Sender<ProgressEvent>,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl ChunkedTranscriptionPipeline {
    /// Creates a pipeline scoped to one episode.
    ///
    /// Returns `(pipeline, progress_receiver)`; pass the receiver to
    /// [`crate::progress::spawn_progress_logger`] or consume it directly.
    pub fn new(
        client: Arc<dyn RemoteTranscriptionClient>,
        store: Arc<OperationStore>,
        config: TranscriptionConfig,
        episode_id: impl Into<String>,
    ) -> (Self, broadcast::Receiver<ProgressEvent>) {
        let (progress_tx, progress_rx) = progress_channel();
        (
            Self {
                client,
                store,
                config,
                episode_id: episode_id.into(),
                progress_tx,
                debug_sink: None,
            },
            progress_rx,
        )
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Returns a new receiver for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Transcribes the audio, resuming any in-flight remote jobs left
    /// by a prior run of the same episode.
    ///
    /// Returns a complete transcript or the first permanent chunk
    /// failure; a partial transcript is never returned as if complete.
    pub async fn run(&self, audio: Arc<dyn AudioSource>) -> Result<Transcript> {
        let duration_ms = audio.duration_ms();
        let windows = plan_chunks(duration_ms, self.config.max_chunk_ms, self.config.overlap_ms);
        emit(
            &self.progress_tx,
            ProgressEvent::Planned {
                total_chunks: windows.len(),
            },
        );
        info!(
            episode = %self.episode_id,
            duration_ms,
            chunks = windows.len(),
            "Starting chunked transcription"
        );

        let scheduler = ChunkScheduler::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.config.clone(),
            self.episode_id.clone(),
            self.progress_tx.clone(),
        );
        let mut chunks = scheduler.run(Arc::clone(&audio), &windows).await?;

        if let Some(sink) = &self.debug_sink {
            for (index, transcript) in &chunks {
                sink.record_chunk(*index, transcript);
            }
        }

        // Strictly left-to-right fold: reconcile each chunk against the
        // accumulated transcript over their shared overlap, then merge.
        let params = ReconcileParams {
            match_window: self.config.match_window_secs,
            min_votes: self.config.min_votes,
        };
        let mut accumulated = chunks
            .remove(&0)
            .ok_or(TranscriptionError::MissingChunk { index: 0 })?;
        for window in windows.iter().skip(1) {
            let chunk = chunks
                .remove(&window.index)
                .ok_or(TranscriptionError::MissingChunk {
                    index: window.index,
                })?;

            let overlap_start = window.start_ms as f64 / 1000.0;
            let overlap_end = windows[window.index - 1].end_ms as f64 / 1000.0;
            let mapping =
                reconcile_speakers(&accumulated, &chunk, overlap_start, overlap_end, &params);
            if !mapping.is_empty() {
                debug!(chunk = window.index, ?mapping, "Speaker labels reconciled");
            }
            let chunk = chunk.rename_speakers(&mapping);

            accumulated = merge_transcripts(&accumulated, &chunk, self.config.dedup_window_secs);
            emit(
                &self.progress_tx,
                ProgressEvent::Merged {
                    index: window.index,
                },
            );
        }

        emit(
            &self.progress_tx,
            ProgressEvent::Finished {
                total_chunks: windows.len(),
            },
        );
        info!(
            episode = %self.episode_id,
            segments = accumulated.segments.len(),
            speakers = ?accumulated.speaker_count,
            "Transcription pipeline finished"
        );
        Ok(accumulated)
    }

    /// Lists this episode's outstanding operation records.
    pub fn list_pending(&self) -> Result<Vec<OperationRecord>> {
        self.store.list_pending(&self.episode_id)
    }

    /// Checks each outstanding record once, without blocking on any
    /// remote job. Finished jobs are downloaded and their records
    /// removed; failed jobs are dropped; still-running jobs stay
    /// tracked for the next cycle.
    pub async fn resume(&self) -> Result<Vec<(OperationRecord, Option<Transcript>)>> {
        let mut out = Vec::new();
        for mut record in self.store.list_pending(&self.episode_id)? {
            let status = tokio::time::timeout(
                Duration::from_secs(self.config.request_timeout_secs),
                self.client.status(&record.remote_handle),
            )
            .await;
            match status {
                Ok(Ok(RemoteStatus::Done)) => {
                    let index = record.chunk_index.unwrap_or(0);
                    let worker = self.make_worker();
                    match worker
                        .download(&self.episode_id, index, record.chunk_start_ms, &record)
                        .await
                    {
                        Ok(transcript) => {
                            record.state = OperationState::Downloaded;
                            record.completed_at = Some(Utc::now());
                            out.push((record, Some(transcript)));
                        }
                        Err(e) => {
                            warn!(chunk = index, error = %e, "Failed to download finished job");
                            record.state = OperationState::Completed;
                            record.error = Some(e.to_string());
                            out.push((record, None));
                        }
                    }
                }
                Ok(Ok(RemoteStatus::Failed { message })) => {
                    self.store.delete(&record.operation_id)?;
                    record.state = OperationState::Failed;
                    record.error = Some(message);
                    out.push((record, None));
                }
                Ok(Ok(RemoteStatus::Pending)) => {
                    out.push((record, None));
                }
                Ok(Err(e)) => {
                    // Still pending as far as we know; try again next cycle.
                    warn!(operation_id = %record.operation_id, error = %e, "Status check failed");
                    out.push((record, None));
                }
                Err(_) => {
                    warn!(operation_id = %record.operation_id, "Status check timed out");
                    out.push((record, None));
                }
            }
        }
        Ok(out)
    }

    /// Operator-requested reset: downloads whatever already finished,
    /// cancels everything else best-effort, and deletes every record.
    /// Never blocks on a running job.
    pub async fn reset(&self) -> Result<Vec<(OperationRecord, Option<Transcript>)>> {
        let mut out = Vec::new();
        for mut record in self.store.list_pending(&self.episode_id)? {
            let status = tokio::time::timeout(
                Duration::from_secs(self.config.request_timeout_secs),
                self.client.status(&record.remote_handle),
            )
            .await;
            if let Ok(Ok(RemoteStatus::Done)) = status {
                let index = record.chunk_index.unwrap_or(0);
                let worker = self.make_worker();
                let transcript = worker
                    .download(&self.episode_id, index, record.chunk_start_ms, &record)
                    .await
                    .map_err(|e| {
                        warn!(chunk = index, error = %e, "Failed to download during reset");
                        e
                    })
                    .ok();
                record.state = OperationState::Downloaded;
                record.completed_at = Some(Utc::now());
                out.push((record, transcript));
                continue;
            }

            let cancel = tokio::time::timeout(
                Duration::from_secs(self.config.request_timeout_secs),
                self.client.cancel(&record.remote_handle),
            )
            .await;
            match cancel {
                Ok(Ok(cancelled)) => {
                    debug!(operation_id = %record.operation_id, cancelled, "Reset cancelled job")
                }
                Ok(Err(e)) => {
                    warn!(operation_id = %record.operation_id, error = %e, "Cancel failed during reset")
                }
                Err(_) => {
                    warn!(operation_id = %record.operation_id, "Cancel timed out during reset")
                }
            }
            self.store.delete(&record.operation_id)?;
            out.push((record, None));
        }
        Ok(out)
    }

    fn make_worker(&self) -> ChunkWorker {
        ChunkWorker::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            self.config.clone(),
            self.episode_id.clone(),
            self.progress_tx.clone(),
        )
    }
}
