//! Chunk scheduling and crash resumption.
//!
//! On start the scheduler reconstructs in-flight state from the
//! operation store plus one fresh status query per record, then runs
//! chunk workers bounded by the parallelism limit. Jobs still running
//! remotely keep their slots, so the configured limit holds even
//! across restarts.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use podscribe_transcript::Transcript;

use crate::audio::AudioSource;
use crate::chunk::ChunkWindow;
use crate::config::TranscriptionConfig;
use crate::error::{Result, TranscriptionError};
use crate::progress::{emit, ProgressEvent};
use crate::record::OperationRecord;
use crate::remote::{RemoteStatus, RemoteTranscriptionClient};
use crate::store::OperationStore;
use crate::worker::ChunkWorker;

pub struct ChunkScheduler {
    client: Arc<dyn RemoteTranscriptionClient>,
    store: Arc<OperationStore>,
    config: TranscriptionConfig,
    episode_id: String,
    progress_tx: broadcast::Sender<ProgressEvent>,
}

impl ChunkScheduler {
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

    /// Runs all chunk workers to completion and returns their
    /// transcripts keyed by chunk index.
    ///
    /// Completions arrive in any order; the map buffers them so the
    /// merge fold can consume them strictly by index. The first
    /// permanent chunk failure aborts every remaining worker and fails
    /// the run — a partial result is never returned.
    pub async fn run(
        &self,
        audio: Arc<dyn AudioSource>,
        windows: &[ChunkWindow],
    ) -> Result<BTreeMap<usize, Transcript>> {
        let total_chunks = windows.len();
        let mut results: BTreeMap<usize, Transcript> = BTreeMap::new();
        let mut resumable: Vec<(ChunkWindow, OperationRecord)> = Vec::new();

        for record in self.store.list_pending(&self.episode_id)? {
            self.triage_record(audio.as_ref(), windows, record, &mut results, &mut resumable)
                .await;
        }

        let mut pending: VecDeque<ChunkWindow> = windows
            .iter()
            .filter(|w| {
                !results.contains_key(&w.index)
                    && !resumable.iter().any(|(rw, _)| rw.index == w.index)
            })
            .copied()
            .collect();

        let in_progress = resumable.len();
        info!(
            total_chunks,
            recovered = results.len(),
            in_progress,
            unsubmitted = pending.len(),
            "Chunk schedule ready"
        );

        let mut tasks: JoinSet<(usize, Result<Transcript>)> = JoinSet::new();

        // Jobs already running remotely keep their slots.
        for (window, record) in resumable {
            let worker = self.make_worker();
            let audio = Arc::clone(&audio);
            tasks.spawn(async move {
                let result = worker.resume(audio.as_ref(), &window, record, total_chunks).await;
                (window.index, result)
            });
        }

        // Only the slots left over may take new submissions this cycle.
        while tasks.len() < self.config.parallelism.max(1) {
            let Some(window) = pending.pop_front() else { break };
            self.spawn_process(&mut tasks, Arc::clone(&audio), window, total_chunks);
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tasks.abort_all();
                    return Err(TranscriptionError::TaskAborted(e.to_string()));
                }
            };
            match outcome {
                Ok(transcript) => {
                    results.insert(index, transcript);
                    // Backfill the freed slot with the next unsubmitted chunk.
                    if let Some(window) = pending.pop_front() {
                        self.spawn_process(&mut tasks, Arc::clone(&audio), window, total_chunks);
                    }
                }
                Err(e) => {
                    warn!(chunk = index, error = %e, "Chunk failed permanently, aborting run");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        for window in windows {
            if !results.contains_key(&window.index) {
                return Err(TranscriptionError::MissingChunk {
                    index: window.index,
                });
            }
        }
        Ok(results)
    }

    /// Issues the single resumption status check for one stale record.
    ///
    /// Completed jobs are downloaded and folded immediately; failed,
    /// mismatched or unreachable ones are dropped (best-effort cancel,
    /// record deleted) so their chunk is re-submitted. One bad record
    /// never blocks the others.
    async fn triage_record(
        &self,
        audio: &dyn AudioSource,
        windows: &[ChunkWindow],
        record: OperationRecord,
        results: &mut BTreeMap<usize, Transcript>,
        resumable: &mut Vec<(ChunkWindow, OperationRecord)>,
    ) {
        let window = record
            .chunk_index
            .and_then(|i| windows.get(i))
            .filter(|w| {
                w.start_ms == record.chunk_start_ms
                    && w.end_ms == record.chunk_end_ms
                    && !results.contains_key(&w.index)
                    && !resumable.iter().any(|(rw, _)| rw.index == w.index)
            })
            .copied();
        let Some(window) = window else {
            warn!(
                operation_id = %record.operation_id,
                chunk = ?record.chunk_index,
                "Record does not match the current chunk plan, dropping"
            );
            self.drop_record(&record).await;
            return;
        };
        let index = window.index;

        let status = tokio::time::timeout(
            Duration::from_secs(self.config.request_timeout_secs),
            self.client.status(&record.remote_handle),
        )
        .await;
        match status {
            Ok(Ok(RemoteStatus::Done)) => {
                let worker = self.make_worker();
                match worker
                    .download(audio.reference(), index, window.start_ms, &record)
                    .await
                {
                    Ok(transcript) => {
                        info!(chunk = index, "Remote job finished while we were away");
                        emit(&self.progress_tx, ProgressEvent::ChunkRecovered { index });
                        results.insert(index, transcript);
                    }
                    Err(e) => {
                        // download already deleted the record
                        warn!(chunk = index, error = %e, "Failed to download finished job, resubmitting");
                        emit(&self.progress_tx, ProgressEvent::ChunkRequeued { index });
                    }
                }
            }
            Ok(Ok(RemoteStatus::Failed { message })) => {
                info!(chunk = index, %message, "Stale remote job failed, resubmitting");
                if let Err(e) = self.store.delete(&record.operation_id) {
                    warn!(operation_id = %record.operation_id, error = %e, "Failed to delete record");
                }
                emit(&self.progress_tx, ProgressEvent::ChunkRequeued { index });
            }
            Ok(Ok(RemoteStatus::Pending)) => {
                emit(
                    &self.progress_tx,
                    ProgressEvent::ChunkResumed {
                        index,
                        operation_id: record.operation_id.clone(),
                    },
                );
                resumable.push((window, record));
            }
            Ok(Err(e)) => {
                warn!(chunk = index, error = %e, "Resumption status check failed, dropping record");
                self.drop_record(&record).await;
                emit(&self.progress_tx, ProgressEvent::ChunkRequeued { index });
            }
            Err(_) => {
                warn!(chunk = index, "Resumption status check timed out, dropping record");
                self.drop_record(&record).await;
                emit(&self.progress_tx, ProgressEvent::ChunkRequeued { index });
            }
        }
    }

    /// Best-effort cancel plus record deletion. Cancellation failure is
    /// non-fatal: the job may already have finished or expired, we just
    /// stop tracking it locally.
    async fn drop_record(&self, record: &OperationRecord) {
        let cancel = tokio::time::timeout(
            Duration::from_secs(self.config.request_timeout_secs),
            self.client.cancel(&record.remote_handle),
        )
        .await;
        match cancel {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(operation_id = %record.operation_id, error = %e, "Cancel failed")
            }
            Err(_) => warn!(operation_id = %record.operation_id, "Cancel timed out"),
        }
        if let Err(e) = self.store.delete(&record.operation_id) {
            warn!(operation_id = %record.operation_id, error = %e, "Failed to delete record");
        }
    }

    fn spawn_process(
        &self,
        tasks: &mut JoinSet<(usize, Result<Transcript>)>,
        audio: Arc<dyn AudioSource>,
        window: ChunkWindow,
        total_chunks: usize,
    ) {
        let worker = self.make_worker();
        tasks.spawn(async move {
            let result = worker.process(audio.as_ref(), &window, total_chunks).await;
            (window.index, result)
        });
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
