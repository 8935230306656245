//! Pipeline progress as an event stream.
//!
//! Workers and the scheduler emit immutable events over a broadcast
//! channel; a single consumer task owns all display state and renders
//! it. No shared mutable counters cross task boundaries.

use tokio::sync::broadcast;
use tracing::{info, warn};

/// A progress event emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Chunk windows planned for the run.
    Planned { total_chunks: usize },
    /// A chunk was submitted as a new remote job.
    ChunkSubmitted { index: usize, operation_id: String },
    /// A still-running remote job from a prior run was adopted.
    ChunkResumed { index: usize, operation_id: String },
    /// A prior run's job had already finished remotely; its result was
    /// downloaded without resubmission.
    ChunkRecovered { index: usize },
    /// A chunk's transcript is ready (timestamps already absolute).
    ChunkCompleted { index: usize },
    /// A timed-out chunk was bisected for retry.
    ChunkSplit { index: usize, depth: u32 },
    /// A stale or failed record was dropped and its chunk queued for
    /// resubmission.
    ChunkRequeued { index: usize },
    ChunkFailed { index: usize, message: String },
    /// The merge fold consumed this chunk.
    Merged { index: usize },
    Finished { total_chunks: usize },
}

pub fn progress_channel() -> (
    broadcast::Sender<ProgressEvent>,
    broadcast::Receiver<ProgressEvent>,
) {
    broadcast::channel(256)
}

/// Spawns the single consumer that renders progress through `tracing`.
///
/// Exits when every sender is dropped. Lagged receivers skip ahead —
/// progress display is best-effort and never blocks the pipeline.
pub fn spawn_progress_logger(
    mut rx: broadcast::Receiver<ProgressEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut total = 0usize;
        let mut completed = 0usize;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress consumer lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ProgressEvent::Planned { total_chunks } => {
                    total = total_chunks;
                    completed = 0;
                    info!(total_chunks, "Chunk plan ready");
                }
                ProgressEvent::ChunkSubmitted {
                    index,
                    operation_id,
                } => {
                    info!(chunk = index, %operation_id, "Chunk submitted");
                }
                ProgressEvent::ChunkResumed {
                    index,
                    operation_id,
                } => {
                    info!(chunk = index, %operation_id, "Resumed in-flight chunk");
                }
                ProgressEvent::ChunkRecovered { index } => {
                    completed += 1;
                    info!(chunk = index, completed, total, "Recovered finished chunk");
                }
                ProgressEvent::ChunkCompleted { index } => {
                    completed += 1;
                    info!(chunk = index, completed, total, "Chunk transcribed");
                }
                ProgressEvent::ChunkSplit { index, depth } => {
                    warn!(chunk = index, depth, "Chunk timed out, splitting");
                }
                ProgressEvent::ChunkRequeued { index } => {
                    info!(chunk = index, "Chunk queued for resubmission");
                }
                ProgressEvent::ChunkFailed { index, message } => {
                    warn!(chunk = index, %message, "Chunk failed");
                }
                ProgressEvent::Merged { index } => {
                    info!(chunk = index, "Chunk merged into transcript");
                }
                ProgressEvent::Finished { total_chunks } => {
                    info!(total_chunks, "Transcription pipeline finished");
                }
            }
        }
    })
}

/// Sends an event, ignoring the no-subscriber case — progress display
/// is optional.
pub(crate) fn emit(tx: &broadcast::Sender<ProgressEvent>, event: ProgressEvent) {
    let _ = tx.send(event);
}
