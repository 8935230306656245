//! Durable remote-operation records.
//!
//! One record exists per submitted-but-not-yet-folded remote job.
//! Records are the sole source of truth for resuming after a crash:
//! restart reconstructs in-flight chunk state from them plus one fresh
//! status query per record, never from in-memory state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::ChunkWindow;
use crate::remote::OperationHandle;

/// Bumped whenever the record layout changes. Records written by an
/// unknown version are treated as corrupt and their chunk re-submitted
/// from scratch.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of a remote operation.
///
/// Deserialization goes through serde's enum validation, so a stored
/// value outside this set fails parsing instead of being trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Completed,
    Failed,
    Downloaded,
}

/// On-disk representation of one in-flight remote transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub schema_version: u32,
    /// Locally generated id; also the storage key.
    pub operation_id: String,
    /// Job scope (episode) this record belongs to.
    pub episode_id: String,
    /// Index of the chunk within the planned window list. `None` only
    /// for records written by a buggy or newer producer; such records
    /// sort last and are re-submitted.
    pub chunk_index: Option<usize>,
    pub chunk_start_ms: u64,
    pub chunk_end_ms: u64,
    pub total_chunks: usize,
    pub remote_handle: OperationHandle,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Where the downloaded result was written, if anywhere.
    pub result_ref: Option<String>,
}

impl OperationRecord {
    /// Creates a fresh `Pending` record for a just-submitted chunk.
    pub fn new(
        episode_id: &str,
        window: &ChunkWindow,
        total_chunks: usize,
        remote_handle: OperationHandle,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            operation_id: Uuid::new_v4().to_string(),
            episode_id: episode_id.to_string(),
            chunk_index: Some(window.index),
            chunk_start_ms: window.start_ms,
            chunk_end_ms: window.end_ms,
            total_chunks,
            remote_handle,
            state: OperationState::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            result_ref: None,
        }
    }
}
