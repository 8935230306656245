//! Chunk planning for long audio.
//!
//! Audio longer than the provider's single-request limit is split into
//! near-equal windows that overlap by a near-equal amount. The overlap
//! gives the speaker reconciler and the merger a region both adjacent
//! chunks have transcribed.

use serde::{Deserialize, Serialize};

/// One bounded sub-range of the original audio, submitted as one
/// remote transcription job. Produced once per pipeline run; immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ChunkWindow {
    pub fn len_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Plans the chunk windows for `duration_ms` of audio.
///
/// Returns a single whole-duration window when the audio fits in one
/// request. Otherwise picks the minimum chunk count whose windows stay
/// within `max_chunk_ms`, then redistributes the slack so every window
/// has the same length and every overlap is approximately
/// `overlap_ms`, with the last window's end pinned exactly to
/// `duration_ms`. Pure and deterministic.
pub fn plan_chunks(duration_ms: u64, max_chunk_ms: u64, overlap_ms: u64) -> Vec<ChunkWindow> {
    if duration_ms <= max_chunk_ms {
        return vec![ChunkWindow {
            index: 0,
            start_ms: 0,
            end_ms: duration_ms,
        }];
    }

    // The advance between starts must stay positive.
    let overlap_ms = overlap_ms.min(max_chunk_ms / 2);

    // Minimum n with n * (max - overlap) + overlap >= duration.
    let usable = max_chunk_ms - overlap_ms;
    let n = ((duration_ms - overlap_ms) as f64 / usable as f64).ceil() as u64;
    let n = n.max(2);

    // Even redistribution: n windows of equal length covering the
    // duration with (n - 1) overlaps.
    let length = (duration_ms + (n - 1) * overlap_ms) as f64 / n as f64;
    let advance = length - overlap_ms as f64;

    let mut windows = Vec::with_capacity(n as usize);
    for i in 0..n {
        let start = (i as f64 * advance).round() as u64;
        let end = if i == n - 1 {
            duration_ms
        } else {
            ((start as f64 + length).round() as u64).min(duration_ms)
        };
        windows.push(ChunkWindow {
            index: i as usize,
            start_ms: start,
            end_ms: end,
        });
    }
    windows
}
