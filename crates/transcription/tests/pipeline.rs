//! End-to-end pipeline tests against an in-memory remote provider.
//!
//! The mock provider fabricates one word per second of audio on a
//! global timeline, with two logical speakers alternating every 20
//! seconds. Speaker labels are assigned per submitted chunk in
//! first-seen order, so chunks starting mid-conversation come back
//! with swapped labels — exactly the inconsistency the reconciliation
//! step has to undo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use podscribe_transcript::Transcript;
use podscribe_transcription::{
    AudioSource, ChunkWindow, ChunkedTranscriptionPipeline, OperationHandle, OperationRecord,
    OperationStore, RemoteResult, RemoteStatus, RemoteTranscriptionClient, RemoteWord,
    SubmitOptions, TranscriptionConfig, TranscriptionError,
};

/// Seconds per speaker turn on the fabricated timeline.
const TURN_SECS: u64 = 20;

fn logical_speaker(t: u64) -> usize {
    ((t / TURN_SECS) % 2) as usize
}

struct TestAudio {
    reference: String,
    duration_ms: u64,
}

impl AudioSource for TestAudio {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn export_range(&self, start_ms: u64, end_ms: u64) -> anyhow::Result<Vec<u8>> {
        Ok(format!("{start_ms}:{end_ms}").into_bytes())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RemoteEvent {
    Submit { start_ms: u64 },
    Fetch { start_ms: u64 },
}

struct Job {
    start_ms: u64,
    end_ms: u64,
    polls_left: u32,
}

#[derive(Default)]
struct MockState {
    jobs: HashMap<String, Job>,
    next_id: u64,
    events: Vec<RemoteEvent>,
    cancel_count: usize,
    /// Ranges longer than this never leave Pending.
    stall_over_ms: Option<u64>,
    /// Exact start offsets whose jobs always report Failed.
    fail_starts: Vec<u64>,
    /// Status polls a job answers Pending before turning Done.
    polls_until_done: u32,
}

#[derive(Default)]
struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    fn with_state(f: impl FnOnce(&mut MockState)) -> Arc<Self> {
        let mock = Self::default();
        f(&mut mock.state.lock().unwrap());
        Arc::new(mock)
    }

    /// Registers a job as if a prior run had submitted it.
    fn seed_job(&self, handle: &str, start_ms: u64, end_ms: u64, polls_left: u32) {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(
            handle.to_string(),
            Job {
                start_ms,
                end_ms,
                polls_left,
            },
        );
    }

    fn events(&self) -> Vec<RemoteEvent> {
        self.state.lock().unwrap().events.clone()
    }

    fn cancel_count(&self) -> usize {
        self.state.lock().unwrap().cancel_count
    }

    fn submissions(&self) -> Vec<RemoteEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, RemoteEvent::Submit { .. }))
            .collect()
    }

    /// One word per whole second of the submitted range, chunk-relative
    /// timestamps, labels assigned in first-seen order within the chunk.
    fn words_for(start_ms: u64, end_ms: u64) -> Vec<RemoteWord> {
        let mut labels: Vec<usize> = Vec::new();
        let mut words = Vec::new();
        let mut t = start_ms.div_ceil(1000);
        while t * 1000 < end_ms {
            let logical = logical_speaker(t);
            if !labels.contains(&logical) {
                labels.push(logical);
            }
            let local = labels.iter().position(|&l| l == logical).unwrap();
            let rel = t as f64 - start_ms as f64 / 1000.0;
            words.push(RemoteWord {
                text: format!("w{t}"),
                start: Some(rel),
                end: Some(rel + 0.4),
                speaker_label: Some(format!("SPEAKER_{local:02}")),
                confidence: Some(0.95),
            });
            t += 1;
        }
        words
    }
}

#[async_trait]
impl RemoteTranscriptionClient for MockRemote {
    async fn submit(
        &self,
        audio: Vec<u8>,
        _options: &SubmitOptions,
    ) -> anyhow::Result<OperationHandle> {
        let text = String::from_utf8(audio)?;
        let (start, end) = text.split_once(':').expect("range-encoded test audio");
        let (start_ms, end_ms) = (start.parse()?, end.parse()?);

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let handle = format!("op-{}", state.next_id);
        let polls_left = state.polls_until_done;
        state.events.push(RemoteEvent::Submit { start_ms });
        state.jobs.insert(
            handle.clone(),
            Job {
                start_ms,
                end_ms,
                polls_left,
            },
        );
        Ok(OperationHandle(handle))
    }

    async fn status(&self, handle: &OperationHandle) -> anyhow::Result<RemoteStatus> {
        let mut state = self.state.lock().unwrap();
        let stall_over_ms = state.stall_over_ms;
        let fail_starts = state.fail_starts.clone();
        let job = state
            .jobs
            .get_mut(&handle.0)
            .ok_or_else(|| anyhow::anyhow!("unknown operation {handle}"))?;

        if fail_starts.contains(&job.start_ms) {
            return Ok(RemoteStatus::Failed {
                message: "recognition backend exploded".to_string(),
            });
        }
        if stall_over_ms.is_some_and(|limit| job.end_ms - job.start_ms > limit) {
            return Ok(RemoteStatus::Pending);
        }
        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(RemoteStatus::Pending);
        }
        Ok(RemoteStatus::Done)
    }

    async fn fetch(&self, handle: &OperationHandle) -> anyhow::Result<RemoteResult> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get(&handle.0)
            .ok_or_else(|| anyhow::anyhow!("unknown operation {handle}"))?;
        let (start_ms, end_ms) = (job.start_ms, job.end_ms);
        state.events.push(RemoteEvent::Fetch { start_ms });
        Ok(RemoteResult {
            words: Self::words_for(start_ms, end_ms),
            language: Some("en".to_string()),
        })
    }

    async fn cancel(&self, handle: &OperationHandle) -> anyhow::Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.cancel_count += 1;
        Ok(state.jobs.remove(&handle.0).is_some())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn fast_config() -> TranscriptionConfig {
    TranscriptionConfig {
        max_chunk_ms: 720_000,
        overlap_ms: 60_000,
        parallelism: 4,
        poll_interval_secs: 1,
        request_timeout_secs: 5,
        chunk_timeout_secs: 10,
        ..TranscriptionConfig::default()
    }
}

fn audio(duration_ms: u64) -> Arc<TestAudio> {
    Arc::new(TestAudio {
        reference: "ep-042.mp3".to_string(),
        duration_ms,
    })
}

/// Expected label under chunk 0's first-seen assignment: the episode
/// opens with logical speaker 0, so 0 → SPEAKER_00 and 1 → SPEAKER_01.
fn expected_label(t: u64) -> String {
    format!("SPEAKER_{:02}", logical_speaker(t))
}

fn assert_complete_timeline(transcript: &Transcript, duration_ms: u64) {
    let last_t = duration_ms.div_ceil(1000);
    let words: Vec<_> = transcript.words().collect();
    assert_eq!(
        words.len(),
        last_t as usize,
        "expected one word per second with no duplicates and no gaps"
    );
    for (i, word) in words.iter().enumerate() {
        let t = i as u64;
        assert_eq!(word.text, format!("w{t}"), "word order broken at {t}");
        let start = word.start.expect("timestamps survive merging");
        assert!(
            (start - t as f64).abs() < 0.01,
            "timestamp for w{t} not absolute: {start}"
        );
        assert_eq!(
            word.speaker.as_deref(),
            Some(expected_label(t).as_str()),
            "inconsistent speaker label at {t}"
        );
    }
}

#[tokio::test]
async fn three_chunks_merge_into_one_consistent_transcript() {
    let mock = MockRemote::with_state(|_| {});
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());

    let (pipeline, _rx) = ChunkedTranscriptionPipeline::new(
        mock.clone(),
        store.clone(),
        fast_config(),
        "ep-042",
    );
    let transcript = pipeline.run(audio(1_700_000)).await.unwrap();

    assert_eq!(mock.submissions().len(), 3);
    assert_complete_timeline(&transcript, 1_700_000);
    assert_eq!(transcript.speaker_count, Some(2));
    assert!(!transcript.provenance.split_recovered);
    assert_eq!(transcript.provenance.provider.as_deref(), Some("mock"));
    // Every record folded away.
    assert!(store.list_pending("ep-042").unwrap().is_empty());
}

#[tokio::test]
async fn restart_recovers_finished_and_running_jobs_without_resubmission() {
    let windows = podscribe_transcription::plan_chunks(1_700_000, 720_000, 60_000);
    assert_eq!(windows.len(), 3);

    let mock = MockRemote::with_state(|_| {});
    // Chunk 0 finished remotely while the process was down; chunk 1 is
    // still running and needs two more polls.
    mock.seed_job("seed-0", windows[0].start_ms, windows[0].end_ms, 0);
    mock.seed_job("seed-1", windows[1].start_ms, windows[1].end_ms, 2);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[0],
            3,
            OperationHandle("seed-0".to_string()),
        ))
        .unwrap();
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[1],
            3,
            OperationHandle("seed-1".to_string()),
        ))
        .unwrap();

    let config = TranscriptionConfig {
        parallelism: 1,
        ..fast_config()
    };
    let (pipeline, _rx) =
        ChunkedTranscriptionPipeline::new(mock.clone(), store.clone(), config, "ep-042");
    let transcript = pipeline.run(audio(1_700_000)).await.unwrap();

    // Only chunk 2 was ever submitted by this run.
    let submissions = mock.submissions();
    assert_eq!(
        submissions,
        vec![RemoteEvent::Submit {
            start_ms: windows[2].start_ms
        }]
    );

    // With one slot, the resumed chunk 1 job held it: chunk 2 was
    // submitted only after chunk 1's result had been fetched.
    let events = mock.events();
    let fetch_1 = events
        .iter()
        .position(|e| *e == RemoteEvent::Fetch { start_ms: windows[1].start_ms })
        .expect("chunk 1 fetched");
    let submit_2 = events
        .iter()
        .position(|e| *e == RemoteEvent::Submit { start_ms: windows[2].start_ms })
        .expect("chunk 2 submitted");
    assert!(fetch_1 < submit_2, "parallelism limit violated across restart");

    assert_complete_timeline(&transcript, 1_700_000);
    assert!(store.list_pending("ep-042").unwrap().is_empty());
}

#[tokio::test]
async fn timed_out_chunk_recovers_by_splitting() {
    // Jobs covering more than 400 s of audio never finish; the single
    // 600 s chunk has to be bisected into two ~315 s halves.
    let mock = MockRemote::with_state(|state| {
        state.stall_over_ms = Some(400_000);
    });
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());

    let config = TranscriptionConfig {
        chunk_timeout_secs: 1,
        ..fast_config()
    };
    let (pipeline, _rx) =
        ChunkedTranscriptionPipeline::new(mock.clone(), store.clone(), config, "ep-042");
    let transcript = pipeline.run(audio(600_000)).await.unwrap();

    assert!(transcript.provenance.split_recovered);
    assert_complete_timeline(&transcript, 600_000);
    // The stalled parent job was cancelled before resubmission.
    assert!(mock.cancel_count() >= 1);
    assert_eq!(mock.submissions().len(), 3, "parent plus two halves");
    assert!(store.list_pending("ep-042").unwrap().is_empty());
}

#[tokio::test]
async fn permanently_failed_chunk_fails_the_whole_run() {
    let windows = podscribe_transcription::plan_chunks(1_700_000, 720_000, 60_000);
    let mock = MockRemote::with_state(|state| {
        state.fail_starts = vec![windows[1].start_ms];
    });
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());

    let (pipeline, _rx) = ChunkedTranscriptionPipeline::new(
        mock.clone(),
        store.clone(),
        fast_config(),
        "ep-042",
    );
    let err = pipeline.run(audio(1_700_000)).await.unwrap_err();

    match err {
        TranscriptionError::ChunkFailed { index, message } => {
            assert_eq!(index, 1);
            assert!(message.contains("exploded"), "cause lost: {message}");
        }
        other => panic!("expected ChunkFailed, got {other}"),
    }
}

#[tokio::test]
async fn reset_downloads_finished_jobs_and_cancels_the_rest() {
    let windows = podscribe_transcription::plan_chunks(1_700_000, 720_000, 60_000);
    let mock = MockRemote::with_state(|_| {});
    mock.seed_job("seed-0", windows[0].start_ms, windows[0].end_ms, 0);
    // Never finishes within a single status check.
    mock.seed_job("seed-1", windows[1].start_ms, windows[1].end_ms, 100);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[0],
            3,
            OperationHandle("seed-0".to_string()),
        ))
        .unwrap();
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[1],
            3,
            OperationHandle("seed-1".to_string()),
        ))
        .unwrap();

    let (pipeline, _rx) = ChunkedTranscriptionPipeline::new(
        mock.clone(),
        store.clone(),
        fast_config(),
        "ep-042",
    );
    let outcome = pipeline.reset().await.unwrap();

    assert_eq!(outcome.len(), 2);
    assert!(outcome[0].1.is_some(), "finished job downloaded");
    assert!(outcome[1].1.is_none(), "running job not downloaded");
    assert_eq!(mock.cancel_count(), 1);
    assert!(store.list_pending("ep-042").unwrap().is_empty());
}

#[tokio::test]
async fn resume_entry_point_leaves_running_jobs_tracked() {
    let windows = podscribe_transcription::plan_chunks(1_700_000, 720_000, 60_000);
    let mock = MockRemote::with_state(|_| {});
    mock.seed_job("seed-0", windows[0].start_ms, windows[0].end_ms, 0);
    mock.seed_job("seed-1", windows[1].start_ms, windows[1].end_ms, 100);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[0],
            3,
            OperationHandle("seed-0".to_string()),
        ))
        .unwrap();
    store
        .save(&OperationRecord::new(
            "ep-042",
            &windows[1],
            3,
            OperationHandle("seed-1".to_string()),
        ))
        .unwrap();

    let (pipeline, _rx) = ChunkedTranscriptionPipeline::new(
        mock.clone(),
        store.clone(),
        fast_config(),
        "ep-042",
    );
    let outcome = pipeline.resume().await.unwrap();

    assert_eq!(outcome.len(), 2);
    assert!(outcome[0].1.is_some());
    assert!(outcome[1].1.is_none());

    // The finished job's record is gone; the running one survives for
    // the next cycle.
    let remaining = pipeline.list_pending().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].chunk_index, Some(1));
}

#[tokio::test]
async fn stale_record_from_changed_plan_is_dropped_and_requeued() {
    // Record geometry that matches no current window: the scheduler
    // must cancel it and transcribe the chunk from scratch.
    let mock = MockRemote::with_state(|_| {});
    mock.seed_job("seed-x", 123, 456_000, 0);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(OperationStore::new(dir.path()).unwrap());
    store
        .save(&OperationRecord::new(
            "ep-042",
            &ChunkWindow {
                index: 0,
                start_ms: 123,
                end_ms: 456_000,
            },
            1,
            OperationHandle("seed-x".to_string()),
        ))
        .unwrap();

    let (pipeline, _rx) = ChunkedTranscriptionPipeline::new(
        mock.clone(),
        store.clone(),
        fast_config(),
        "ep-042",
    );
    let transcript = pipeline.run(audio(600_000)).await.unwrap();

    assert_eq!(mock.cancel_count(), 1);
    assert_eq!(mock.submissions().len(), 1);
    assert_complete_timeline(&transcript, 600_000);
}
