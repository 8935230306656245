//! Cross-chunk speaker reconciliation.
//!
//! Adjacent chunks are transcribed as independent remote jobs, so the
//! recognizer assigns speaker labels per chunk with no consistency
//! between them. The overlap region shared by two adjacent chunks is
//! transcribed twice; matching words there by text and time proximity
//! tells us which candidate-chunk label corresponds to which label the
//! accumulated transcript already uses.

use std::collections::HashMap;

use crate::types::{SpeakerMapping, Transcript, Word};

/// Tuning knobs for one reconciliation step.
#[derive(Debug, Clone)]
pub struct ReconcileParams {
    /// Maximum |start difference| in seconds for two words to count as
    /// the same utterance.
    pub match_window: f64,
    /// Minimum vote count before a label mapping is accepted. Speakers
    /// with fewer matched words keep their original label.
    pub min_votes: usize,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            match_window: 1.0,
            min_votes: 3,
        }
    }
}

/// Computes a rename mapping for `candidate`'s speaker labels in terms
/// of `reference`'s, using words whose `start` falls inside
/// `[overlap_start, overlap_end]`.
///
/// Each candidate word votes for the reference speaker of its best
/// match: same text case-insensitively, `start` within
/// `params.match_window`, smallest time difference wins. A candidate
/// speaker is mapped to its top-voted reference speaker only when that
/// top count reaches `params.min_votes`; otherwise it passes through
/// unmapped. No overlap or no matches is not an error — the mapping is
/// simply empty.
pub fn reconcile_speakers(
    reference: &Transcript,
    candidate: &Transcript,
    overlap_start: f64,
    overlap_end: f64,
    params: &ReconcileParams,
) -> SpeakerMapping {
    let reference_words: Vec<&Word> =
        words_in_window(reference, overlap_start, overlap_end).collect();
    let candidate_words = words_in_window(candidate, overlap_start, overlap_end);

    // votes[(candidate_speaker, reference_speaker)] = matched word count
    let mut votes: HashMap<(String, String), usize> = HashMap::new();

    for cand in candidate_words {
        let (Some(cand_start), Some(cand_speaker)) = (cand.start, cand.speaker.as_deref()) else {
            continue;
        };
        let cand_text = cand.text.to_lowercase();

        let best = reference_words
            .iter()
            .filter(|r| r.speaker.is_some())
            .filter_map(|r| {
                let r_start = r.start?;
                let dt = (r_start - cand_start).abs();
                (dt <= params.match_window && r.text.to_lowercase() == cand_text)
                    .then_some((dt, *r))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        if let Some((_, matched)) = best {
            if let Some(ref_speaker) = matched.speaker.as_deref() {
                *votes
                    .entry((cand_speaker.to_string(), ref_speaker.to_string()))
                    .or_insert(0) += 1;
            }
        }
    }

    // Per candidate speaker, keep the top-voted reference speaker.
    // Ties break toward the lexicographically smallest reference label
    // so the mapping is deterministic.
    let mut best_per_candidate: HashMap<String, (String, usize)> = HashMap::new();
    for ((cand_speaker, ref_speaker), count) in votes {
        match best_per_candidate.get_mut(&cand_speaker) {
            Some((winner, top)) => {
                if count > *top || (count == *top && ref_speaker < *winner) {
                    *winner = ref_speaker;
                    *top = count;
                }
            }
            None => {
                best_per_candidate.insert(cand_speaker, (ref_speaker, count));
            }
        }
    }

    let mut mapping = SpeakerMapping::default();
    for (cand_speaker, (ref_speaker, count)) in best_per_candidate {
        if count >= params.min_votes && cand_speaker != ref_speaker {
            mapping.0.insert(cand_speaker, ref_speaker);
        }
    }
    mapping
}

fn words_in_window<'a>(
    transcript: &'a Transcript,
    start: f64,
    end: f64,
) -> impl Iterator<Item = &'a Word> {
    transcript
        .words()
        .filter(move |w| w.start.is_some_and(|t| t >= start && t <= end))
}
