//! Merging per-chunk transcripts into one.
//!
//! Adjacent chunks overlap, so the words in the overlap region appear in
//! both inputs. The merger collapses them by scanning in time order and
//! dropping any word that duplicates a recently kept one, then re-derives
//! segment boundaries from speaker changes.

use crate::types::{Provenance, Transcript, Word};

/// How many recently kept words the dedup scan looks back through.
/// Large enough to cover interleaved two-speaker turns inside the
/// overlap without scanning the whole accumulated transcript.
const DEDUP_LOOKBACK: usize = 8;

/// Merges two transcripts whose timestamps are both absolute to the
/// same original audio.
///
/// Words from both inputs are sorted by `start` (missing starts sort as
/// 0), deduplicated within `dedup_window` seconds, and re-segmented on
/// speaker change. Speaker reconciliation must already have been
/// applied to `b` — the merger compares labels verbatim.
pub fn merge_transcripts(a: &Transcript, b: &Transcript, dedup_window: f64) -> Transcript {
    let mut words: Vec<Word> = a.words().chain(b.words()).cloned().collect();
    words.sort_by(|x, y| start_of(x).total_cmp(&start_of(y)));

    let mut kept: Vec<Word> = Vec::with_capacity(words.len());
    for word in words {
        if is_duplicate(&kept, &word, dedup_window) {
            continue;
        }
        kept.push(word);
    }

    let provenance = Provenance {
        provider: a.provenance.provider.clone().or_else(|| b.provenance.provider.clone()),
        model: a.provenance.model.clone().or_else(|| b.provenance.model.clone()),
        split_recovered: a.provenance.split_recovered || b.provenance.split_recovered,
    };

    Transcript::from_words(
        kept,
        a.audio_ref.clone(),
        a.language.clone().or_else(|| b.language.clone()),
        a.diarization_enabled || b.diarization_enabled,
        provenance,
    )
}

fn start_of(word: &Word) -> f64 {
    word.start.unwrap_or(0.0)
}

fn is_duplicate(kept: &[Word], word: &Word, dedup_window: f64) -> bool {
    let tail = kept.len().saturating_sub(DEDUP_LOOKBACK);
    kept[tail..].iter().any(|k| {
        k.text.eq_ignore_ascii_case(&word.text)
            && (start_of(k) - start_of(word)).abs() <= dedup_window
    })
}
