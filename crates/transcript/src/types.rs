use std::collections::BTreeSet;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single recognized word with absolute timestamps.
///
/// Times are in seconds, relative to the original (unchunked) audio once
/// [`Transcript::shift_timestamps`] has been applied by the chunk worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub confidence: Option<f64>,
    /// Speaker label as assigned by the recognizer (e.g. "SPEAKER_00").
    pub speaker: Option<String>,
}

/// A run of consecutive words attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    /// Space-joined texts of `words`.
    pub text: String,
    pub speaker: Option<String>,
    pub words: Vec<Word>,
}

/// Where a transcript came from, for debug artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Remote provider name (e.g. "nim", "speech-v2").
    pub provider: Option<String>,
    pub model: Option<String>,
    /// True if any contributing chunk recovered from a timeout by
    /// bisecting and re-submitting its halves.
    pub split_recovered: bool,
}

/// A complete speaker-attributed transcript.
///
/// Transcripts are immutable values: every transformation (timestamp
/// shift, speaker rename, merge) returns a new `Transcript`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Identifier of the audio this transcript covers (file path, URL, ...).
    pub audio_ref: String,
    pub language: Option<String>,
    /// Space-joined segment texts, kept in sync by every constructor.
    pub full_text: String,
    pub segments: Vec<Segment>,
    pub diarization_enabled: bool,
    pub speaker_count: Option<usize>,
    pub provenance: Provenance,
}

/// Rename mapping for one reconciliation step: candidate-transcript
/// labels → reference-transcript labels. Labels absent from the mapping
/// pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakerMapping(pub HashMap<String, String>);

impl SpeakerMapping {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Maps a label, returning it unchanged if unmapped.
    pub fn relabel<'a>(&'a self, label: &'a str) -> &'a str {
        self.0.get(label).map(String::as_str).unwrap_or(label)
    }
}

impl Transcript {
    /// Builds a transcript from an already time-ordered word stream,
    /// deriving segment boundaries from speaker changes.
    ///
    /// A new segment opens at the first word and whenever the speaker
    /// label differs from the previous word's. Segment `end` falls back
    /// to the last word's `start` when its `end` is missing.
    pub fn from_words(
        words: Vec<Word>,
        audio_ref: String,
        language: Option<String>,
        diarization_enabled: bool,
        provenance: Provenance,
    ) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current: Vec<Word> = Vec::new();
        let mut current_speaker: Option<String> = None;

        for word in words {
            if !current.is_empty() && word.speaker != current_speaker {
                segments.push(close_segment(segments.len(), std::mem::take(&mut current)));
            }
            current_speaker = word.speaker.clone();
            current.push(word);
        }
        if !current.is_empty() {
            segments.push(close_segment(segments.len(), current));
        }

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let speaker_count = if diarization_enabled {
            let labels: BTreeSet<&str> = segments
                .iter()
                .filter_map(|s| s.speaker.as_deref())
                .collect();
            Some(labels.len())
        } else {
            None
        };

        Self {
            audio_ref,
            language,
            full_text,
            segments,
            diarization_enabled,
            speaker_count,
            provenance,
        }
    }

    /// Iterates over all words in segment order.
    pub fn words(&self) -> impl Iterator<Item = &Word> {
        self.segments.iter().flat_map(|s| s.words.iter())
    }

    /// Returns a copy with every timestamp shifted by `offset_secs`.
    ///
    /// Chunk workers use this to convert chunk-relative times into
    /// absolute original-audio times.
    pub fn shift_timestamps(&self, offset_secs: f64) -> Self {
        let mut out = self.clone();
        for segment in &mut out.segments {
            segment.start += offset_secs;
            segment.end += offset_secs;
            for word in &mut segment.words {
                word.start = word.start.map(|t| t + offset_secs);
                word.end = word.end.map(|t| t + offset_secs);
            }
        }
        out
    }

    /// Returns a copy with speaker labels renamed through `mapping`.
    /// Unmapped labels pass through unchanged.
    pub fn rename_speakers(&self, mapping: &SpeakerMapping) -> Self {
        if mapping.is_empty() {
            return self.clone();
        }
        let mut out = self.clone();
        for segment in &mut out.segments {
            if let Some(speaker) = &segment.speaker {
                segment.speaker = Some(mapping.relabel(speaker).to_string());
            }
            for word in &mut segment.words {
                if let Some(speaker) = &word.speaker {
                    word.speaker = Some(mapping.relabel(speaker).to_string());
                }
            }
        }
        out
    }
}

fn close_segment(id: usize, words: Vec<Word>) -> Segment {
    let start = words.first().and_then(|w| w.start).unwrap_or(0.0);
    let end = words
        .last()
        .and_then(|w| w.end.or(w.start))
        .unwrap_or(start);
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let speaker = words.first().and_then(|w| w.speaker.clone());
    Segment {
        id,
        start,
        end,
        text,
        speaker,
        words,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, speaker: &str) -> Word {
        Word {
            text: text.to_string(),
            start: Some(start),
            end: Some(start + 0.4),
            confidence: Some(0.9),
            speaker: Some(speaker.to_string()),
        }
    }

    #[test]
    fn from_words_splits_segments_on_speaker_change() {
        let words = vec![
            word("hello", 0.0, "SPEAKER_00"),
            word("there", 0.5, "SPEAKER_00"),
            word("hi", 1.2, "SPEAKER_01"),
        ];
        let t = Transcript::from_words(
            words,
            "ep1.mp3".into(),
            Some("en".into()),
            true,
            Provenance::default(),
        );

        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[0].text, "hello there");
        assert_eq!(t.segments[1].speaker.as_deref(), Some("SPEAKER_01"));
        assert_eq!(t.full_text, "hello there hi");
        assert_eq!(t.speaker_count, Some(2));
    }

    #[test]
    fn shift_timestamps_moves_words_and_segments() {
        let t = Transcript::from_words(
            vec![word("a", 1.0, "SPEAKER_00")],
            "ep".into(),
            None,
            true,
            Provenance::default(),
        );
        let shifted = t.shift_timestamps(10.0);
        assert_eq!(shifted.segments[0].start, 11.0);
        assert_eq!(shifted.segments[0].words[0].start, Some(11.0));
        // original untouched
        assert_eq!(t.segments[0].start, 1.0);
    }

    #[test]
    fn rename_speakers_leaves_unmapped_labels_alone() {
        let t = Transcript::from_words(
            vec![word("a", 0.0, "SPEAKER_01"), word("b", 1.0, "SPEAKER_02")],
            "ep".into(),
            None,
            true,
            Provenance::default(),
        );
        let mut mapping = SpeakerMapping::default();
        mapping
            .0
            .insert("SPEAKER_01".to_string(), "SPEAKER_00".to_string());

        let renamed = t.rename_speakers(&mapping);
        assert_eq!(renamed.segments[0].speaker.as_deref(), Some("SPEAKER_00"));
        assert_eq!(renamed.segments[1].speaker.as_deref(), Some("SPEAKER_02"));
    }
}
