pub mod merge;
pub mod reconcile;
pub mod types;

pub use merge::merge_transcripts;
pub use reconcile::{reconcile_speakers, ReconcileParams};
pub use types::{Provenance, Segment, SpeakerMapping, Transcript, Word};
