//! Audio source interface.

/// An indexable, sliceable audio stream with a known total duration.
///
/// Downloading and downsampling happen upstream; the pipeline only
/// needs to cut arbitrary sub-ranges into self-contained audio bytes
/// suitable for one remote request.
pub trait AudioSource: Send + Sync {
    /// Stable identifier for this audio (file path, URL, episode id).
    fn reference(&self) -> &str;

    /// Total duration in milliseconds.
    fn duration_ms(&self) -> u64;

    /// Exports `[start_ms, end_ms)` as a self-contained audio file.
    fn export_range(&self, start_ms: u64, end_ms: u64) -> anyhow::Result<Vec<u8>>;
}
