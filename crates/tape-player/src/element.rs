//! The playback element: whatever actually turns a source into sound.

use async_trait::async_trait;

use crate::error::Result;

/// Where the element currently is in the loaded source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timeline {
    pub position_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    /// The source played to its end (never set while looping).
    pub ended: bool,
    /// The element accepted the source but could not play it, e.g. a stream
    /// URL that expired before it was opened.
    pub failed: bool,
}

/// Control surface the coordinator drives.  `source` is either a URL or a
/// local file path; decoding is entirely the element's business.
#[async_trait]
pub trait PlaybackElement: Send {
    /// Replace the current source.  Does not start playback.
    async fn load(&mut self, source: &str) -> Result<()>;

    /// Start or resume.  Fails with `PlaybackRejected` when the element
    /// refuses.
    async fn play(&mut self) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn set_looping(&mut self, looping: bool) -> Result<()>;

    /// Absolute seek, in seconds.
    async fn seek_to(&mut self, secs: f64) -> Result<()>;

    /// Linear volume in 0.0..=1.0.
    async fn set_volume(&mut self, level: f32) -> Result<()>;

    fn timeline(&self) -> Timeline;

    /// Release the element's resources.  Default: nothing to release.
    async fn shutdown(&mut self) {}
}
