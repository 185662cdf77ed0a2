//! Error types for the player core.

use thiserror::Error;

/// Failures the resolver can report after a lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Nothing was pasted.
    #[error("Please paste a YouTube link.")]
    EmptyLink,

    /// The link carries no recognisable 11-character video id.
    #[error("Invalid YouTube link!")]
    InvalidLink,

    /// Every mirror failed or answered without a stream list.
    #[error("Failed to load YouTube audio.")]
    Unresolved,

    /// A mirror answered, but offered no audio-only mp4 stream.
    #[error("No playable audio found.")]
    NoPlayableStream,
}

/// Errors surfaced by the playback coordinator.
#[derive(Error, Debug)]
pub enum PlayerError {
    /// No durable storage could be opened; the player runs memoryless.
    #[error("Library storage unavailable: {0}")]
    StoreUnavailable(String),

    /// A track could not be written.  Playback is never blocked by this.
    #[error("Failed to save track to library: {0}")]
    StoreWriteFailed(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The playback element refused to start.
    #[error("Playback was rejected: {0}")]
    PlaybackRejected(String),

    /// The playback element failed to load or control a source.
    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// True for failures the user should be told about directly.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            PlayerError::Resolve(_) | PlayerError::Playback(_) | PlayerError::Io(_)
        )
    }
}

/// Result type for player operations.
pub type Result<T> = std::result::Result<T, PlayerError>;
