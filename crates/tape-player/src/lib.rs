//! Playback core for `tape`: a local library, a remote link resolver and the
//! coordinator that decides what the playback element is playing.

pub mod console;
pub mod coordinator;
pub mod core;
pub mod element;
pub mod error;
pub mod library;
pub mod mpv;
pub mod resolver;

pub use coordinator::Coordinator;
pub use crate::core::{CoreEvent, PlayerCore};
pub use element::{PlaybackElement, Timeline};
pub use error::{PlayerError, ResolveError};
pub use library::{LocalLibrary, TrackRecord};
pub use resolver::{Resolver, StreamChoice, StreamFetcher};
