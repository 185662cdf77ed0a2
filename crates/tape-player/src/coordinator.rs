//! Playback coordinator: the one place that assigns the active source.
//!
//! Source selection is made by the caller (upload, pasted link, startup
//! resume); the coordinator only commits whichever source it is handed,
//! persists local uploads, and keeps the preference state the UI renders.
//! A source is swapped only after it loaded successfully, so a failed
//! resolution or load leaves whatever was playing untouched.

use std::path::Path;

use tape_proto::config::PlaybackConfig;
use tape_proto::protocol::{PlayerSnapshot, SourceKind, Theme};
use tape_proto::settings::SettingsStore;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::element::{PlaybackElement, Timeline};
use crate::error::{PlayerError, Result};
use crate::library::LocalLibrary;
use crate::resolver::{Resolver, StreamChoice, StreamFetcher};

/// Extension given to transient files when the track name has none.
const DEFAULT_AUDIO_EXT: &str = "mp3";

/// The source currently handed to the element.
#[derive(Debug)]
struct NowPlaying {
    name: String,
    artwork: String,
    kind: SourceKind,
    /// Local bytes materialised for the element; removed on drop.
    _transient: Option<TempPath>,
}

pub struct Coordinator<E> {
    element: E,
    /// `None` when no durable store could be opened (memoryless mode).
    library: Option<LocalLibrary>,
    settings: SettingsStore,
    local_artwork: String,
    looping: bool,
    theme: Theme,
    volume: f32,
    now_playing: Option<NowPlaying>,
    is_playing: bool,
}

impl<E: PlaybackElement> Coordinator<E> {
    pub fn new(
        element: E,
        library: Option<LocalLibrary>,
        settings: SettingsStore,
        playback: &PlaybackConfig,
    ) -> Self {
        let looping = settings.loop_enabled();
        let theme = settings.theme();
        if library.is_none() {
            warn!("coordinator: no library; uploads will play but not be remembered");
        }
        Self {
            element,
            library,
            settings,
            local_artwork: playback.local_artwork.clone(),
            looping,
            theme,
            volume: playback.default_volume.clamp(0.0, 1.0),
            now_playing: None,
            is_playing: false,
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn is_playing(&self) -> bool {
        let timeline = self.element.timeline();
        self.is_playing && !timeline.ended && !timeline.failed
    }

    pub fn is_local_source(&self) -> bool {
        matches!(
            self.now_playing.as_ref().map(|n| n.kind),
            Some(SourceKind::Local)
        )
    }

    pub fn library(&self) -> Option<&LocalLibrary> {
        self.library.as_ref()
    }

    pub fn element(&self) -> &E {
        &self.element
    }

    pub fn timeline(&self) -> Timeline {
        self.element.timeline()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let timeline = self.element.timeline();
        let now = self.now_playing.as_ref();
        PlayerSnapshot {
            display_name: now.map(|n| n.name.clone()),
            artwork: now.map(|n| n.artwork.clone()),
            source_kind: now.map(|n| n.kind).unwrap_or_default(),
            is_playing: self.is_playing(),
            position_secs: timeline.position_secs,
            duration_secs: timeline.duration_secs,
            volume: self.volume,
            looping: self.looping,
            theme: self.theme,
        }
    }

    // ── startup ───────────────────────────────────────────────────────────────

    /// Apply stored preferences, then resume the last local track if the
    /// library still holds it.  A miss is silent.
    pub async fn startup(&mut self) -> Result<PlayerSnapshot> {
        if let Err(e) = self.element.set_volume(self.volume).await {
            warn!("coordinator: initial volume not applied: {}", e);
        }
        if let Err(e) = self.element.set_looping(self.looping).await {
            warn!("coordinator: initial loop flag not applied: {}", e);
        }

        let record = match &self.library {
            Some(library) => library.resume().await,
            None => None,
        };
        match record {
            Some(record) => self.play_local(&record.name, &record.data).await,
            None => Ok(self.snapshot()),
        }
    }

    // ── sources ───────────────────────────────────────────────────────────────

    /// A file picked by the user: remember it (best effort), then play it.
    pub async fn on_upload(&mut self, name: &str, data: &[u8]) -> Result<PlayerSnapshot> {
        if let Some(library) = &self.library {
            if let Err(e) = library.put(name, data).await {
                warn!("coordinator: {}", e);
            }
        }
        self.play_local(name, data).await
    }

    /// Validate, resolve and play a pasted link in one go.
    pub async fn on_link_submit<F: StreamFetcher>(
        &mut self,
        resolver: &Resolver<F>,
        raw_link: &str,
    ) -> Result<PlayerSnapshot> {
        let choice = resolver.resolve_link(raw_link).await?;
        self.play_remote(choice).await
    }

    /// Play an in-memory buffer.  Never touches the library.
    pub async fn play_local(&mut self, name: &str, data: &[u8]) -> Result<PlayerSnapshot> {
        let transient = materialize(name, data).await?;
        let source = transient.to_string_lossy().into_owned();
        let artwork = self.local_artwork.clone();
        self.commit(&source, name.to_string(), artwork, SourceKind::Local, Some(transient))
            .await
    }

    /// Play a resolved remote stream.  Remote sources are never persisted.
    pub async fn play_remote(&mut self, choice: StreamChoice) -> Result<PlayerSnapshot> {
        self.commit(
            &choice.url,
            choice.title,
            choice.artwork,
            SourceKind::Remote,
            None,
        )
        .await
    }

    async fn commit(
        &mut self,
        source: &str,
        name: String,
        artwork: String,
        kind: SourceKind,
        transient: Option<TempPath>,
    ) -> Result<PlayerSnapshot> {
        self.element.load(source).await?;
        if let Err(e) = self.element.set_looping(self.looping).await {
            warn!("coordinator: loop flag not applied to {:?}: {}", name, e);
        }

        info!("coordinator: now playing {:?} ({:?})", name, kind);
        // replacing drops the previous transient file
        self.now_playing = Some(NowPlaying {
            name,
            artwork,
            kind,
            _transient: transient,
        });

        match self.element.play().await {
            Ok(()) => self.is_playing = true,
            Err(PlayerError::PlaybackRejected(reason)) => {
                warn!("coordinator: playback rejected, staying paused: {}", reason);
                self.is_playing = false;
            }
            Err(e) => {
                self.is_playing = false;
                return Err(e);
            }
        }
        Ok(self.snapshot())
    }

    // ── transport ─────────────────────────────────────────────────────────────

    pub async fn on_toggle_pause(&mut self) -> Result<PlayerSnapshot> {
        if self.now_playing.is_none() {
            return Ok(self.snapshot());
        }

        if self.is_playing() {
            self.element.pause().await?;
            self.is_playing = false;
            return Ok(self.snapshot());
        }

        if self.element.timeline().ended {
            self.element.seek_to(0.0).await?;
        }
        match self.element.play().await {
            Ok(()) => self.is_playing = true,
            Err(PlayerError::PlaybackRejected(reason)) => {
                warn!("coordinator: playback rejected: {}", reason);
                self.is_playing = false;
            }
            Err(e) => return Err(e),
        }
        Ok(self.snapshot())
    }

    /// Jump to `fraction` of the duration.  Ignored until the duration is known.
    pub async fn on_scrub(&mut self, fraction: f64) -> Result<PlayerSnapshot> {
        let Some(duration) = self.known_duration() else {
            debug!("coordinator: scrub ignored, duration unknown");
            return Ok(self.snapshot());
        };
        if !fraction.is_finite() {
            return Ok(self.snapshot());
        }
        self.element
            .seek_to(fraction.clamp(0.0, 1.0) * duration)
            .await?;
        Ok(self.snapshot())
    }

    /// Move by `delta` seconds, clamped to the start and the known duration.
    pub async fn on_seek_relative(&mut self, delta: f64) -> Result<PlayerSnapshot> {
        if self.now_playing.is_none() || !delta.is_finite() {
            return Ok(self.snapshot());
        }
        let position = self.element.timeline().position_secs.unwrap_or(0.0);
        let mut target = (position + delta).max(0.0);
        if let Some(duration) = self.known_duration() {
            target = target.min(duration);
        }
        self.element.seek_to(target).await?;
        Ok(self.snapshot())
    }

    pub async fn on_volume_change(&mut self, level: f32) -> Result<PlayerSnapshot> {
        if !level.is_finite() {
            return Ok(self.snapshot());
        }
        let level = level.clamp(0.0, 1.0);
        self.element.set_volume(level).await?;
        self.volume = level;
        Ok(self.snapshot())
    }

    // ── preferences ───────────────────────────────────────────────────────────

    pub async fn on_toggle_loop(&mut self) -> Result<PlayerSnapshot> {
        self.looping = !self.looping;
        if let Err(e) = self.element.set_looping(self.looping).await {
            warn!("coordinator: loop flag not applied: {}", e);
        }
        if let Err(e) = self.settings.set_loop_enabled(self.looping) {
            warn!("coordinator: loop preference not saved: {}", e);
        }
        Ok(self.snapshot())
    }

    pub fn on_toggle_theme(&mut self) -> PlayerSnapshot {
        self.theme = self.theme.toggled();
        if let Err(e) = self.settings.set_theme(self.theme) {
            warn!("coordinator: theme preference not saved: {}", e);
        }
        self.snapshot()
    }

    /// Notice once that the element gave up on the current source after
    /// accepting it.  The source stays selected but is no longer playing.
    pub fn take_playback_failure(&mut self) -> Option<PlayerError> {
        if !self.is_playing || !self.element.timeline().failed {
            return None;
        }
        self.is_playing = false;
        let name = self
            .now_playing
            .as_ref()
            .map(|n| n.name.as_str())
            .unwrap_or_default();
        warn!("coordinator: {:?} could not be played", name);
        Some(PlayerError::Playback(format!("could not play {}", name)))
    }

    pub async fn shutdown(&mut self) {
        self.element.shutdown().await;
        self.now_playing = None;
    }

    fn known_duration(&self) -> Option<f64> {
        self.element
            .timeline()
            .duration_secs
            .filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Write `data` to a temp file the element can open.  The file lives as long
/// as the returned path.
async fn materialize(name: &str, data: &[u8]) -> Result<TempPath> {
    let path = tempfile::Builder::new()
        .prefix("tape-")
        .suffix(&format!(".{}", transient_extension(name)))
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

fn transient_extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_AUDIO_EXT.to_string())
}
