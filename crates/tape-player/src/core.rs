/// PlayerCore: single-owner event loop around the coordinator.
///
/// Console commands, finished link resolutions and heartbeat ticks all
/// arrive as `CoreEvent`s and are handled one at a time, so the coordinator
/// never needs a lock.  Link resolution is the only slow operation; it runs
/// as its own task and reports back with `CoreEvent::Resolved`, which keeps
/// the loop responsive while mirrors are queried.  Concurrent resolutions
/// are not cancelled: whichever completes last assigns the source.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tape_proto::protocol::{Broadcast, Command, PlayerSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::element::PlaybackElement;
use crate::error::{ResolveError, Result};
use crate::resolver::{extract_id, HttpFetcher, Resolver, StreamChoice, StreamFetcher};

pub const HEARTBEAT: Duration = Duration::from_secs(1);

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the console.
    Command(Command),
    /// A spawned resolution finished.
    Resolved {
        video_id: String,
        result: std::result::Result<StreamChoice, ResolveError>,
    },
    /// Periodic progress report.
    HeartbeatTick,
    /// Shutdown requested.
    Shutdown,
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<E, F = HttpFetcher> {
    coordinator: Coordinator<E>,
    resolver: Arc<Resolver<F>>,
    seek_step_secs: f64,
    /// Loop-back channel for spawned resolutions and the heartbeat.  Weak,
    /// so the loop ends once every outside sender is gone.
    event_tx: mpsc::WeakSender<CoreEvent>,
    broadcast_tx: mpsc::Sender<Broadcast>,
}

impl<E, F> PlayerCore<E, F>
where
    E: PlaybackElement,
    F: StreamFetcher + 'static,
{
    pub fn new(
        coordinator: Coordinator<E>,
        resolver: Arc<Resolver<F>>,
        seek_step_secs: f64,
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_tx: mpsc::Sender<Broadcast>,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            seek_step_secs,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<E> {
        &self.coordinator
    }

    /// Resume the last track, then process events until `Quit`, `Shutdown`
    /// or the channel closes.  Returns the coordinator for inspection.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> Coordinator<E> {
        info!("PlayerCore: starting event loop");

        match self.coordinator.startup().await {
            Ok(snapshot) => self.emit(Broadcast::State { data: snapshot }).await,
            Err(e) => {
                warn!("PlayerCore: resume failed: {}", e);
                self.emit_state().await;
            }
        }

        let heartbeat_tx = self.event_tx.clone();
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                let Some(tx) = heartbeat_tx.upgrade() else {
                    break;
                };
                if tx.send(CoreEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlayerCore: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                Some(CoreEvent::Command(Command::Quit)) => {
                    info!("PlayerCore: quit");
                    break;
                }
                Some(CoreEvent::Command(cmd)) => {
                    debug!("PlayerCore: command {:?}", cmd);
                    self.handle_command(cmd).await;
                }
                Some(CoreEvent::Resolved { video_id, result }) => {
                    self.handle_resolved(&video_id, result).await;
                }
                Some(CoreEvent::HeartbeatTick) => {
                    self.handle_heartbeat().await;
                }
            }
        }

        heartbeat.abort();
        self.coordinator.shutdown().await;
        self.emit(Broadcast::Bye).await;
        self.coordinator
    }

    async fn handle_command(&mut self, cmd: Command) {
        let result = match cmd {
            Command::Upload { path } => self.upload(&path).await,
            Command::Link { link } => {
                self.start_resolution(&link).await;
                return;
            }
            Command::Scrub { fraction } => self.coordinator.on_scrub(fraction).await,
            Command::Volume { level } => self.coordinator.on_volume_change(level).await,
            Command::SeekRelative { seconds } => self.coordinator.on_seek_relative(seconds).await,
            Command::Forward => self.coordinator.on_seek_relative(self.seek_step_secs).await,
            Command::Back => self.coordinator.on_seek_relative(-self.seek_step_secs).await,
            Command::TogglePause => self.coordinator.on_toggle_pause().await,
            Command::ToggleLoop => self.coordinator.on_toggle_loop().await,
            Command::ToggleTheme => Ok(self.coordinator.on_toggle_theme()),
            Command::State => Ok(self.coordinator.snapshot()),
            Command::Quit => return,
        };
        self.report(result).await;
    }

    async fn upload(&mut self, path: &str) -> Result<PlayerSnapshot> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let data = tokio::fs::read(path).await?;
        info!("PlayerCore: upload {:?} ({} bytes)", name, data.len());
        self.coordinator.on_upload(&name, &data).await
    }

    /// Validate now (no network on a bad link), resolve in the background.
    async fn start_resolution(&mut self, link: &str) {
        let video_id = match extract_id(link) {
            Ok(id) => id,
            Err(e) => {
                self.notice(e.to_string()).await;
                return;
            }
        };

        info!("PlayerCore: resolving {}", video_id);
        let resolver = Arc::clone(&self.resolver);
        let Some(tx) = self.event_tx.upgrade() else {
            debug!("PlayerCore: not resolving {}, event channel closed", video_id);
            return;
        };
        tokio::spawn(async move {
            let result = resolver.resolve(&video_id).await;
            if tx
                .send(CoreEvent::Resolved { video_id, result })
                .await
                .is_err()
            {
                debug!("PlayerCore: resolution finished after shutdown");
            }
        });
    }

    async fn handle_resolved(
        &mut self,
        video_id: &str,
        result: std::result::Result<StreamChoice, ResolveError>,
    ) {
        match result {
            Ok(choice) => {
                info!("PlayerCore: {} resolved to {:?}", video_id, choice.title);
                let result = self.coordinator.play_remote(choice).await;
                self.report(result).await;
            }
            Err(e) => {
                warn!("PlayerCore: {} not resolved: {}", video_id, e);
                self.notice(e.to_string()).await;
            }
        }
    }

    async fn handle_heartbeat(&mut self) {
        if let Some(e) = self.coordinator.take_playback_failure() {
            self.notice(e.to_string()).await;
            self.emit_state().await;
            return;
        }
        if !self.coordinator.is_playing() {
            return;
        }
        let timeline = self.coordinator.timeline();
        let Some(position_secs) = timeline.position_secs else {
            return;
        };
        let fraction = timeline
            .duration_secs
            .filter(|d| *d > 0.0)
            .map(|d| (position_secs / d).clamp(0.0, 1.0));
        self.emit(Broadcast::Progress {
            position_secs,
            duration_secs: timeline.duration_secs,
            fraction,
        })
        .await;
    }

    async fn report(&mut self, result: Result<PlayerSnapshot>) {
        match result {
            Ok(snapshot) => self.emit(Broadcast::State { data: snapshot }).await,
            Err(e) if e.is_user_visible() => {
                warn!("PlayerCore: {}", e);
                self.notice(e.to_string()).await;
            }
            Err(e) => {
                error!("PlayerCore: {}", e);
                self.emit_state().await;
            }
        }
    }

    async fn notice(&self, message: String) {
        self.emit(Broadcast::Notice { message }).await;
    }

    async fn emit_state(&self) {
        let data = self.coordinator.snapshot();
        self.emit(Broadcast::State { data }).await;
    }

    async fn emit(&self, msg: Broadcast) {
        if self.broadcast_tx.send(msg).await.is_err() {
            debug!("PlayerCore: no console listening");
        }
    }
}
