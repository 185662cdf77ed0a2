//! End-to-end flows through the coordinator and the event loop, with a
//! recording element standing in for mpv.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tape_player::core::{CoreEvent, PlayerCore};
use tape_player::resolver::{AudioStream, StreamDescriptor};
use tape_player::{
    Coordinator, LocalLibrary, PlaybackElement, PlayerError, ResolveError, Resolver,
    StreamFetcher, Timeline,
};
use tape_proto::config::{PlaybackConfig, ResolverConfig};
use tape_proto::protocol::{Broadcast, Command, PlayerSnapshot, SourceKind, Theme};
use tape_proto::settings::SettingsStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug, Default)]
struct ElementState {
    loaded: Vec<String>,
    playing: bool,
    looping: bool,
    volume: f32,
    position: Option<f64>,
    duration: Option<f64>,
    ended: bool,
    failed: bool,
    seeks: Vec<f64>,
    reject_play: bool,
    fail_load: bool,
    shut_down: bool,
}

#[derive(Debug, Clone, Default)]
struct FakeElement(Arc<Mutex<ElementState>>);

impl FakeElement {
    fn state(&self) -> std::sync::MutexGuard<'_, ElementState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl PlaybackElement for FakeElement {
    async fn load(&mut self, source: &str) -> tape_player::error::Result<()> {
        let mut s = self.state();
        if s.fail_load {
            return Err(PlayerError::Playback(format!("cannot open {}", source)));
        }
        s.loaded.push(source.to_string());
        s.playing = false;
        s.position = Some(0.0);
        s.duration = None;
        s.ended = false;
        s.failed = false;
        Ok(())
    }

    async fn play(&mut self) -> tape_player::error::Result<()> {
        let mut s = self.state();
        if s.reject_play {
            return Err(PlayerError::PlaybackRejected("autoplay blocked".into()));
        }
        s.playing = true;
        Ok(())
    }

    async fn pause(&mut self) -> tape_player::error::Result<()> {
        self.state().playing = false;
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> tape_player::error::Result<()> {
        self.state().looping = looping;
        Ok(())
    }

    async fn seek_to(&mut self, secs: f64) -> tape_player::error::Result<()> {
        let mut s = self.state();
        s.seeks.push(secs);
        s.position = Some(secs);
        s.ended = false;
        Ok(())
    }

    async fn set_volume(&mut self, level: f32) -> tape_player::error::Result<()> {
        self.state().volume = level;
        Ok(())
    }

    fn timeline(&self) -> Timeline {
        let s = self.state();
        Timeline {
            position_secs: s.position,
            duration_secs: s.duration,
            ended: s.ended,
            failed: s.failed,
        }
    }

    async fn shutdown(&mut self) {
        self.state().shut_down = true;
    }
}

/// Mirror answers keyed by video id; unknown ids fail.  An optional delay
/// per id lets resolutions finish out of order.
#[derive(Default)]
struct FakeMirror {
    answers: HashMap<String, (Duration, StreamDescriptor)>,
}

impl FakeMirror {
    fn answering(mut self, video_id: &str, url: &str, title: &str, delay: Duration) -> Self {
        let descriptor = StreamDescriptor {
            title: Some(title.to_string()),
            thumbnail_url: Some(format!("https://img.example/{}.jpg", video_id)),
            audio_streams: Some(vec![AudioStream {
                url: Some(url.to_string()),
                audio_only: Some(true),
                mime_type: Some("audio/mp4".to_string()),
            }]),
        };
        self.answers.insert(video_id.to_string(), (delay, descriptor));
        self
    }
}

#[async_trait]
impl StreamFetcher for FakeMirror {
    async fn fetch_streams(
        &self,
        _mirror: &str,
        video_id: &str,
    ) -> anyhow::Result<StreamDescriptor> {
        match self.answers.get(video_id) {
            Some((delay, descriptor)) => {
                tokio::time::sleep(*delay).await;
                Ok(descriptor.clone())
            }
            None => anyhow::bail!("503 for {}", video_id),
        }
    }
}

fn resolver(mirror: FakeMirror) -> Resolver<FakeMirror> {
    let config = ResolverConfig {
        mirrors: vec!["https://mirror.test".to_string()],
        ..ResolverConfig::default()
    };
    Resolver::with_fetcher(mirror, &config)
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    dir: TempDir,
    element: FakeElement,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            element: FakeElement::default(),
        }
    }

    fn settings(&self) -> SettingsStore {
        SettingsStore::open(self.dir.path().join("settings.json"))
    }

    async fn library(&self, settings: &SettingsStore) -> LocalLibrary {
        LocalLibrary::open(self.dir.path().join("library"), settings.clone())
            .await
            .unwrap()
    }

    /// A fresh coordinator over the same directory, as after a restart.
    async fn coordinator(&self) -> Coordinator<FakeElement> {
        let settings = self.settings();
        let library = self.library(&settings).await;
        Coordinator::new(
            self.element.clone(),
            Some(library),
            settings,
            &PlaybackConfig::default(),
        )
    }
}

fn last_loaded(element: &FakeElement) -> String {
    element.state().loaded.last().cloned().unwrap()
}

// =============================================================================
// Library and resume
// =============================================================================

mod library_and_resume {
    use super::*;

    #[tokio::test]
    async fn upload_stores_track_and_moves_pointer() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;

        let snapshot = coordinator.on_upload("first.mp3", b"ID3-first").await.unwrap();

        assert_eq!(snapshot.display_name.as_deref(), Some("first.mp3"));
        assert_eq!(snapshot.source_kind, SourceKind::Local);
        assert_eq!(snapshot.artwork.as_deref(), Some("album.jpg"));
        assert!(snapshot.is_playing);

        let library = coordinator.library().unwrap();
        assert_eq!(library.last_played().as_deref(), Some("first.mp3"));
        let record = library.get("first.mp3").await.unwrap().unwrap();
        assert_eq!(record.data, b"ID3-first");

        // the element was handed a readable copy of the bytes
        let source = last_loaded(&fx.element);
        assert_eq!(std::fs::read(&source).unwrap(), b"ID3-first");
    }

    #[tokio::test]
    async fn reupload_under_same_name_replaces_bytes() {
        let fx = Fixture::new();
        let settings = fx.settings();
        let library = fx.library(&settings).await;

        library.put("song.mp3", b"old").await.unwrap();
        library.put("other.mp3", b"x").await.unwrap();
        library.put("song.mp3", b"new").await.unwrap();

        assert_eq!(library.get("song.mp3").await.unwrap().unwrap().data, b"new");
        assert_eq!(library.last_played().as_deref(), Some("song.mp3"));
    }

    #[tokio::test]
    async fn restart_resumes_last_uploaded_track() {
        let fx = Fixture::new();
        {
            let mut coordinator = fx.coordinator().await;
            coordinator.on_upload("a.mp3", b"AAAA").await.unwrap();
            coordinator.on_upload("b.ogg", b"OggS-b").await.unwrap();
            coordinator.shutdown().await;
        }

        let mut coordinator = fx.coordinator().await;
        let snapshot = coordinator.startup().await.unwrap();

        assert_eq!(snapshot.display_name.as_deref(), Some("b.ogg"));
        assert_eq!(snapshot.source_kind, SourceKind::Local);
        let source = last_loaded(&fx.element);
        assert!(source.ends_with(".ogg"));
        assert_eq!(std::fs::read(&source).unwrap(), b"OggS-b");
    }

    #[tokio::test]
    async fn dangling_pointer_resumes_nothing() {
        let fx = Fixture::new();
        fx.settings().set_last_song("gone.mp3").unwrap();

        let mut coordinator = fx.coordinator().await;
        let snapshot = coordinator.startup().await.unwrap();

        assert_eq!(snapshot.display_name, None);
        assert_eq!(snapshot.source_kind, SourceKind::None);
        assert!(!snapshot.is_playing);
        assert!(fx.element.state().loaded.is_empty());
    }

    #[tokio::test]
    async fn resume_does_not_rewrite_the_library() {
        let fx = Fixture::new();
        {
            let mut coordinator = fx.coordinator().await;
            coordinator.on_upload("keep.mp3", b"KEEP").await.unwrap();
        }
        let tracks = fx.dir.path().join("library").join("tracks");
        let before = std::fs::metadata(first_file(&tracks)).unwrap().modified().unwrap();

        let mut coordinator = fx.coordinator().await;
        coordinator.startup().await.unwrap();

        let after = std::fs::metadata(first_file(&tracks)).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    fn first_file(dir: &Path) -> std::path::PathBuf {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "track"))
            .unwrap()
    }

    #[tokio::test]
    async fn unavailable_store_still_plays_uploads() {
        let fx = Fixture::new();
        let blocker = fx.dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let settings = fx.settings();
        let err = LocalLibrary::open(blocker.join("library"), settings.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::StoreUnavailable(_)));

        let mut coordinator =
            Coordinator::new(fx.element.clone(), None, settings, &PlaybackConfig::default());
        let snapshot = coordinator.on_upload("tmp.wav", b"RIFF").await.unwrap();

        assert_eq!(snapshot.display_name.as_deref(), Some("tmp.wav"));
        assert!(snapshot.is_playing);
        assert_eq!(fx.settings().last_song(), None);
    }
}

// =============================================================================
// Remote sources
// =============================================================================

mod remote_sources {
    use super::*;

    #[tokio::test]
    async fn remote_play_never_touches_the_library() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        coordinator.on_upload("local.mp3", b"LOCAL").await.unwrap();

        let resolver = resolver(FakeMirror::default().answering(
            "dQw4w9WgXcQ",
            "https://cdn.test/a.m4a",
            "Remote Song",
            Duration::ZERO,
        ));
        let snapshot = coordinator
            .on_link_submit(&resolver, "https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap();

        assert_eq!(snapshot.display_name.as_deref(), Some("Remote Song"));
        assert_eq!(snapshot.source_kind, SourceKind::Remote);
        assert_eq!(
            snapshot.artwork.as_deref(),
            Some("https://img.example/dQw4w9WgXcQ.jpg")
        );
        assert_eq!(last_loaded(&fx.element), "https://cdn.test/a.m4a");

        let library = coordinator.library().unwrap();
        assert_eq!(library.last_played().as_deref(), Some("local.mp3"));
        assert!(library.get("Remote Song").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_resolution_keeps_current_source() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        let before = coordinator.on_upload("local.mp3", b"LOCAL").await.unwrap();

        let resolver = resolver(FakeMirror::default());
        let err = coordinator
            .on_link_submit(&resolver, "https://www.youtube.com/watch?v=aaaaaaaaaaa")
            .await
            .unwrap_err();

        assert!(matches!(err, PlayerError::Resolve(ResolveError::Unresolved)));
        assert_eq!(err.to_string(), "Failed to load YouTube audio.");
        assert_eq!(coordinator.snapshot(), before);
        assert_eq!(fx.element.state().loaded.len(), 1);
    }

    #[tokio::test]
    async fn invalid_link_is_rejected_before_any_lookup() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        let resolver = resolver(FakeMirror::default());

        let err = coordinator
            .on_link_submit(&resolver, "not a link")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid YouTube link!");

        let err = coordinator.on_link_submit(&resolver, "").await.unwrap_err();
        assert_eq!(err.to_string(), "Please paste a YouTube link.");
    }

    #[tokio::test]
    async fn failed_load_keeps_current_source() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        let before = coordinator.on_upload("local.mp3", b"LOCAL").await.unwrap();
        {
            let mut s = fx.element.state();
            s.duration = Some(120.0);
            s.position = Some(30.0);
            s.fail_load = true;
        }
        let resolver = resolver(FakeMirror::default().answering(
            "dQw4w9WgXcQ",
            "https://cdn.test/broken",
            "Broken",
            Duration::ZERO,
        ));
        let err = coordinator
            .on_link_submit(&resolver, "https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();

        assert!(matches!(err, PlayerError::Playback(_)));
        assert_eq!(coordinator.snapshot().display_name, before.display_name);
        assert!(coordinator.is_local_source());
        // the old track keeps playing where it was
        assert!(coordinator.is_playing());
        assert!(fx.element.state().playing);
        assert_eq!(coordinator.timeline().position_secs, Some(30.0));
        assert_eq!(coordinator.timeline().duration_secs, Some(120.0));
    }

    #[tokio::test]
    async fn stream_failing_after_load_stops_playing_once() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        let resolver = resolver(FakeMirror::default().answering(
            "dQw4w9WgXcQ",
            "https://cdn.test/expired",
            "Expired",
            Duration::ZERO,
        ));
        coordinator
            .on_link_submit(&resolver, "https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap();
        assert!(coordinator.take_playback_failure().is_none());

        fx.element.state().failed = true;

        assert!(!coordinator.is_playing());
        let err = coordinator.take_playback_failure().unwrap();
        assert!(err.is_user_visible());
        assert!(coordinator.take_playback_failure().is_none());
        assert_eq!(coordinator.snapshot().display_name.as_deref(), Some("Expired"));
        assert!(!coordinator.snapshot().is_playing);
    }
}

// =============================================================================
// Transport
// =============================================================================

mod transport {
    use super::*;

    #[tokio::test]
    async fn rejected_playback_leaves_player_paused() {
        let fx = Fixture::new();
        fx.element.state().reject_play = true;
        let mut coordinator = fx.coordinator().await;

        let snapshot = coordinator.on_upload("quiet.mp3", b"Q").await.unwrap();

        assert_eq!(snapshot.display_name.as_deref(), Some("quiet.mp3"));
        assert!(!snapshot.is_playing);

        // a later toggle, once allowed, starts it
        fx.element.state().reject_play = false;
        let snapshot = coordinator.on_toggle_pause().await.unwrap();
        assert!(snapshot.is_playing);
    }

    #[tokio::test]
    async fn toggle_pause_without_source_is_a_no_op() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        let snapshot = coordinator.on_toggle_pause().await.unwrap();
        assert!(!snapshot.is_playing);
        assert!(fx.element.state().loaded.is_empty());
    }

    #[tokio::test]
    async fn toggle_after_end_restarts_from_the_top() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        coordinator.on_upload("short.mp3", b"S").await.unwrap();
        {
            let mut s = fx.element.state();
            s.duration = Some(30.0);
            s.position = Some(30.0);
            s.ended = true;
            s.playing = false;
        }
        assert!(!coordinator.is_playing());

        let snapshot = coordinator.on_toggle_pause().await.unwrap();

        assert!(snapshot.is_playing);
        assert_eq!(fx.element.state().seeks, vec![0.0]);
    }

    #[tokio::test]
    async fn scrub_waits_for_duration_then_clamps() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        coordinator.on_upload("long.mp3", b"L").await.unwrap();

        coordinator.on_scrub(0.5).await.unwrap();
        assert!(fx.element.state().seeks.is_empty());

        fx.element.state().duration = Some(200.0);
        coordinator.on_scrub(0.25).await.unwrap();
        coordinator.on_scrub(1.7).await.unwrap();
        coordinator.on_scrub(-0.3).await.unwrap();

        assert_eq!(fx.element.state().seeks, vec![50.0, 200.0, 0.0]);
    }

    #[tokio::test]
    async fn relative_seek_stays_inside_the_track() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        coordinator.on_upload("long.mp3", b"L").await.unwrap();
        {
            let mut s = fx.element.state();
            s.duration = Some(60.0);
            s.position = Some(55.0);
        }

        coordinator.on_seek_relative(10.0).await.unwrap();
        coordinator.on_seek_relative(-100.0).await.unwrap();
        coordinator.on_seek_relative(-10.0).await.unwrap();

        assert_eq!(fx.element.state().seeks, vec![60.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn volume_is_clamped() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;

        let snapshot = coordinator.on_volume_change(1.5).await.unwrap();
        assert_eq!(snapshot.volume, 1.0);
        let snapshot = coordinator.on_volume_change(-0.2).await.unwrap();
        assert_eq!(snapshot.volume, 0.0);
        assert_eq!(fx.element.state().volume, 0.0);
    }
}

// =============================================================================
// Preferences
// =============================================================================

mod preferences {
    use super::*;

    #[tokio::test]
    async fn loop_flag_persists_and_double_toggle_restores() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        assert!(!coordinator.looping());

        coordinator.on_toggle_loop().await.unwrap();
        assert!(coordinator.looping());
        assert!(fx.element.state().looping);
        assert!(fx.settings().loop_enabled());
        assert_eq!(
            fx.settings().get("loopEnabled").as_deref(),
            Some("true")
        );

        coordinator.on_toggle_loop().await.unwrap();
        assert!(!coordinator.looping());
        assert!(!fx.settings().loop_enabled());
    }

    #[tokio::test]
    async fn loop_flag_survives_restart_and_applies_to_new_sources() {
        let fx = Fixture::new();
        {
            let mut coordinator = fx.coordinator().await;
            coordinator.on_toggle_loop().await.unwrap();
        }
        fx.element.state().looping = false;

        let mut coordinator = fx.coordinator().await;
        assert!(coordinator.looping());
        coordinator.on_upload("again.mp3", b"A").await.unwrap();
        assert!(fx.element.state().looping);
    }

    #[tokio::test]
    async fn theme_toggle_persists() {
        let fx = Fixture::new();
        let mut coordinator = fx.coordinator().await;
        assert_eq!(coordinator.theme(), Theme::Dark);

        let snapshot = coordinator.on_toggle_theme();
        assert_eq!(snapshot.theme, Theme::Light);
        assert_eq!(fx.settings().theme(), Theme::Light);

        let coordinator = fx.coordinator().await;
        assert_eq!(coordinator.theme(), Theme::Light);
    }
}

// =============================================================================
// Event loop
// =============================================================================

mod event_loop {
    use super::*;

    struct Harness {
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_rx: mpsc::Receiver<Broadcast>,
        task: tokio::task::JoinHandle<Coordinator<FakeElement>>,
    }

    async fn start(fx: &Fixture, mirror: FakeMirror) -> Harness {
        let coordinator = fx.coordinator().await;
        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(64);
        let core = PlayerCore::new(
            coordinator,
            Arc::new(resolver(mirror)),
            10.0,
            event_tx.clone(),
            broadcast_tx,
        );
        let task = tokio::spawn(core.run(event_rx));
        Harness {
            event_tx,
            broadcast_rx,
            task,
        }
    }

    impl Harness {
        async fn send(&self, cmd: Command) {
            self.event_tx.send(CoreEvent::Command(cmd)).await.unwrap();
        }

        /// Next broadcast that is not a heartbeat.
        async fn next(&mut self) -> Broadcast {
            loop {
                let msg = tokio::time::timeout(Duration::from_secs(5), self.broadcast_rx.recv())
                    .await
                    .expect("broadcast within 5s")
                    .expect("core still running");
                if !matches!(msg, Broadcast::Progress { .. }) {
                    return msg;
                }
            }
        }

        async fn next_state(&mut self) -> PlayerSnapshot {
            match self.next().await {
                Broadcast::State { data } => data,
                other => panic!("expected State, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn bad_link_is_noticed_and_quit_says_bye() {
        let fx = Fixture::new();
        let mut h = start(&fx, FakeMirror::default()).await;

        let initial = h.next_state().await;
        assert_eq!(initial.source_kind, SourceKind::None);

        h.send(Command::Link {
            link: "https://example.com/watch".into(),
        })
        .await;
        assert_eq!(
            h.next().await,
            Broadcast::Notice {
                message: "Invalid YouTube link!".into()
            }
        );

        h.send(Command::Quit).await;
        assert_eq!(h.next().await, Broadcast::Bye);

        h.task.await.unwrap();
        assert!(fx.element.state().shut_down);
    }

    #[tokio::test]
    async fn dropping_every_sender_ends_the_loop() {
        let fx = Fixture::new();
        let Harness {
            event_tx,
            mut broadcast_rx,
            task,
        } = start(&fx, FakeMirror::default()).await;
        assert!(matches!(
            broadcast_rx.recv().await,
            Some(Broadcast::State { .. })
        ));

        drop(event_tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop ends without a quit")
            .unwrap();
        let mut rest = Vec::new();
        while let Ok(msg) = broadcast_rx.try_recv() {
            rest.push(msg);
        }
        assert_eq!(rest.last(), Some(&Broadcast::Bye));
        assert!(fx.element.state().shut_down);
    }

    #[tokio::test]
    async fn upload_command_reads_file_and_plays_it() {
        let fx = Fixture::new();
        let file = fx.dir.path().join("picked.flac");
        std::fs::write(&file, b"fLaC").unwrap();
        let mut h = start(&fx, FakeMirror::default()).await;
        h.next_state().await;

        h.send(Command::Upload {
            path: file.to_string_lossy().into_owned(),
        })
        .await;
        let state = h.next_state().await;

        assert_eq!(state.display_name.as_deref(), Some("picked.flac"));
        assert!(state.is_playing);
        h.send(Command::Quit).await;
        let coordinator = h.task.await.unwrap();
        let library = coordinator.library().unwrap();
        assert_eq!(library.get("picked.flac").await.unwrap().unwrap().data, b"fLaC");
    }

    #[tokio::test]
    async fn unresolvable_link_leaves_playing_track_alone() {
        let fx = Fixture::new();
        {
            let mut coordinator = fx.coordinator().await;
            coordinator.on_upload("resume.mp3", b"R").await.unwrap();
        }
        let mut h = start(&fx, FakeMirror::default()).await;
        let initial = h.next_state().await;
        assert_eq!(initial.display_name.as_deref(), Some("resume.mp3"));

        h.send(Command::Link {
            link: "https://youtu.be/bbbbbbbbbbb".into(),
        })
        .await;
        assert_eq!(
            h.next().await,
            Broadcast::Notice {
                message: "Failed to load YouTube audio.".into()
            }
        );

        h.send(Command::State).await;
        let state = h.next_state().await;
        assert_eq!(state.display_name.as_deref(), Some("resume.mp3"));
        assert_eq!(state.source_kind, SourceKind::Local);

        h.send(Command::Quit).await;
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn last_completed_resolution_wins() {
        let fx = Fixture::new();
        let mirror = FakeMirror::default()
            .answering("slowslowslo", "https://cdn.test/slow", "Slow", Duration::from_millis(400))
            .answering("fastfastfas", "https://cdn.test/fast", "Fast", Duration::ZERO);
        let mut h = start(&fx, mirror).await;
        h.next_state().await;

        h.send(Command::Link {
            link: "https://youtu.be/slowslowslo".into(),
        })
        .await;
        h.send(Command::Link {
            link: "https://youtu.be/fastfastfas".into(),
        })
        .await;

        let first = h.next_state().await;
        let second = h.next_state().await;
        assert_eq!(first.display_name.as_deref(), Some("Fast"));
        assert_eq!(second.display_name.as_deref(), Some("Slow"));
        assert_eq!(last_loaded(&fx.element), "https://cdn.test/slow");

        h.send(Command::Quit).await;
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn unplayable_stream_is_noticed_by_the_heartbeat() {
        let fx = Fixture::new();
        let mirror = FakeMirror::default().answering(
            "dQw4w9WgXcQ",
            "https://cdn.test/403",
            "Forbidden",
            Duration::ZERO,
        );
        let mut h = start(&fx, mirror).await;
        h.next_state().await;

        h.send(Command::Link {
            link: "https://youtu.be/dQw4w9WgXcQ".into(),
        })
        .await;
        assert!(h.next_state().await.is_playing);

        fx.element.state().failed = true;

        match h.next().await {
            Broadcast::Notice { message } => assert!(message.contains("Forbidden")),
            other => panic!("expected Notice, got {:?}", other),
        }
        let state = h.next_state().await;
        assert!(!state.is_playing);
        assert_eq!(state.display_name.as_deref(), Some("Forbidden"));

        h.send(Command::Quit).await;
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn forward_and_back_use_the_configured_step() {
        let fx = Fixture::new();
        let file = fx.dir.path().join("song.mp3");
        std::fs::write(&file, b"ID3").unwrap();
        let mut h = start(&fx, FakeMirror::default()).await;
        h.next_state().await;

        h.send(Command::Upload {
            path: file.to_string_lossy().into_owned(),
        })
        .await;
        h.next_state().await;
        {
            let mut s = fx.element.state();
            s.duration = Some(100.0);
            s.position = Some(50.0);
        }

        h.send(Command::Forward).await;
        h.next_state().await;
        h.send(Command::Back).await;
        h.next_state().await;
        h.send(Command::Back).await;
        h.next_state().await;

        assert_eq!(fx.element.state().seeks, vec![60.0, 50.0, 40.0]);
        h.send(Command::Quit).await;
        h.task.await.unwrap();
    }
}
