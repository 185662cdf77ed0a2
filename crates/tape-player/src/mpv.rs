/// mpv-backed playback element.
///
/// Architecture:
///
/// ```text
///   MpvElement ── lazily ──► MpvDriver::spawn_and_connect()
///                                 │
///                                 ├── writer_task  ← MpvRequest via mpsc → socket
///                                 └── reader_task  ← JSON lines from socket
///                                        ├── reply (has request_id) → oneshot
///                                        └── event / property-change → observer_task
///                                                                        │
///                                              Arc<Mutex<Observed>>  ◄───┘
/// ```
///
/// The observer keeps the latest `time-pos`, `duration` and end-of-file state
/// so `timeline()` can answer without an IPC round trip.
///
/// Platform notes:
/// - Unix:    Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::element::{PlaybackElement, Timeline};
use crate::error::{PlayerError, Result};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_TIME_POS: u64 = 1;
pub const OBS_DURATION: u64 = 2;
pub const OBS_EOF_REACHED: u64 = 3;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// Latest values pushed by mpv.
#[derive(Debug, Default, Clone, PartialEq)]
struct Observed {
    time_pos: Option<f64>,
    duration: Option<f64>,
    ended: bool,
    /// mpv gave up on the current file (bad URL, undecodable data).
    failed: bool,
}

impl Observed {
    fn apply(&mut self, evt: &MpvEvent) {
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_TIME_POS => self.time_pos = data.as_f64(),
                OBS_DURATION => self.duration = data.as_f64(),
                OBS_EOF_REACHED => self.ended = data.as_bool().unwrap_or(false),
                _ => {}
            }
            return;
        }
        match evt.event_name() {
            Some("start-file") => {
                *self = Observed::default();
            }
            Some("end-file") => match evt.raw.get("reason").and_then(|r| r.as_str()) {
                Some("eof") => self.ended = true,
                Some("error") => {
                    warn!(
                        "mpv: file failed: {}",
                        evt.raw
                            .get("file_error")
                            .and_then(|e| e.as_str())
                            .unwrap_or("unknown error")
                    );
                    self.failed = true;
                }
                _ => {}
            },
            _ => {}
        }
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_file(&self, source: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", source, "replace"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_loop_file(&self, looping: bool) -> anyhow::Result<()> {
        let value = if looping { "inf" } else { "no" };
        self.send(json!(["set_property", "loop-file", value])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        let vol_pct = (vol * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol_pct])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Register observe_property for the timeline properties.
    /// Must be called after every fresh connection.
    pub async fn observe_timeline(&self) {
        let props = [
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
            (OBS_EOF_REACHED, "eof-reached"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and its IPC connection.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            socket_name: tape_proto::platform::mpv_socket_name(),
            process: None,
            last_volume: initial_volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = tape_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        info!("mpv: spawning {}", mpv_binary.display());
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--keep-open=no")
            .arg(tape_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        self.spawn_process()?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else if event_tx.send(MpvEvent { raw: val }).await.is_err() {
                    debug!("mpv reader: event receiver gone");
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── element ───────────────────────────────────────────────────────────────────

/// `PlaybackElement` backed by a headless mpv process, spawned on first use
/// and respawned if it dies.
pub struct MpvElement {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    observed: Arc<std::sync::Mutex<Observed>>,
    observer: Option<tokio::task::JoinHandle<()>>,
    looping: bool,
    paused: bool,
}

impl MpvElement {
    pub fn new(initial_volume: f32) -> Self {
        Self {
            driver: MpvDriver::new(initial_volume),
            handle: None,
            observed: Arc::new(std::sync::Mutex::new(Observed::default())),
            observer: None,
            looping: false,
            paused: true,
        }
    }

    /// The live IPC handle, spawning mpv if it is absent or has died.
    async fn handle(&mut self) -> Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if self.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: process died, respawning");
            self.handle = None;
        }

        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(256);
        let handle = self
            .driver
            .spawn_and_connect(event_tx)
            .await
            .map_err(|e| PlayerError::Playback(e.to_string()))?;
        handle.observe_timeline().await;
        // re-apply state that lived in the previous process
        let _ = handle.set_loop_file(self.looping).await;

        if let Some(old) = self.observer.take() {
            old.abort();
        }
        let observed = Arc::clone(&self.observed);
        self.observer = Some(tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                debug!("mpv event: {}", evt.raw);
                observed
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .apply(&evt);
            }
        }));

        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

/// Pause, then replace the file.  If mpv refuses the new file, the previous
/// pause state and timeline are put back so the old track carries on.
async fn load_replacing(
    handle: &MpvHandle,
    observed: &std::sync::Mutex<Observed>,
    source: &str,
    was_paused: bool,
) -> anyhow::Result<()> {
    handle.set_pause(true).await?;
    let previous = std::mem::take(&mut *observed.lock().unwrap_or_else(|p| p.into_inner()));

    if let Err(e) = handle.load_file(source).await {
        *observed.lock().unwrap_or_else(|p| p.into_inner()) = previous;
        if !was_paused {
            if let Err(resume) = handle.set_pause(false).await {
                warn!("mpv: could not resume previous file: {}", resume);
            }
        }
        return Err(e);
    }
    Ok(())
}

fn playback_err(e: anyhow::Error) -> PlayerError {
    PlayerError::Playback(e.to_string())
}

#[async_trait]
impl PlaybackElement for MpvElement {
    async fn load(&mut self, source: &str) -> Result<()> {
        let handle = self.handle().await?;
        // stay paused until play() so a rejected start leaves us paused
        load_replacing(&handle, &self.observed, source, self.paused)
            .await
            .map_err(playback_err)?;
        self.paused = true;
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let handle = self.handle().await?;
        handle
            .set_pause(false)
            .await
            .map_err(|e| PlayerError::PlaybackRejected(e.to_string()))?;
        self.paused = false;
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        let handle = self.handle().await?;
        handle.set_pause(true).await.map_err(playback_err)?;
        self.paused = true;
        Ok(())
    }

    async fn set_looping(&mut self, looping: bool) -> Result<()> {
        self.looping = looping;
        let handle = self.handle().await?;
        handle.set_loop_file(looping).await.map_err(playback_err)
    }

    async fn seek_to(&mut self, secs: f64) -> Result<()> {
        let handle = self.handle().await?;
        handle.seek_to(secs).await.map_err(playback_err)
    }

    async fn set_volume(&mut self, level: f32) -> Result<()> {
        self.driver.last_volume = level;
        let handle = self.handle().await?;
        handle.set_volume(level).await.map_err(playback_err)
    }

    fn timeline(&self) -> Timeline {
        let observed = self.observed.lock().unwrap_or_else(|p| p.into_inner());
        Timeline {
            position_secs: observed.time_pos,
            duration_secs: observed.duration,
            ended: observed.ended,
            failed: observed.failed,
        }
    }

    async fn shutdown(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
        self.handle = None;
        self.driver.kill().await;
    }
}
