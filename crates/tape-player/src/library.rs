//! Local library store: durable, name-keyed audio buffers.
//!
//! ## Layout
//!
//! ```text
//!   <root>/schema.json              {"version":1,"created_at":"..."}
//!   <root>/tracks/<hex(name)>.track
//! ```
//!
//! A `.track` file is `u32 BE name length | name bytes | audio bytes`.  The
//! name is kept inside the file so a lookup can confirm it hit the right
//! record even when a long name had to be shortened for the file system.
//!
//! Every `put` writes a uniquely named temp file and renames it over the
//! record, so puts racing on the same name never leave a torn record behind:
//! one of them wins whole.  The last-played pointer lives in the shared
//! settings area, not here.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tape_proto::settings::SettingsStore;
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};

pub const SCHEMA_VERSION: u32 = 1;

const TRACKS_DIR: &str = "tracks";
const SCHEMA_FILE: &str = "schema.json";
const TRACK_EXT: &str = "track";
/// Longest file stem we emit; longer hex names are shortened and hashed.
const MAX_STEM: usize = 180;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// One stored track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaMarker {
    version: u32,
    created_at: DateTime<Local>,
}

/// Handle to an opened library.  Cloning shares the same directory.
#[derive(Debug, Clone)]
pub struct LocalLibrary {
    root: PathBuf,
    tracks_dir: PathBuf,
    settings: SettingsStore,
}

impl LocalLibrary {
    /// Open (and on first use initialise) the library under `root`.
    ///
    /// Fails with `StoreUnavailable` when the directory cannot be created or
    /// written; callers fall back to playing without remembering tracks.
    pub async fn open(root: impl Into<PathBuf>, settings: SettingsStore) -> Result<Self> {
        let root = root.into();
        let unavailable =
            |e: std::io::Error| PlayerError::StoreUnavailable(format!("{}: {}", root.display(), e));

        tokio::fs::create_dir_all(&root).await.map_err(unavailable)?;
        let tracks_dir = root.join(TRACKS_DIR);
        let marker_path = root.join(SCHEMA_FILE);

        if tokio::fs::try_exists(&marker_path).await.map_err(unavailable)? {
            match read_marker(&marker_path).await {
                Some(marker) if marker.version == SCHEMA_VERSION => {
                    debug!("library: schema v{} at {}", marker.version, root.display());
                }
                Some(marker) => warn!(
                    "library: unexpected schema v{} at {} (expected v{})",
                    marker.version,
                    root.display(),
                    SCHEMA_VERSION
                ),
                None => warn!("library: unreadable schema marker at {}", marker_path.display()),
            }
            tokio::fs::create_dir_all(&tracks_dir)
                .await
                .map_err(unavailable)?;
        } else {
            tokio::fs::create_dir_all(&tracks_dir)
                .await
                .map_err(unavailable)?;
            let marker = SchemaMarker {
                version: SCHEMA_VERSION,
                created_at: Local::now(),
            };
            let json = serde_json::to_vec_pretty(&marker)
                .map_err(|e| PlayerError::StoreUnavailable(e.to_string()))?;
            tokio::fs::write(&marker_path, json)
                .await
                .map_err(unavailable)?;
            info!("library: initialised schema v{} at {}", SCHEMA_VERSION, root.display());
        }

        check_writable(&tracks_dir).await.map_err(unavailable)?;

        Ok(Self {
            root,
            tracks_dir,
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Upsert `data` under `name` (last write wins) and point the
    /// last-played pointer at it.
    pub async fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(PlayerError::StoreWriteFailed("empty track name".into()));
        }

        let path = self.record_path(name);
        let txn = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .tracks_dir
            .join(format!(".{}.{}.tmp", std::process::id(), txn));

        let write = async {
            tokio::fs::write(&tmp, encode_record(name, data)).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(PlayerError::StoreWriteFailed(format!("{}: {}", name, e)));
        }
        debug!("library: stored {:?} ({} bytes)", name, data.len());

        self.settings
            .set_last_song(name)
            .map_err(|e| PlayerError::StoreWriteFailed(format!("last played pointer: {}", e)))
    }

    /// Fetch the record stored under `name`, if any.
    pub async fn get(&self, name: &str) -> Result<Option<TrackRecord>> {
        let bytes = match tokio::fs::read(self.record_path(name)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match decode_record(bytes) {
            Some(record) if record.name == name => Ok(Some(record)),
            Some(record) => {
                debug!(
                    "library: {:?} maps to a file holding {:?}; treating as missing",
                    name, record.name
                );
                Ok(None)
            }
            None => Err(PlayerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("corrupt track record for {:?}", name),
            ))),
        }
    }

    /// Name of the most recently stored local track.
    pub fn last_played(&self) -> Option<String> {
        self.settings.last_song()
    }

    /// Startup lookup: the record the last-played pointer names, if it is
    /// still present.  A dangling pointer or unreadable record is not an
    /// error; there is simply nothing to resume.
    pub async fn resume(&self) -> Option<TrackRecord> {
        let name = self.last_played()?;
        match self.get(&name).await {
            Ok(Some(record)) => {
                info!("library: resuming {:?}", name);
                Some(record)
            }
            Ok(None) => {
                info!("library: last played {:?} is no longer stored", name);
                None
            }
            Err(e) => {
                warn!("library: could not read {:?} for resume: {}", name, e);
                None
            }
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.tracks_dir
            .join(format!("{}.{}", record_stem(name), TRACK_EXT))
    }
}

/// An existing library may still refuse writes (read-only mount, foreign
/// owner); find out at open rather than on the first `put`.
async fn check_writable(dir: &Path) -> std::io::Result<()> {
    let txn = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
    let scratch = dir.join(format!(".{}.{}.check", std::process::id(), txn));
    tokio::fs::write(&scratch, b"").await?;
    tokio::fs::remove_file(&scratch).await
}

async fn read_marker(path: &Path) -> Option<SchemaMarker> {
    let content = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&content).ok()
}

/// Lowercase hex of the name, shortened with a stable hash when too long.
fn record_stem(name: &str) -> String {
    let hex: String = name.bytes().map(|b| format!("{:02x}", b)).collect();
    if hex.len() <= MAX_STEM {
        return hex;
    }
    format!("{}-{:016x}", &hex[..MAX_STEM - 17], fnv1a(name.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn encode_record(name: &str, data: &[u8]) -> Vec<u8> {
    let name = name.as_bytes();
    let mut out = Vec::with_capacity(4 + name.len() + data.len());
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(data);
    out
}

fn decode_record(mut bytes: Vec<u8>) -> Option<TrackRecord> {
    if bytes.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if bytes.len() < 4 + len {
        return None;
    }
    let name = String::from_utf8(bytes[4..4 + len].to_vec()).ok()?;
    let data = bytes.split_off(4 + len);
    Some(TrackRecord { name, data })
}
