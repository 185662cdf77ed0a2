//! Flat string key-value settings area, persisted as one JSON object.
//!
//! Reads are served from memory; every write rewrites the file before
//! returning, so the surface behaves synchronously for callers.  Values are
//! plain strings; booleans are stored JSON-encoded (`"true"` / `"false"`).

use crate::protocol::Theme;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const KEY_LAST_SONG: &str = "lastSong";
pub const KEY_LOOP_ENABLED: &str = "loopEnabled";
pub const KEY_THEME: &str = "theme";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cheaply cloneable handle; all clones share one map and one file.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    path: PathBuf,
}

impl SettingsStore {
    /// Load settings from `path`.  A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load_entries(&path);
        debug!("settings: {} entries from {}", entries.len(), path.display());
        Self {
            entries: Arc::new(Mutex::new(entries)),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), SettingsError> {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value.into());
        self.persist(&entries)
    }

    pub fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    // ── typed accessors ───────────────────────────────────────────────────────

    pub fn last_song(&self) -> Option<String> {
        self.get(KEY_LAST_SONG).filter(|s| !s.is_empty())
    }

    pub fn set_last_song(&self, name: &str) -> Result<(), SettingsError> {
        self.set(KEY_LAST_SONG, name)
    }

    pub fn loop_enabled(&self) -> bool {
        self.get(KEY_LOOP_ENABLED)
            .and_then(|raw| serde_json::from_str::<bool>(&raw).ok())
            .unwrap_or(false)
    }

    pub fn set_loop_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.set(KEY_LOOP_ENABLED, serde_json::to_string(&enabled)?)
    }

    pub fn theme(&self) -> Theme {
        self.get(KEY_THEME)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), SettingsError> {
        self.set(KEY_THEME, theme.as_str())
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load_entries(path: &Path) -> BTreeMap<String, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("settings: ignoring unreadable {}: {}", path.display(), e);
                BTreeMap::new()
            }
        }
    }
}
