use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Where the library, settings and log live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for `library/`, `settings.json` and `tape.log`.
    /// Defaults to `~/.local/share/tape`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Mirror list and lookup behaviour for remote links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Mirror base URLs, tried strictly in this order.
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<String>,
    /// Upper bound on a single mirror lookup before moving on.
    #[serde(default = "default_mirror_timeout_secs")]
    pub mirror_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Display name used when a mirror omits the title.
    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,
    /// Artwork reference used when a mirror omits the thumbnail.
    #[serde(default = "default_fallback_artwork")]
    pub fallback_artwork: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Step used by the console `forward` / `back` commands.
    #[serde(default = "default_seek_step_secs")]
    pub seek_step_secs: f64,
    /// Artwork reference shown for locally uploaded tracks.
    #[serde(default = "default_local_artwork")]
    pub local_artwork: String,
    #[serde(default)]
    pub use_system_deps: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mirrors: default_mirrors(),
            mirror_timeout_secs: default_mirror_timeout_secs(),
            user_agent: default_user_agent(),
            fallback_title: default_fallback_title(),
            fallback_artwork: default_fallback_artwork(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            seek_step_secs: default_seek_step_secs(),
            local_artwork: default_local_artwork(),
            use_system_deps: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    platform::data_dir()
}

fn default_mirrors() -> Vec<String> {
    [
        "https://pipedapi.in.projectsegfau.lt",
        "https://pipedapi.kavin.rocks",
        "https://pipedapi.moomoo.me",
        "https://pipedapi.palveluntarjoaja.eu",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_mirror_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("tape/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fallback_title() -> String {
    "YouTube Audio".to_string()
}

fn default_fallback_artwork() -> String {
    "yt.jpg".to_string()
}

fn default_volume() -> f32 {
    0.8
}

fn default_seek_step_secs() -> f64 {
    10.0
}

fn default_local_artwork() -> String {
    "album.jpg".to_string()
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.paths.data_dir.join("library")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.paths.data_dir.join("settings.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.paths.data_dir.join("tape.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.resolver.mirrors.len(), 4);
        assert!(config.resolver.mirrors[0].contains("projectsegfau"));
        assert_eq!(config.resolver.mirror_timeout_secs, 5);
        assert_eq!(config.resolver.fallback_title, "YouTube Audio");
        assert_eq!(config.resolver.fallback_artwork, "yt.jpg");
        assert_eq!(config.playback.default_volume, 0.8);
        assert_eq!(config.playback.seek_step_secs, 10.0);
        assert_eq!(config.playback.local_artwork, "album.jpg");
        assert!(config.paths.data_dir.ends_with("tape"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [resolver]
            mirrors = ["http://localhost:1"]
            "#,
        )
        .unwrap();
        assert_eq!(config.resolver.mirrors, vec!["http://localhost:1"]);
        assert_eq!(config.resolver.mirror_timeout_secs, 5);
        assert_eq!(config.playback.default_volume, 0.8);
    }

    #[test]
    fn test_load_writes_default_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.resolver.mirrors.len(), 4);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.resolver.mirrors, config.resolver.mirrors);
    }

    #[test]
    fn test_derived_paths() {
        let mut config = Config::default();
        config.paths.data_dir = PathBuf::from("/srv/tape");
        assert_eq!(config.library_dir(), PathBuf::from("/srv/tape/library"));
        assert_eq!(config.settings_path(), PathBuf::from("/srv/tape/settings.json"));
        assert_eq!(config.log_path(), PathBuf::from("/srv/tape/tape.log"));
    }
}
