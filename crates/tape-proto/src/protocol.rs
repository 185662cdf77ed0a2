use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chrome theme.  Only persisted and reported; colours belong to the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl FromStr for Theme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(()),
        }
    }
}

/// Where the active source came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    None,
    Local,
    Remote,
}

/// Everything a UI needs to render the player without reaching into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlayerSnapshot {
    pub display_name: Option<String>,
    pub artwork: Option<String>,
    pub source_kind: SourceKind,
    pub is_playing: bool,
    pub position_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    pub volume: f32,
    pub looping: bool,
    pub theme: Theme,
}

impl PlayerSnapshot {
    /// Playback progress in 0.0..=1.0, when the duration is known.
    pub fn progress(&self) -> Option<f64> {
        match (self.position_secs, self.duration_secs) {
            (Some(pos), Some(dur)) if dur > 0.0 => Some((pos / dur).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

/// Commands read from the console, one per line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Upload { path: String },
    Link { link: String },
    Scrub { fraction: f64 },
    Volume { level: f32 },
    SeekRelative { seconds: f64 },
    Forward,
    Back,
    TogglePause,
    ToggleLoop,
    ToggleTheme,
    State,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid number for {0}: {1}")]
    InvalidNumber(&'static str, String),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };

        let arg = |name: &'static str| {
            if rest.is_empty() {
                Err(ParseCommandError::MissingArgument(name))
            } else {
                Ok(rest.to_string())
            }
        };
        let number = |name: &'static str| -> Result<f64, ParseCommandError> {
            let raw = arg(name)?;
            raw.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or(ParseCommandError::InvalidNumber(name, raw))
        };

        match word {
            "" => Err(ParseCommandError::Empty),
            "upload" => Ok(Command::Upload { path: arg("upload")? }),
            // the link itself may be blank; the player reports that to the user
            "link" => Ok(Command::Link {
                link: rest.to_string(),
            }),
            "scrub" => Ok(Command::Scrub {
                fraction: number("scrub")?,
            }),
            "volume" => Ok(Command::Volume {
                level: number("volume")? as f32,
            }),
            "seek" => Ok(Command::SeekRelative {
                seconds: number("seek")?,
            }),
            "forward" => Ok(Command::Forward),
            "back" => Ok(Command::Back),
            "pause" | "play" => Ok(Command::TogglePause),
            "loop" => Ok(Command::ToggleLoop),
            "theme" => Ok(Command::ToggleTheme),
            "state" => Ok(Command::State),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// Messages written to the console, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    State {
        data: PlayerSnapshot,
    },
    /// Sent once a second while playing.
    Progress {
        position_secs: f64,
        duration_secs: Option<f64>,
        fraction: Option<f64>,
    },
    /// A user-visible failure.  Playback state is unchanged.
    Notice {
        message: String,
    },
    Bye,
}

impl Broadcast {
    pub fn encode_line(&self) -> anyhow::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
