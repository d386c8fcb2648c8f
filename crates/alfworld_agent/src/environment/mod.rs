//! Text-game environment collaborator.
//!
//! The adapter only sees the environment as a turn-based oracle: `reset`
//! starts an episode, `step` submits one command and returns the textual
//! response plus the commands that are legal next.

mod http;
mod scripted;

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::transport::TransportError;

pub use http::HttpEnvironment;
pub use scripted::{
    load_episode_script, EpisodeScript, ScriptedEnvironment, ScriptedState, ScriptedTransition,
    DEFAULT_NO_OP_OBSERVATION,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub observation: String,
    #[serde(default)]
    pub admissible_commands: Vec<String>,
    /// Game file backing the episode; drives example prompt selection.
    #[serde(default)]
    pub game_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub won: bool,
    #[serde(default)]
    pub admissible_commands: Vec<String>,
}

pub trait TextEnvironment {
    fn reset(&mut self) -> Result<ResetOutcome, EnvError>;

    fn step(&mut self, action: &str) -> Result<StepOutcome, EnvError>;
}

impl<E: TextEnvironment + ?Sized> TextEnvironment for Box<E> {
    fn reset(&mut self) -> Result<ResetOutcome, EnvError> {
        (**self).reset()
    }

    fn step(&mut self, action: &str) -> Result<StepOutcome, EnvError> {
        (**self).step(action)
    }
}

#[derive(Debug)]
pub enum EnvError {
    Io { path: PathBuf, source: std::io::Error },
    UnsupportedFormat { path: PathBuf },
    Parse { path: PathBuf, message: String },
    InvalidScript { message: String },
    NotStarted,
    BuildClient { message: String },
    Http { message: String },
    HttpStatus { code: u16, message: String },
    DecodeResponse { message: String },
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            EnvError::UnsupportedFormat { path } => {
                write!(f, "unsupported episode script format: {}", path.display())
            }
            EnvError::Parse { path, message } => {
                write!(f, "failed to parse {}: {}", path.display(), message)
            }
            EnvError::InvalidScript { message } => write!(f, "invalid episode script: {message}"),
            EnvError::NotStarted => write!(f, "environment stepped before reset"),
            EnvError::BuildClient { message } => write!(f, "client build failed: {message}"),
            EnvError::Http { message } => write!(f, "http request failed: {message}"),
            EnvError::HttpStatus { code, message } => write!(f, "http status {code}: {message}"),
            EnvError::DecodeResponse { message } => {
                write!(f, "decode response failed: {message}")
            }
        }
    }
}

impl From<TransportError> for EnvError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::BuildClient { message } => EnvError::BuildClient { message },
            TransportError::Http { message } => EnvError::Http { message },
            TransportError::HttpStatus { code, message } => EnvError::HttpStatus { code, message },
            TransportError::DecodeResponse { message } => EnvError::DecodeResponse { message },
        }
    }
}

impl Error for EnvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EnvError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Lists episode scripts (`.yaml`, `.yml`, `.json`) in `dir`, sorted by path.
pub fn discover_episode_scripts(dir: &Path) -> Result<Vec<PathBuf>, EnvError> {
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(dir).map_err(|err| EnvError::Io {
        path: dir.to_path_buf(),
        source: err,
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|err| EnvError::Io {
            path: dir.to_path_buf(),
            source: err,
        })?;
        let path = entry.path();
        if path.is_file() && is_supported_format(&path) {
            entries.push(path);
        }
    }

    entries.sort();
    Ok(entries)
}

pub(crate) fn is_supported_format(path: &Path) -> bool {
    matches!(
        extension_of(path).as_deref(),
        Some("yaml") | Some("yml") | Some("json")
    )
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}
