use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use tracing::{debug, warn};

use crate::recording::Track;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("recordings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed recording {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What the recordings list shows for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub name: String,
    pub recorded_at: u64,
    pub duration_ms: u64,
    pub path: PathBuf,
}

impl RecordingSummary {
    /// Local date and time the take was made, e.g. `2024-03-09 18:05`.
    pub fn recorded_on(&self) -> String {
        format_date(self.recorded_at, &Local)
    }
}

fn format_date<Tz: TimeZone>(unix_ms: u64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match DateTime::from_timestamp_millis(unix_ms as i64) {
        Some(utc) => utc.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string(),
        None => "unknown date".to_string(),
    }
}

/// A directory of recorded tracks stored as JSON.
#[derive(Debug, Clone)]
pub struct RecordingLibrary {
    dir: PathBuf,
}

impl RecordingLibrary {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| LibraryError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, track: &Track) -> Result<PathBuf, LibraryError> {
        let path = self
            .dir
            .join(format!("{}-{}.json", slug(&track.name), track.recorded_at));
        let json = serde_json::to_string_pretty(track).map_err(|source| LibraryError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| LibraryError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Saved recording to {}", path.display());
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Track, LibraryError> {
        let text = fs::read_to_string(path).map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| LibraryError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every readable recording, newest first.
    pub fn list(&self) -> Result<Vec<RecordingSummary>, LibraryError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| LibraryError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(track) => summaries.push(RecordingSummary {
                    name: track.name,
                    recorded_at: track.recorded_at,
                    duration_ms: track.duration_ms,
                    path,
                }),
                Err(e) => warn!("Skipping recording: {}", e),
            }
        }
        summaries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then_with(|| a.name.cmp(&b.name)));
        Ok(summaries)
    }
}

fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "recording".to_string()
    } else {
        slug.to_string()
    }
}
