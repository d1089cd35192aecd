// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media classification by file extension.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extensions served by media workers.
pub const MEDIA_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "wav", "mp3"];

/// Extensions served by text workers.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "log", "csv"];

/// The media class of a file, which selects the worker fleet that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Text,
    Media,
}

/// Error for an unrecognised media kind spelling on the wire or in config.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown media kind '{0}'")]
pub struct UnknownKind(pub String);

impl MediaKind {
    /// Classify a file by its extension; `None` for unknown extensions.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Media)
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Text)
        } else {
            None
        }
    }

    /// The wire spelling of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Text => "Text",
            MediaKind::Media => "Media",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Text" => Ok(MediaKind::Text),
            "Media" => Ok(MediaKind::Media),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Finer split of [`MediaKind::Media`] used to pick the distortion routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSubkind {
    Audio,
    Image,
}

impl MediaSubkind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "wav" | "mp3" => Some(MediaSubkind::Audio),
            "png" | "jpg" | "jpeg" => Some(MediaSubkind::Image),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
