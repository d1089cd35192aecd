// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role configuration files.
//!
//! Each role reads a plain ASCII file with one value per line, in a fixed
//! order. Lines are scrubbed of trailing carriage returns and control
//! characters. Ports are host byte order everywhere in the API; conversion
//! happens only inside the socket layer.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::media::MediaKind;

/// Errors from loading a role configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("missing value for '{0}'")]
    MissingField(&'static str),

    #[error("invalid port for '{field}': '{value}'")]
    InvalidPort { field: &'static str, value: String },

    #[error("invalid media kind for '{field}': '{value}'")]
    InvalidKind { field: &'static str, value: String },

    #[error("'{field}' must not contain '&'")]
    ReservedSeparator { field: &'static str },
}

/// Client configuration: identity plus the coordinator endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user: String,
    pub user_dir: PathBuf,
    pub coord_ip: String,
    pub coord_port: u16,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut lines = Lines::open(path)?;
        let user = lines.value("user")?;
        if user.contains('&') {
            return Err(ConfigError::ReservedSeparator { field: "user" });
        }
        Ok(Self {
            user,
            user_dir: PathBuf::from(lines.value("user_dir")?),
            coord_ip: lines.value("coord_ip")?,
            coord_port: lines.port("coord_port")?,
        })
    }
}

/// Coordinator configuration: the two listening endpoints.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub client_ip: String,
    pub client_port: u16,
    pub worker_ip: String,
    pub worker_port: u16,
}

impl CoordinatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut lines = Lines::open(path)?;
        Ok(Self {
            client_ip: lines.value("client_ip")?,
            client_port: lines.port("client_port")?,
            worker_ip: lines.value("worker_ip")?,
            worker_port: lines.port("worker_port")?,
        })
    }
}

/// Worker configuration: upstream coordinator endpoint, the endpoint this
/// worker serves clients on once principal, its working directory, and the
/// media kind it handles.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coord_ip: String,
    pub coord_port: u16,
    pub serve_ip: String,
    pub serve_port: u16,
    pub worker_dir: PathBuf,
    pub kind: MediaKind,
}

impl WorkerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut lines = Lines::open(path)?;
        Ok(Self {
            coord_ip: lines.value("coord_ip")?,
            coord_port: lines.port("coord_port")?,
            serve_ip: lines.value("serve_ip")?,
            serve_port: lines.port("serve_port")?,
            worker_dir: PathBuf::from(lines.value("worker_dir")?),
            kind: lines.kind("kind")?,
        })
    }
}

/// Sequential reader over the cleaned lines of a config file.
struct Lines {
    values: std::vec::IntoIter<String>,
}

impl Lines {
    fn open(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let values: Vec<String> = raw.lines().map(clean).collect();
        Ok(Self { values: values.into_iter() })
    }

    fn value(&mut self, field: &'static str) -> Result<String, ConfigError> {
        match self.values.next() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ConfigError::MissingField(field)),
        }
    }

    fn port(&mut self, field: &'static str) -> Result<u16, ConfigError> {
        let value = self.value(field)?;
        value.parse().map_err(|_| ConfigError::InvalidPort { field, value })
    }

    fn kind(&mut self, field: &'static str) -> Result<MediaKind, ConfigError> {
        let value = self.value(field)?;
        MediaKind::from_str(&value).map_err(|_| ConfigError::InvalidKind { field, value })
    }
}

/// Strip control characters; config files written on other platforms carry
/// stray `\r` and the like.
fn clean(line: &str) -> String {
    line.chars().filter(|c| !c.is_control()).collect::<String>().trim().to_string()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
