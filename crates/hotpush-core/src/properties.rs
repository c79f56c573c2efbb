//! Line-oriented `key=value` config store.
//!
//! The host keeps its runtime configuration in a flat properties file.
//! Edits here must be surgical: comments, blank lines, unknown keys and
//! ordering all survive a load/save round trip, so operator tooling and
//! hand edits are never clobbered.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// One physical line of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Comment, blank line, or anything without a `=` separator.
    Raw(String),
    /// A `key=value` assignment.
    Pair { key: String, value: String },
}

/// In-memory view of a properties file.
///
/// Loads the whole file, applies targeted `set` calls, and writes it
/// back only when something actually changed.
#[derive(Debug)]
pub struct PropertiesFile {
    path: PathBuf,
    lines: Vec<Line>,
    dirty: bool,
}

impl PropertiesFile {
    /// Load the store at `path`. A missing file is treated as empty, so
    /// the first save creates it.
    pub fn load(path: &Path) -> Result<Self> {
        let lines = match fs::read_to_string(path) {
            Ok(contents) => contents.lines().map(parse_line).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::Config {
                    message: format!("failed to read {}: {}", path.display(), e),
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            dirty: false,
        })
    }

    /// Current value for `key`, if assigned.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Assign `value` to `key`, appending the key if absent.
    ///
    /// Returns true when the stored value changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        for line in self.lines.iter_mut().rev() {
            if let Line::Pair { key: k, value: v } = line {
                if k == key {
                    if v == value {
                        return false;
                    }
                    debug!(key, old = %v, new = %value, "Updating config entry");
                    *v = value.to_string();
                    self.dirty = true;
                    return true;
                }
            }
        }

        debug!(key, value, "Appending config entry");
        self.lines.push(Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
        });
        self.dirty = true;
        true
    }

    /// True when a `set` changed something since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the store back to its path if anything changed.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Raw(raw) => out.push_str(raw),
                Line::Pair { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
            }
            out.push('\n');
        }

        fs::write(&self.path, out).map_err(|e| Error::Config {
            message: format!("failed to write {}: {}", self.path.display(), e),
        })?;
        self.dirty = false;
        Ok(())
    }
}

fn parse_line(raw: &str) -> Line {
    if raw.starts_with('#') || raw.starts_with('!') {
        return Line::Raw(raw.to_string());
    }
    match raw.split_once('=') {
        Some((key, value)) => Line::Pair {
            key: key.to_string(),
            value: value.to_string(),
        },
        None => Line::Raw(raw.to_string()),
    }
}
