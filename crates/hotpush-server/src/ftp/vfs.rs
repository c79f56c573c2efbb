//! Per-session view of the transfer root.
//!
//! Every path argument a peer sends is resolved against a virtual
//! current directory and jailed inside the configured root. Traversal
//! components are stripped lexically, so the leaf never has to exist
//! before the check runs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use hotpush_core::{Error, Result};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

/// Timestamp layout used in directory listings.
const LIST_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:short] [day] [hour]:[minute]");

/// Session filesystem rooted at the transfer directory.
#[derive(Debug)]
pub struct SessionFs {
    root: PathBuf,
    /// Virtual working directory, always absolute ("/" is the root).
    cwd: PathBuf,
}

impl SessionFs {
    /// Create a session view over `root`, creating the directory if
    /// needed.
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self {
            root,
            cwd: PathBuf::from("/"),
        })
    }

    /// Virtual working directory as shown to the peer.
    pub fn cwd(&self) -> String {
        self.cwd.to_string_lossy().into_owned()
    }

    /// Resolve a peer-supplied path argument to a real path under the
    /// root.
    pub fn resolve(&self, arg: &str) -> Result<PathBuf> {
        let virt = self.virtual_path(arg);
        let mut real = self.root.clone();
        for comp in virt.components() {
            if let Component::Normal(part) = comp {
                real.push(part);
            }
        }

        // Lexical normalization above cannot escape, but the jail check
        // stays as the final authority
        if !real.starts_with(&self.root) {
            return Err(Error::PathEscape {
                path: arg.to_string(),
            });
        }
        Ok(real)
    }

    /// Change the virtual working directory. The target must exist.
    pub fn change_dir(&mut self, arg: &str) -> Result<()> {
        let real = self.resolve(arg)?;
        if !real.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such directory: {}", arg),
            )));
        }
        self.cwd = self.virtual_path(arg);
        Ok(())
    }

    /// Move the virtual working directory up one level.
    pub fn change_dir_up(&mut self) -> Result<()> {
        self.change_dir("..")
    }

    /// Create a directory and return its real path.
    pub fn make_dir(&self, arg: &str) -> Result<PathBuf> {
        let real = self.resolve(arg)?;
        fs::create_dir(&real)?;
        Ok(real)
    }

    /// Remove a file.
    pub fn remove_file(&self, arg: &str) -> Result<()> {
        let real = self.resolve(arg)?;
        fs::remove_file(real)?;
        Ok(())
    }

    /// Size of a regular file in bytes.
    pub fn size(&self, arg: &str) -> Result<u64> {
        let real = self.resolve(arg)?;
        let meta = fs::metadata(real)?;
        if !meta.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", arg),
            )));
        }
        Ok(meta.len())
    }

    /// Long-format listing of a directory (or the cwd).
    pub fn list(&self, arg: Option<&str>) -> Result<Vec<String>> {
        let dir = self.resolve(arg.unwrap_or("."))?;
        let mut lines = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let kind = if meta.is_dir() { 'd' } else { '-' };
            let mtime = meta
                .modified()
                .ok()
                .map(OffsetDateTime::from)
                .and_then(|t| t.format(LIST_TIME_FORMAT).ok())
                .unwrap_or_else(|| "Jan  1 00:00".to_string());
            lines.push(format!(
                "{}rw-r--r-- 1 hotpush hotpush {:>12} {} {}",
                kind,
                meta.len(),
                mtime,
                entry.file_name().to_string_lossy()
            ));
        }
        lines.sort();
        Ok(lines)
    }

    /// Bare name listing of a directory (or the cwd).
    pub fn name_list(&self, arg: Option<&str>) -> Result<Vec<String>> {
        let dir = self.resolve(arg.unwrap_or("."))?;
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Map a peer argument to a virtual absolute path with traversal
    /// components stripped.
    fn virtual_path(&self, arg: &str) -> PathBuf {
        let joined = if arg.starts_with('/') {
            PathBuf::from(arg)
        } else {
            self.cwd.join(arg)
        };

        let mut normalized = PathBuf::from("/");
        for comp in joined.components() {
            match comp {
                Component::ParentDir => {
                    normalized.pop();
                    if normalized.as_os_str().is_empty() {
                        normalized.push("/");
                    }
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {}
                Component::Normal(part) => normalized.push(part),
            }
        }
        normalized
    }
}
