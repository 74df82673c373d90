//! Core trait for distributed filesystem access.

use log::warn;
use std::fmt;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    /// The filesystem client reported a failure.
    CommandFailed,
    Io,
}

/// Error type for HDFS operations
#[derive(Debug, Clone, Error)]
pub struct HdfsError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for HdfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl HdfsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for HdfsError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

pub type HdfsResult<T> = Result<T, HdfsError>;

// ============================================================================
// HdfsAccessor
// ============================================================================

/// Operations the stage I/O layer needs from a Hadoop-like filesystem.
///
/// Paths are absolute POSIX-style strings (`/user/DKB/...`).
pub trait HdfsAccessor: Send + Sync {
    /// Names (not paths) of the regular files in `dir`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or cannot be listed
    fn list_files(&self, dir: &str) -> HdfsResult<Vec<String>>;

    /// Open a file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be fetched
    fn open(&self, path: &str) -> HdfsResult<Box<dyn Read + Send>>;

    /// Create a directory together with its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created
    fn make_dirs(&self, dir: &str) -> HdfsResult<()>;

    /// Upload a local file to `dest`. The file only appears at `dest` once
    /// it has been fully transferred.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` already exists or the upload fails
    fn put_file(&self, local: &Path, dest: &str) -> HdfsResult<()>;

    /// Upload a local file and remove the local copy.
    ///
    /// Failing to remove the local copy is only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails
    fn move_file(&self, local: &Path, dest: &str) -> HdfsResult<()> {
        if !local.exists() {
            return Err(HdfsError::new(
                ErrorKind::NotFound,
                format!("local file {} not found", local.display()),
            ));
        }
        self.put_file(local, dest)?;
        if let Err(e) = std::fs::remove_file(local) {
            warn!(
                "failed to remove local copy of HDFS file ({}): {e}",
                local.display()
            );
        }
        Ok(())
    }
}

// ============================================================================
// Path helpers
// ============================================================================

/// Base directory of DKB data in HDFS.
pub const DKB_HOME: &str = "/user/DKB/";

/// Join two POSIX path fragments. An absolute `name` replaces `base`.
#[must_use]
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim();
    let name = name.trim();
    if name.starts_with('/') || base.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Last component of a POSIX path.
#[must_use]
pub fn basename(path: &str) -> &str {
    let path = path.trim();
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Everything but the last component of a POSIX path.
#[must_use]
pub fn dirname(path: &str) -> &str {
    let path = path.trim();
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => "",
    }
}

#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}
