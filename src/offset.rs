//! Persisted cursor of incremental sources.
//!
//! A stage polling an external source (a database table, an index) stores
//! the position it has reached so that the next run resumes from there.
//! [`FileOffsetStorage`] keeps the last committed value in a small text
//! file; it is a last-value store, not a log.

use anyhow::{Context, Result};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Storage for the current offset.
pub trait OffsetStorage {
    /// Current offset, `None` if nothing was committed yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn get(&mut self) -> Result<Option<String>>;

    /// Replace the stored offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn commit(&mut self, offset: &str) -> Result<()>;
}

/// Offset kept as the first line of a local file.
///
/// The file is created if missing. [`OffsetStorage::get`] reads it once
/// and caches the value; [`OffsetStorage::commit`] truncates and rewrites
/// it.
#[derive(Debug)]
pub struct FileOffsetStorage {
    path: PathBuf,
    file: File,
    current: Option<Option<String>>,
}

impl FileOffsetStorage {
    /// Open (or create) the storage file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to initialize offset storage {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            current: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OffsetStorage for FileOffsetStorage {
    fn get(&mut self) -> Result<Option<String>> {
        if let Some(current) = &self.current {
            return Ok(current.clone());
        }
        self.file.seek(SeekFrom::Start(0))?;
        let mut line = String::new();
        BufReader::new(&self.file)
            .read_line(&mut line)
            .with_context(|| format!("read offset from {}", self.path.display()))?;
        let line = line.trim();
        let current = (!line.is_empty()).then(|| line.to_string());
        self.current = Some(current.clone());
        Ok(current)
    }

    fn commit(&mut self, offset: &str) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .set_len(0)
            .with_context(|| format!("truncate {}", self.path.display()))?;
        self.file
            .write_all(offset.as_bytes())
            .with_context(|| format!("write offset to {}", self.path.display()))?;
        self.file
            .sync_all()
            .with_context(|| format!("sync {}", self.path.display()))?;
        debug!("offset committed: {offset}");
        self.current = Some(Some(offset.to_string()));
        Ok(())
    }
}
