//! Helpers for testing stages without real stdin, stdout or HDFS.
//!
//! ```
//! use dkbflow::stage::{Stage, StageContext, from_fn};
//! use dkbflow::testing::stream_io;
//! use dkbflow::{ExitCode, Message};
//!
//! let (io, out) = stream_io("{\"a\":1}\n{\"a\":2}\n");
//! let mut stage = Stage::new("copy", from_fn(|ctx: &mut StageContext, m: Message| {
//!     ctx.output(m)?;
//!     Ok(true)
//! }))
//! .with_io(io);
//!
//! let code = stage.execute(["copy", "-m", "m"]);
//! assert_eq!(code, ExitCode::Success);
//! assert_eq!(out.lines(), vec!["{\"a\":1}", "{\"a\":2}"]);
//! ```

use crate::context::IoContext;
use crate::hdfs::FakeHdfs;
use serde_json::Value;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// In-memory output stream; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    ///
    /// # Panics
    ///
    /// Panics if a writer panicked while holding the buffer.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().expect("buffer mutex poisoned").clone()
    }

    /// Contents as (lossy) UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Non-empty lines of the contents.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.text()
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data
            .lock()
            .map_err(|_| io::Error::other("buffer mutex poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// I/O context reading `input` as stdin and writing stdout into the
/// returned buffer.
#[must_use]
pub fn stream_io(input: impl Into<Vec<u8>>) -> (IoContext, SharedBuffer) {
    let out = SharedBuffer::new();
    let io = IoContext::new()
        .with_input(Cursor::new(input.into()))
        .with_output(out.clone());
    (io, out)
}

/// I/O context backed by an in-memory HDFS (shared with the caller).
#[must_use]
pub fn hdfs_io(hdfs: &FakeHdfs, input: impl Into<Vec<u8>>) -> (IoContext, SharedBuffer) {
    let (io, out) = stream_io(input);
    (io.with_hdfs(hdfs.clone()), out)
}

/// Temporary directory holding input files; removed on drop.
pub struct TestDir {
    temp_dir: TempDir,
}

impl TestDir {
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The directory path as a string.
    #[must_use]
    pub fn dir(&self) -> String {
        self.path().to_string_lossy().into_owned()
    }

    /// Path of `name` inside the directory, as a string.
    #[must_use]
    pub fn join(&self, name: &str) -> String {
        self.path().join(name).to_string_lossy().into_owned()
    }

    /// Write a file (creating parent directories) and return its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(&self, name: &str, content: impl AsRef<[u8]>) -> io::Result<PathBuf> {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Read a file of the directory as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        std::fs::read_to_string(self.path().join(name))
    }
}

/// Parse newline-delimited JSON.
///
/// # Errors
///
/// Returns an error for the first line that is not valid JSON.
pub fn parse_ndjson(text: &str) -> serde_json::Result<Vec<Value>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
