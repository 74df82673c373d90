//! Input half of a stage: consumers of framed records.
//!
//! A consumer turns some external source into a sequence of raw records,
//! one per message, honouring the EOM/EOP framing of [`Delimiters`]. The
//! stage decides which implementation to use through [`build_consumer`]:
//!
//! | [`SourceKind`] | Implementation | Input |
//! |---|---|---|
//! | `File` | [`FileConsumer`] | local files, sorted by name |
//! | `Stream` | [`StreamConsumer`] | stdin, polled with a timeout |
//! | `Hdfs` | [`HdfsConsumer`] | HDFS files (names from stdin in mapreduce mode) |
//!
//! Consumers are single-pass: once exhausted they yield nothing more.

pub mod file;
pub mod hdfs;
pub mod stream;

pub use file::{FileConsumer, FileSource, LocalFiles};
pub use hdfs::{HdfsConsumer, HdfsFiles};
#[cfg(unix)]
pub use stream::PollingReader;
pub use stream::StreamConsumer;

use crate::context::IoContext;
use crate::error::{ConfigError, Result};
use crate::framing::Delimiters;
use crate::message::MessageType;
use crate::stage::Mode;
use anyhow::anyhow;
use clap::ValueEnum;
use std::fmt;

/// Where records come from (`-s/--source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    #[value(name = "f")]
    File,
    #[value(name = "s")]
    Stream,
    #[value(name = "h")]
    Hdfs,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "f",
            Self::Stream => "s",
            Self::Hdfs => "h",
        })
    }
}

/// File currently being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// File name, without directory.
    pub name: String,
    /// Directory holding the file.
    pub dir: String,
    pub full_path: String,
}

impl SourceInfo {
    /// File name without its last extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

/// Resolved consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub kind: SourceKind,
    pub mode: Mode,
    /// Directory to list, or base directory of `input_files`.
    pub input_dir: Option<String>,
    /// Explicit input files, read in the given order.
    pub input_files: Vec<String>,
    pub delimiters: Delimiters,
    pub message_type: MessageType,
}

impl ConsumerConfig {
    pub fn new(kind: SourceKind, message_type: MessageType) -> Self {
        Self {
            kind,
            mode: Mode::File,
            input_dir: None,
            input_files: Vec::new(),
            delimiters: Delimiters::default(),
            message_type,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_input_dir(mut self, dir: impl Into<String>) -> Self {
        self.input_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_input_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_files = files.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }
}

/// Source of raw records.
pub trait Consumer {
    /// Next raw record with the EOM marker stripped, or `None` once every
    /// source is exhausted (or an EOP marker was met).
    ///
    /// # Errors
    ///
    /// Returns [`DataflowError::Consumer`](crate::DataflowError::Consumer)
    /// when the input can no longer be read.
    fn next_record(&mut self) -> Result<Option<Vec<u8>>>;

    /// File the last record came from; `None` for stream input.
    fn source_info(&self) -> Option<SourceInfo> {
        None
    }

    /// Release the current input.
    ///
    /// # Errors
    ///
    /// Implementations may report a failure to release the input.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Iterate over the remaining records.
    fn get_messages(&mut self) -> Records<'_, Self>
    where
        Self: Sized,
    {
        Records { consumer: self }
    }
}

impl<C: Consumer + ?Sized> Consumer for Box<C> {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).next_record()
    }

    fn source_info(&self) -> Option<SourceInfo> {
        (**self).source_info()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Iterator returned by [`Consumer::get_messages`].
pub struct Records<'a, C> {
    consumer: &'a mut C,
}

impl<C: Consumer> Iterator for Records<'_, C> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.consumer.next_record().transpose()
    }
}

/// Build the consumer described by `config`.
///
/// # Errors
///
/// Returns a [`ConfigError`] when there is nothing to read or the input
/// cannot be set up.
pub fn build_consumer(
    config: ConsumerConfig,
    io: &mut IoContext,
) -> Result<Box<dyn Consumer>, ConfigError> {
    Ok(match config.kind {
        SourceKind::File => Box::new(FileConsumer::local(config)?),
        SourceKind::Stream => {
            let input = io
                .take_input()
                .map_err(|e| ConfigError::Consumer(anyhow!("cannot open input stream: {e}")))?;
            Box::new(StreamConsumer::with_read(input, config.delimiters))
        }
        SourceKind::Hdfs => {
            let names = if config.mode == Mode::MapReduce {
                let input = io.take_input().map_err(|e| {
                    ConfigError::Consumer(anyhow!("cannot open input stream: {e}"))
                })?;
                Some(input)
            } else {
                None
            };
            Box::new(HdfsConsumer::hdfs(config, io.hdfs(), names)?)
        }
    })
}
