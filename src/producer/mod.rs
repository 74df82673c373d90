//! Output half of a stage: producers of framed messages.
//!
//! A producer appends `message.encode()` and the EOM marker to its sink. On
//! [`Producer::close`] it writes the EOP marker (when one is configured),
//! flushes and releases the sink.
//!
//! | [`SinkKind`] | Implementation | Output |
//! |---|---|---|
//! | `File` | [`FileProducer`] | one local file per input file |
//! | `Stream` | [`StreamProducer`] | stdout, flushed after every message |
//! | `Hdfs` | [`HdfsProducer`] | local staging file, moved to HDFS when complete |

pub mod file;
pub mod hdfs;
pub mod stream;

pub use file::{FileProducer, LocalTarget, OutputFile, OutputTarget};
pub use hdfs::{HdfsProducer, HdfsTarget};
pub use stream::StreamProducer;

use crate::consumer::SourceInfo;
use crate::context::IoContext;
use crate::error::{ConfigError, Result};
use crate::framing::Delimiters;
use crate::message::{Message, MessageType};
use clap::ValueEnum;
use log::warn;
use std::fmt;

/// Default output directory (`-o/--output-dir`).
pub const DEFAULT_OUTPUT_DIR: &str = "out";

/// Where messages go (`-d/--dest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    #[value(name = "f")]
    File,
    #[value(name = "s")]
    Stream,
    #[value(name = "h")]
    Hdfs,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "f",
            Self::Stream => "s",
            Self::Hdfs => "h",
        })
    }
}

/// Resolved producer settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub kind: SinkKind,
    /// Output directory; see [`FileProducer`] for how it is resolved.
    pub output_dir: String,
    pub delimiters: Delimiters,
    pub message_type: MessageType,
}

impl ProducerConfig {
    pub fn new(kind: SinkKind, message_type: MessageType) -> Self {
        Self {
            kind,
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            delimiters: Delimiters::default(),
            message_type,
        }
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }
}

/// Sink of messages.
pub trait Producer {
    /// Tell the producer which input file the next messages derive from.
    fn set_source(&mut self, _source: Option<SourceInfo>) {}

    /// Append one message to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`DataflowError::Producer`](crate::DataflowError::Producer)
    /// if the sink cannot be opened or written.
    fn write(&mut self, message: &Message) -> Result<()>;

    /// Write the EOP marker, flush and release the sink. Calling it again
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DataflowError::Producer`](crate::DataflowError::Producer)
    /// if buffered data cannot be written out.
    fn close(&mut self) -> Result<()>;

    /// Where the last message went, if it has a name.
    fn destination(&self) -> Option<String> {
        None
    }
}

impl<P: Producer + ?Sized> Producer for Box<P> {
    fn set_source(&mut self, source: Option<SourceInfo>) {
        (**self).set_source(source);
    }

    fn write(&mut self, message: &Message) -> Result<()> {
        (**self).write(message)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn destination(&self) -> Option<String> {
        (**self).destination()
    }
}

/// Encoded message followed by the EOM marker.
pub(crate) fn frame(message: &Message, delimiters: &Delimiters) -> Vec<u8> {
    let text = message.encode();
    let eom = delimiters.eom();
    if text.as_bytes().windows(eom.len()).any(|w| w == eom) {
        warn!("encoded message contains the end-of-message marker and will be split when read back");
    }
    let mut record = Vec::with_capacity(text.len() + eom.len());
    record.extend_from_slice(text.as_bytes());
    record.extend_from_slice(eom);
    record
}

/// Build the producer described by `config`.
///
/// # Errors
///
/// Returns [`ConfigError::Producer`] if the sink cannot be set up.
pub fn build_producer(
    config: ProducerConfig,
    io: &mut IoContext,
) -> Result<Box<dyn Producer>, ConfigError> {
    Ok(match config.kind {
        SinkKind::File => Box::new(FileProducer::local(config)?),
        SinkKind::Stream => Box::new(StreamProducer::with_write(
            io.take_output(),
            config.delimiters,
        )),
        SinkKind::Hdfs => Box::new(HdfsProducer::hdfs(config, io.hdfs())),
    })
}
