//! Error taxonomy and process exit codes.
//!
//! Three families of failures are kept apart because they end a stage
//! differently:
//!
//! - [`ConfigError`] is raised while a stage is being configured; the stage
//!   never starts reading input.
//! - [`DecodeError`] belongs to a single record. The stage loop logs it and
//!   moves on to the next record.
//! - [`DataflowError`] is a runtime failure that stops the loop. Stage code
//!   declares its own failures with [`DataflowError::Stage`].
//!
//! Panics escaping stage callbacks are not errors in this sense; the stage
//! boundary catches them and reports [`ExitCode::Internal`].

use crate::hdfs::HdfsError;
use crate::message::MessageType;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = DataflowError> = std::result::Result<T, E>;

/// A failure detected before the stage starts running.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command line could not be parsed (or help/version was requested).
    #[error("{0}")]
    Usage(#[from] clap::Error),
    /// The `--config` file is missing or unreadable.
    #[error("failed to open config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The `--config` file is not a YAML mapping.
    #[error("failed to parse config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    /// Mutually exclusive options were given together.
    #[error("conflicting options: {0}")]
    Conflict(String),
    /// A delimiter argument is empty or holds a broken escape sequence.
    #[error("invalid delimiter: {0}")]
    Delimiter(String),
    /// Consumer could not be set up (no input, unreadable directory, ...).
    #[error("consumer: {0:#}")]
    Consumer(anyhow::Error),
    /// Producer could not be set up.
    #[error("producer: {0:#}")]
    Producer(anyhow::Error),
    /// `configure()` called on a stage that is past the `Created` state.
    #[error("stage cannot be configured in state {0}")]
    State(&'static str),
}

impl ConfigError {
    /// Exit code for a stage that stops with this error.
    ///
    /// Help and version requests are reported through clap as errors but
    /// are a clean exit.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage(e) if !e.use_stderr() => ExitCode::Success,
            _ => ExitCode::Configuration,
        }
    }
}

/// A record that cannot be turned into a message of the expected type.
///
/// Cloneable so that a failed decode can be cached inside the message and
/// reported again without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to read input message as {message_type}: {reason}")]
pub struct DecodeError {
    pub message_type: MessageType,
    pub reason: String,
}

impl DecodeError {
    pub fn new(message_type: MessageType, reason: impl Into<String>) -> Self {
        Self {
            message_type,
            reason: reason.into(),
        }
    }
}

/// A runtime failure of the dataflow machinery or of the stage itself.
#[derive(Debug, Error)]
pub enum DataflowError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Reading from the source failed.
    #[error("consumer failure: {0:#}")]
    Consumer(anyhow::Error),
    /// Writing to the sink failed.
    #[error("producer failure: {0:#}")]
    Producer(anyhow::Error),
    #[error("HDFS failure: {0}")]
    Hdfs(#[from] HdfsError),
    /// Stage emitted a message of a type other than its output type.
    #[error("output message must be {expected} (got {actual})")]
    MessageType {
        expected: MessageType,
        actual: MessageType,
    },
    /// Failure declared by stage code (missing field, unreachable service...).
    #[error("{0}")]
    Stage(String),
    /// Callback required by the configuration is not implemented.
    #[error("{0} is not implemented")]
    Unsupported(&'static str),
}

impl DataflowError {
    /// Convenience constructor for stage-declared failures.
    pub fn stage(message: impl Into<String>) -> Self {
        Self::Stage(message.into())
    }
}

/// Process exit status of a stage.
///
/// Only the categories are fixed; numeric values are local to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// Configuration failed; the stage never ran.
    Configuration,
    /// A declared runtime failure stopped the stage.
    Dataflow,
    /// Unexpected failure (panic in stage code).
    Internal,
    /// Stage-specific status, e.g. "differences found" in a consistency check.
    Custom(u8),
}

impl ExitCode {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Configuration => 1,
            Self::Dataflow => 2,
            Self::Internal => 3,
            Self::Custom(c) => c,
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self.code() == 0
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.code())
    }
}
