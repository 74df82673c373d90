//! Command line shared by all stages.
//!
//! A stage with options of its own flattens [`StageArgs`] into its parser:
//!
//! ```
//! use clap::Parser;
//! use dkbflow::stage::StageArgs;
//!
//! #[derive(Parser, Debug)]
//! struct Args {
//!     #[command(flatten)]
//!     stage: StageArgs,
//!     /// Field used as document id
//!     #[arg(long, default_value = "taskid")]
//!     id_field: String,
//! }
//!
//! let args = Args::parse_from(["stage", "-m", "s", "--id-field", "uid"]);
//! assert_eq!(args.id_field, "uid");
//! ```

use crate::consumer::{ConsumerConfig, SourceKind};
use crate::error::ConfigError;
use crate::framing::{DEFAULT_EOM, Delimiters, STREAM_EOP, unescape};
use crate::message::MessageType;
use crate::producer::{DEFAULT_OUTPUT_DIR, ProducerConfig, SinkKind};
use crate::stage::StageConfig;
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;

/// Processing mode (`-m/--mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Read files once, write files.
    #[default]
    #[value(name = "f")]
    File,
    /// Long-lived stream: stdin to stdout.
    #[value(name = "s")]
    Stream,
    /// Stream per invocation (Hadoop streaming style).
    #[value(name = "m")]
    MapReduce,
}

impl Mode {
    /// Stream-like modes read from (and write to) the process streams.
    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Stream | Self::MapReduce)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct StageArgs {
    /// Processing mode: (f)ile, (s)tream or (m)apreduce
    #[arg(short, long, value_enum, default_value = "f")]
    pub mode: Mode,

    /// Source of input data: (f)ile, (s)tream or (h)dfs
    #[arg(short, long, value_enum)]
    pub source: Option<SourceKind>,

    /// Destination of output data: (f)ile, (s)tream or (h)dfs
    #[arg(short, long, value_enum)]
    pub dest: Option<SinkKind>,

    /// Read from and write to HDFS (same as `-s h -d h`)
    #[arg(long, default_value_t = false)]
    pub hdfs: bool,

    /// End-of-message marker; backslash escapes are decoded
    #[arg(short, long, value_name = "EOM")]
    pub eom: Option<String>,

    /// End-of-process marker; defaults to `\0` in stream mode, empty otherwise
    #[arg(short = 'E', long, value_name = "EOP")]
    pub eop: Option<String>,

    /// Stage configuration file (YAML)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory with input files (default for HDFS: /user/DKB/)
    #[arg(short, long, value_name = "DIR")]
    pub input_dir: Option<String>,

    /// Output directory; relative ones live next to the input files
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: String,

    /// Number of messages per `batch_process` call (0 or 1: no batching)
    #[arg(short, long, default_value_t = 1)]
    pub batch_size: usize,

    /// Skip processing: forward input marked as incomplete
    #[arg(long, default_value_t = false)]
    pub skip: bool,

    /// Input files (file mode)
    #[arg(value_name = "FILE")]
    pub input_files: Vec<String>,
}

impl Default for StageArgs {
    fn default() -> Self {
        Self::parse_from(["stage"])
    }
}

impl StageArgs {
    /// Parse `args` (the first item is the program name).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Usage`] for malformed command lines and
    /// help/version requests.
    pub fn try_parse_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.batch_size > 1
    }

    /// EOM and EOP markers, with escapes decoded and mode defaults applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Delimiter`] for an empty EOM or a broken
    /// escape sequence.
    pub fn delimiters(&self) -> Result<Delimiters, ConfigError> {
        let eom = match &self.eom {
            Some(eom) => unescape(eom)?,
            None => DEFAULT_EOM.to_vec(),
        };
        let eop = match &self.eop {
            Some(eop) => unescape(eop)?,
            None if self.mode == Mode::Stream => STREAM_EOP.to_vec(),
            None => Vec::new(),
        };
        Delimiters::new(eom, eop)
    }

    /// Consumer kind after applying `--hdfs` and mode defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conflict`] when `-s` contradicts `--hdfs` or
    /// the mode.
    pub fn source_kind(&self) -> Result<SourceKind, ConfigError> {
        if self.hdfs {
            return match self.source {
                None | Some(SourceKind::Hdfs) => Ok(SourceKind::Hdfs),
                Some(other) => Err(ConfigError::Conflict(format!(
                    "--hdfs cannot be used with '-s {other}'"
                ))),
            };
        }
        match (self.mode, self.source) {
            (Mode::File, source) => Ok(source.unwrap_or(SourceKind::File)),
            (_, Some(SourceKind::File)) => Err(ConfigError::Conflict(
                "file source cannot be used in stream or mapreduce mode".into(),
            )),
            (_, source) => Ok(source.unwrap_or(SourceKind::Stream)),
        }
    }

    /// Producer kind after applying `--hdfs` and mode defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conflict`] when `-d` contradicts `--hdfs`.
    pub fn sink_kind(&self) -> Result<SinkKind, ConfigError> {
        if self.hdfs {
            return match self.dest {
                None | Some(SinkKind::Hdfs) => Ok(SinkKind::Hdfs),
                Some(other) => Err(ConfigError::Conflict(format!(
                    "--hdfs cannot be used with '-d {other}'"
                ))),
            };
        }
        let default = if self.mode.is_streaming() {
            SinkKind::Stream
        } else {
            SinkKind::File
        };
        Ok(self.dest.unwrap_or(default))
    }

    /// Consumer settings for messages of `input_type`.
    ///
    /// # Errors
    ///
    /// See [`StageArgs::source_kind`] and [`StageArgs::delimiters`].
    pub fn consumer_config(&self, input_type: MessageType) -> Result<ConsumerConfig, ConfigError> {
        let kind = self.source_kind()?;
        if kind == SourceKind::Stream && !self.input_files.is_empty() {
            info!("input files are ignored when reading from the input stream");
        }
        let mut config = ConsumerConfig::new(kind, input_type)
            .with_mode(self.mode)
            .with_input_files(self.input_files.iter().cloned())
            .with_delimiters(self.delimiters()?);
        config.input_dir.clone_from(&self.input_dir);
        Ok(config)
    }

    /// Producer settings for messages of `output_type`.
    ///
    /// # Errors
    ///
    /// See [`StageArgs::sink_kind`] and [`StageArgs::delimiters`].
    pub fn producer_config(&self, output_type: MessageType) -> Result<ProducerConfig, ConfigError> {
        Ok(ProducerConfig::new(self.sink_kind()?, output_type)
            .with_output_dir(self.output_dir.clone())
            .with_delimiters(self.delimiters()?))
    }

    /// Load the `--config` file, if one was given.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConfigFile`] or [`ConfigError::ConfigParse`].
    pub fn load_config(&self) -> Result<StageConfig, ConfigError> {
        match &self.config {
            Some(path) => StageConfig::load(path),
            None => Ok(StageConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &[&str]) -> StageArgs {
        StageArgs::try_parse_args(std::iter::once("stage").chain(cmd.iter().copied())).unwrap()
    }

    #[test]
    fn file_mode_defaults() {
        let a = args(&[]);
        assert_eq!(a.mode, Mode::File);
        assert_eq!(a.source_kind().unwrap(), SourceKind::File);
        assert_eq!(a.sink_kind().unwrap(), SinkKind::File);
        assert_eq!(a.output_dir, "out");
        assert!(!a.is_batch());
        let d = a.delimiters().unwrap();
        assert_eq!(d.eom(), b"\n");
        assert_eq!(d.eop(), b"");
    }

    #[test]
    fn stream_mode_defaults() {
        let a = args(&["-m", "s"]);
        assert_eq!(a.source_kind().unwrap(), SourceKind::Stream);
        assert_eq!(a.sink_kind().unwrap(), SinkKind::Stream);
        assert_eq!(a.delimiters().unwrap().eop(), b"\0");

        let a = args(&["-m", "m"]);
        assert_eq!(a.delimiters().unwrap().eop(), b"");
    }

    #[test]
    fn hdfs_flag_sets_both_kinds() {
        let a = args(&["--hdfs"]);
        assert_eq!(a.source_kind().unwrap(), SourceKind::Hdfs);
        assert_eq!(a.sink_kind().unwrap(), SinkKind::Hdfs);
    }

    #[test]
    fn conflicting_kinds() {
        assert!(matches!(
            args(&["--hdfs", "-s", "f"]).source_kind(),
            Err(ConfigError::Conflict(_))
        ));
        assert!(matches!(
            args(&["--hdfs", "-d", "s"]).sink_kind(),
            Err(ConfigError::Conflict(_))
        ));
        assert!(matches!(
            args(&["-m", "s", "-s", "f"]).source_kind(),
            Err(ConfigError::Conflict(_))
        ));
    }

    #[test]
    fn escaped_delimiters() {
        let a = args(&["-e", r"\x1e", "-E", r"\n\n"]);
        let d = a.delimiters().unwrap();
        assert_eq!(d.eom(), &[0x1e]);
        assert_eq!(d.eop(), b"\n\n");
        let empty = StageArgs {
            eom: Some(String::new()),
            ..args(&[])
        };
        assert!(matches!(empty.delimiters(), Err(ConfigError::Delimiter(_))));
    }
}
