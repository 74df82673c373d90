//! Consumer reading records from a set of files.
//!
//! Files are either given explicitly or found by listing the input
//! directory; listed files are filtered by the message type extension and
//! read in name order. Their records form one logical sequence. A file that
//! cannot be opened or read is reported and skipped.

use crate::consumer::{Consumer, ConsumerConfig, SourceInfo};
use crate::error::{ConfigError, DataflowError, Result};
use crate::framing::{DelimitedReader, Delimiters};
use anyhow::{Context, anyhow, bail};
use glob::{Pattern, glob};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Filesystem a [`FileConsumer`] lists and opens files on.
pub trait FileSource {
    /// Names of the regular files in `dir` ending with `extension`
    /// (case-insensitive), sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be listed.
    fn list(&self, dir: &str, extension: &str) -> anyhow::Result<Vec<String>>;

    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    fn open(&self, path: &str) -> anyhow::Result<Box<dyn Read + Send>>;

    /// Describe `file` relative to the input directory `dir`.
    fn locate(&self, dir: &str, file: &str) -> SourceInfo;

    /// Input directory used when none is configured.
    fn default_dir(&self) -> Option<String> {
        None
    }
}

/// The local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl FileSource for LocalFiles {
    fn list(&self, dir: &str, extension: &str) -> anyhow::Result<Vec<String>> {
        if !Path::new(dir).is_dir() {
            bail!("input directory {dir} does not exist or is not a directory");
        }
        let pattern = format!("{}/*", Pattern::escape(dir));
        let entries = glob(&pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.with_context(|| format!("list {dir}"))?;
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && has_extension(name, extension)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let f = File::open(path).with_context(|| format!("open {path}"))?;
        Ok(Box::new(f))
    }

    fn locate(&self, dir: &str, file: &str) -> SourceInfo {
        let full = Path::new(dir).join(file);
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = match full.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        };
        SourceInfo {
            name,
            dir: parent,
            full_path: full.to_string_lossy().into_owned(),
        }
    }
}

pub(crate) fn has_extension(name: &str, extension: &str) -> bool {
    name.len() > extension.len()
        && name
            .get(name.len() - extension.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(extension))
}

enum Names {
    Listed(VecDeque<String>),
    /// One file name per line, read from a stream.
    Stream(DelimitedReader<Box<dyn Read + Send>>),
}

struct OpenFile {
    info: SourceInfo,
    reader: DelimitedReader<Box<dyn Read + Send>>,
}

/// Reads records from files, one after another.
pub struct FileConsumer<F> {
    files: F,
    delimiters: Delimiters,
    input_dir: String,
    names: Names,
    current: Option<OpenFile>,
    last: Option<SourceInfo>,
}

impl FileConsumer<LocalFiles> {
    /// Consumer over local files.
    ///
    /// # Errors
    ///
    /// See [`FileConsumer::new`].
    pub fn local(config: ConsumerConfig) -> Result<Self, ConfigError> {
        Self::new(LocalFiles, config)
    }
}

impl<F: FileSource> FileConsumer<F> {
    /// Consumer over the explicit input files of `config`, or over the
    /// listing of its input directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Consumer`] if neither files nor a directory
    /// are configured, or if the directory cannot be listed.
    pub fn new(files: F, config: ConsumerConfig) -> Result<Self, ConfigError> {
        let input_dir = config.input_dir.or_else(|| files.default_dir());
        let extension = config.message_type.extension();

        let names: VecDeque<String> = if !config.input_files.is_empty() {
            config.input_files.into()
        } else if let Some(dir) = &input_dir {
            let listed = files.list(dir, extension).map_err(ConfigError::Consumer)?;
            if listed.is_empty() {
                warn!("no {extension} files found in {dir}");
            }
            listed.into()
        } else {
            return Err(ConfigError::Consumer(anyhow!("no input files specified")));
        };

        Ok(Self {
            files,
            delimiters: config.delimiters,
            input_dir: input_dir.unwrap_or_default(),
            names: Names::Listed(names),
            current: None,
            last: None,
        })
    }

    /// Consumer that takes file names from `names`, one per line.
    ///
    /// Relative names are resolved against the configured (or default)
    /// input directory; explicit input files are ignored.
    pub fn with_names(files: F, config: ConsumerConfig, names: Box<dyn Read + Send>) -> Self {
        if !config.input_files.is_empty() {
            info!("input files are ignored: file names are read from the input stream");
        }
        let input_dir = config
            .input_dir
            .or_else(|| files.default_dir())
            .unwrap_or_default();
        Self {
            files,
            delimiters: config.delimiters,
            input_dir,
            names: Names::Stream(DelimitedReader::new(names, Delimiters::default())),
            current: None,
            last: None,
        }
    }

    fn next_name(&mut self) -> Result<Option<String>> {
        match &mut self.names {
            Names::Listed(names) => Ok(names.pop_front()),
            Names::Stream(reader) => {
                let line = reader
                    .next_record()
                    .context("read input file name")
                    .map_err(DataflowError::Consumer)?;
                Ok(line.map(|l| String::from_utf8_lossy(&l).trim().to_string()))
            }
        }
    }

    /// Open the next readable file; `false` when there is none left.
    fn open_next(&mut self) -> Result<bool> {
        while let Some(name) = self.next_name()? {
            let info = self.files.locate(&self.input_dir, &name);
            match self.files.open(&info.full_path) {
                Ok(input) => {
                    info!("reading file {}", info.full_path);
                    let reader = DelimitedReader::new(input, self.delimiters.clone());
                    self.last = Some(info.clone());
                    self.current = Some(OpenFile { info, reader });
                    return Ok(true);
                }
                Err(e) => error!("{e:#}; file skipped"),
            }
        }
        Ok(false)
    }
}

impl<F: FileSource> Consumer for FileConsumer<F> {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }
            let Some(file) = self.current.as_mut() else {
                continue;
            };
            match file.reader.next_record() {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => debug!("finished reading {}", file.info.full_path),
                Err(e) => error!(
                    "failed to read {}: {e}; rest of the file skipped",
                    file.info.full_path
                ),
            }
            self.current = None;
        }
    }

    fn source_info(&self) -> Option<SourceInfo> {
        self.last.clone()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.current.take() {
            debug!("closing {}", file.info.full_path);
        }
        Ok(())
    }
}
