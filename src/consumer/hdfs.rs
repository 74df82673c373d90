//! Consumer reading files stored in HDFS.

use crate::consumer::file::has_extension;
use crate::consumer::{ConsumerConfig, FileConsumer, FileSource, SourceInfo};
use crate::error::ConfigError;
use crate::hdfs::{self, DKB_HOME, HdfsAccessor};
use crate::stage::Mode;
use anyhow::Context;
use std::io::Read;
use std::sync::Arc;

/// HDFS seen through an [`HdfsAccessor`].
#[derive(Clone)]
pub struct HdfsFiles {
    hdfs: Arc<dyn HdfsAccessor>,
}

impl HdfsFiles {
    pub fn new(hdfs: Arc<dyn HdfsAccessor>) -> Self {
        Self { hdfs }
    }
}

impl FileSource for HdfsFiles {
    fn list(&self, dir: &str, extension: &str) -> anyhow::Result<Vec<String>> {
        let mut names = self
            .hdfs
            .list_files(dir)
            .with_context(|| format!("list HDFS directory {dir}"))?;
        names.retain(|name| has_extension(name, extension));
        names.sort();
        Ok(names)
    }

    fn open(&self, path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        self.hdfs
            .open(path)
            .with_context(|| format!("open HDFS file {path}"))
    }

    fn locate(&self, dir: &str, file: &str) -> SourceInfo {
        let full_path = hdfs::join(dir, file);
        SourceInfo {
            name: hdfs::basename(&full_path).to_string(),
            dir: hdfs::dirname(&full_path).to_string(),
            full_path,
        }
    }

    fn default_dir(&self) -> Option<String> {
        Some(DKB_HOME.to_string())
    }
}

/// [`FileConsumer`] over HDFS.
pub type HdfsConsumer = FileConsumer<HdfsFiles>;

impl FileConsumer<HdfsFiles> {
    /// Consumer over HDFS files.
    ///
    /// In mapreduce mode the file names are read from `names` (the stage
    /// input stream) instead of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Consumer`] if there is nothing to read or the
    /// input directory cannot be listed.
    pub fn hdfs(
        config: ConsumerConfig,
        hdfs: Arc<dyn HdfsAccessor>,
        names: Option<Box<dyn Read + Send>>,
    ) -> Result<Self, ConfigError> {
        let files = HdfsFiles::new(hdfs);
        match names {
            Some(names) if config.mode == Mode::MapReduce => {
                Ok(Self::with_names(files, config, names))
            }
            _ => Self::new(files, config),
        }
    }
}
