//! Producer writing files into HDFS.
//!
//! Messages are written to a local staging file. When the output file is
//! closed, the HDFS directory is created and the staging file is moved to
//! its final HDFS path, so a partially written file is never visible there.

use crate::hdfs::{self, DKB_HOME, HdfsAccessor};
use crate::producer::file::{FileProducer, OutputFile, OutputTarget};
use crate::producer::ProducerConfig;
use anyhow::{Context, anyhow};
use log::debug;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// HDFS seen through an [`HdfsAccessor`], with local staging files.
#[derive(Clone)]
pub struct HdfsTarget {
    hdfs: Arc<dyn HdfsAccessor>,
    default_base: String,
}

impl HdfsTarget {
    /// Relative output directories without an input file end up under
    /// `/user/DKB/temp/<unix-seconds>`.
    pub fn new(hdfs: Arc<dyn HdfsAccessor>) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self::with_base(hdfs, hdfs::join(DKB_HOME, &format!("temp/{secs}")))
    }

    pub fn with_base(hdfs: Arc<dyn HdfsAccessor>, default_base: impl Into<String>) -> Self {
        Self {
            hdfs,
            default_base: default_base.into(),
        }
    }
}

impl OutputTarget for HdfsTarget {
    fn is_fixed(&self, output_dir: &str) -> bool {
        hdfs::is_absolute(output_dir)
    }

    fn default_base(&self) -> &str {
        &self.default_base
    }

    fn join(&self, base: &str, sub: &str) -> String {
        hdfs::join(base, sub)
    }

    fn create(&self, dir: &str, name: &str) -> anyhow::Result<OutputFile> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .tempfile()
            .with_context(|| format!("create local staging file for {name}"))?;
        let (f, staging) = staging.into_parts();
        debug!("staging {name} in {}", staging.display());
        Ok(OutputFile {
            path: hdfs::join(dir, name),
            dir: dir.to_string(),
            writer: BufWriter::new(f),
            staging: Some(staging),
        })
    }

    fn finish(&self, file: OutputFile) -> anyhow::Result<()> {
        let OutputFile {
            path,
            dir,
            mut writer,
            staging,
        } = file;
        writer.flush().with_context(|| format!("flush staging file of {path}"))?;
        drop(writer);

        let staging = staging.ok_or_else(|| anyhow!("no staging file for {path}"))?;
        self.hdfs
            .make_dirs(&dir)
            .with_context(|| format!("create HDFS directory {dir}"))?;
        let local = staging
            .keep()
            .with_context(|| format!("keep staging file of {path}"))?;
        self.hdfs
            .move_file(&local, &path)
            .with_context(|| format!("move {} to HDFS {path}", local.display()))?;
        Ok(())
    }
}

/// [`FileProducer`] over HDFS.
pub type HdfsProducer = FileProducer<HdfsTarget>;

impl FileProducer<HdfsTarget> {
    pub fn hdfs(config: ProducerConfig, hdfs: Arc<dyn HdfsAccessor>) -> Self {
        Self::new(HdfsTarget::new(hdfs), config)
    }
}

