//! Producer writing messages to output files.
//!
//! One output file is kept per input file: it is named after the input
//! (`<stem><type extension>`) and created in the output directory when the
//! first message derived from that input is written. Without a named input
//! the file is called `<unix-seconds>_<seq><ext>`. Existing files are never
//! overwritten.
//!
//! The output directory (`-o`) is used as is when it is absolute or starts
//! with `./` or `../`; otherwise it is a subdirectory of the input file's
//! directory, or of the target's default base when there is no input file.

use crate::consumer::SourceInfo;
use crate::error::{ConfigError, DataflowError, Result};
use crate::framing::Delimiters;
use crate::message::Message;
use crate::producer::{Producer, ProducerConfig, frame};
use anyhow::{Context, anyhow};
use log::{debug, info};
use std::fs::{File, create_dir_all};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempPath;

/// An output file being written.
pub struct OutputFile {
    /// Final location of the file.
    pub path: String,
    /// Directory holding `path`.
    pub dir: String,
    pub(crate) writer: BufWriter<File>,
    /// Local copy, for targets that move the file into place on close.
    pub(crate) staging: Option<TempPath>,
}

/// Filesystem a [`FileProducer`] creates its output files on.
pub trait OutputTarget {
    /// Whether `output_dir` is used as is rather than relative to the
    /// input file's directory.
    fn is_fixed(&self, output_dir: &str) -> bool;

    /// Base of a relative output directory when there is no input file.
    fn default_base(&self) -> &str;

    fn join(&self, base: &str, sub: &str) -> String;

    /// Create `name` in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists or cannot be created.
    fn create(&self, dir: &str, name: &str) -> anyhow::Result<OutputFile>;

    /// Flush `file` and make it available at its final path.
    ///
    /// # Errors
    ///
    /// Fails if the data cannot be written out or moved into place.
    fn finish(&self, file: OutputFile) -> anyhow::Result<()>;
}

/// The local filesystem; files are created directly at their final path.
#[derive(Debug, Clone)]
pub struct LocalTarget {
    cwd: String,
}

impl LocalTarget {
    /// Target with relative output directories resolved under `cwd` when
    /// there is no input file.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_string_lossy().into_owned(),
        }
    }

    /// Target rooted at the current directory.
    ///
    /// # Errors
    ///
    /// Fails if the current directory is not accessible.
    pub fn current_dir() -> io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }
}

impl OutputTarget for LocalTarget {
    fn is_fixed(&self, output_dir: &str) -> bool {
        Path::new(output_dir).is_absolute()
            || matches!(output_dir, "." | "..")
            || output_dir.starts_with("./")
            || output_dir.starts_with("../")
    }

    fn default_base(&self) -> &str {
        &self.cwd
    }

    fn join(&self, base: &str, sub: &str) -> String {
        Path::new(base).join(sub).to_string_lossy().into_owned()
    }

    fn create(&self, dir: &str, name: &str) -> anyhow::Result<OutputFile> {
        create_dir_all(dir).with_context(|| format!("mkdir -p {dir}"))?;
        let path = PathBuf::from(dir).join(name);
        let f = File::create_new(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                anyhow!("output file {} already exists", path.display())
            } else {
                anyhow::Error::new(e).context(format!("create {}", path.display()))
            }
        })?;
        Ok(OutputFile {
            path: path.to_string_lossy().into_owned(),
            dir: dir.to_string(),
            writer: BufWriter::new(f),
            staging: None,
        })
    }

    fn finish(&self, mut file: OutputFile) -> anyhow::Result<()> {
        file.writer
            .flush()
            .with_context(|| format!("flush {}", file.path))?;
        file.writer
            .get_ref()
            .sync_all()
            .with_context(|| format!("sync {}", file.path))?;
        Ok(())
    }
}

/// Writes messages into output files, switching file when the input file
/// changes.
pub struct FileProducer<T> {
    target: T,
    output_dir: String,
    delimiters: Delimiters,
    extension: &'static str,
    source: Option<SourceInfo>,
    current: Option<(Option<SourceInfo>, OutputFile)>,
    seq: u64,
}

impl FileProducer<LocalTarget> {
    /// Producer writing local files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Producer`] if the current directory cannot be
    /// determined.
    pub fn local(config: ProducerConfig) -> Result<Self, ConfigError> {
        let target = LocalTarget::current_dir()
            .context("get current directory")
            .map_err(ConfigError::Producer)?;
        Ok(Self::new(target, config))
    }
}

impl<T: OutputTarget> FileProducer<T> {
    pub fn new(target: T, config: ProducerConfig) -> Self {
        Self {
            target,
            output_dir: config.output_dir,
            delimiters: config.delimiters,
            extension: config.message_type.extension(),
            source: None,
            current: None,
            seq: 0,
        }
    }

    /// Directory the output for `source` goes to.
    pub fn output_dir_for(&self, source: Option<&SourceInfo>) -> String {
        if self.target.is_fixed(&self.output_dir) {
            return self.output_dir.clone();
        }
        let base = source.map_or(self.target.default_base(), |s| s.dir.as_str());
        self.target.join(base, &self.output_dir)
    }

    fn file_name(&self) -> String {
        match &self.source {
            Some(source) => format!("{}{}", source.stem(), self.extension),
            None => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs());
                format!("{secs}_{}{}", self.seq, self.extension)
            }
        }
    }

    /// Output file for the current source, opening a new one if needed.
    fn current_file(&mut self) -> anyhow::Result<&mut OutputFile> {
        let switch = match &self.current {
            Some((source, _)) => *source != self.source,
            None => true,
        };
        if switch {
            let dir = self.output_dir_for(self.source.as_ref());
            let name = self.file_name();
            let path = self.target.join(&dir, &name);
            let same_path = self
                .current
                .as_ref()
                .is_some_and(|(_, file)| file.path == path);
            if same_path {
                debug!("source changed, still writing to {path}");
                if let Some((source, _)) = &mut self.current {
                    source.clone_from(&self.source);
                }
            } else {
                if let Some((_, file)) = self.current.take() {
                    self.target.finish(file)?;
                }
                let file = self.target.create(&dir, &name)?;
                info!("output file: {}", file.path);
                self.seq += 1;
                self.current = Some((self.source.clone(), file));
            }
        }
        self.current
            .as_mut()
            .map(|(_, file)| file)
            .ok_or_else(|| anyhow!("no output file open"))
    }
}

impl<T: OutputTarget> Producer for FileProducer<T> {
    fn set_source(&mut self, source: Option<SourceInfo>) {
        self.source = source;
    }

    fn write(&mut self, message: &Message) -> Result<()> {
        let record = frame(message, &self.delimiters);
        let file = self.current_file().map_err(DataflowError::Producer)?;
        file.writer
            .write_all(&record)
            .with_context(|| format!("write {}", file.path))
            .map_err(DataflowError::Producer)
    }

    fn close(&mut self) -> Result<()> {
        let Some((_, mut file)) = self.current.take() else {
            return Ok(());
        };
        let eop = self.delimiters.eop();
        let marked = if eop.is_empty() {
            Ok(())
        } else {
            file.writer
                .write_all(eop)
                .with_context(|| format!("write end-of-process marker to {}", file.path))
        };
        debug!("closing output file {}", file.path);
        // the file is finished (and moved into place) even without its marker
        let finished = self.target.finish(file);
        marked.and(finished).map_err(DataflowError::Producer)
    }

    fn destination(&self) -> Option<String> {
        self.current.as_ref().map(|(_, file)| file.path.clone())
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::producer::SinkKind;
    use serde_json::json;
    use std::cell::Cell;
    use std::fs::OpenOptions;
    use std::rc::Rc;

    /// Output files that refuse every write, as on a full disk.
    struct FullDisk {
        finished: Rc<Cell<usize>>,
    }

    impl OutputTarget for FullDisk {
        fn is_fixed(&self, _output_dir: &str) -> bool {
            true
        }

        fn default_base(&self) -> &str {
            "/"
        }

        fn join(&self, base: &str, sub: &str) -> String {
            format!("{base}/{sub}")
        }

        fn create(&self, dir: &str, name: &str) -> anyhow::Result<OutputFile> {
            let f = OpenOptions::new().write(true).open("/dev/full")?;
            Ok(OutputFile {
                path: self.join(dir, name),
                dir: dir.to_string(),
                writer: BufWriter::with_capacity(0, f),
                staging: None,
            })
        }

        fn finish(&self, _file: OutputFile) -> anyhow::Result<()> {
            self.finished.set(self.finished.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn failed_end_marker_still_finishes_the_file() {
        let finished = Rc::new(Cell::new(0));
        let config = ProducerConfig::new(SinkKind::File, MessageType::Json)
            .with_output_dir("/out")
            .with_delimiters(Delimiters::new("\n", "\0").unwrap());
        let mut producer = FileProducer::new(
            FullDisk {
                finished: Rc::clone(&finished),
            },
            config,
        );
        assert!(producer.write(&Message::json(json!(1))).is_err());
        assert!(producer.destination().is_some_and(|path| path.starts_with("/out/")));

        let err = producer.close().unwrap_err();
        assert!(err.to_string().contains("end-of-process marker"), "{err}");
        assert_eq!(finished.get(), 1);
        // nothing left to close
        assert!(producer.close().is_ok());
    }
}
