//! [`HdfsAccessor`] backed by the `hadoop fs` command line client.

use crate::hdfs::traits::{ErrorKind, HdfsAccessor, HdfsError, HdfsResult, basename};
use log::info;
use std::ffi::OsStr;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Runs `hadoop fs <subcommand>` for every operation.
#[derive(Debug, Clone)]
pub struct HadoopShell {
    program: String,
}

impl HadoopShell {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("hadoop")
    }

    /// Use another client binary (a wrapper script, a full path...).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run<I, S>(&self, args: I, what: &str) -> HdfsResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.program)
            .arg("fs")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                HdfsError::new(
                    ErrorKind::Io,
                    format!("{what}: cannot run {}: {e}", self.program),
                )
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let first = stderr.lines().next().unwrap_or_default();
            let kind = if first.contains("No such file or directory") {
                ErrorKind::NotFound
            } else if first.contains("File exists") {
                ErrorKind::AlreadyExists
            } else {
                ErrorKind::CommandFailed
            };
            return Err(HdfsError::new(
                kind,
                format!("{what} ({}): {}", output.status, first.trim()),
            ));
        }
        if let Some(line) = String::from_utf8_lossy(&output.stderr).lines().next() {
            info!("(proc) {line}");
        }
        Ok(output)
    }
}

impl Default for HadoopShell {
    fn default() -> Self {
        Self::new()
    }
}

impl HdfsAccessor for HadoopShell {
    fn list_files(&self, dir: &str) -> HdfsResult<Vec<String>> {
        let output = self.run(["-ls", dir], &format!("failed to list HDFS directory {dir}"))?;
        let mut files = parse_ls(&String::from_utf8_lossy(&output.stdout));
        files.sort();
        Ok(files)
    }

    fn open(&self, path: &str) -> HdfsResult<Box<dyn Read + Send>> {
        let output = self.run(["-cat", path], &format!("failed to get file from HDFS: {path}"))?;
        // local spool file, removed by the OS once closed
        let mut spool = tempfile::tempfile()?;
        spool.write_all(&output.stdout)?;
        spool.seek(SeekFrom::Start(0))?;
        Ok(Box::new(spool))
    }

    fn make_dirs(&self, dir: &str) -> HdfsResult<()> {
        self.run(
            ["-mkdir", "-p", dir],
            &format!("failed to create HDFS directory {dir}"),
        )?;
        Ok(())
    }

    fn put_file(&self, local: &Path, dest: &str) -> HdfsResult<()> {
        self.run(
            [OsStr::new("-put"), local.as_os_str(), OsStr::new(dest)],
            &format!("failed to put file to HDFS: {}", local.display()),
        )
        .map(|_| ())
    }
}

/// Parse `hadoop fs -ls` output into file names.
///
/// ```text
/// Found 2 items
/// -rwxrwx---   3 user group 1114404 2016-09-28 16:11 /path/to/file1
/// drwxrwx---   - user group       0 2017-05-22 14:07 /path/to/subdir
/// ```
fn parse_ls(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 || !fields[0].starts_with('-') {
                return None;
            }
            Some(basename(&fields[7..].join(" ")).to_string())
        })
        .collect()
}
