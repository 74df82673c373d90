//! Process-level I/O context shared by a stage's consumer and producer.
//!
//! Instead of reaching for process globals, a stage receives an
//! [`IoContext`] when it is created. The context owns the HDFS accessor and
//! the process input/output streams; tests swap any of them for in-memory
//! versions.

use crate::consumer::stream::stdin_reader;
use crate::hdfs::{HadoopShell, HdfsAccessor};
use std::io::{self, Read, Write};
use std::sync::Arc;

/// HDFS client plus the process input and output streams.
pub struct IoContext {
    hdfs: Arc<dyn HdfsAccessor>,
    input: Option<Box<dyn Read + Send>>,
    output: Option<Box<dyn Write + Send>>,
}

impl IoContext {
    /// Context of a real stage process: `hadoop fs`, stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hdfs: Arc::new(HadoopShell::new()),
            input: None,
            output: None,
        }
    }

    #[must_use]
    pub fn with_hdfs(mut self, hdfs: impl HdfsAccessor + 'static) -> Self {
        self.hdfs = Arc::new(hdfs);
        self
    }

    /// Replace stdin.
    #[must_use]
    pub fn with_input(mut self, input: impl Read + Send + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    /// Replace stdout.
    #[must_use]
    pub fn with_output(mut self, output: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(output));
        self
    }

    #[must_use]
    pub fn hdfs(&self) -> Arc<dyn HdfsAccessor> {
        Arc::clone(&self.hdfs)
    }

    /// Hand out the input stream. Without an explicit one, stdin is
    /// duplicated and wrapped for polling reads.
    ///
    /// # Errors
    ///
    /// Fails if stdin cannot be duplicated.
    pub fn take_input(&mut self) -> io::Result<Box<dyn Read + Send>> {
        match self.input.take() {
            Some(input) => Ok(input),
            None => stdin_reader(),
        }
    }

    /// Hand out the output stream (stdout unless replaced).
    pub fn take_output(&mut self) -> Box<dyn Write + Send> {
        self.output
            .take()
            .unwrap_or_else(|| Box::new(io::stdout()))
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}
