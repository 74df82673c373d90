//! Producer writing to a stream (stdout by default).

use crate::error::{DataflowError, Result};
use crate::framing::Delimiters;
use crate::message::Message;
use crate::producer::{Producer, frame};
use anyhow::{Context, anyhow};
use log::debug;
use std::io::{self, Write};

/// Writes every message straight to the output stream and flushes it.
pub struct StreamProducer {
    out: Box<dyn Write + Send>,
    delimiters: Delimiters,
    closed: bool,
}

impl StreamProducer {
    pub fn stdout(delimiters: Delimiters) -> Self {
        Self::with_write(io::stdout(), delimiters)
    }

    pub fn with_write(out: impl Write + Send + 'static, delimiters: Delimiters) -> Self {
        Self {
            out: Box::new(out),
            delimiters,
            closed: false,
        }
    }
}

impl Producer for StreamProducer {
    fn write(&mut self, message: &Message) -> Result<()> {
        if self.closed {
            return Err(DataflowError::Producer(anyhow!(
                "output stream is already closed"
            )));
        }
        let record = frame(message, &self.delimiters);
        self.out
            .write_all(&record)
            .and_then(|()| self.out.flush())
            .context("write to output stream")
            .map_err(DataflowError::Producer)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let eop = self.delimiters.eop();
        if !eop.is_empty() {
            debug!("writing end-of-process marker");
            self.out
                .write_all(eop)
                .context("write end-of-process marker")
                .map_err(DataflowError::Producer)?;
        }
        self.out
            .flush()
            .context("flush output stream")
            .map_err(DataflowError::Producer)
    }
}
