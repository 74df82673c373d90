//! Consumer reading records from a stream (stdin by default).

use crate::consumer::Consumer;
use crate::error::{DataflowError, Result};
use crate::framing::{DelimitedReader, Delimiters};
use anyhow::Context;
use std::io::{self, Read};

/// Poll timeout for stdin reads, in milliseconds.
pub const POLL_TIMEOUT_MS: i32 = 500;

/// Reads records from one long-lived input stream.
pub struct StreamConsumer {
    reader: DelimitedReader<Box<dyn Read + Send>>,
}

impl StreamConsumer {
    /// Consumer over the process stdin.
    ///
    /// # Errors
    ///
    /// Fails if stdin cannot be duplicated.
    pub fn stdin(delimiters: Delimiters) -> io::Result<Self> {
        Ok(Self::with_read(stdin_reader()?, delimiters))
    }

    /// Consumer over any reader.
    pub fn with_read(input: impl Read + Send + 'static, delimiters: Delimiters) -> Self {
        let input: Box<dyn Read + Send> = Box::new(input);
        Self {
            reader: DelimitedReader::new(input, delimiters),
        }
    }

    /// Whether the EOP marker has been read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Consumer for StreamConsumer {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        self.reader
            .next_record()
            .context("read input stream")
            .map_err(DataflowError::Consumer)
    }
}

/// Stdin, ready to be handed to a [`StreamConsumer`].
///
/// On Unix the descriptor is duplicated (bypassing the buffer of
/// [`io::Stdin`]) and wrapped in a [`PollingReader`].
///
/// # Errors
///
/// Fails if the descriptor cannot be duplicated.
#[cfg(unix)]
pub fn stdin_reader() -> io::Result<Box<dyn Read + Send>> {
    use std::os::fd::AsFd;

    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(Box::new(PollingReader::new(std::fs::File::from(fd))))
}

/// Stdin, ready to be handed to a [`StreamConsumer`].
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn stdin_reader() -> io::Result<Box<dyn Read + Send>> {
    Ok(Box::new(io::stdin()))
}

/// Reader that waits for input with `poll(2)` and a bounded timeout
/// before each read, instead of sleeping in a blocking `read(2)`.
#[cfg(unix)]
pub struct PollingReader<R> {
    inner: R,
    timeout_ms: i32,
}

#[cfg(unix)]
impl<R: Read + std::os::fd::AsRawFd> PollingReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_timeout(inner, POLL_TIMEOUT_MS)
    }

    pub fn with_timeout(inner: R, timeout_ms: i32) -> Self {
        Self { inner, timeout_ms }
    }

    /// Wait until the descriptor is readable (or hung up).
    fn wait_readable(&self) -> io::Result<()> {
        loop {
            let mut pfd = libc::pollfd {
                fd: self.inner.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `pfd` is a valid, exclusively borrowed pollfd and the
            // count passed is 1.
            let rc = unsafe { libc::poll(&raw mut pfd, 1, self.timeout_ms) };
            match rc {
                0 => continue,
                n if n > 0 => return Ok(()),
                _ => {
                    let e = io::Error::last_os_error();
                    if e.kind() != io::ErrorKind::Interrupted {
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
impl<R: Read + std::os::fd::AsRawFd> Read for PollingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.wait_readable()?;
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn polling_reader_reads_pipe_until_eof() -> anyhow::Result<()> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let mut stdin = child.stdin.take().expect("stdin");
        let stdout = child.stdout.take().expect("stdout");
        stdin.write_all(b"{\"a\":1}\n{\"a\":2}\n")?;
        drop(stdin);

        let mut consumer = StreamConsumer::with_read(
            PollingReader::with_timeout(stdout, 50),
            Delimiters::default(),
        );
        let records: Vec<Vec<u8>> = consumer.get_messages().collect::<Result<_>>()?;
        assert_eq!(records, vec![b"{\"a\":1}".to_vec(), b"{\"a\":2}".to_vec()]);
        child.wait()?;
        Ok(())
    }
}
