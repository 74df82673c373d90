//! Delimiter-based record framing.
//!
//! Records on the wire are separated by an end-of-message (EOM) marker. An
//! optional end-of-process (EOP) marker, seen at a record boundary, closes
//! the logical sub-stream: nothing after it is read from that source.

use crate::error::ConfigError;
use log::{debug, warn};
use std::io::{self, Read};

/// Default end-of-message marker.
pub const DEFAULT_EOM: &[u8] = b"\n";
/// Default end-of-process marker in stream mode.
pub const STREAM_EOP: &[u8] = b"\0";

const READ_CHUNK: usize = 64 * 1024;

/// EOM/EOP pair shared by a consumer and the producer feeding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    eom: Vec<u8>,
    eop: Vec<u8>,
}

impl Delimiters {
    /// Build a delimiter pair. An empty `eop` disables end-of-process
    /// handling.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Delimiter`] if `eom` is empty.
    pub fn new(eom: impl Into<Vec<u8>>, eop: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let eom = eom.into();
        if eom.is_empty() {
            return Err(ConfigError::Delimiter(
                "end-of-message marker must not be empty".into(),
            ));
        }
        Ok(Self {
            eom,
            eop: eop.into(),
        })
    }

    /// Newline EOM with the given EOP.
    #[must_use]
    pub fn with_eop(eop: &[u8]) -> Self {
        Self {
            eom: DEFAULT_EOM.to_vec(),
            eop: eop.to_vec(),
        }
    }

    #[must_use]
    pub fn eom(&self) -> &[u8] {
        &self.eom
    }

    #[must_use]
    pub fn eop(&self) -> &[u8] {
        &self.eop
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::with_eop(b"")
    }
}

/// Splits a byte source into records.
///
/// - the EOM marker is stripped from each record;
/// - empty and whitespace-only records are skipped;
/// - a trailing record without EOM is returned as the last record, with a
///   warning;
/// - an EOP marker at the start of a record ends the iteration.
pub struct DelimitedReader<R> {
    inner: R,
    delimiters: Delimiters,
    buf: Vec<u8>,
    pos: usize,
    // offset (from `pos`) up to which no EOM was found
    scanned: usize,
    eof: bool,
    done: bool,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(inner: R, delimiters: Delimiters) -> Self {
        Self {
            inner,
            delimiters,
            buf: Vec::new(),
            pos: 0,
            scanned: 0,
            eof: false,
            done: false,
        }
    }

    /// Whether an EOP marker was reached (as opposed to end of input).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done
    }

    /// Next record, or `None` when the source (or sub-stream) is over.
    ///
    /// # Errors
    ///
    /// Propagates read errors of the underlying source. After an error the
    /// reader yields nothing more.
    pub fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        while !self.done {
            let pending = &self.buf[self.pos..];
            let eop = self.delimiters.eop();
            if !eop.is_empty() {
                if pending.starts_with(eop) {
                    debug!("end-of-process marker reached");
                    self.done = true;
                    break;
                }
                if !self.eof && pending.len() < eop.len() && eop.starts_with(pending) {
                    self.fill()?;
                    continue;
                }
            }

            let eom = self.delimiters.eom();
            if let Some(i) = find(&pending[self.scanned..], eom) {
                let end = self.scanned + i;
                let record = pending[..end].to_vec();
                self.pos += end + eom.len();
                self.scanned = 0;
                if is_blank(&record) {
                    continue;
                }
                return Ok(Some(record));
            }

            if self.eof {
                let record = pending.to_vec();
                self.pos = self.buf.len();
                self.done = true;
                if is_blank(&record) {
                    break;
                }
                warn!(
                    "input ended in the middle of a message ({} bytes without end-of-message marker)",
                    record.len()
                );
                return Ok(Some(record));
            }
            // keep a tail of len(eom) - 1 bytes: the marker may straddle reads
            self.scanned = pending.len().saturating_sub(eom.len() - 1);
            self.fill()?;
        }
        Ok(None)
    }

    fn fill(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);
        let n = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(start);
                    self.done = true;
                    return Err(e);
                }
            }
        };
        self.buf.truncate(start + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for DelimitedReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [b] => haystack.iter().position(|c| c == b),
        _ => haystack.windows(needle.len()).position(|w| w == needle),
    }
}

fn is_blank(record: &[u8]) -> bool {
    record.iter().all(u8::is_ascii_whitespace)
}

/// Decode backslash escapes in a delimiter given on the command line.
///
/// Supports `\n`, `\r`, `\t`, `\0`, `\a`, `\b`, `\f`, `\v`, `\\`, `\'`,
/// `\"` and `\xHH`. Unknown escapes are kept literally.
///
/// # Errors
///
/// Returns [`ConfigError::Delimiter`] for a truncated or invalid `\x` escape.
pub fn unescape(s: &str) -> Result<Vec<u8>, ConfigError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c != b'\\' || i == bytes.len() {
            out.push(c);
            continue;
        }
        let e = bytes[i];
        i += 1;
        match e {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'0' => out.push(0),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' | b'\'' | b'"' => out.push(e),
            b'x' => {
                let hex = bytes
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| ConfigError::Delimiter(format!("invalid \\x escape in {s:?}")))?;
                out.push(hex);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}
