//! Sample sources.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::io::prelude::*;
use std::iter::Peekable;

use log;

use crate::Sample;

/// Default number of consecutive malformed lines a [`LineSource`] tolerates before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 50;

/// Data source error.
#[derive(Debug)]
pub enum SourceError {
    /// Underlying reader failed.
    IO(io::Error),
    /// A line doesn't hold a decimal integer.
    Malformed { line: usize, content: String },
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SourceError::IO(err) => Some(err),
            SourceError::Malformed { .. } => None,
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SourceError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SourceError::Malformed { line, content } => write!(f, "malformed sample at line {}: {:?}", line, content),
        }
    }
}

/// Pull-based forward-only stream of samples.
pub trait DataSource {
    /// Checks if another sample can be read. Doesn't consume anything.
    fn has_more_data(&mut self) -> bool;

    /// Consumes the next sample. `Ok(None)` means the source is exhausted.
    fn next_sample(&mut self) -> Result<Option<Sample>, SourceError>;
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn has_more_data(&mut self) -> bool {
        (**self).has_more_data()
    }

    fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        (**self).next_sample()
    }
}

/// Parses a single raw line into a sample. Blank lines yield `None`.
/// Lines that aren't valid UTF-8 are as malformed as non-numeric ones.
pub(crate) fn parse_line(line: &[u8]) -> Result<Option<Sample>, Box<dyn Error>> {
    let line = std::str::from_utf8(line)?.trim();
    if line.is_empty() {
        return Ok(None);
    }

    return Ok(Some(line.parse::<Sample>()?));
}

/// Live line-oriented source. Reads one decimal sample per line from any buffered reader
/// (stdin, a pipe, a device node).
///
/// Noisy input is tolerated: blank lines are ignored and malformed lines are skipped with a warning.
/// After `max_retries` consecutive malformed lines, or on a read failure, the source is considered
/// disconnected and reports no more data.
pub struct LineSource<R> {
    reader: R,
    max_retries: usize,
    line_no: usize,
    peeked: Option<Sample>,
    connected: bool,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        LineSource {
            reader,
            max_retries: DEFAULT_MAX_RETRIES,
            line_no: 0,
            peeked: None,
            connected: true,
        }
    }

    /// Sets the number of consecutive malformed lines after which the source gives up.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        return self;
    }

    fn fill(&mut self) {
        let mut malformed = 0;
        let mut line = Vec::new();

        while self.peeked.is_none() && self.connected {
            line.clear();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    log::debug!("live source reached end of input after {} lines", self.line_no);
                    self.connected = false;
                }
                Ok(_) => {
                    self.line_no += 1;
                    match parse_line(&line) {
                        Ok(value) => self.peeked = value,
                        Err(err) => {
                            malformed += 1;
                            log::warn!(
                                "skipping invalid sample at line {} ({}): {:?}",
                                self.line_no,
                                err,
                                String::from_utf8_lossy(&line).trim_end()
                            );
                            if malformed >= self.max_retries {
                                log::error!("{} consecutive invalid samples, closing live source", malformed);
                                self.connected = false;
                            }
                        }
                    }
                }
                Err(err) => {
                    log::error!("live source read failed, closing: {}", err);
                    self.connected = false;
                }
            }
        }
    }
}

impl<R: BufRead> DataSource for LineSource<R> {
    fn has_more_data(&mut self) -> bool {
        self.fill();
        self.peeked.is_some()
    }

    fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        self.fill();
        Ok(self.peeked.take())
    }
}

/// In-memory source over any iterator of samples.
pub struct IterSource<I: Iterator<Item = Sample>> {
    inner: Peekable<I>,
}

impl<I: Iterator<Item = Sample>> IterSource<I> {
    pub fn new<T>(items: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        IterSource {
            inner: items.into_iter().peekable(),
        }
    }
}

impl<I: Iterator<Item = Sample>> DataSource for IterSource<I> {
    fn has_more_data(&mut self) -> bool {
        self.inner.peek().is_some()
    }

    fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        Ok(self.inner.next())
    }
}
