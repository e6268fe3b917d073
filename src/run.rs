//! Sorted run persistence.
//!
//! A run is a plain text file holding one decimal sample per line in ascending order, without any
//! header or trailer. Runs are named `chunk_NN.tmp` after a 1-based counter so they can't be confused
//! with the final output.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::buffer::{BufferError, SortBuffer};
use crate::source::{parse_line, DataSource, SourceError};
use crate::Sample;

/// Run persistence error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// Buffer has nothing to persist.
    Buffer(BufferError),
    /// Buffer was modified after the last sort.
    Unsorted,
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            RunError::IO(err) => Some(err),
            RunError::Buffer(err) => Some(err),
            RunError::Unsorted => None,
        }
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "I/O operation failed: {}", err),
            RunError::Buffer(err) => write!(f, "buffer can't be persisted: {}", err),
            RunError::Unsorted => write!(f, "buffer must be sorted before it is persisted"),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// Handle of a persisted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    path: PathBuf,
    len: usize,
}

impl Run {
    /// Run file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of samples in the run.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

enum RunDir {
    /// Removed together with the store.
    Temporary(tempfile::TempDir),
    /// Owned by the caller, runs outlive the store.
    Persistent(PathBuf),
}

impl RunDir {
    fn path(&self) -> &Path {
        match self {
            RunDir::Temporary(dir) => dir.path(),
            RunDir::Persistent(path) => path,
        }
    }
}

/// Writes sorted buffers to run files and reads them back as [`DataSource`]s.
pub struct RunStore {
    dir: RunDir,
    rw_buf_size: Option<usize>,
    next_id: usize,
}

impl RunStore {
    /// Creates a store in a new temporary directory. The directory and all runs in it are removed
    /// when the store is dropped.
    ///
    /// # Arguments
    /// * `tmp_path` - Parent of the temporary directory. If the parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    pub fn temporary(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let tmp_dir = match tmp_path {
            Some(tmp_path) => tempfile::tempdir_in(tmp_path),
            None => tempfile::tempdir(),
        }?;

        log::info!("using {} as a temporary run directory", tmp_dir.path().display());

        return Ok(RunStore {
            dir: RunDir::Temporary(tmp_dir),
            rw_buf_size,
            next_id: 1,
        });
    }

    /// Creates a store writing runs into `path`, creating the directory if needed. Runs are kept
    /// after the store is dropped.
    pub fn persistent(path: &Path, rw_buf_size: Option<usize>) -> io::Result<Self> {
        fs::create_dir_all(path)?;

        log::info!("using {} as a run directory", path.display());

        return Ok(RunStore {
            dir: RunDir::Persistent(path.to_path_buf()),
            rw_buf_size,
            next_id: 1,
        });
    }

    /// Directory the runs are written to.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Detaches a temporary directory from the store so that the runs written so far outlive it.
    /// Returns the directory the runs are kept in.
    pub fn keep(&mut self) -> &Path {
        let dir = std::mem::replace(&mut self.dir, RunDir::Persistent(PathBuf::new()));
        self.dir = match dir {
            RunDir::Temporary(tmp_dir) => RunDir::Persistent(tmp_dir.into_path()),
            persistent => persistent,
        };

        self.dir.path()
    }

    /// Writes the buffer content as a new run. The buffer must be sorted and non-empty and is left
    /// untouched.
    pub fn persist(&mut self, buffer: &SortBuffer) -> Result<Run, RunError> {
        if buffer.is_empty() {
            return Err(RunError::Buffer(BufferError::Empty));
        }
        if !buffer.is_sorted() {
            return Err(RunError::Unsorted);
        }

        let path = self.dir.path().join(format!("chunk_{:02}.tmp", self.next_id));
        let file = fs::File::create(&path)?;

        let mut run_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        for value in buffer.iter() {
            writeln!(run_writer, "{}", value)?;
        }
        run_writer.flush()?;

        self.next_id += 1;
        log::debug!("run {} written ({} samples)", path.display(), buffer.size());

        return Ok(Run {
            path,
            len: buffer.size(),
        });
    }

    /// Opens a run for sequential reading.
    pub fn open(&self, run: &Run) -> io::Result<RunSource<fs::File>> {
        let file = fs::File::open(run.path())?;

        let run_reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        log::debug!("run {} opened", run.path().display());

        return Ok(RunSource::new(run_reader));
    }
}

/// Run-backed source. Reads one sample per line with a single line of lookahead.
///
/// Unlike [`crate::LineSource`] it doesn't tolerate malformed content: a malformed line or a read
/// failure is reported once by [`DataSource::next_sample`] and the source is exhausted afterwards.
pub struct RunSource<R> {
    reader: io::BufReader<R>,
    line_no: usize,
    peeked: Option<Result<Sample, SourceError>>,
    done: bool,
}

impl<R: Read> RunSource<R> {
    pub fn new(reader: io::BufReader<R>) -> Self {
        RunSource {
            reader,
            line_no: 0,
            peeked: None,
            done: false,
        }
    }

    fn fill(&mut self) {
        let mut line = Vec::new();

        while self.peeked.is_none() && !self.done {
            line.clear();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    match parse_line(&line) {
                        Ok(Some(value)) => self.peeked = Some(Ok(value)),
                        Ok(None) => continue,
                        Err(_) => {
                            self.peeked = Some(Err(SourceError::Malformed {
                                line: self.line_no,
                                content: String::from_utf8_lossy(&line).trim_end().to_string(),
                            }));
                            self.done = true;
                        }
                    }
                }
                Err(err) => {
                    self.peeked = Some(Err(SourceError::IO(err)));
                    self.done = true;
                }
            }
        }
    }
}

impl<R: Read> DataSource for RunSource<R> {
    fn has_more_data(&mut self) -> bool {
        self.fill();
        self.peeked.is_some()
    }

    fn next_sample(&mut self) -> Result<Option<Sample>, SourceError> {
        self.fill();
        self.peeked.take().transpose()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{RunError, RunSource, RunStore};
    use crate::buffer::{BufferError, SortBuffer};
    use crate::source::{DataSource, SourceError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sorted_buffer(values: &[i32]) -> SortBuffer {
        let mut buffer = SortBuffer::new(values.len().max(1)).unwrap();
        for value in values {
            assert!(buffer.insert(*value));
        }
        buffer.sort();
        buffer
    }

    fn read_all(source: &mut impl DataSource) -> Result<Vec<i32>, SourceError> {
        let mut result = Vec::new();
        while let Some(value) = source.next_sample()? {
            result.push(value);
        }
        Ok(result)
    }

    #[rstest]
    fn test_persist_and_open(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::temporary(Some(tmp_dir.path()), None).unwrap();

        let run = store.persist(&sorted_buffer(&[7, 2, 9, 4])).unwrap();
        assert_eq!(run.len(), 4);
        assert_eq!(run.path().file_name().unwrap(), "chunk_01.tmp");
        assert_eq!(fs::read_to_string(run.path()).unwrap(), "2\n4\n7\n9\n");

        let mut source = store.open(&run).unwrap();
        assert!(source.has_more_data());
        assert_eq!(read_all(&mut source).unwrap(), vec![2, 4, 7, 9]);
        assert_eq!(source.has_more_data(), false);
    }

    #[rstest]
    fn test_run_naming(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::persistent(&tmp_dir.path().join("runs"), Some(16)).unwrap();

        let names: Vec<_> = (0..11)
            .map(|i| store.persist(&sorted_buffer(&[i])).unwrap())
            .map(|run| run.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names[0], "chunk_01.tmp");
        assert_eq!(names[9], "chunk_10.tmp");
        assert_eq!(names[10], "chunk_11.tmp");
    }

    #[rstest]
    fn test_temporary_store_cleanup(tmp_dir: tempfile::TempDir) {
        let store = RunStore::temporary(Some(tmp_dir.path()), None).unwrap();
        let path = store.path().to_path_buf();
        assert!(path.exists());

        drop(store);
        assert_eq!(path.exists(), false);
    }

    #[rstest]
    fn test_persistent_store_keeps_runs(tmp_dir: tempfile::TempDir) {
        let run = {
            let mut store = RunStore::persistent(tmp_dir.path(), None).unwrap();
            store.persist(&sorted_buffer(&[1])).unwrap()
        };
        assert!(run.path().exists());
    }

    #[rstest]
    fn test_keep_temporary_store(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::temporary(Some(tmp_dir.path()), None).unwrap();
        let run = store.persist(&sorted_buffer(&[3, 1])).unwrap();

        let kept = store.keep().to_path_buf();
        assert_eq!(kept, run.path().parent().unwrap());

        // the store stays usable after keep
        let next = store.persist(&sorted_buffer(&[2])).unwrap();
        assert_eq!(next.path().file_name().unwrap(), "chunk_02.tmp");

        drop(store);
        assert!(kept.exists());
        assert_eq!(fs::read_to_string(run.path()).unwrap(), "1\n3\n");
    }

    #[rstest]
    fn test_persist_preconditions(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::temporary(Some(tmp_dir.path()), None).unwrap();

        let empty = SortBuffer::new(2).unwrap();
        assert!(matches!(store.persist(&empty), Err(RunError::Buffer(BufferError::Empty))));

        let mut unsorted = SortBuffer::new(2).unwrap();
        unsorted.insert(2);
        unsorted.insert(1);
        assert!(matches!(store.persist(&unsorted), Err(RunError::Unsorted)));
    }

    #[test]
    fn test_run_source_malformed() {
        let mut source = RunSource::new(io::BufReader::new("1\n3\nfoo\n5\n".as_bytes()));

        assert_eq!(source.next_sample().unwrap(), Some(1));
        assert_eq!(source.next_sample().unwrap(), Some(3));
        assert!(source.has_more_data());
        match source.next_sample() {
            Err(SourceError::Malformed { line, content }) => {
                assert_eq!(line, 3);
                assert_eq!(content, "foo");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(source.has_more_data(), false);
        assert_eq!(source.next_sample().unwrap(), None);
    }

    #[test]
    fn test_run_source_invalid_utf8() {
        let mut source = RunSource::new(io::BufReader::new(&b"1\n\xff\n2\n"[..]));

        assert_eq!(source.next_sample().unwrap(), Some(1));
        match source.next_sample() {
            Err(SourceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(source.has_more_data(), false);
    }

    #[test]
    fn test_run_source_zero_and_blank_lines() {
        let mut source = RunSource::new(io::BufReader::new("0\n\n0\n".as_bytes()));
        assert_eq!(read_all(&mut source).unwrap(), vec![0, 0]);
    }
}
