//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::buffer::{BufferError, SortBuffer};
use crate::cancel::CancellationToken;
use crate::merger::{KWayMerger, MergeSummary};
use crate::run::{Run, RunError, RunStore};
use crate::source::{DataSource, SourceError};

/// Default number of samples per run.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary or run directory creation error.
    TempDir(io::Error),
    /// Sort buffer initialization error.
    Buffer(BufferError),
    /// Input data stream error.
    Input(SourceError),
    /// Run persistence error.
    Run(RunError),
    /// Output file creation or writing error.
    Output(io::Error),
    /// Cancellation was requested before the merge pass. Runs are kept in `run_dir`.
    Cancelled { runs: usize, run_dir: PathBuf },
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::Buffer(err) => Some(err),
            SortError::Input(err) => Some(err),
            SortError::Run(err) => Some(err),
            SortError::Output(err) => Some(err),
            SortError::Cancelled { .. } => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "run directory not created: {}", err),
            SortError::Buffer(err) => write!(f, "sort buffer initialization failed: {}", err),
            SortError::Input(err) => write!(f, "input data stream error: {}", err),
            SortError::Run(err) => write!(f, "run not saved: {}", err),
            SortError::Output(err) => write!(f, "output not written: {}", err),
            SortError::Cancelled { runs, run_dir } => write!(
                f,
                "sorting cancelled before merge, {} runs kept in {}",
                runs,
                run_dir.display()
            ),
        }
    }
}

/// Whole sort statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of ingested samples.
    pub samples: usize,
    /// Number of produced runs.
    pub runs: usize,
    /// Merge pass statistics.
    pub merge: MergeSummary,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Maximum number of samples per run.
    capacity: usize,
    /// Parent directory of the temporary run directory.
    tmp_dir: Option<Box<Path>>,
    /// Directory runs are persisted to.
    run_dir: Option<Box<Path>>,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Cancellation token polled during sorting.
    cancellation: CancellationToken,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.capacity,
            self.tmp_dir.as_deref(),
            self.run_dir.as_deref(),
            self.rw_buf_size,
            self.cancellation,
        )
    }

    /// Sets the number of samples kept in memory and written per run.
    pub fn with_capacity(mut self, capacity: usize) -> ExternalSorterBuilder {
        self.capacity = capacity;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets directory runs are written to and kept in after sorting.
    /// Takes precedence over [`ExternalSorterBuilder::with_tmp_dir`].
    pub fn with_run_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.run_dir = Some(path.into());
        return self;
    }

    /// Sets run and output file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> ExternalSorterBuilder {
        self.cancellation = token;
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            capacity: DEFAULT_CAPACITY,
            tmp_dir: None,
            run_dir: None,
            rw_buf_size: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// External sorter.
///
/// Sorting is done in two sequential phases. During acquisition samples are pulled from the input
/// into a fixed-capacity [`SortBuffer`]; every time the buffer gets full it is sorted and written
/// as a run. During the merge pass all runs are read back and merged into a single output file.
pub struct ExternalSorter {
    /// Maximum number of samples per run.
    capacity: usize,
    /// Run storage.
    run_store: RunStore,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Cancellation token polled during sorting.
    cancellation: CancellationToken,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `capacity` - Number of samples per run. Must be positive.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `run_path` - Directory runs are kept in. If set, `tmp_path` is ignored.
    /// * `rw_buf_size` - Run and output file read/write buffer size.
    /// * `cancellation` - Token polled after each ingested sample and before the merge pass.
    pub fn new(
        capacity: usize,
        tmp_path: Option<&Path>,
        run_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        cancellation: CancellationToken,
    ) -> Result<Self, SortError> {
        if capacity == 0 {
            return Err(SortError::Buffer(BufferError::ZeroCapacity));
        }

        return Ok(ExternalSorter {
            capacity,
            run_store: Self::init_run_store(tmp_path, run_path, rw_buf_size)?,
            rw_buf_size,
            cancellation,
        });
    }

    fn init_run_store(
        tmp_path: Option<&Path>,
        run_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<RunStore, SortError> {
        match run_path {
            Some(run_path) => RunStore::persistent(run_path, rw_buf_size),
            None => RunStore::temporary(tmp_path, rw_buf_size),
        }
        .map_err(SortError::TempDir)
    }

    /// Directory runs are written to.
    pub fn run_dir(&self) -> &Path {
        self.run_store.path()
    }

    /// Sorts samples from the input into the `output` file.
    ///
    /// # Arguments
    /// * `input` - Input stream samples to be fetched from
    /// * `output` - Sorted output file path
    pub fn sort<S: DataSource>(&mut self, input: &mut S, output: &Path) -> Result<SortSummary, SortError> {
        let (runs, samples) = self.acquire(input)?;
        let merge = self.merge(&runs, output)?;

        return Ok(SortSummary {
            samples,
            runs: runs.len(),
            merge,
        });
    }

    /// Acquisition phase. Splits the input into sorted runs.
    /// Returns the produced runs and the number of ingested samples.
    ///
    /// Stops when the input is exhausted or cancellation is requested; in both cases the samples
    /// already buffered are flushed as a final, possibly shorter, run.
    pub fn acquire<S: DataSource>(&mut self, input: &mut S) -> Result<(Vec<Run>, usize), SortError> {
        log::info!("acquisition started (samples per run: {})", self.capacity);

        let mut buffer = SortBuffer::new(self.capacity).map_err(SortError::Buffer)?;
        let mut runs = Vec::new();
        let mut samples = 0;

        while input.has_more_data() {
            let value = match input.next_sample().map_err(SortError::Input)? {
                Some(value) => value,
                None => break,
            };
            log::trace!("sample read: {}", value);
            samples += 1;

            if !buffer.insert(value) {
                log::debug!("buffer full, sorting {} samples", buffer.size());
                runs.push(self.flush(&mut buffer)?);
                buffer.insert(value);
            }

            if self.cancellation.is_cancelled() {
                log::warn!("cancellation requested, stopping acquisition");
                break;
            }
        }

        if !buffer.is_empty() {
            log::debug!("flushing last {} samples", buffer.size());
            runs.push(self.flush(&mut buffer)?);
        }

        log::info!("acquisition done: {} samples in {} runs", samples, runs.len());

        return Ok((runs, samples));
    }

    fn flush(&mut self, buffer: &mut SortBuffer) -> Result<Run, SortError> {
        buffer.sort();
        let run = self.run_store.persist(buffer).map_err(SortError::Run)?;
        buffer.clear();

        return Ok(run);
    }

    /// Merge phase. Merges `runs` into the `output` file, one sample per line.
    ///
    /// A run that can't be opened or read is skipped with a warning and counted in
    /// [`MergeSummary::failed_runs`]. Failing to create or write the output aborts the merge. The output is
    /// written to a `.part` sibling first and renamed once complete, so a failed merge leaves no
    /// truncated output behind.
    ///
    /// If cancellation was requested the merge doesn't start and the run directory is detached from
    /// the sorter, so runs stay on disk even if they were written to a temporary directory.
    pub fn merge(&mut self, runs: &[Run], output: &Path) -> Result<MergeSummary, SortError> {
        if self.cancellation.is_cancelled() {
            let run_dir = self.run_store.keep().to_path_buf();
            log::warn!("merge skipped, {} runs are kept in {}", runs.len(), run_dir.display());
            return Err(SortError::Cancelled {
                runs: runs.len(),
                run_dir,
            });
        }

        let part_path = Self::part_path(output);
        let result = self
            .merge_to_file(runs, &part_path)
            .and_then(|summary| fs::rename(&part_path, output).map(|_| summary));

        let summary = match result {
            Ok(summary) => summary,
            Err(err) => {
                if let Err(remove_err) = fs::remove_file(&part_path) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        log::warn!("partial output {} not removed: {}", part_path.display(), remove_err);
                    }
                }
                return Err(SortError::Output(err));
            }
        };

        log::info!("sorted output written to {}", output.display());

        return Ok(summary);
    }

    fn merge_to_file(&self, runs: &[Run], path: &Path) -> io::Result<MergeSummary> {
        let file = fs::File::create(path)?;
        let mut output_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        let mut sources = Vec::with_capacity(runs.len());
        let mut unopened = 0;
        for run in runs {
            match self.run_store.open(run) {
                Ok(source) => sources.push(source),
                Err(err) => {
                    log::warn!("run {} skipped: {}", run.path().display(), err);
                    unopened += 1;
                }
            }
        }

        let mut summary = KWayMerger::new(sources).merge_into(&mut output_writer)?;
        summary.runs += unopened;
        summary.failed_runs += unopened;

        return Ok(summary);
    }

    fn part_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".part");
        PathBuf::from(name)
    }
}
