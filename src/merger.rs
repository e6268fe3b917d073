//! K-way merger.

use std::io;
use std::io::prelude::*;

use log;

use crate::source::DataSource;
use crate::Sample;

/// Merge pass statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Number of merged runs, failed ones included.
    pub runs: usize,
    /// Number of runs that failed to open or to read and were cut short.
    pub failed_runs: usize,
    /// Number of emitted samples.
    pub emitted: usize,
}

/// Linear scan K-way merger.
/// Merges multiple sorted sources into a single sorted output keeping a single lookahead sample per source.
/// Each emission scans all lookahead slots, so time complexity is *m* \* *k* where *m* is the number of
/// samples and *k* is the number of sources. For a large *k* a binary heap would bring it down to
/// *m* \* log(*k*).
///
/// A source that fails while being read is treated as exhausted: the failure is logged, the samples
/// read from it so far are kept and merging goes on with the remaining sources.
pub struct KWayMerger<S: DataSource> {
    sources: Vec<S>,
    // lookahead per source, `None` once the source is exhausted
    heads: Vec<Option<Sample>>,
    failed: usize,
    emitted: usize,
    initiated: bool,
}

impl<S: DataSource> KWayMerger<S> {
    /// Creates an instance of a merger using `sources` as inputs.
    /// Source samples should be sorted in ascending order otherwise the result is undefined.
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let sources = Vec::from_iter(sources);
        let heads = vec![None; sources.len()];

        return KWayMerger {
            sources,
            heads,
            failed: 0,
            emitted: 0,
            initiated: false,
        };
    }

    /// Returns the smallest pending sample together with the index of the source it came from.
    /// Ties are resolved in favour of the lowest source index.
    pub fn next_entry(&mut self) -> Option<(usize, Sample)> {
        if !self.initiated {
            for idx in 0..self.sources.len() {
                self.advance(idx);
            }
            self.initiated = true;
        }

        let idx = self.select_min()?;
        let value = self.heads[idx].take()?;
        self.advance(idx);
        self.emitted += 1;

        return Some((idx, value));
    }

    /// Drains the merger into `output`, one sample per line.
    /// Returns the merge statistics. Only output write failures are reported as errors.
    pub fn merge_into<W: Write>(mut self, output: &mut W) -> io::Result<MergeSummary> {
        log::info!("merging {} runs", self.sources.len());

        while let Some((_, value)) = self.next_entry() {
            writeln!(output, "{}", value)?;
        }
        output.flush()?;

        let summary = self.summary();
        log::info!(
            "merge done: {} samples emitted, {} of {} runs failed",
            summary.emitted,
            summary.failed_runs,
            summary.runs
        );

        return Ok(summary);
    }

    pub fn summary(&self) -> MergeSummary {
        MergeSummary {
            runs: self.sources.len(),
            failed_runs: self.failed,
            emitted: self.emitted,
        }
    }

    fn select_min(&self) -> Option<usize> {
        let mut min: Option<(usize, Sample)> = None;
        for (idx, head) in self.heads.iter().enumerate() {
            if let Some(value) = *head {
                match min {
                    Some((_, min_value)) if min_value <= value => {}
                    _ => min = Some((idx, value)),
                }
            }
        }

        min.map(|(idx, _)| idx)
    }

    fn advance(&mut self, idx: usize) {
        let source = &mut self.sources[idx];
        if !source.has_more_data() {
            return;
        }

        match source.next_sample() {
            Ok(value) => self.heads[idx] = value,
            Err(err) => {
                log::warn!("run #{} is cut short: {}", idx, err);
                self.failed += 1;
            }
        }
    }
}

impl<S: DataSource> Iterator for KWayMerger<S> {
    type Item = Sample;

    /// Returns the next sample from the sources in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|(_, value)| value)
    }
}
