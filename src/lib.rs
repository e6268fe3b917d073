//! `e-sort` sorts an unbounded stream of integer telemetry samples under a fixed memory budget.
//!
//! Sorting is done in two passes. During the first pass (acquisition) samples are collected into a
//! fixed-capacity buffer; every time the buffer gets full it is sorted in place and written to disk as
//! a sorted run. During the second pass the runs are merged into one globally sorted output file, holding
//! a single lookahead sample per run in memory. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   at most `capacity` samples are held during acquisition and one sample per run during merge.
//! * **Pluggable sources:**
//!   anything implementing [`DataSource`] can feed the sorter; a tolerant line reader for live input
//!   and a strict reader for persisted runs are provided.
//! * **Deterministic merge:**
//!   equal samples from different runs are emitted in run order.
//! * **Cooperative cancellation:**
//!   a [`CancellationToken`] stops acquisition without losing already ingested samples.
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//! use std::path::Path;
//!
//! use e_sort::{ExternalSorter, ExternalSorterBuilder, LineSource};
//!
//! fn main() {
//!     let mut input = LineSource::new(io::stdin().lock());
//!
//!     let mut sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_capacity(1000)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.sort(&mut input, Path::new("output.sorted.txt")).unwrap();
//!     println!("{} samples sorted in {} runs", summary.samples, summary.runs);
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod merger;
pub mod run;
pub mod sort;
pub mod source;

/// A single telemetry sample.
pub type Sample = i32;

pub use buffer::{BufferError, SortBuffer};
pub use cancel::CancellationToken;
pub use merger::{KWayMerger, MergeSummary};
pub use run::{Run, RunError, RunSource, RunStore};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortSummary};
pub use source::{DataSource, IterSource, LineSource, SourceError};
