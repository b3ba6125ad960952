//! Test batches and their assignment.
//!
//! A [`TestBatch`] is one parallel worker's share of the suite. Batches are
//! produced by [`assign_batches`] from [`AtomicGroup`]s, written to disk by
//! [`manifest::BatchWriter`] and read back by workers through
//! [`manifest::load_batch`].
//!
//! ```text
//!  Vec<TestResult> ──► build_atomic_groups() ──► Vec<AtomicGroup>
//!                                                     │
//!                                     assign_batches(count, groups)
//!                                                     ▼
//!                                   Vec<TestBatch> (numbered 1..=count)
//!                                                     │
//!                                     BatchWriter::write() ──► batch-<n>.json
//! ```

pub mod assign;
pub mod manifest;
pub mod summary;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::grouping::{AtomicGroup, build_atomic_groups};
use crate::report::{TestResult, duration_secs};

pub use assign::{assign_batches, makespan};
pub use manifest::{BatchFilter, BatchIndex, BatchWriter, load_batch, load_index};
pub use summary::{print_summary, render_summary};

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors raised while validating, writing or reading batches.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The requested number of batches is zero or negative.
    #[error("Number of batches must be a positive integer, got {0}")]
    InvalidBatchCount(i64),

    /// No number of batches was configured.
    #[error("Number of batches is not configured (use --batches or `number_of_batches`)")]
    MissingBatchCount,

    /// A worker asked for a batch that does not exist.
    #[error("Batch number {number} is out of range 1..={count}")]
    BatchNumberOutOfRange { number: i64, count: usize },

    /// A batch manifest could not be serialized.
    #[error("Failed to serialize batch {number}: {source}")]
    Serialize {
        number: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Writing or publishing the manifest directory failed.
    #[error("Failed to write batch manifests to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest file could not be read.
    #[error("Failed to read batch manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest file is not valid JSON of the expected shape.
    #[error("Invalid batch manifest {}: {source}", .path.display())]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A validated, positive number of batches.
///
/// # Example
///
/// ```
/// use testbatch::batch::BatchCount;
///
/// assert_eq!(BatchCount::new(4).unwrap().get(), 4);
/// assert!(BatchCount::new(0).is_err());
/// assert!(BatchCount::new(-2).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchCount(NonZeroUsize);

impl BatchCount {
    /// Validates `count`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidBatchCount`] for values `<= 0`. The value
    /// is never clamped.
    pub fn new(count: i64) -> BatchResult<Self> {
        usize::try_from(count)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self)
            .ok_or(BatchError::InvalidBatchCount(count))
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Validates a 1-based batch number against this count.
    pub fn check_number(self, number: i64) -> BatchResult<usize> {
        usize::try_from(number)
            .ok()
            .filter(|n| (1..=self.get()).contains(n))
            .ok_or(BatchError::BatchNumberOutOfRange {
                number,
                count: self.get(),
            })
    }
}

impl TryFrom<i64> for BatchCount {
    type Error = BatchError;

    fn try_from(count: i64) -> BatchResult<Self> {
        Self::new(count)
    }
}

/// One worker's share of the test suite.
///
/// Serialized as the per-batch manifest:
///
/// ```json
/// {
///   "number": 1,
///   "tests": [
///     {"classname": "com.example.SomeClass", "name": "a", "duration": 1.0, "result": "successful"}
///   ],
///   "totalDuration": 1.0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestBatch {
    /// 1-based batch number.
    pub number: usize,

    /// Tests to run, grouped by class in assignment order.
    pub tests: Vec<TestResult>,

    /// Sum of the tests' recorded durations.
    #[serde(with = "duration_secs")]
    pub total_duration: Duration,
}

impl TestBatch {
    /// Creates an empty batch.
    pub fn new(number: usize) -> Self {
        Self {
            number,
            tests: Vec::new(),
            total_duration: Duration::ZERO,
        }
    }

    /// Adds every test of `group` to this batch.
    pub fn add_group(&mut self, group: AtomicGroup) {
        self.total_duration = self.total_duration.saturating_add(group.total_duration);
        self.tests.extend(group.tests);
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Distinct classnames, in the order they were assigned.
    pub fn classnames(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.tests
            .iter()
            .map(|t| t.classname.as_str())
            .filter(|c| seen.insert(*c))
            .collect()
    }
}

/// Groups `results` by class and assigns the groups to `count` batches.
pub fn plan_batches(count: BatchCount, results: Vec<TestResult>) -> Vec<TestBatch> {
    assign_batches(count, build_atomic_groups(results))
}
