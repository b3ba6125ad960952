//! Historical test report collection.
//!
//! This module turns a directory of JUnit XML reports from a previous build
//! into a flat, deterministically ordered list of [`TestResult`] records.
//! Those records are the timing input for batch assignment.
//!
//! # Pipeline
//!
//! ```text
//!   results dir ──► scan::find_report_files() ──► Vec<PathBuf>
//!                                                     │
//!                       (one task per file, bounded)  ▼
//!                                    junit::parse_junit_xml()
//!                                                     │
//!                           concatenate + sort        ▼
//!                                              Vec<TestResult>
//! ```
//!
//! # Failure Policy
//!
//! A report that cannot be read or parsed aborts collection by default,
//! since dropping it would skew the load balancing. The
//! [`MalformedReportPolicy::Skip`] policy downgrades this to a warning for
//! environments with known-flaky report generation.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Results directory missing | Empty result set (or error if required) |
//! | No matching report files | Empty result set |
//! | Malformed/unreadable report, `fail` | [`ReportError`] naming the file |
//! | Malformed/unreadable report, `skip` | Warning, file ignored |

pub mod junit;
pub mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub use junit::{JunitError, parse_junit_xml};
pub use scan::{DEFAULT_REPORT_PATTERN, ReportPattern, find_report_files};

/// Result type for report collection.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors raised while locating, reading or parsing test reports.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// A report file exists but is not a well-formed JUnit document.
    #[error("Failed to parse test report {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: JunitError,
    },

    /// A report file could not be read.
    #[error("Failed to read test report {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configured report file name pattern is not a valid regex.
    #[error("Invalid report pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The results directory is required but does not exist.
    #[error("Test results directory not found: {}", .0.display())]
    MissingResultsDir(PathBuf),

    /// A parse task panicked or was cancelled.
    #[error("Report parsing task failed: {0}")]
    Task(String),

    /// I/O error while walking the results directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single test execution as recorded in a report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    /// No `<failure>`, `<error>` or `<skipped>` child.
    Successful,
    /// The testcase carried a `<failure>` or `<error>` child.
    Failed,
    /// The testcase carried a `<skipped>` child.
    Skipped,
}

/// One `<testcase>` from a historical report.
///
/// Records are ordered by classname, then name, then duration, then outcome.
/// Collection sorts with this order so identical inputs always produce an
/// identical sequence, whatever order the files finished parsing in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestResult {
    /// Fully-qualified class name; the atomic grouping key.
    pub classname: String,

    /// Test method name.
    pub name: String,

    /// Recorded execution time.
    #[serde(with = "duration_secs")]
    pub duration: Duration,

    /// Recorded outcome, serialized as `result`.
    #[serde(rename = "result")]
    pub outcome: TestOutcome,
}

impl TestResult {
    /// Creates a successful result.
    pub fn new(classname: impl Into<String>, name: impl Into<String>, duration: Duration) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
            duration,
            outcome: TestOutcome::Successful,
        }
    }

    /// Sets the outcome.
    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Returns `classname.name`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.classname, self.name)
    }
}

/// What to do with a report that cannot be read or parsed.
///
/// ```toml
/// [batching]
/// on_malformed_report = "skip"
/// ```
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MalformedReportPolicy {
    /// Abort the whole run.
    #[default]
    Fail,
    /// Log a warning and continue without the file.
    Skip,
}

/// Collects [`TestResult`]s from every report under a directory.
///
/// Files are read and parsed concurrently, at most `max_concurrent` at a
/// time, and the merged records are sorted before being returned.
///
/// # Example
///
/// ```no_run
/// use testbatch::report::{MalformedReportPolicy, ReportCollector, ReportPattern};
///
/// # async fn run() -> testbatch::report::ReportResult<()> {
/// let collector = ReportCollector::new(ReportPattern::default())
///     .with_policy(MalformedReportPolicy::Skip)
///     .with_max_concurrent(8);
///
/// let results = collector.collect(std::path::Path::new("test-results")).await?;
/// println!("{} tests", results.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReportCollector {
    pattern: ReportPattern,
    policy: MalformedReportPolicy,
    max_concurrent: usize,
    require_root: bool,
    progress: Option<ProgressBar>,
}

impl ReportCollector {
    /// Creates a collector matching report files against `pattern`.
    pub fn new(pattern: ReportPattern) -> Self {
        Self {
            pattern,
            policy: MalformedReportPolicy::default(),
            max_concurrent: default_concurrency(),
            require_root: false,
            progress: None,
        }
    }

    /// Sets the malformed report policy.
    pub fn with_policy(mut self, policy: MalformedReportPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limits how many reports are read at once. Values below 1 are raised to 1.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Treats a missing results directory as an error instead of a first run.
    pub fn require_root(mut self, required: bool) -> Self {
        self.require_root = required;
        self
    }

    /// Advances `progress` once per processed report.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Collects all test results under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be walked, if it is missing
    /// while required, or if any report fails under [`MalformedReportPolicy::Fail`].
    pub async fn collect(&self, root: &Path) -> ReportResult<Vec<TestResult>> {
        if self.require_root && !tokio::fs::try_exists(root).await? {
            return Err(ReportError::MissingResultsDir(root.to_path_buf()));
        }

        let files = find_report_files(root, &self.pattern).await?;
        if files.is_empty() {
            info!(
                "No test reports matching {} under {}",
                self.pattern.as_str(),
                root.display()
            );
            return Ok(Vec::new());
        }

        info!("Parsing {} test reports from {}", files.len(), root.display());
        if let Some(progress) = &self.progress {
            progress.set_length(files.len() as u64);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let handles: Vec<_> = files
            .into_iter()
            .map(|path| {
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    let parsed = read_report(&path).await;
                    (path, parsed)
                })
            })
            .collect();

        // join_all keeps spawn order, which is the sorted file order, so the
        // first reported failure is the same on every run.
        let mut results = Vec::new();
        let mut skipped = 0usize;
        for joined in join_all(handles).await {
            let (path, parsed) = joined.map_err(|e| ReportError::Task(e.to_string()))?;
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }

            match parsed {
                Ok(mut tests) => {
                    debug!("{}: {} testcases", path.display(), tests.len());
                    results.append(&mut tests);
                }
                Err(e) => match self.policy {
                    MalformedReportPolicy::Fail => {
                        if let Some(progress) = &self.progress {
                            progress.abandon();
                        }
                        return Err(e);
                    }
                    MalformedReportPolicy::Skip => {
                        warn!("Skipping test report: {}", e);
                        skipped += 1;
                    }
                },
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }
        if skipped > 0 {
            warn!("{} test reports were skipped; timings may be incomplete", skipped);
        }

        results.sort();
        Ok(results)
    }
}

/// Reads and parses a single report file.
async fn read_report(path: &Path) -> ReportResult<Vec<TestResult>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    parse_junit_xml(&content).map_err(|source| ReportError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Serializes a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
