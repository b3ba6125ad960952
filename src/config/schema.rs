//! Configuration schema for testbatch.
//!
//! ```text
//! Config (root)
//! └── BatchingConfig   - batch count, report discovery, output location
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchCount, BatchError, BatchResult};
use crate::report::{
    DEFAULT_REPORT_PATTERN, MalformedReportPolicy, ReportCollector, ReportPattern, ReportResult,
};

/// Root configuration structure.
///
/// Every table is optional; an empty file is a valid configuration.
///
/// # Example
///
/// ```
/// use testbatch::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [batching]
///     number_of_batches = 4
/// "#).unwrap();
/// assert_eq!(config.batching.number_of_batches, Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Batch assignment settings.
    #[serde(default)]
    pub batching: BatchingConfig,
}

/// Settings for grouping historical results into batches.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `number_of_batches` | none, must be set here or on the command line |
/// | `results_dir` | `"test-results"` |
/// | `output_dir` | `"batches"` |
/// | `report_pattern` | `'^TEST-.*\.xml$'` |
/// | `on_malformed_report` | `"fail"` |
/// | `require_results` | `false` |
/// | `max_concurrent_reads` | available parallelism |
///
/// # Example
///
/// ```toml
/// [batching]
/// number_of_batches = 4
/// results_dir = "~/ci/previous-run/test-results"
/// output_dir = "build/batches"
/// on_malformed_report = "skip"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchingConfig {
    /// How many parallel workers the suite is split across.
    ///
    /// Kept signed so that zero and negative values reach validation and are
    /// reported as such instead of failing deserialization.
    #[serde(default)]
    pub number_of_batches: Option<i64>,

    /// Directory holding the previous run's JUnit reports.
    ///
    /// A missing directory is treated as a first run with no history unless
    /// `require_results` is set.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Directory the batch manifests are published to.
    ///
    /// Replaced as a whole on every run.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Regex matched against report file names (not paths).
    #[serde(default = "default_report_pattern")]
    pub report_pattern: String,

    /// What to do with a report that cannot be parsed.
    #[serde(default)]
    pub on_malformed_report: MalformedReportPolicy,

    /// Fail when `results_dir` does not exist.
    #[serde(default)]
    pub require_results: bool,

    /// Upper bound on reports read at the same time.
    #[serde(default)]
    pub max_concurrent_reads: Option<usize>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            number_of_batches: None,
            results_dir: default_results_dir(),
            output_dir: default_output_dir(),
            report_pattern: default_report_pattern(),
            on_malformed_report: MalformedReportPolicy::default(),
            require_results: false,
            max_concurrent_reads: None,
        }
    }
}

impl BatchingConfig {
    /// The validated batch count.
    ///
    /// # Errors
    ///
    /// [`BatchError::MissingBatchCount`] when unset and
    /// [`BatchError::InvalidBatchCount`] when not positive.
    pub fn batch_count(&self) -> BatchResult<BatchCount> {
        self.number_of_batches
            .ok_or(BatchError::MissingBatchCount)
            .and_then(BatchCount::new)
    }

    /// Builds a collector from the report settings.
    pub fn report_collector(&self) -> ReportResult<ReportCollector> {
        let mut collector = ReportCollector::new(ReportPattern::new(&self.report_pattern)?)
            .with_policy(self.on_malformed_report)
            .require_root(self.require_results);
        if let Some(max) = self.max_concurrent_reads {
            collector = collector.with_max_concurrent(max);
        }
        Ok(collector)
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("batches")
}

fn default_report_pattern() -> String {
    DEFAULT_REPORT_PATTERN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.batching.results_dir, PathBuf::from("test-results"));
        assert_eq!(config.batching.output_dir, PathBuf::from("batches"));
        assert_eq!(config.batching.report_pattern, DEFAULT_REPORT_PATTERN);
        assert_eq!(
            config.batching.on_malformed_report,
            MalformedReportPolicy::Fail
        );
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [batching]
            number_of_batches = 4
            results_dir = "build/test-results"
            output_dir = "build/batches"
            report_pattern = '^.*\.xml$'
            on_malformed_report = "skip"
            require_results = true
            max_concurrent_reads = 2
            "#,
        )
        .unwrap();

        let batching = &config.batching;
        assert_eq!(batching.batch_count().unwrap().get(), 4);
        assert_eq!(batching.results_dir, PathBuf::from("build/test-results"));
        assert_eq!(batching.on_malformed_report, MalformedReportPolicy::Skip);
        assert!(batching.require_results);
        assert_eq!(batching.max_concurrent_reads, Some(2));
        assert!(batching.report_collector().is_ok());
    }

    #[test]
    fn test_batch_count_validation() {
        let mut batching = BatchingConfig::default();
        assert!(matches!(
            batching.batch_count(),
            Err(BatchError::MissingBatchCount)
        ));

        batching.number_of_batches = Some(0);
        assert!(matches!(
            batching.batch_count(),
            Err(BatchError::InvalidBatchCount(0))
        ));

        batching.number_of_batches = Some(-5);
        assert!(matches!(
            batching.batch_count(),
            Err(BatchError::InvalidBatchCount(-5))
        ));
    }

    #[test]
    fn test_invalid_report_pattern() {
        let batching = BatchingConfig {
            report_pattern: "TEST-(".to_string(),
            ..BatchingConfig::default()
        };
        assert!(batching.report_collector().is_err());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = toml::from_str::<Config>(
            r#"
            [batching]
            on_malformed_report = "ignore"
            "#,
        );
        assert!(err.is_err());
    }
}
