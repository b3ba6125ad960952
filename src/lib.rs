//! testbatch: split a test suite into balanced batches using historical timings.
//!
//! Given the JUnit XML reports of a previous run, testbatch groups tests by
//! class and distributes the classes across a fixed number of batches so that
//! parallel CI workers finish at roughly the same time.
//!
//! # Architecture
//!
//! - **Report**: find and parse JUnit reports into [`TestResult`]s
//! - **Grouping**: partition results into per-class [`AtomicGroup`]s
//! - **Batch**: assign groups to batches (longest processing time first),
//!   publish manifests and read them back on the workers
//! - **Config**: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use testbatch::batch::{BatchWriter, plan_batches};
//! use testbatch::config::load_config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testbatch.toml"))?;
//!     let batching = &config.batching;
//!
//!     let results = batching.report_collector()?.collect(&batching.results_dir).await?;
//!     let batches = plan_batches(batching.batch_count()?, results);
//!     BatchWriter::with_default_formats(&batching.output_dir).write(&batches)?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod grouping;
pub mod report;

// Re-export commonly used types
pub use batch::{BatchCount, BatchFilter, TestBatch, assign_batches, plan_batches};
pub use config::{Config, load_config};
pub use grouping::{AtomicGroup, build_atomic_groups};
pub use report::{ReportCollector, TestOutcome, TestResult, parse_junit_xml};
