//! Batch manifests: writing, publishing and reading back.
//!
//! The writer produces one file per batch and per [`ManifestFormat`], plus
//! an `index.json` describing the whole assignment:
//!
//! ```text
//! batches/
//! ├── index.json      BatchIndex (batch count, totals, fingerprint)
//! ├── batch-1.json    TestBatch
//! ├── batch-1.txt     one classname per line
//! ├── batch-2.json
//! └── batch-2.txt
//! ```
//!
//! Files are written into a staging directory beside the output directory
//! and swapped into place only once every file has been written. A failed
//! write leaves the previous manifests untouched, and readers never see a
//! mix of old and new batches.
//!
//! The swap is two renames: the old directory moves aside, then the staged
//! one moves into place. Between them the output directory does not exist,
//! and a concurrent [`BatchFilter::resolve`] sees no manifests and returns
//! [`BatchFilter::All`]. Workers must therefore only read manifests after
//! `group` has finished, which is the normal ordering of a CI pipeline
//! where the manifests are shipped to workers as an artifact.
//!
//! Workers read their share back with [`load_batch`] or, for runners that
//! filter by class name prefix, [`BatchFilter::resolve`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{BatchCount, BatchError, BatchResult, TestBatch};
use crate::report::duration_secs;

/// Name of the index file written next to the batch manifests.
pub const INDEX_FILE: &str = "index.json";

/// Serializes a batch into one manifest file.
///
/// Implementations hold no per-run state; the writer is handed explicit
/// instances and calls them once per batch.
pub trait ManifestFormat: Send + Sync {
    /// File name for batch `number`, relative to the output directory.
    fn file_name(&self, number: usize) -> String;

    /// Renders the file contents.
    fn render(&self, batch: &TestBatch) -> BatchResult<Vec<u8>>;
}

/// `batch-<n>.json`: the full [`TestBatch`] as JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonManifest {
    pretty: bool,
}

impl JsonManifest {
    /// Pretty-printed JSON.
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Single-line JSON.
    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl Default for JsonManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestFormat for JsonManifest {
    fn file_name(&self, number: usize) -> String {
        format!("batch-{number}.json")
    }

    fn render(&self, batch: &TestBatch) -> BatchResult<Vec<u8>> {
        let rendered = if self.pretty {
            serde_json::to_vec_pretty(batch)
        } else {
            serde_json::to_vec(batch)
        };
        let mut bytes = rendered.map_err(|source| BatchError::Serialize {
            number: batch.number,
            source,
        })?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// `batch-<n>.txt`: distinct classnames, one per line.
///
/// Suited to runners that take include patterns, e.g. Gradle's
/// `filter.includeTestsMatching("$line*")`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassListManifest;

impl ManifestFormat for ClassListManifest {
    fn file_name(&self, number: usize) -> String {
        format!("batch-{number}.txt")
    }

    fn render(&self, batch: &TestBatch) -> BatchResult<Vec<u8>> {
        let mut out = String::new();
        for classname in batch.classnames() {
            out.push_str(classname);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

/// Summary of a published assignment, stored as `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIndex {
    /// How many `batch-<n>` manifests exist.
    pub number_of_batches: usize,

    /// Tests across all batches.
    pub total_tests: usize,

    /// Sum of all batch totals.
    #[serde(with = "duration_secs")]
    pub total_duration: Duration,

    /// SHA-256 over the assignment: every batch number with its member
    /// records (classname, name, duration, outcome) in order. Equal
    /// fingerprints mean equal batches.
    pub fingerprint: String,

    /// When the manifests were written.
    pub generated_at: DateTime<Utc>,
}

impl BatchIndex {
    /// Describes `batches`.
    pub fn from_batches(batches: &[TestBatch]) -> Self {
        Self {
            number_of_batches: batches.len(),
            total_tests: batches.iter().map(TestBatch::len).sum(),
            total_duration: batches
                .iter()
                .fold(Duration::ZERO, |total, b| total.saturating_add(b.total_duration)),
            fingerprint: fingerprint(batches),
            generated_at: Utc::now(),
        }
    }

    /// The batch count recorded in the index.
    pub fn batch_count(&self) -> BatchResult<BatchCount> {
        BatchCount::new(i64::try_from(self.number_of_batches).unwrap_or(i64::MAX))
    }
}

fn fingerprint(batches: &[TestBatch]) -> String {
    let mut hasher = Sha256::new();
    for batch in batches {
        hasher.update((batch.number as u64).to_le_bytes());
        for test in &batch.tests {
            hasher.update(test.classname.as_bytes());
            hasher.update([0]);
            hasher.update(test.name.as_bytes());
            hasher.update([0]);
            hasher.update(test.duration.as_nanos().to_le_bytes());
            hasher.update([test.outcome as u8]);
        }
        hasher.update([0xff]);
    }
    format!("{:x}", hasher.finalize())
}

/// Writes and atomically publishes batch manifests.
///
/// # Example
///
/// ```no_run
/// use testbatch::batch::manifest::{BatchWriter, ClassListManifest, JsonManifest};
///
/// # fn run(batches: &[testbatch::batch::TestBatch]) -> testbatch::batch::BatchResult<()> {
/// let writer = BatchWriter::new("build/batches")
///     .with_format(JsonManifest::new())
///     .with_format(ClassListManifest);
/// let index = writer.write(batches)?;
/// println!("wrote {} batches", index.number_of_batches);
/// # Ok(())
/// # }
/// ```
pub struct BatchWriter {
    output_dir: PathBuf,
    formats: Vec<Box<dyn ManifestFormat>>,
}

impl BatchWriter {
    /// Creates a writer with no manifest formats; only `index.json` is written.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            formats: Vec::new(),
        }
    }

    /// Creates a writer producing both JSON and class-list manifests.
    pub fn with_default_formats(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(output_dir)
            .with_format(JsonManifest::new())
            .with_format(ClassListManifest)
    }

    /// Adds a manifest format.
    pub fn with_format<F: ManifestFormat + 'static>(mut self, format: F) -> Self {
        self.formats.push(Box::new(format));
        self
    }

    /// The directory manifests are published to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes every batch and replaces the output directory with the result.
    ///
    /// Anything previously in the output directory is removed, so re-running
    /// with fewer batches leaves no stale manifests behind.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Write`] or [`BatchError::Serialize`]; the output
    /// directory is left as it was.
    pub fn write(&self, batches: &[TestBatch]) -> BatchResult<BatchIndex> {
        let index = BatchIndex::from_batches(batches);
        let parent = parent_dir(&self.output_dir);
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| BatchError::Write { path, source }
        };

        fs::create_dir_all(&parent).map_err(write_err(&parent))?;
        let staging = tempfile::Builder::new()
            .prefix(".testbatch-staging-")
            .tempdir_in(&parent)
            .map_err(write_err(&parent))?;
        make_readable(staging.path()).map_err(write_err(staging.path()))?;

        for batch in batches {
            for format in &self.formats {
                let path = staging.path().join(format.file_name(batch.number));
                let contents = format.render(batch)?;
                fs::write(&path, contents).map_err(write_err(&path))?;
            }
        }

        let index_path = staging.path().join(INDEX_FILE);
        let mut index_json =
            serde_json::to_vec_pretty(&index).map_err(|source| BatchError::Serialize {
                number: 0,
                source,
            })?;
        index_json.push(b'\n');
        fs::write(&index_path, index_json).map_err(write_err(&index_path))?;

        publish(staging, &parent, &self.output_dir)?;
        info!(
            "Wrote {} batch manifests to {}",
            batches.len(),
            self.output_dir.display()
        );
        Ok(index)
    }
}

/// Swaps `staging` into `target`, keeping the old contents until it succeeds.
///
/// `target` is briefly absent between the two renames.
fn publish(staging: TempDir, parent: &Path, target: &Path) -> BatchResult<()> {
    let write_err = |source| BatchError::Write {
        path: target.to_path_buf(),
        source,
    };

    let retired = tempfile::Builder::new()
        .prefix(".testbatch-retired-")
        .tempdir_in(parent)
        .map_err(write_err)?;
    let previous = retired.path().join("previous");

    let had_previous = match fs::symlink_metadata(target) {
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(write_err(e)),
    };
    if had_previous {
        fs::rename(target, &previous).map_err(write_err)?;
        debug!("Retired previous manifests from {}", target.display());
    }

    let staged = staging.keep();
    if let Err(source) = fs::rename(&staged, target) {
        if had_previous && let Err(e) = fs::rename(&previous, target) {
            let kept = retired.keep();
            warn!(
                "Failed to restore previous manifests to {}: {}; they remain in {}",
                target.display(),
                e,
                kept.display()
            );
        }
        if let Err(e) = fs::remove_dir_all(&staged) {
            debug!("Failed to remove {}: {}", staged.display(), e);
        }
        return Err(write_err(source));
    }

    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(unix)]
fn make_readable(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_readable(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Reads `index.json` from `dir`; `None` if it does not exist.
pub fn load_index(dir: &Path) -> BatchResult<Option<BatchIndex>> {
    let path = dir.join(INDEX_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(BatchError::Read { path, source }),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| BatchError::InvalidManifest { path, source })
}

/// Reads `batch-<number>.json` from `dir`.
///
/// When an index is present the number is checked against its batch count.
///
/// # Errors
///
/// Returns [`BatchError::BatchNumberOutOfRange`] for a number outside
/// `1..=count`, [`BatchError::Read`] if the manifest is missing, and
/// [`BatchError::InvalidManifest`] if it does not parse or describes a
/// different batch.
pub fn load_batch(dir: &Path, number: i64) -> BatchResult<TestBatch> {
    let number = match load_index(dir)? {
        Some(index) => index.batch_count()?.check_number(number)?,
        None => usize::try_from(number)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(BatchError::BatchNumberOutOfRange { number, count: 0 })?,
    };

    let path = dir.join(JsonManifest::new().file_name(number));
    let content = fs::read_to_string(&path).map_err(|source| BatchError::Read {
        path: path.clone(),
        source,
    })?;
    let batch: TestBatch = serde_json::from_str(&content).map_err(|source| {
        BatchError::InvalidManifest {
            path: path.clone(),
            source,
        }
    })?;

    if batch.number != number {
        return Err(BatchError::InvalidManifest {
            path,
            source: serde::de::Error::custom(format!(
                "manifest describes batch {}, expected {}",
                batch.number, number
            )),
        });
    }

    Ok(batch)
}

/// Which tests a worker should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFilter {
    /// No manifests were published; run everything.
    All,
    /// Run tests whose id starts with one of these classnames.
    Classes(Vec<String>),
}

impl BatchFilter {
    /// Filter for the classes of `batch`.
    pub fn from_batch(batch: &TestBatch) -> Self {
        Self::Classes(batch.classnames().into_iter().map(str::to_string).collect())
    }

    /// Loads the filter for batch `number` from the manifests in `dir`.
    ///
    /// A missing manifest directory (first run, no history yet) resolves to
    /// [`BatchFilter::All`].
    pub fn resolve(dir: &Path, number: i64) -> BatchResult<Self> {
        if load_index(dir)?.is_none() {
            info!("No batch manifests in {}, running all tests", dir.display());
            return Ok(Self::All);
        }

        let batch = load_batch(dir, number)?;
        info!("Running {} tests from batch {}", batch.len(), batch.number);
        Ok(Self::from_batch(&batch))
    }

    /// `<classname>*` include patterns. Empty for [`BatchFilter::All`].
    pub fn include_patterns(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Classes(classes) => classes.iter().map(|c| format!("{c}*")).collect(),
        }
    }

    /// Returns true if the test with this id belongs to the batch.
    pub fn matches(&self, test_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Classes(classes) => classes.iter().any(|c| test_id.starts_with(c.as_str())),
        }
    }
}
