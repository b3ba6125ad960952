//! Locating JUnit report files.
//!
//! Gradle, Maven Surefire and most JVM runners write one `TEST-<class>.xml`
//! file per test class, scattered across module build directories. The
//! scanner walks the whole tree and keeps files whose *name* matches the
//! report pattern.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::{ReportError, ReportResult};

/// Default report file name pattern (`TEST-*.xml`).
pub const DEFAULT_REPORT_PATTERN: &str = r"^TEST-.*\.xml$";

/// A compiled report file name pattern.
#[derive(Debug, Clone)]
pub struct ReportPattern {
    regex: Regex,
}

impl ReportPattern {
    /// Compiles `pattern`, a regex matched against file names only.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::InvalidPattern`] if the regex does not compile.
    pub fn new(pattern: &str) -> ReportResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| ReportError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Returns true if the file name of `path` matches.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.regex.is_match(name))
    }

    /// The source regex.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for ReportPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new(DEFAULT_REPORT_PATTERN).expect("default report pattern is valid"),
        }
    }
}

/// Recursively finds report files under `root`, sorted by path.
///
/// A missing `root` (or one that is not a directory) yields no files.
/// Symlinked directories are not followed.
pub async fn find_report_files(root: &Path, pattern: &ReportPattern) -> ReportResult<Vec<PathBuf>> {
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            debug!("{} is not a directory, no reports to scan", root.display());
            return Ok(Vec::new());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist, no reports to scan", root.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    }

    let mut files = Vec::new();
    walk(root, pattern, &mut files).await?;
    files.sort();
    Ok(files)
}

async fn walk(dir: &Path, pattern: &ReportPattern, files: &mut Vec<PathBuf>) -> ReportResult<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let ty = entry.file_type().await?;
        let path = entry.path();

        if ty.is_dir() {
            Box::pin(walk(&path, pattern, files)).await?;
        } else if pattern.matches(&path)
            && (ty.is_file() || tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()))
        {
            files.push(path);
        }
    }

    Ok(())
}
