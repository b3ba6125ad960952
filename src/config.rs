//! Configuration loading and schema definitions for testbatch.
//!
//! Configuration lives in a TOML file (`testbatch.toml` by default). Every
//! setting has a default except the number of batches, which may also come
//! from the command line or the `NUMBER_OF_BATCHES` environment variable.
//! Paths may use `~` and `$VAR`, expanded at load time.

pub mod schema;

pub use schema::*;

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "testbatch.toml";

/// Commented starting point written by `testbatch init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# testbatch configuration file

[batching]
# Number of parallel workers. Can be overridden with --batches or
# the NUMBER_OF_BATCHES environment variable.
number_of_batches = 4

# JUnit reports from the previous run. A missing directory means no history
# yet; every batch is then empty and workers run all tests.
results_dir = "test-results"

# Where batch-<n>.json, batch-<n>.txt and index.json are written.
output_dir = "batches"

# Regex matched against report file names.
report_pattern = '^TEST-.*\.xml$'

# "fail" aborts on an unparsable report, "skip" logs a warning and continues.
on_malformed_report = "fail"

# Fail instead of producing empty batches when results_dir is missing.
require_results = false
"#;

/// Loads testbatch configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML or does not match the schema
/// - A path references an undefined environment variable
///
/// # Example
///
/// ```no_run
/// use testbatch::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("testbatch.toml"))?;
/// println!("Output: {}", config.batching.output_dir.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    load_config_str(&content)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
}

/// Loads testbatch configuration from a TOML string.
///
/// # Example
///
/// ```
/// use testbatch::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [batching]
///     number_of_batches = 3
/// "#)?;
///
/// assert_eq!(config.batching.batch_count()?.get(), 3);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;
    expand_paths(&mut config.batching)?;

    Ok(config)
}

/// Loads `path` if it exists, otherwise returns the defaults.
///
/// Only the implicit default file may be absent; an explicitly requested
/// file that is missing is an error.
pub fn load_config_or_default(path: &Path, explicit: bool) -> Result<Config> {
    if !explicit && !path.exists() {
        tracing::debug!("{} not found, using default configuration", path.display());
        return Ok(Config::default());
    }
    load_config(path)
}

fn expand_paths(batching: &mut BatchingConfig) -> Result<()> {
    batching.results_dir = expand_path(&batching.results_dir)?;
    batching.output_dir = expand_path(&batching.output_dir)?;
    Ok(())
}

/// Expands `~` and `$VAR` in `path`.
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let Some(raw) = path.to_str() else {
        return Ok(path.to_path_buf());
    };

    match shellexpand::full(raw) {
        Ok(Cow::Borrowed(_)) => Ok(path.to_path_buf()),
        Ok(Cow::Owned(expanded)) => Ok(PathBuf::from(expanded)),
        Err(e) => Err(e).with_context(|| format!("Failed to expand path: {raw}")),
    }
}
