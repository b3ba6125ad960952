//! Human-readable assignment summary.
//!
//! ```text
//! Found 3 tests
//! Grouped them into batches:
//! 1. tests = 2, total duration = 2s
//! 2. tests = 1, total duration = 1s
//! ```

use std::fmt::Write as _;
use std::time::Duration;

use super::TestBatch;

/// Renders the summary as plain text, one line per batch.
pub fn render_summary(total_tests: usize, batches: &[TestBatch]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Found {total_tests} tests");
    let _ = writeln!(out, "Grouped them into batches:");
    for batch in batches {
        let _ = writeln!(
            out,
            "{}. tests = {}, total duration = {}",
            batch.number,
            batch.len(),
            format_duration(batch.total_duration)
        );
    }
    out
}

/// Prints the summary to stdout with terminal styling.
pub fn print_summary(total_tests: usize, batches: &[TestBatch]) {
    println!("Found {} tests", console::style(total_tests).bold());
    println!("Grouped them into batches:");

    let longest = batches.iter().map(|b| b.total_duration).max();
    for batch in batches {
        let duration = format_duration(batch.total_duration);
        // Highlight the batch that bounds the wall-clock time.
        let duration = if batches.len() > 1 && Some(batch.total_duration) == longest {
            console::style(duration).yellow()
        } else {
            console::style(duration)
        };
        println!(
            "{}. tests = {}, total duration = {}",
            batch.number,
            batch.len(),
            duration
        );
    }
}

/// Formats a duration in seconds with trailing zeros removed: `2s`, `1.25s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = format!("{:.3}", duration.as_secs_f64());
    let secs = secs.trim_end_matches('0').trim_end_matches('.');
    format!("{secs}s")
}
