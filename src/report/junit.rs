//! JUnit XML report parsing.
//!
//! Reads the `<testcase>` elements of a JUnit-style report with a streaming
//! `quick-xml` reader. Only the attributes needed for scheduling are kept:
//!
//! ```xml
//! <testsuite name="com.example.MathTest" tests="3">
//!   <testcase classname="com.example.MathTest" name="add" time="0.100"/>
//!   <testcase classname="com.example.MathTest" name="sub" time="0.150">
//!     <failure message="expected 1">...</failure>
//!   </testcase>
//!   <testcase classname="com.example.MathTest" name="mul" time="0.000">
//!     <skipped/>
//!   </testcase>
//! </testsuite>
//! ```
//!
//! Testcases may appear at any depth (`<testsuites>` wrappers, nested
//! suites). A document that is not well formed is rejected as a whole.

use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{TestOutcome, TestResult};

/// Result type for parsing a single report document.
pub type JunitResult<T> = Result<T, JunitError>;

/// Why a report document was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JunitError {
    /// The XML itself is not well formed.
    #[error("XML syntax error: {0}")]
    Syntax(String),

    /// The document ended with elements still open.
    #[error("unexpected end of document, <{0}> is not closed")]
    Unclosed(String),

    /// The document has no root element.
    #[error("document is empty")]
    Empty,

    /// A `<testcase>` lacks a required attribute.
    #[error("<testcase> is missing the `{0}` attribute")]
    MissingAttribute(&'static str),

    /// A `time` attribute is not a number of seconds in
    /// `0..=MAX_TESTCASE_SECONDS`.
    #[error("invalid testcase time {0:?}")]
    InvalidTime(String),
}

/// Parses a JUnit XML document into test results, in document order.
///
/// # Errors
///
/// Returns a [`JunitError`] for malformed XML, a `<testcase>` without
/// `classname` or `name`, or an unparsable `time`. A missing or empty
/// `time` counts as zero.
///
/// # Example
///
/// ```
/// use testbatch::report::parse_junit_xml;
///
/// let results = parse_junit_xml(
///     r#"<testsuite><testcase classname="a.B" name="c" time="0.5"/></testsuite>"#,
/// ).unwrap();
/// assert_eq!(results[0].classname, "a.B");
/// ```
pub fn parse_junit_xml(content: &str) -> JunitResult<Vec<TestResult>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut results = Vec::new();
    let mut open_elements: Vec<String> = Vec::new();
    let mut current: Option<PendingCase> = None;
    let mut saw_root = false;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(JunitError::Syntax(format!(
                    "{} (at byte {})",
                    e,
                    reader.error_position()
                )));
            }
        };

        let at_top_level = open_elements.is_empty();
        match event {
            Event::Start(_) | Event::Empty(_) if saw_root && at_top_level => {
                return Err(JunitError::Syntax(format!(
                    "unexpected element after the root element (at byte {})",
                    reader.buffer_position()
                )));
            }
            Event::Text(text) if at_top_level && !text.iter().all(u8::is_ascii_whitespace) => {
                return Err(JunitError::Syntax(format!(
                    "unexpected text outside the root element (at byte {})",
                    reader.buffer_position()
                )));
            }
            Event::CData(_) if at_top_level => {
                return Err(JunitError::Syntax(format!(
                    "unexpected CDATA outside the root element (at byte {})",
                    reader.buffer_position()
                )));
            }
            Event::Start(e) => {
                saw_root = true;
                match e.name().as_ref() {
                    b"testcase" => current = Some(PendingCase::from_element(&e)?),
                    tag => {
                        if let Some(case) = current.as_mut() {
                            case.mark(tag);
                        }
                    }
                }
                open_elements.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Empty(e) => {
                saw_root = true;
                match e.name().as_ref() {
                    b"testcase" => results.push(PendingCase::from_element(&e)?.finish()),
                    tag => {
                        if let Some(case) = current.as_mut() {
                            case.mark(tag);
                        }
                    }
                }
            }
            Event::End(e) => {
                open_elements.pop();
                if e.name().as_ref() == b"testcase"
                    && let Some(case) = current.take()
                {
                    results.push(case.finish());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(tag) = open_elements.pop() {
        return Err(JunitError::Unclosed(tag));
    }
    if !saw_root {
        return Err(JunitError::Empty);
    }

    Ok(results)
}

/// A `<testcase>` whose children are still being read.
struct PendingCase {
    classname: String,
    name: String,
    duration: Duration,
    failed: bool,
    skipped: bool,
}

impl PendingCase {
    fn from_element(element: &BytesStart<'_>) -> JunitResult<Self> {
        let mut classname = None;
        let mut name = None;
        let mut duration = Duration::ZERO;

        for attr in element.attributes() {
            let attr = attr.map_err(|e| JunitError::Syntax(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| JunitError::Syntax(e.to_string()))?;

            match attr.key.as_ref() {
                b"classname" => classname = Some(value.into_owned()),
                b"name" => name = Some(value.into_owned()),
                b"time" => duration = parse_seconds(&value)?,
                _ => {}
            }
        }

        Ok(Self {
            classname: classname.ok_or(JunitError::MissingAttribute("classname"))?,
            name: name.ok_or(JunitError::MissingAttribute("name"))?,
            duration,
            failed: false,
            skipped: false,
        })
    }

    fn mark(&mut self, tag: &[u8]) {
        match tag {
            b"failure" | b"error" => self.failed = true,
            b"skipped" => self.skipped = true,
            _ => {}
        }
    }

    fn finish(self) -> TestResult {
        let outcome = if self.failed {
            TestOutcome::Failed
        } else if self.skipped {
            TestOutcome::Skipped
        } else {
            TestOutcome::Successful
        };

        TestResult {
            classname: self.classname,
            name: self.name,
            duration: self.duration,
            outcome,
        }
    }
}

/// Longest `time` accepted for a single testcase: 30 days.
///
/// Anything larger is a corrupt report, and accepting it could overflow the
/// per-class and per-batch totals.
pub const MAX_TESTCASE_SECONDS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

/// Parses a `time` attribute in fractional seconds.
fn parse_seconds(raw: &str) -> JunitResult<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Duration::ZERO);
    }

    trimmed
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && (0.0..=MAX_TESTCASE_SECONDS).contains(secs))
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| JunitError::InvalidTime(raw.to_string()))
}
