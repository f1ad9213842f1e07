//! A single test's lifecycle, from `testStart` to its one printed report.
//!
//! A [`TestRecord`] is created Pending, completed once, and rendered exactly
//! once. A late `error` may still turn a completed record into an error until
//! it has been rendered. [`TestRecord::render`] flips the `reported` flag, so callers
//! can tell "never completed" from "already printed" without removing the
//! record from its map.
//!
//! # Example
//!
//! ```
//! use flutter_tests_core::record::{TestId, TestRecord, TestStatus};
//!
//! let mut record = TestRecord::new(TestId::Number(2), "adds two numbers").unwrap();
//! record.mark_done(TestStatus::Success, false, None, None).unwrap();
//! assert_eq!(record.render(), "\x1b[32m[success] adds two numbers\x1b[0m");
//! assert!(record.is_reported());
//! ```

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::color::Color;

/// Errors raised while building or completing a [`TestRecord`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// The runner sent an empty string as a test id.
    #[error("Test id must not be empty")]
    EmptyId,

    /// Completion was attempted on a record that already has a final status.
    #[error("Test {id} already completed with status {status}")]
    AlreadyCompleted { id: TestId, status: TestStatus },

    /// The record's report line has already been printed.
    #[error("Test {id} was already reported")]
    AlreadyReported { id: TestId },
}

/// Opaque correlation key linking a start event to its completion.
///
/// The runner currently sends integers, but strings are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum TestId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestId::Number(n) => write!(f, "{}", n),
            TestId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Lifecycle status of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Pending,
    Success,
    /// The runner reported a non-error failure token.
    Failure,
    /// The runner reported `error`, or sent an `error` event.
    Error,
    Skipped,
}

impl TestStatus {
    /// Maps a runner result token onto a status.
    ///
    /// Anything that is not `success` or `error` counts as a failure.
    pub fn from_result(result: &str) -> Self {
        match result {
            "success" => TestStatus::Success,
            "error" => TestStatus::Error,
            _ => TestStatus::Failure,
        }
    }

    /// The literal token printed in report tags.
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Success => "success",
            TestStatus::Failure => "failure",
            TestStatus::Error => "error",
            TestStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != TestStatus::Pending
    }

    /// Color used when rendering a record with this status.
    pub fn color(self) -> Color {
        match self {
            TestStatus::Skipped => Color::Blue,
            TestStatus::Success => Color::Green,
            _ => Color::Red,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One test instance observed in the event stream.
#[derive(Debug, Clone)]
pub struct TestRecord {
    id: TestId,
    name: String,
    status: TestStatus,
    /// What the runner itself reported, before the skipped override.
    result: TestStatus,
    error: Option<String>,
    stack_trace: Option<String>,
    reported: bool,
}

impl TestRecord {
    /// Creates a Pending record.
    ///
    /// # Errors
    ///
    /// - [`RecordError::EmptyId`] if `id` is an empty string
    pub fn new(id: TestId, name: impl Into<String>) -> Result<Self, RecordError> {
        if matches!(&id, TestId::Text(s) if s.is_empty()) {
            return Err(RecordError::EmptyId);
        }
        Ok(Self {
            id,
            name: name.into(),
            status: TestStatus::Pending,
            result: TestStatus::Pending,
            error: None,
            stack_trace: None,
            reported: false,
        })
    }

    pub fn id(&self) -> &TestId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective status: [`TestStatus::Skipped`] whenever the runner flagged
    /// the test as skipped.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }

    /// Moves the record to its final status.
    ///
    /// `skipped` wins over `result`. The stack trace is stored with every run
    /// of two or more spaces replaced by a line break.
    ///
    /// # Errors
    ///
    /// - [`RecordError::AlreadyCompleted`] if the record is no longer Pending
    pub fn mark_done(
        &mut self,
        result: TestStatus,
        skipped: bool,
        error: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<(), RecordError> {
        if self.status.is_terminal() {
            return Err(RecordError::AlreadyCompleted {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.result = result;
        self.status = if skipped { TestStatus::Skipped } else { result };
        self.error = error;
        self.stack_trace = stack_trace.map(|trace| normalize_stack_trace(&trace));
        Ok(())
    }

    /// Marks the record as errored.
    ///
    /// Unlike [`Self::mark_done`] this also applies to a record that already
    /// completed, as long as it has not been printed: the runner can report
    /// an error for a test after announcing that it passed.
    ///
    /// # Errors
    ///
    /// - [`RecordError::AlreadyReported`] if the record was already rendered
    pub fn mark_error(
        &mut self,
        error: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<(), RecordError> {
        if self.reported {
            return Err(RecordError::AlreadyReported {
                id: self.id.clone(),
            });
        }
        self.result = TestStatus::Error;
        self.status = TestStatus::Error;
        self.error = error;
        self.stack_trace = stack_trace.map(|trace| normalize_stack_trace(&trace));
        Ok(())
    }

    /// Builds the colored report message without marking the record reported.
    pub fn message(&self) -> String {
        let mut message = format!("[{}] {}", self.status, self.name);
        if self.result != TestStatus::Success {
            message.push_str(&format!(
                "\n[ERROR] -> {}\n[STACKTRACE]\n{}",
                self.error.as_deref().unwrap_or_default(),
                self.stack_trace.as_deref().unwrap_or_default(),
            ));
        }
        self.status.color().paint(message)
    }

    /// Builds the report message and marks the record as reported.
    pub fn render(&mut self) -> String {
        self.reported = true;
        self.message()
    }
}

/// Replaces each run of two or more spaces with a single line break.
pub fn normalize_stack_trace(trace: &str) -> String {
    let mut out = String::with_capacity(trace.len());
    let mut spaces = 0usize;
    for ch in trace.chars() {
        if ch == ' ' {
            spaces += 1;
            continue;
        }
        flush_spaces(&mut out, spaces);
        spaces = 0;
        out.push(ch);
    }
    flush_spaces(&mut out, spaces);
    out
}

fn flush_spaces(out: &mut String, spaces: usize) {
    match spaces {
        0 => {}
        1 => out.push(' '),
        _ => out.push('\n'),
    }
}
