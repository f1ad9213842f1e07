//! Streaming consumer for `flutter test --machine`.
//!
//! The runner prints one JSON event per line. [`UnitTestEventProcessor`]
//! correlates `testStart`, `testDone` and `error` events by test id, prints
//! each finished test once through the [`Reporter`], and tallies the results
//! into [`TestStats`].
//!
//! Recognized events:
//!
//! | `type`      | fields used                      |
//! |-------------|----------------------------------|
//! | `testStart` | `test.id`, `test.name`           |
//! | `testDone`  | `testID`, `result`, `skipped`    |
//! | `error`     | `testID`, `error`, `stackTrace`  |
//!
//! Other event types are ignored, and so are lines holding a JSON array or an
//! object without a string `type`.
//! A line that is not valid JSON, or a recognized event missing its fields,
//! aborts the run.
//!
//! # Example
//!
//! ```
//! use flutter_tests_core::reporter::RecordingReporter;
//! use flutter_tests_core::unit::{UnitOptions, UnitTestEventProcessor};
//!
//! let reporter = RecordingReporter::new();
//! let options = UnitOptions { print_only_failed: false, print_stats: false, log_dir: None };
//! let mut processor = UnitTestEventProcessor::new(&reporter, options);
//! processor.process_line(r#"{"type":"testStart","test":{"id":2,"name":"adds"}}"#).unwrap();
//! processor.process_line(r#"{"type":"testDone","testID":2,"result":"success","skipped":false}"#).unwrap();
//! assert!(reporter.contains("[success] adds"));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info_span, warn, Instrument};

use crate::color::Color;
use crate::log_file::TestLog;
use crate::record::{RecordError, TestId, TestRecord, TestStatus};
use crate::reporter::Reporter;
use crate::runner::FlutterTool;

/// Substring marking the runner's pseudo-tests for compilation phases.
const LOADING_MARKER: &str = "loading";

/// File name for the mirrored event stream inside the log directory.
pub const UNIT_LOG_NAME: &str = "unit_tests.jsonl";

/// Errors that abort a unit-test run.
#[derive(Error, Debug)]
pub enum UnitRunError {
    /// A line of the event stream could not be understood.
    #[error("Malformed test event on line {line_number}: {message}\n  line: {line}")]
    Protocol {
        line_number: usize,
        line: String,
        message: String,
    },

    /// The test runner process could not be started.
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the stream, waiting on the runner, or writing the log failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output toggles for a unit-test run.
#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    /// Print only skipped and failed tests.
    pub print_only_failed: bool,
    /// Print the summary table after the stream ends.
    pub print_stats: bool,
    /// Mirror the raw event stream into this directory.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Event {
    TestStart {
        test: TestInfo,
    },
    TestDone {
        #[serde(rename = "testID")]
        test_id: TestId,
        result: String,
        #[serde(default)]
        skipped: bool,
    },
    Error {
        #[serde(rename = "testID")]
        test_id: TestId,
        #[serde(default)]
        error: Option<String>,
        #[serde(rename = "stackTrace", default)]
        stack_trace: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TestInfo {
    id: TestId,
    name: String,
}

/// Aggregate counts over the finished records of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestStats {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Records that started but never completed.
    pub pending: usize,
}

impl TestStats {
    /// Number of tests that reached a final status.
    pub fn total(&self) -> usize {
        self.successful + self.failed + self.skipped
    }

    /// The printed summary: separator, `Ran N tests`, one colored row per
    /// column, separator. The separator is as wide as the longest row.
    pub fn table_lines(&self) -> Vec<String> {
        let rows = [
            ("Successful", self.successful, Color::Green),
            ("Failed", self.failed, Color::Red),
            ("Skipped", self.skipped, Color::Blue),
        ];
        let plain: Vec<(String, Color)> = rows
            .iter()
            .map(|(label, count, color)| (format!("{}:\t{}", label, count), *color))
            .collect();
        let width = plain
            .iter()
            .map(|(row, _)| row.chars().count())
            .max()
            .unwrap_or(0);
        let separator = "-".repeat(width);

        let mut lines = Vec::with_capacity(plain.len() + 3);
        lines.push(separator.clone());
        lines.push(format!("Ran {} tests", self.total()));
        lines.extend(plain.into_iter().map(|(row, color)| color.paint(row)));
        lines.push(separator);
        lines
    }
}

/// Correlates runner events into per-test reports.
pub struct UnitTestEventProcessor<'a> {
    reporter: &'a dyn Reporter,
    options: UnitOptions,
    tests: HashMap<TestId, TestRecord>,
    lines_seen: usize,
}

impl<'a> UnitTestEventProcessor<'a> {
    pub fn new(reporter: &'a dyn Reporter, options: UnitOptions) -> Self {
        Self {
            reporter,
            options,
            tests: HashMap::new(),
            lines_seen: 0,
        }
    }

    /// Looks up a record by id.
    pub fn record(&self, id: &TestId) -> Option<&TestRecord> {
        self.tests.get(id)
    }

    /// Number of materialized records, finished or not.
    pub fn record_count(&self) -> usize {
        self.tests.len()
    }

    /// Launches `<tool> test --machine` and consumes its stdout.
    ///
    /// Returns the runner's own exit code; a runner killed by a signal maps to
    /// `1`. Test failures show up in the printed output and stats, and only
    /// affect the returned code when the runner itself exits non-zero.
    pub async fn run(&mut self, tool: &FlutterTool) -> Result<i32, UnitRunError> {
        let command = tool.command(["test", "--machine"]);
        let span = info_span!("unit_tests", command = %command);
        async {
            let mut child = command
                .to_command()
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| UnitRunError::Spawn {
                    command: command.to_string(),
                    source,
                })?;

            let stdout = child.stdout.take().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "runner stdout not captured")
            })?;

            let mut log = match &self.options.log_dir {
                Some(dir) => Some(TestLog::create(dir, UNIT_LOG_NAME)?),
                None => None,
            };

            self.consume(BufReader::new(stdout), log.as_mut()).await?;

            let status = child.wait().await?;
            let code = status.code().unwrap_or(1);
            debug!(code, "test runner exited");

            if let Some(log) = log {
                if code == 0 {
                    log.discard()?;
                } else {
                    let path = log.keep()?;
                    self.reporter
                        .info(&format!("Raw test events saved to {}", path.display()));
                }
            }
            self.finish();
            Ok(code)
        }
        .instrument(span)
        .await
    }

    /// Feeds every line of `reader` through [`Self::process_line`],
    /// mirroring each line into `log` when given.
    pub async fn consume<R>(
        &mut self,
        reader: R,
        mut log: Option<&mut TestLog>,
    ) -> Result<(), UnitRunError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(log) = log.as_deref_mut() {
                log.write_line(&line)?;
            }
            if let Err(e) = self.process_line(&line) {
                self.reporter.error(&format!("Got error while parsing test output: {}", e));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Handles one line of the event stream.
    ///
    /// # Errors
    ///
    /// - [`UnitRunError::Protocol`] if the line is not valid JSON, or a
    ///   recognized event lacks the fields it needs
    pub fn process_line(&mut self, line: &str) -> Result<(), UnitRunError> {
        self.lines_seen += 1;
        if line.trim().is_empty() {
            return Ok(());
        }

        let line_number = self.lines_seen;
        let protocol_error = |message: String| UnitRunError::Protocol {
            line_number,
            line: line.to_string(),
            message,
        };

        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| protocol_error(e.to_string()))?;
        if value.is_array() {
            return Ok(());
        }
        if !value.get("type").is_some_and(serde_json::Value::is_string) {
            debug!(line_number, "event without a type ignored");
            return Ok(());
        }
        let event = Event::deserialize(value).map_err(|e| protocol_error(e.to_string()))?;

        self.dispatch(event)
            .map_err(|e| protocol_error(e.to_string()))
    }

    fn dispatch(&mut self, event: Event) -> Result<(), RecordError> {
        match event {
            Event::TestStart { test } => {
                if test.name.contains(LOADING_MARKER) {
                    debug!(id = %test.id, name = %test.name, "skipping loading pseudo-test");
                    return Ok(());
                }
                let record = TestRecord::new(test.id, test.name)?;
                self.tests.insert(record.id().clone(), record);
            }
            Event::TestDone {
                test_id,
                result,
                skipped,
            } => {
                let print = skipped || !self.options.print_only_failed;
                self.complete(&test_id, TestStatus::from_result(&result), skipped, print)?;
            }
            Event::Error {
                test_id,
                error,
                stack_trace,
            } => self.fail(&test_id, error, stack_trace)?,
            Event::Other => {}
        }
        Ok(())
    }

    /// Applies a `testDone` event to a record that is still Pending.
    fn complete(
        &mut self,
        id: &TestId,
        result: TestStatus,
        skipped: bool,
        print: bool,
    ) -> Result<(), RecordError> {
        let Some(record) = self.tests.get_mut(id) else {
            debug!(id = %id, "completion for unknown test");
            return Ok(());
        };
        if record.is_reported() || record.status().is_terminal() {
            debug!(id = %id, status = %record.status(), "duplicate completion ignored");
            return Ok(());
        }

        record.mark_done(result, skipped, None, None)?;
        if print {
            let message = record.render();
            self.reporter.info(&message);
        }
        Ok(())
    }

    /// Applies an `error` event. Errors always print, including one that
    /// arrives after an unprinted `testDone`.
    fn fail(
        &mut self,
        id: &TestId,
        error: Option<String>,
        stack_trace: Option<String>,
    ) -> Result<(), RecordError> {
        let Some(record) = self.tests.get_mut(id) else {
            debug!(id = %id, "error for unknown test");
            return Ok(());
        };
        if record.is_reported() {
            if record.status() == TestStatus::Error {
                debug!(id = %id, "duplicate error ignored");
            } else {
                warn!(id = %id, status = %record.status(), "error after result was printed");
                self.reporter.warn(&format!(
                    "Test {} reported an error after its result was printed: {}",
                    record.name(),
                    error.as_deref().unwrap_or_default()
                ));
            }
            return Ok(());
        }

        record.mark_error(error, stack_trace)?;
        let message = record.render();
        self.reporter.info(&message);
        Ok(())
    }

    /// Counts records by effective status.
    pub fn stats(&self) -> TestStats {
        let mut stats = TestStats::default();
        for record in self.tests.values() {
            match record.status() {
                TestStatus::Success => stats.successful += 1,
                TestStatus::Failure | TestStatus::Error => stats.failed += 1,
                TestStatus::Skipped => stats.skipped += 1,
                TestStatus::Pending => stats.pending += 1,
            }
        }
        stats
    }

    /// Prints the summary table when enabled and warns about tests that
    /// never completed.
    pub fn finish(&self) -> TestStats {
        let stats = self.stats();
        if stats.pending > 0 {
            warn!(pending = stats.pending, "tests without a completion event");
            self.reporter
                .warn(&format!("{} tests started but never completed", stats.pending));
        }
        if self.options.print_stats {
            for line in stats.table_lines() {
                self.reporter.info(&line);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{Level, RecordingReporter};

    fn options(print_only_failed: bool) -> UnitOptions {
        UnitOptions {
            print_only_failed,
            print_stats: false,
            log_dir: None,
        }
    }

    fn start(id: i64, name: &str) -> String {
        format!(r#"{{"type":"testStart","test":{{"id":{},"name":"{}"}},"time":10}}"#, id, name)
    }

    fn done(id: i64, result: &str, skipped: bool) -> String {
        format!(
            r#"{{"type":"testDone","testID":{},"result":"{}","skipped":{},"hidden":false}}"#,
            id, result, skipped
        )
    }

    fn error(id: i64, message: &str, trace: &str) -> String {
        format!(
            r#"{{"type":"error","testID":{},"error":"{}","stackTrace":"{}","isFailure":true}}"#,
            id, message, trace
        )
    }

    #[test]
    fn loading_start_is_not_materialized() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(&start(1, "loading /app/test/foo_test.dart")).unwrap();
        p.process_line(&start(2, "adds two numbers")).unwrap();
        p.process_line(&done(2, "success", false)).unwrap();

        assert!(p.record(&TestId::Number(1)).is_none());
        assert_eq!(p.record_count(), 1);
        assert_eq!(
            reporter.messages(Level::Info),
            vec!["\x1b[32m[success] adds two numbers\x1b[0m".to_string()]
        );
    }

    #[test]
    fn print_only_failed_hides_successes() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(true));
        p.process_line(&start(3, "quiet")).unwrap();
        p.process_line(&done(3, "success", false)).unwrap();

        assert!(reporter.entries().is_empty());
        assert_eq!(p.record(&TestId::Number(3)).unwrap().status(), TestStatus::Success);
    }

    #[test]
    fn skipped_tests_print_even_when_only_failed() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(true));
        p.process_line(&start(4, "later")).unwrap();
        p.process_line(&done(4, "success", true)).unwrap();

        assert_eq!(reporter.messages(Level::Info), vec!["\x1b[34m[skipped] later\x1b[0m".to_string()]);
    }

    #[test]
    fn error_then_done_prints_once() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(true));
        p.process_line(&start(5, "divides")).unwrap();
        p.process_line(&error(5, "Expected: 2", "test/a.dart 3:1  main")).unwrap();
        p.process_line(&done(5, "error", false)).unwrap();
        p.process_line(&error(5, "again", "")).unwrap();

        let infos = reporter.messages(Level::Info);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].contains("[error] divides\n[ERROR] -> Expected: 2\n[STACKTRACE]\ntest/a.dart 3:1\nmain"));
        assert_eq!(p.stats().failed, 1);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(&done(99, "success", false)).unwrap();
        p.process_line(&error(98, "boom", "")).unwrap();

        assert!(reporter.entries().is_empty());
        assert_eq!(p.record_count(), 0);
    }

    #[test]
    fn arrays_blank_lines_and_unknown_types_are_ignored() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(r#"[1, 2, 3]"#).unwrap();
        p.process_line("   ").unwrap();
        p.process_line(r#"{"type":"suite","suite":{"id":0,"path":"test/a.dart"}}"#).unwrap();
        p.process_line(r#"{"type":"print","testID":1,"message":"hi"}"#).unwrap();

        assert!(reporter.entries().is_empty());
    }

    #[test]
    fn events_without_a_string_type_are_ignored() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(r#"{"testID":1,"result":"success"}"#).unwrap();
        p.process_line(r#"{"type":null,"testID":1}"#).unwrap();
        p.process_line(r#"{"type":7,"test":{"id":1,"name":"x"}}"#).unwrap();
        p.process_line(r#""just a string""#).unwrap();
        p.process_line("42").unwrap();

        assert!(reporter.entries().is_empty());
        assert_eq!(p.record_count(), 0);
    }

    #[test]
    fn late_error_after_unprinted_success_is_shown_and_counted() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(true));
        p.process_line(&start(3, "closes the stream")).unwrap();
        p.process_line(&done(3, "success", false)).unwrap();
        assert!(reporter.entries().is_empty());

        p.process_line(&error(3, "This test failed after it had already completed.", ""))
            .unwrap();

        let infos = reporter.messages(Level::Info);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].starts_with(
            "\x1b[31m[error] closes the stream\n[ERROR] -> This test failed after it had already completed."
        ));
        assert_eq!(p.record(&TestId::Number(3)).unwrap().status(), TestStatus::Error);
        let stats = p.stats();
        assert_eq!((stats.successful, stats.failed), (0, 1));
    }

    #[test]
    fn late_error_after_printed_success_is_warned() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(&start(3, "closes the stream")).unwrap();
        p.process_line(&done(3, "success", false)).unwrap();
        p.process_line(&error(3, "failed after completion", "")).unwrap();

        assert_eq!(reporter.messages(Level::Info).len(), 1);
        assert_eq!(
            reporter.messages(Level::Warn),
            vec!["Test closes the stream reported an error after its result was printed: failed after completion".to_string()]
        );
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line("").unwrap();
        let err = p.process_line("{not json").unwrap_err();
        match err {
            UnitRunError::Protocol { line_number, line, .. } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "{not json");
            }
            other => panic!("Expected Protocol error, got: {:?}", other),
        }
    }

    #[test]
    fn start_without_test_is_a_protocol_error() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        let err = p.process_line(r#"{"type":"testStart"}"#).unwrap_err();
        assert!(matches!(err, UnitRunError::Protocol { .. }));
    }

    #[test]
    fn empty_string_id_is_a_protocol_error() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        let err = p
            .process_line(r#"{"type":"testStart","test":{"id":"","name":"x"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn restart_with_same_id_overwrites_stale_record() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        p.process_line(&start(6, "old name")).unwrap();
        p.process_line(&start(6, "new name")).unwrap();
        p.process_line(&done(6, "success", false)).unwrap();

        assert_eq!(p.record_count(), 1);
        assert!(reporter.contains("[success] new name"));
    }

    #[test]
    fn stats_count_every_terminal_record() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(true));
        for (id, result, skipped) in [
            (1, "success", false),
            (2, "success", false),
            (3, "failure", false),
            (4, "error", false),
            (5, "error", true),
        ] {
            p.process_line(&start(id, &format!("t{}", id))).unwrap();
            p.process_line(&done(id, result, skipped)).unwrap();
        }
        p.process_line(&start(6, "never finishes")).unwrap();

        let stats = p.stats();
        assert_eq!(
            stats,
            TestStats {
                successful: 2,
                failed: 2,
                skipped: 1,
                pending: 1
            }
        );
        assert_eq!(stats.total(), 5);
    }

    #[test]
    fn finish_prints_table_and_pending_warning() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(
            &reporter,
            UnitOptions {
                print_only_failed: true,
                print_stats: true,
                log_dir: None,
            },
        );
        p.process_line(&start(1, "a")).unwrap();
        p.process_line(&done(1, "success", false)).unwrap();
        p.process_line(&start(2, "b")).unwrap();

        p.finish();
        assert_eq!(
            reporter.messages(Level::Warn),
            vec!["1 tests started but never completed".to_string()]
        );
        let infos = reporter.messages(Level::Info);
        assert_eq!(infos.len(), 6);
        assert_eq!(infos[1], "Ran 1 tests");
        assert_eq!(infos[2], "\x1b[32mSuccessful:\t1\x1b[0m");
    }

    #[test]
    fn table_separator_matches_longest_row() {
        let stats = TestStats {
            successful: 120,
            failed: 3,
            skipped: 0,
            pending: 0,
        };
        let lines = stats.table_lines();
        // "Successful:\t120" is 15 characters.
        assert_eq!(lines[0], "-".repeat(15));
        assert_eq!(lines[0], lines[5]);
        assert_eq!(lines[1], "Ran 123 tests");
        assert_eq!(lines[3], "\x1b[31mFailed:\t3\x1b[0m");
        assert_eq!(lines[4], "\x1b[34mSkipped:\t0\x1b[0m");
    }

    #[tokio::test]
    async fn consume_reports_and_stops_at_protocol_error() {
        let reporter = RecordingReporter::new();
        let mut p = UnitTestEventProcessor::new(&reporter, options(false));
        let input = format!("{}\n{}\nnot json\n{}\n", start(1, "a"), done(1, "success", false), start(2, "b"));

        let err = p.consume(input.as_bytes(), None).await.unwrap_err();
        assert!(matches!(err, UnitRunError::Protocol { line_number: 3, .. }));
        assert_eq!(p.record_count(), 1);
        assert_eq!(reporter.messages(Level::Error).len(), 1);
    }
}
