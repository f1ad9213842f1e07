//! # flutter-tests-core
//!
//! Core library for running a Flutter project's unit and integration tests
//! and turning the raw tool output into readable, colorized reports.
//!
//! ## Modules
//!
//! - [`unit`] - Consumer for the `flutter test --machine` JSON event stream
//! - [`record`] - Per-test lifecycle and one-shot report rendering
//! - [`integration`] - Sequential `flutter drive` batches with fail-forward tallying
//! - [`device`] - Attached device lookup and emulator launch
//! - [`tool_output`] - Parsers for device listings and build output
//! - [`runner`] - Subprocess seam ([`runner::CommandRunner`]) and the flutter command line
//! - [`reporter`] - Sinks for user-facing report lines
//! - [`config`] - Layered configuration (flags, JSON file, defaults)
//! - [`log_file`] - Raw output logs kept for failed runs
//! - [`color`] - Named terminal colors
//!
//! ## External Dependencies
//!
//! The engines shell out to the Flutter SDK's `flutter` tool (or whatever
//! command prefix is configured, such as `fvm flutter`). Integration tests
//! additionally need an attached device or an emulator image.
//!
//! ## Example
//!
//! ```no_run
//! use flutter_tests_core::reporter::ConsoleReporter;
//! use flutter_tests_core::runner::FlutterTool;
//! use flutter_tests_core::unit::{UnitOptions, UnitTestEventProcessor};
//!
//! # async fn example() -> Result<(), flutter_tests_core::unit::UnitRunError> {
//! let options = UnitOptions { print_only_failed: true, print_stats: true, log_dir: None };
//! let mut processor = UnitTestEventProcessor::new(&ConsoleReporter, options);
//! let code = processor.run(&FlutterTool::default()).await?;
//! println!("runner exited with {}", code);
//! # Ok(())
//! # }
//! ```

pub mod color;
pub mod config;
pub mod device;
pub mod integration;
pub mod log_file;
pub mod record;
pub mod reporter;
pub mod runner;
pub mod tool_output;
pub mod unit;
