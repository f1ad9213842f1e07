//! Sequential integration-test batches against one device.
//!
//! [`IntegrationTestOrchestrator::run`] discovers `*_test.dart` files,
//! resolves a device, optionally builds one APK to reuse across files, then
//! drives each file in discovery order. A failing file is counted and
//! reported, and the batch moves on. Only device resolution and the reuse
//! build can stop a batch early.
//!
//! # Example
//!
//! ```no_run
//! use flutter_tests_core::integration::{IntegrationOptions, IntegrationTestOrchestrator};
//! use flutter_tests_core::reporter::ConsoleReporter;
//! use flutter_tests_core::runner::{FlutterTool, SystemRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tool = FlutterTool::default();
//! let orchestrator = IntegrationTestOrchestrator::new(
//!     &tool,
//!     &SystemRunner,
//!     &ConsoleReporter,
//!     "test_driver/integration_test.dart",
//!     "integration_test",
//! );
//! let result = orchestrator.run(&IntegrationOptions::default()).await?;
//! std::process::exit(result.exit_status(true));
//! # }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::color::Color;
use crate::device::{BootWait, DeviceError, DeviceResolver, DeviceSelection};
use crate::log_file::TestLog;
use crate::reporter::Reporter;
use crate::runner::{CommandRunner, FlutterTool, RunnerError, ToolCommand};
use crate::tool_output;

/// File name suffix identifying integration test files.
pub const TEST_FILE_SUFFIX: &str = "_test.dart";

/// The only platform whose builds can be reused across test files.
pub const REUSE_PLATFORM: &str = "android";

/// Extension of the reusable build artifact.
pub const ARTIFACT_EXTENSION: &str = ".apk";

/// Errors that stop a batch before or instead of running it.
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Failed to find a device to launch the tests on")]
    NoDevice,

    #[error("Failed to resolve a device: {0}")]
    Device(#[from] DeviceError),

    #[error("Build failed with {status}")]
    BuildFailed { status: String },

    #[error("Build output does not name a .apk file")]
    ArtifactNotFound,

    #[error("Built artifact not accessible at {path}: {source}")]
    ArtifactMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to search {folder} for test files: {message}")]
    Discovery { folder: PathBuf, message: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for one integration batch.
#[derive(Debug, Clone)]
pub struct IntegrationOptions {
    pub platform: String,
    pub force_launch: bool,
    pub reuse_build: bool,
    /// Keep per-file drive output here; logs of passing files are deleted.
    pub log_dir: Option<PathBuf>,
    pub boot_wait: Option<BootWait>,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        Self {
            platform: REUSE_PLATFORM.to_string(),
            force_launch: false,
            reuse_build: false,
            log_dir: None,
            boot_wait: None,
        }
    }
}

/// Pass/fail tally of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationRunResult {
    pub successful: usize,
    pub failed: usize,
}

impl IntegrationRunResult {
    pub fn overall_failed(&self) -> bool {
        self.failed > 0
    }

    /// Process exit status: 1 only when something failed and failures count.
    pub fn exit_status(&self, fail_on_error: bool) -> i32 {
        if fail_on_error && self.overall_failed() {
            1
        } else {
            0
        }
    }
}

pub struct IntegrationTestOrchestrator<'a> {
    tool: &'a FlutterTool,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
    driver: PathBuf,
    test_folder: PathBuf,
}

impl<'a> IntegrationTestOrchestrator<'a> {
    pub fn new(
        tool: &'a FlutterTool,
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn Reporter,
        driver: impl Into<PathBuf>,
        test_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool,
            runner,
            reporter,
            driver: driver.into(),
            test_folder: test_folder.into(),
        }
    }

    /// Runs the whole batch.
    ///
    /// # Errors
    ///
    /// - [`IntegrationError::NoDevice`] / [`IntegrationError::Device`] if no
    ///   device can be found or launched
    /// - [`IntegrationError::BuildFailed`], [`IntegrationError::ArtifactNotFound`],
    ///   [`IntegrationError::ArtifactMissing`] if the reuse build goes wrong
    /// - [`IntegrationError::Discovery`] if the test folder cannot be searched
    pub async fn run(
        &self,
        options: &IntegrationOptions,
    ) -> Result<IntegrationRunResult, IntegrationError> {
        let tests = discover_test_files(&self.test_folder)?;
        self.reporter
            .info(&format!("Found {} test files", tests.len()));

        let mut platform = options.platform.as_str();
        if options.reuse_build && platform != REUSE_PLATFORM {
            self.reporter.warn(&format!(
                "Build reuse is only supported on {}, switching platform from {}",
                REUSE_PLATFORM, platform
            ));
            platform = REUSE_PLATFORM;
        }

        self.reporter.info("Checking for running devices");
        let device = DeviceResolver::new(self.tool, self.runner, self.reporter)
            .with_boot_wait(options.boot_wait)
            .resolve(platform, options.force_launch)
            .await?
            .ok_or(IntegrationError::NoDevice)?;

        let artifact = if options.reuse_build {
            Some(self.build_artifact().await?)
        } else {
            None
        };

        let mut result = IntegrationRunResult::default();
        for test in &tests {
            let passed = self
                .drive(test, &device, artifact.as_deref(), options.log_dir.as_deref())
                .await?;
            if passed {
                result.successful += 1;
            } else {
                result.failed += 1;
            }
        }

        let summary = format!(
            "Integration tests finished: {} successful, {} failed",
            result.successful, result.failed
        );
        if result.overall_failed() {
            self.reporter.error(&summary);
        } else {
            self.reporter.info(&summary);
        }
        Ok(result)
    }

    /// Builds the debug APK once and returns its path.
    async fn build_artifact(&self) -> Result<PathBuf, IntegrationError> {
        let command = self.tool.command(["build", "apk", "--debug"]);
        self.reporter.info(&format!("Building app with `{}`", command));
        let output = self
            .runner
            .output(&command)
            .instrument(info_span!("build_artifact"))
            .await?;
        if !output.success() {
            return Err(IntegrationError::BuildFailed {
                status: output.describe_exit(),
            });
        }

        let path = tool_output::artifact_path(&output.stdout, ARTIFACT_EXTENSION)
            .ok_or(IntegrationError::ArtifactNotFound)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| IntegrationError::ArtifactMissing {
                path: path.clone(),
                source,
            })?;
        if !metadata.is_file() {
            return Err(IntegrationError::ArtifactMissing {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        self.reporter
            .info(&format!("Reusing build {}", path.display()));
        Ok(path)
    }

    /// Builds the `drive` invocation for one test file.
    pub fn drive_command(
        &self,
        test: &Path,
        device: &DeviceSelection,
        artifact: Option<&Path>,
    ) -> ToolCommand {
        let mut args = vec![
            "drive".to_string(),
            "--driver".to_string(),
            self.driver.display().to_string(),
            "--target".to_string(),
            test.display().to_string(),
            "-d".to_string(),
            device.device_id.clone(),
        ];
        if let Some(artifact) = artifact {
            args.push("--use-application-binary".to_string());
            args.push(artifact.display().to_string());
        }
        self.tool.command(args)
    }

    /// Drives one file; returns whether it passed.
    async fn drive(
        &self,
        test: &Path,
        device: &DeviceSelection,
        artifact: Option<&Path>,
        log_dir: Option<&Path>,
    ) -> Result<bool, IntegrationError> {
        let command = self.drive_command(test, device, artifact);
        self.reporter
            .info(&format!("Launching test {}", test.display()));
        let output = self
            .runner
            .output(&command)
            .instrument(info_span!("drive", test = %test.display()))
            .await?;
        let passed = output.success();
        debug!(test = %test.display(), code = ?output.code, passed, "drive finished");

        if let Some(dir) = log_dir {
            let mut log = TestLog::create(dir, &TestLog::name_for(test, &self.test_folder))?;
            log.write_output(&output)?;
            if passed {
                log.discard()?;
            } else {
                let path = log.keep()?;
                self.reporter
                    .info(&format!("Output saved to {}", path.display()));
            }
        }

        if passed {
            self.reporter.info(
                &Color::Green.paint(format!("Test {} terminated correctly", test.display())),
            );
        } else {
            self.reporter.info(&Color::Red.paint(format!(
                "Test {} failed with {}",
                test.display(),
                output.describe_exit()
            )));
        }
        Ok(passed)
    }
}

/// All regular files under `folder` whose name ends in [`TEST_FILE_SUFFIX`],
/// in path order.
pub fn discover_test_files(folder: &Path) -> Result<Vec<PathBuf>, IntegrationError> {
    let escaped = glob::Pattern::escape(&folder.to_string_lossy());
    let pattern = format!("{}/**/*{}", escaped.trim_end_matches('/'), TEST_FILE_SUFFIX);
    let entries = glob::glob(&pattern).map_err(|e| IntegrationError::Discovery {
        folder: folder.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| IntegrationError::Discovery {
            folder: folder.to_path_buf(),
            message: e.to_string(),
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
