//! Runs a Flutter project's unit and integration tests with readable output.
//!
//! # Usage
//!
//! ```bash
//! # Unit tests, printing only failed and skipped tests plus a summary
//! flutter-tests
//!
//! # Print every test result
//! flutter-tests --print-only-failed false
//!
//! # Integration tests on an Android emulator, launching one if needed
//! flutter-tests --test-type integration \
//!     --driver test_driver/integration_test.dart \
//!     --integration-test-folder integration_test \
//!     --force-launch true --boot-timeout 120
//!
//! # Build the APK once and reuse it for every integration test file
//! flutter-tests --test-type all --reuse-build true --log-dir build/test-logs
//!
//! # Use a pinned SDK through fvm
//! flutter-tests --flutter-command "fvm flutter"
//! ```
//!
//! Every option can also come from a `FLUTTER_TESTS_*` environment variable or
//! from `flutter_tests.json` in the working directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use flutter_tests_core::config::{ConfigError, Settings, TestType, TestsConfig};
use flutter_tests_core::integration::{IntegrationError, IntegrationOptions, IntegrationTestOrchestrator};
use flutter_tests_core::reporter::{ConsoleReporter, Reporter};
use flutter_tests_core::runner::SystemRunner;
use flutter_tests_core::unit::{UnitOptions, UnitRunError, UnitTestEventProcessor};

const LOG_FILE_NAME: &str = "flutter-tests.log";

/// Runs Flutter unit and integration tests with readable, colorized reports.
#[derive(Parser)]
#[command(name = "flutter-tests")]
#[command(about = "Run Flutter unit and integration tests with readable, colorized reports")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to ./flutter_tests.json when present)
    #[arg(short, long, env = "FLUTTER_TESTS_CONFIG")]
    config: Option<PathBuf>,

    /// Command used to invoke flutter, e.g. "fvm flutter"
    #[arg(long, env = "FLUTTER_TESTS_FLUTTER_COMMAND")]
    flutter_command: Option<String>,

    /// Print only failed and skipped unit tests
    #[arg(long, value_name = "BOOL", env = "FLUTTER_TESTS_PRINT_ONLY_FAILED")]
    print_only_failed: Option<bool>,

    /// Print a summary table after the unit tests
    #[arg(long, value_name = "BOOL", env = "FLUTTER_TESTS_PRINT_STATS")]
    print_stats: Option<bool>,

    /// Which tests to run: unit, integration or all
    #[arg(short, long, env = "FLUTTER_TESTS_TEST_TYPE")]
    test_type: Option<TestType>,

    /// Driver file passed to `flutter drive --driver`
    #[arg(short, long, env = "FLUTTER_TESTS_DRIVER")]
    driver: Option<PathBuf>,

    /// Folder searched recursively for *_test.dart integration tests
    #[arg(short, long, env = "FLUTTER_TESTS_INTEGRATION_TEST_FOLDER")]
    integration_test_folder: Option<PathBuf>,

    /// Platform substring used to pick a device, e.g. android or ios
    #[arg(short, long, env = "FLUTTER_TESTS_PLATFORM")]
    platform: Option<String>,

    /// Launch an emulator when no device is attached
    #[arg(long, value_name = "BOOL", env = "FLUTTER_TESTS_FORCE_LAUNCH")]
    force_launch: Option<bool>,

    /// Build the APK once and reuse it for every integration test (android only)
    #[arg(long, value_name = "BOOL", env = "FLUTTER_TESTS_REUSE_BUILD")]
    reuse_build: Option<bool>,

    /// Directory for diagnostics and the output of failed runs
    #[arg(long, env = "FLUTTER_TESTS_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Exit non-zero when an integration test fails
    #[arg(long, value_name = "BOOL", env = "FLUTTER_TESTS_FAIL_ON_ERROR")]
    fail_on_error: Option<bool>,

    /// Seconds to wait for a launched emulator to come online
    #[arg(long = "boot-timeout", value_name = "SECS", env = "FLUTTER_TESTS_BOOT_TIMEOUT")]
    boot_timeout_secs: Option<u64>,
}

impl Cli {
    /// The command-line layer of the configuration.
    fn layer(&self) -> TestsConfig {
        TestsConfig {
            flutter_command: self.flutter_command.clone(),
            print_only_failed: self.print_only_failed,
            print_stats: self.print_stats,
            test_type: self.test_type,
            driver: self.driver.clone(),
            integration_test_folder: self.integration_test_folder.clone(),
            platform: self.platform.clone(),
            force_launch: self.force_launch,
            reuse_build: self.reuse_build,
            log_dir: self.log_dir.clone(),
            fail_on_error: self.fail_on_error,
            boot_timeout_secs: self.boot_timeout_secs,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let reporter = ConsoleReporter;

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            reporter.error(&e.to_string());
            return e.exit_code();
        }
    };
    let _guard = init_tracing(settings.log_dir.as_deref());

    match run(&settings, &reporter).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            reporter.error(&e.to_string());
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Unit(UnitRunError),
    Integration(IntegrationError),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Config(_) => ExitCode::from(2),
            CliError::Unit(_) | CliError::Integration(_) => ExitCode::from(1),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Unit(e) => write!(f, "Unit tests aborted: {}", e),
            CliError::Integration(e) => write!(f, "Integration tests aborted: {}", e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<UnitRunError> for CliError {
    fn from(e: UnitRunError) -> Self {
        CliError::Unit(e)
    }
}

impl From<IntegrationError> for CliError {
    fn from(e: IntegrationError) -> Self {
        CliError::Integration(e)
    }
}

fn load_settings(cli: &Cli) -> Result<Settings, CliError> {
    let file = match &cli.config {
        Some(path) => TestsConfig::load(path)?,
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            TestsConfig::load_default(&cwd)?
        }
    };
    Ok(Settings::resolve(file.overlay(cli.layer()))?)
}

/// Logs to stderr, or to `<log_dir>/flutter-tests.log` when a log directory
/// is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

/// Runs the selected suites. Returns whether everything passed.
async fn run(settings: &Settings, reporter: &dyn Reporter) -> Result<bool, CliError> {
    info!(test_type = %settings.test_type, tool = ?settings.tool, "starting test run");
    let mut passed = true;

    if settings.test_type.runs_unit() {
        let options = UnitOptions {
            print_only_failed: settings.print_only_failed,
            print_stats: settings.print_stats,
            log_dir: settings.log_dir.clone(),
        };
        let code = UnitTestEventProcessor::new(reporter, options)
            .run(&settings.tool)
            .await?;
        if code != 0 {
            reporter.error(&format!("Unit test runner exited with code {}", code));
            passed = false;
        }
    }

    if settings.test_type.runs_integration() {
        let (driver, folder) = settings.integration_paths()?;
        let options = IntegrationOptions {
            platform: settings.platform.clone(),
            force_launch: settings.force_launch,
            reuse_build: settings.reuse_build,
            log_dir: settings.log_dir.clone(),
            boot_wait: settings.boot_wait,
        };
        let result = IntegrationTestOrchestrator::new(&settings.tool, &SystemRunner, reporter, driver, folder)
            .run(&options)
            .await?;
        if result.exit_status(settings.fail_on_error) != 0 {
            passed = false;
        }
    }

    info!(passed, "test run finished");
    Ok(passed)
}
