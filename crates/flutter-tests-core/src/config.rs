//! Run configuration.
//!
//! Settings come from three layers, highest precedence first: command-line
//! flags (and their environment variables), an optional JSON file, and
//! built-in defaults. Every layer is a [`TestsConfig`] with all-optional
//! fields; [`TestsConfig::overlay`] stacks them and [`Settings::resolve`]
//! fills in defaults and validates the result.
//!
//! # Example
//!
//! ```
//! use flutter_tests_core::config::{Settings, TestType, TestsConfig};
//!
//! let file: TestsConfig = serde_json::from_str(r#"{"test_type": "unit", "print_stats": false}"#).unwrap();
//! let cli = TestsConfig { print_stats: Some(true), ..Default::default() };
//!
//! let settings = Settings::resolve(file.overlay(cli)).unwrap();
//! assert_eq!(settings.test_type, TestType::Unit);
//! assert!(settings.print_stats);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::BootWait;
use crate::runner::FlutterTool;

/// Config file looked up in the working directory when none is named.
pub const DEFAULT_CONFIG_FILENAME: &str = "flutter_tests.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A setting needed by the selected test type is absent.
    #[error("Missing required parameter `{0}` for integration tests")]
    MissingParameter(&'static str),

    #[error("Invalid value for `{key}`: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which suites to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Unit,
    Integration,
    All,
}

impl TestType {
    pub fn runs_unit(self) -> bool {
        matches!(self, TestType::Unit | TestType::All)
    }

    pub fn runs_integration(self) -> bool {
        matches!(self, TestType::Integration | TestType::All)
    }
}

impl FromStr for TestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unit" => Ok(TestType::Unit),
            "integration" => Ok(TestType::Integration),
            "all" => Ok(TestType::All),
            other => Err(format!(
                "unknown test type `{}` (expected unit, integration or all)",
                other
            )),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestType::Unit => "unit",
            TestType::Integration => "integration",
            TestType::All => "all",
        })
    }
}

/// One layer of configuration. Absent fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flutter_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_only_failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_stats: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<TestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_test_folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_launch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_build: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_timeout_secs: Option<u64>,
}

impl TestsConfig {
    /// Reads a config file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not a valid config object
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads [`DEFAULT_CONFIG_FILENAME`] from `dir` if present, otherwise
    /// returns an empty layer.
    pub fn load_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(DEFAULT_CONFIG_FILENAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Stacks `top` over `self`: every field set in `top` wins.
    pub fn overlay(self, top: TestsConfig) -> TestsConfig {
        TestsConfig {
            flutter_command: top.flutter_command.or(self.flutter_command),
            print_only_failed: top.print_only_failed.or(self.print_only_failed),
            print_stats: top.print_stats.or(self.print_stats),
            test_type: top.test_type.or(self.test_type),
            driver: top.driver.or(self.driver),
            integration_test_folder: top.integration_test_folder.or(self.integration_test_folder),
            platform: top.platform.or(self.platform),
            force_launch: top.force_launch.or(self.force_launch),
            reuse_build: top.reuse_build.or(self.reuse_build),
            log_dir: top.log_dir.or(self.log_dir),
            fail_on_error: top.fail_on_error.or(self.fail_on_error),
            boot_timeout_secs: top.boot_timeout_secs.or(self.boot_timeout_secs),
        }
    }
}

/// Fully-resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tool: FlutterTool,
    pub print_only_failed: bool,
    pub print_stats: bool,
    pub test_type: TestType,
    pub driver: Option<PathBuf>,
    pub integration_test_folder: Option<PathBuf>,
    pub platform: String,
    pub force_launch: bool,
    pub reuse_build: bool,
    pub log_dir: Option<PathBuf>,
    pub fail_on_error: bool,
    pub boot_wait: Option<BootWait>,
}

impl Settings {
    /// Applies defaults to `config` and checks that the selected test type
    /// has everything it needs.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] for a blank flutter command or platform
    /// - [`ConfigError::MissingParameter`] if integration tests are selected
    ///   without a driver or test folder
    pub fn resolve(config: TestsConfig) -> Result<Self, ConfigError> {
        let command_line = config.flutter_command.as_deref().unwrap_or("flutter");
        let tool = FlutterTool::parse(command_line).ok_or(ConfigError::InvalidValue {
            key: "flutter_command",
            message: "must not be blank".to_string(),
        })?;

        let platform = config.platform.unwrap_or_else(|| "android".to_string());
        if platform.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "platform",
                message: "must not be blank".to_string(),
            });
        }

        let settings = Settings {
            tool,
            print_only_failed: config.print_only_failed.unwrap_or(true),
            print_stats: config.print_stats.unwrap_or(true),
            test_type: config.test_type.unwrap_or_default(),
            driver: config.driver,
            integration_test_folder: config.integration_test_folder,
            platform,
            force_launch: config.force_launch.unwrap_or(false),
            reuse_build: config.reuse_build.unwrap_or(false),
            log_dir: config.log_dir,
            fail_on_error: config.fail_on_error.unwrap_or(true),
            boot_wait: config
                .boot_timeout_secs
                .map(|secs| BootWait::with_timeout(Duration::from_secs(secs))),
        };

        if settings.test_type.runs_integration() {
            settings.integration_paths()?;
        }
        Ok(settings)
    }

    /// Driver file and test folder, both required for integration tests.
    pub fn integration_paths(&self) -> Result<(&Path, &Path), ConfigError> {
        let driver = self
            .driver
            .as_deref()
            .ok_or(ConfigError::MissingParameter("driver"))?;
        let folder = self
            .integration_test_folder
            .as_deref()
            .ok_or(ConfigError::MissingParameter("integration_test_folder"))?;
        Ok((driver, folder))
    }
}
