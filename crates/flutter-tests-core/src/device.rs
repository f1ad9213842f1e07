//! Picking the device integration tests run on.
//!
//! [`DeviceResolver::resolve`] looks for an attached device for a platform
//! and, when asked to, launches the platform's first emulator image and looks
//! again.
//!
//! # Emulator boot
//!
//! `flutter emulators --launch` returns long before the emulator has booted.
//! By default the resolver re-queries devices once, right after the launch,
//! which usually finds nothing on a cold machine. Setting a
//! [`BootWait`] makes it poll until the device shows up or the wait expires.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::reporter::Reporter;
use crate::runner::{CommandRunner, FlutterTool, RunnerError};
use crate::tool_output;

/// Errors that make device resolution impossible.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Launching was requested but the platform has no emulator images.
    #[error("No emulators found for platform {0}")]
    NoEmulator(String),

    /// A listing command exited non-zero.
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// The device chosen for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    pub device_id: String,
    pub platform: String,
}

/// Polling schedule used after launching an emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl BootWait {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

    /// Polls every [`Self::DEFAULT_INTERVAL`] for up to `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

pub struct DeviceResolver<'a> {
    tool: &'a FlutterTool,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
    boot_wait: Option<BootWait>,
}

impl<'a> DeviceResolver<'a> {
    pub fn new(
        tool: &'a FlutterTool,
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            tool,
            runner,
            reporter,
            boot_wait: None,
        }
    }

    /// Poll for the launched emulator instead of re-querying once.
    pub fn with_boot_wait(mut self, boot_wait: Option<BootWait>) -> Self {
        self.boot_wait = boot_wait;
        self
    }

    /// Finds a device for `platform`.
    ///
    /// Returns `Ok(None)` when no device is attached and either `force_launch`
    /// is false or the launched emulator did not show up in time.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NoEmulator`] if launching is needed but the platform
    ///   has no emulator images
    /// - [`DeviceError::CommandFailed`] if `devices` or `emulators` exits non-zero
    /// - [`DeviceError::Runner`] if the tool cannot be spawned
    pub async fn resolve(
        &self,
        platform: &str,
        force_launch: bool,
    ) -> Result<Option<DeviceSelection>, DeviceError> {
        let span = info_span!("resolve_device", platform, force_launch);
        async {
            if let Some(device_id) = self.attached_device(platform).await? {
                self.reporter
                    .info(&format!("Found already running device: {}", device_id));
                return Ok(Some(self.select(device_id, platform)));
            }
            if !force_launch {
                return Ok(None);
            }

            let emulators = self.list(&["emulators"]).await?;
            let emulator_id = tool_output::first_emulator_id(&emulators, platform)
                .ok_or_else(|| DeviceError::NoEmulator(platform.to_string()))?;

            self.reporter
                .info(&format!("Launching emulator {}", emulator_id));
            self.runner
                .spawn_detached(&self.tool.command(["emulators", "--launch", emulator_id.as_str()]))
                .await?;

            let device_id = match self.boot_wait {
                Some(wait) => self.poll_for_device(platform, wait).await?,
                None => self.attached_device(platform).await?,
            };
            Ok(device_id.map(|id| {
                self.reporter.info(&format!("Got device id {}", id));
                self.select(id, platform)
            }))
        }
        .instrument(span)
        .await
    }

    async fn poll_for_device(
        &self,
        platform: &str,
        wait: BootWait,
    ) -> Result<Option<String>, DeviceError> {
        let deadline = tokio::time::Instant::now() + wait.timeout;
        loop {
            if let Some(id) = self.attached_device(platform).await? {
                return Ok(Some(id));
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(timeout_secs = wait.timeout.as_secs(), "emulator did not appear");
                return Ok(None);
            }
            tokio::time::sleep(wait.interval).await;
        }
    }

    async fn attached_device(&self, platform: &str) -> Result<Option<String>, DeviceError> {
        let devices = self.list(&["devices"]).await?;
        Ok(tool_output::first_device_id(&devices, platform))
    }

    async fn list(&self, args: &[&str]) -> Result<String, DeviceError> {
        let command = self.tool.command(args.iter().copied());
        let output = self.runner.output(&command).await?;
        if !output.success() {
            return Err(DeviceError::CommandFailed {
                command: command.to_string(),
                status: output.describe_exit(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn select(&self, device_id: String, platform: &str) -> DeviceSelection {
        DeviceSelection {
            device_id,
            platform: platform.to_string(),
        }
    }
}
