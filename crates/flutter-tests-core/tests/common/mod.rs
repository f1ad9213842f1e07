//! Shared test helpers for flutter-tests-core integration tests.
//!
//! [`MockRunner`] stands in for the flutter tool: responses are scripted per
//! subcommand (`devices`, `emulators`, `build`, ...) and every issued command
//! is recorded so tests can assert on what would have run.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use flutter_tests_core::runner::{CommandOutput, CommandRunner, RunnerError, ToolCommand};

// ---------------------------------------------------------------------------
// Canned tool output
// ---------------------------------------------------------------------------

pub const ANDROID_DEVICE: &str = "\
1 connected device:

sdk gphone64 x86 64 (mobile) • emulator-5554 • android-x64 • Android 13 (API 33) (emulator)
";

pub const DESKTOP_ONLY: &str = "\
1 connected device:

macOS (desktop) • macos • darwin-arm64 • macOS 14.1 23B74 darwin-arm64
";

pub const ANDROID_EMULATORS: &str = "\
1 available emulator:

Pixel_3a_API_33 • Pixel 3a API 33 • Google • android
";

pub const NO_EMULATORS: &str = "\
Unable to find any emulator sources. Please ensure you have some
Android AVD images or an iOS Simulator available.
";

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput::with_code(0, stdout)
}

pub fn exit(code: i32) -> CommandOutput {
    CommandOutput::with_code(code, "")
}

// ---------------------------------------------------------------------------
// Scripted runner
// ---------------------------------------------------------------------------

/// A [`CommandRunner`] whose answers are scripted per subcommand.
///
/// Each subcommand has a queue of outputs. Outputs are handed out in order and
/// the last one repeats once the queue is down to a single entry. Unscripted
/// subcommands succeed with empty output. `drive` commands fail with exit
/// code 1 when their `--target` contains one of the configured substrings.
#[derive(Default)]
pub struct MockRunner {
    scripts: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    failing_targets: Vec<String>,
    commands: Mutex<Vec<ToolCommand>>,
    detached: Mutex<Vec<ToolCommand>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outputs of `subcommand`.
    pub fn on(self, subcommand: &str, outputs: Vec<CommandOutput>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(subcommand.to_string(), outputs.into());
        self
    }

    /// Makes `drive` fail for targets containing `needle`.
    pub fn fail_drive_for(mut self, needle: &str) -> Self {
        self.failing_targets.push(needle.to_string());
        self
    }

    /// Every command passed to `output`, in order.
    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Every command passed to `spawn_detached`, in order.
    pub fn detached(&self) -> Vec<ToolCommand> {
        self.detached.lock().unwrap().clone()
    }

    /// Number of `output` calls for `subcommand`.
    pub fn count(&self, subcommand: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| subcommand_of(c) == subcommand)
            .count()
    }

    /// `--target` values of every `drive` command, in order.
    pub fn driven_targets(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter(|c| subcommand_of(c) == "drive")
            .filter_map(|c| arg_after(c, "--target"))
            .collect()
    }
}

pub fn subcommand_of(command: &ToolCommand) -> &str {
    command.args.first().map(String::as_str).unwrap_or_default()
}

pub fn arg_after(command: &ToolCommand, flag: &str) -> Option<String> {
    let pos = command.args.iter().position(|a| a == flag)?;
    command.args.get(pos + 1).cloned()
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn output(&self, command: &ToolCommand) -> Result<CommandOutput, RunnerError> {
        self.commands.lock().unwrap().push(command.clone());
        let subcommand = subcommand_of(command).to_string();

        let mut scripts = self.scripts.lock().unwrap();
        if let Some(queue) = scripts.get_mut(&subcommand) {
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(output) = next {
                return Ok(output);
            }
        }

        if subcommand == "drive" {
            let target = arg_after(command, "--target").unwrap_or_default();
            if self.failing_targets.iter().any(|n| target.contains(n.as_str())) {
                return Ok(exit(1));
            }
        }
        Ok(ok(""))
    }

    async fn spawn_detached(&self, command: &ToolCommand) -> Result<(), RunnerError> {
        self.detached.lock().unwrap().push(command.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Temp directories
// ---------------------------------------------------------------------------

/// A fresh, empty directory under the system temp dir.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{}_{}",
        prefix,
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Creates `files` (relative paths) with placeholder contents under `root`.
pub fn touch_all(root: &Path, files: &[&str]) {
    for file in files {
        let path = root.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, "void main() {}\n").unwrap();
    }
}
