//! Parsers for the flutter tool's human-oriented output.
//!
//! `flutter devices` and `flutter emulators` print one row per entry, with
//! fields separated by a bullet (`•`):
//!
//! ```text
//! sdk gphone64 x86 64 (mobile) • emulator-5554 • android-x64 • Android 13 (API 33) (emulator)
//! Pixel_3a_API_33 • Pixel 3a API 33 • Google • android
//! ```
//!
//! For device rows the id is the second field; for emulator rows it is the
//! first. Rows are matched against a platform by plain substring, and rows
//! without a bullet (headers, hints, blank lines) are ignored.
//!
//! `flutter build apk` ends with a line naming the built file:
//!
//! ```text
//! ✓ Built build/app/outputs/flutter-apk/app-debug.apk
//! ```
//!
//! Everything that depends on these formats lives here.

use std::path::PathBuf;

/// Field separator used in device and emulator listings.
pub const FIELD_SEPARATOR: char = '•';

/// Rows of `output` that mention `platform` and carry at least one separator,
/// each split into trimmed fields.
pub fn platform_rows<'a>(output: &'a str, platform: &'a str) -> impl Iterator<Item = Vec<&'a str>> + 'a {
    output
        .lines()
        .filter(move |line| line.contains(platform))
        .filter(|line| line.contains(FIELD_SEPARATOR))
        .map(|line| line.split(FIELD_SEPARATOR).map(str::trim).collect())
}

/// Id of the first attached device for `platform` in `flutter devices` output.
pub fn first_device_id(output: &str, platform: &str) -> Option<String> {
    platform_rows(output, platform)
        .filter_map(|fields| fields.get(1).map(|id| id.to_string()))
        .find(|id| !id.is_empty())
}

/// Id of the first emulator image for `platform` in `flutter emulators` output.
pub fn first_emulator_id(output: &str, platform: &str) -> Option<String> {
    platform_rows(output, platform)
        .filter_map(|fields| fields.first().map(|id| id.to_string()))
        .find(|id| !id.is_empty())
}

/// Scans the last non-blank line of build output for a token ending in
/// `extension` (for example `".apk"`).
pub fn artifact_path(output: &str, extension: &str) -> Option<PathBuf> {
    let last = output.lines().rev().find(|line| !line.trim().is_empty())?;
    last.split_whitespace()
        .find(|token| token.ends_with(extension) && token.len() > extension.len())
        .map(PathBuf::from)
}
