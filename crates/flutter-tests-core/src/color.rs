//! Terminal colors for report lines.
//!
//! Every colored message in the crate goes through [`Color`], so the rest of
//! the code talks about colors by name and never about escape codes.

use std::fmt;

const RESET: &str = "\x1b[0m";

/// A named terminal color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Blue,
}

impl Color {
    /// Looks up a color by its lowercase name (`"red"`, `"green"`, `"blue"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "red" => Some(Color::Red),
            "green" => Some(Color::Green),
            "blue" => Some(Color::Blue),
            _ => None,
        }
    }

    /// The SGR foreground code for this color.
    pub fn code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Blue => 34,
        }
    }

    /// Wraps `message` in this color's escape sequence.
    pub fn paint(self, message: impl fmt::Display) -> String {
        format!("\x1b[{}m{}{}", self.code(), message, RESET)
    }
}

/// Colorizes `message` with the color called `name`.
///
/// Unknown color names leave the message untouched.
pub fn colorize(message: &str, name: &str) -> String {
    match Color::from_name(name) {
        Some(color) => color.paint(message),
        None => message.to_string(),
    }
}
