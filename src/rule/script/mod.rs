//! The sandboxed language rule scripts are written in.
//!
//! A script is a list of statements run once per transaction. It can read the transaction
//! through the `tx` object, change a few of its fields and decide whether the rule matched by
//! returning a truthy value. There are no loops and no way to reach the outside world, and every
//! run is bounded by [Limits].

mod interpreter;
mod lexer;
mod parser;

use std::fmt::Display;

use serde::Serialize;

pub use interpreter::{Completion, Fault, Limits, Value, execute};
pub use parser::{Program, compile};

/// A line and column in a script, both starting at one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScriptPosition {
    /// The line, starting at one.
    pub line: u32,
    /// The column in characters, starting at one.
    pub column: u32,
}

impl ScriptPosition {
    /// A position at `line` and `column`.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Display for ScriptPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A script that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Where the problem was found.
    pub position: ScriptPosition,
    /// What is wrong.
    pub message: String,
}

impl CompileError {
    fn new(position: ScriptPosition, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.position)
    }
}

/// Convert `SetCategoryID` or `setCategoryId` to `set_category_id`.
///
/// Names that are already snake case are returned unchanged.
pub(crate) fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut snake = String::with_capacity(name.len() + 4);

    for (index, &character) in chars.iter().enumerate() {
        if character.is_ascii_uppercase() {
            if index > 0 {
                let previous = chars[index - 1];
                let next_is_lower = chars
                    .get(index + 1)
                    .is_some_and(|next| next.is_ascii_lowercase());

                if previous.is_ascii_lowercase()
                    || previous.is_ascii_digit()
                    || (previous.is_ascii_uppercase() && next_is_lower)
                {
                    snake.push('_');
                }
            }
            snake.push(character.to_ascii_lowercase());
        } else {
            snake.push(character);
        }
    }

    snake
}
