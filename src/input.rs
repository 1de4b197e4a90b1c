//! Where the driver gets its next line from
//!
//! The same source feeds the main loop and heredoc bodies: an interactive
//! terminal prompts for each line, a script hands out its following lines.

use std::collections::VecDeque;

pub trait InputSource {
    /// Next line without its newline, or `None` at end of input
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    /// Whether lines come from a person at a terminal
    fn is_interactive(&self) -> bool {
        false
    }
}

/// No further input (`-c` mode and tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputSource for NoInput {
    fn read_line(&mut self, _prompt: &str) -> Option<String> {
        None
    }
}

/// The remaining lines of a script
#[derive(Debug, Default, Clone)]
pub struct ScriptInput {
    lines: VecDeque<String>,
    line_number: usize,
}

impl ScriptInput {
    pub fn new(content: &str) -> Self {
        ScriptInput {
            lines: content.lines().map(str::to_string).collect(),
            line_number: 0,
        }
    }

    /// 1-based number of the line most recently handed out
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

impl InputSource for ScriptInput {
    fn read_line(&mut self, _prompt: &str) -> Option<String> {
        let line = self.lines.pop_front()?;
        self.line_number += 1;
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_lines_in_order() {
        let mut input = ScriptInput::new("echo a\n\necho b\n");
        assert_eq!(input.read_line("> ").as_deref(), Some("echo a"));
        assert_eq!(input.read_line("> ").as_deref(), Some(""));
        assert_eq!(input.read_line("> ").as_deref(), Some("echo b"));
        assert_eq!(input.line_number(), 3);
        assert_eq!(input.read_line("> "), None);
        assert!(!input.is_interactive());
    }

    #[test]
    fn no_input_is_empty() {
        assert_eq!(NoInput.read_line("> "), None);
    }
}
