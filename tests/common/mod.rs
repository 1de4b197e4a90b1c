//! Common test utilities for termish integration tests

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

pub use termish::{Config, Shell};

/// A shell whose stdout and stderr both go to the returned file
pub fn captured_shell(config: &Config) -> (Shell, File) {
    let file = tempfile::tempfile().unwrap();
    let mut shell = Shell::from_config(config);
    shell.set_stdout(file.try_clone().unwrap());
    shell.set_stderr(file.try_clone().unwrap());
    (shell, file)
}

/// Everything written to a captured file so far
pub fn output(file: &mut File) -> String {
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut out = String::new();
    file.read_to_string(&mut out).unwrap();
    out
}

/// Feed lines to the shell one at a time, the way the REPL does
#[allow(dead_code)]
pub fn feed(shell: &mut Shell, lines: &[&str]) -> i32 {
    lines.iter().fold(0, |_, line| shell.interpret(line))
}
