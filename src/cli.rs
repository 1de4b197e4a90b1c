use std::path::Path;
use std::process::ExitCode;

use termish::{Config, Shell};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed command-line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub(crate) command: Option<String>,
    pub(crate) script: Option<String>,
    pub(crate) safe_mode: bool,
    pub(crate) help: bool,
    pub(crate) version: bool,
}

/// Parse command-line arguments
pub(crate) fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs::default();

    let mut i = 1; // Skip program name
    while i < args.len() {
        match args[i].as_str() {
            "-c" => {
                // Everything after -c is the command
                if i + 1 < args.len() {
                    cli.command = Some(args[i + 1..].join(" "));
                }
                break;
            }
            "--safe-mode" => {
                cli.safe_mode = true;
            }
            "--help" | "-h" => {
                cli.help = true;
            }
            "--version" | "-V" | "-v" => {
                cli.version = true;
            }
            path => {
                if !path.starts_with('-') && cli.script.is_none() {
                    cli.script = Some(path.to_string());
                }
            }
        }
        i += 1;
    }

    cli
}

pub(crate) fn print_help() {
    println!(
        r#"termish {} - an interactive command shell

USAGE:
    termish                 Start interactive REPL
    termish -c <command>    Execute a single command line
    termish <script>        Execute a script file
    termish --safe-mode     Refuse destructive and network commands
    termish --help          Show this help message
    termish --version       Show version

STARTUP:
    ~/.termishrc                    Executed on REPL startup (if exists)
    ~/.config/termish/config.toml   Settings ($TERMISH_CONFIG overrides the path)
    ~/.termish_history              REPL history
    TERMISH_LOG=debug               Log level for ~/.local/share/termish/logs/termish.log
    TERMISH_BANNER=1                Show startup banner (quiet by default)

SYNTAX:
    cmd args                Run a built-in or external command
    a; b   a && b   a || b  Sequence, run on success, run on failure
    a | b                   Pipe output of a into b
    a |> b                  Pipe with every line trimmed, empty lines dropped
    < > >> 2> 2>> &> &>>    Redirect input, output, errors, both
    cmd << EOF              Heredoc: following lines up to EOF feed stdin
    cmd &                   Run in the background
    NAME=value              Set a variable
    $NAME ${{NAME}} $?      Variables, last exit status
    $(cmd) `cmd`            Command substitution
    $((expr)) ((expr))      Arithmetic expansion, arithmetic test
    {{a,b}} {{1..5}} *.txt ~    Brace, range, glob and tilde expansion

CONTROL FLOW:
    if cmd ... [else ...] end
    while cmd ... end               (at most 10000 iterations)
    for x in items ... end
    function name {{ ... }}   name() {{ ... }}
    `}}` may be used in place of `end`

JOBS:
    jobs                    List background jobs
    fg %N / bg %N           Resume a job in the foreground / background
    kill %N                 Terminate a job

Type `help` in the shell for the list of built-in commands."#,
        VERSION
    );
}

pub(crate) fn print_version() {
    println!("termish {}", VERSION);
}

/// Process exit code for a shell status
pub(crate) fn exit_code(status: i32) -> ExitCode {
    ExitCode::from((status & 0xff) as u8)
}

fn new_shell(config: &Config) -> Shell {
    Shell::from_config(config)
}

/// Execute a single command line
pub(crate) fn execute_command(cmd: &str, config: &Config) -> ExitCode {
    let mut shell = new_shell(config);
    let status = shell.interpret(cmd);
    exit_code(shell.exit_requested().unwrap_or(status))
}

/// Execute a script file
pub(crate) fn execute_script(path: &str, config: &Config) -> ExitCode {
    let mut shell = new_shell(config);
    match shell.run_script(Path::new(path)) {
        Ok(status) => exit_code(status),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("termish")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn command_takes_the_rest() {
        let cli = parse_args(&args(&["--safe-mode", "-c", "echo", "a", "--help"]));
        assert_eq!(cli.command.as_deref(), Some("echo a --help"));
        assert!(cli.safe_mode);
        assert!(!cli.help);
    }

    #[test]
    fn script_and_flags() {
        let cli = parse_args(&args(&["run.sh", "-V"]));
        assert_eq!(cli.script.as_deref(), Some("run.sh"));
        assert!(cli.version);
        assert_eq!(parse_args(&args(&[])), CliArgs::default());
    }
}
