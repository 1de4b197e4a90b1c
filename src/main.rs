//! termish - an interactive command shell
//!
//! Usage:
//!   termish              Start interactive REPL
//!   termish -c "cmd"     Execute a single command line
//!   termish script.sh    Execute a script file

mod cli;
mod rcfile;
mod repl;

use std::env;
use std::io::{self, Read};
use std::process::ExitCode;

use log::warn;
use termish::{Config, ScriptInput, Shell};

use cli::{exit_code, parse_args, print_help, print_version};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let cli = parse_args(&args);

    if cli.help {
        print_help();
        return ExitCode::SUCCESS;
    }

    if cli.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {}; using defaults", e);
        Config::default()
    });
    config.safe_mode |= cli.safe_mode;

    if let Err(e) = termish::logging::init(&config.log_level) {
        eprintln!("Warning: logging disabled: {}", e);
    }

    if let Some(cmd) = cli.command {
        return cli::execute_command(&cmd, &config);
    }

    if let Some(script) = cli.script {
        return cli::execute_script(&script, &config);
    }

    // Piped input runs like a script, without prompts or history
    if !termish::signals::is_interactive() {
        return run_stdin(&config);
    }

    match repl::run_repl(&config) {
        Ok(status) => exit_code(status),
        Err(e) => {
            warn!("REPL error: {}", e);
            eprintln!("REPL error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_stdin(config: &Config) -> ExitCode {
    let mut content = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut content) {
        eprintln!("Error: cannot read stdin: {}", e);
        return ExitCode::FAILURE;
    }
    let mut shell = Shell::from_config(config);
    shell.set_input(Box::new(ScriptInput::new(&content)));
    exit_code(shell.run())
}
