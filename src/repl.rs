use std::borrow::Cow;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Editor, Helper, Result as RlResult};

use termish::{Builtins, Config, CoreBuiltins, InputSource, Shell};

use crate::rcfile::load_termishrc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names offered for the first word, refreshed before every prompt
type SharedNames = Arc<Mutex<BTreeSet<String>>>;

/// Helper struct for rustyline with tab completion
struct TermishHelper {
    names: SharedNames,
}

impl Helper for TermishHelper {}

impl Completer for TermishHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Find the word being completed
        let start = line[..pos]
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &line[start..pos];

        let first_word = line[..start].trim().is_empty();
        let completions = if first_word && !prefix.contains('/') && !prefix.starts_with('~') {
            if prefix.is_empty() {
                return Ok((start, Vec::new()));
            }
            self.complete_command(prefix)
        } else {
            self.complete_path(prefix)
        };

        let pairs = completions
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl TermishHelper {
    fn complete_command(&self, prefix: &str) -> Vec<String> {
        let mut completions: Vec<String> = self
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();

        // Check PATH for executables (limit to avoid slowness)
        if let Some(path) = std::env::var_os("PATH") {
            let mut found = 0;
            'outer: for dir in std::env::split_paths(&path) {
                let Ok(entries) = std::fs::read_dir(dir) else {
                    continue;
                };
                for entry in entries.filter_map(|e| e.ok()) {
                    if let Some(name) = entry.file_name().to_str() {
                        if name.starts_with(prefix) {
                            completions.push(name.to_string());
                            found += 1;
                            if found >= 50 {
                                break 'outer;
                            }
                        }
                    }
                }
            }
        }

        completions.sort();
        completions.dedup();
        completions
    }

    fn complete_path(&self, prefix: &str) -> Vec<String> {
        let home = std::env::var("HOME").ok();
        let expanded = match (&home, prefix.strip_prefix('~')) {
            (Some(home), Some(rest)) => format!("{}{}", home, rest),
            _ => prefix.to_string(),
        };
        let pattern = format!("{}*", glob::Pattern::escape(&expanded));

        let Ok(paths) = glob::glob(&pattern) else {
            return Vec::new();
        };
        let mut completions: Vec<String> = paths
            .filter_map(Result::ok)
            .map(|path: PathBuf| {
                let mut full = path.to_string_lossy().into_owned();
                if prefix.starts_with('~') {
                    if let Some(home) = &home {
                        full = full.replacen(home.as_str(), "~", 1);
                    }
                }
                // Add trailing slash for directories
                if path.is_dir() {
                    full.push('/');
                }
                full
            })
            .collect();
        completions.sort();
        completions
    }
}

impl Hinter for TermishHelper {
    type Hint = String;
}

impl Highlighter for TermishHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Borrowed(line)
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{}\x1b[0m", hint))
    }
}

impl Validator for TermishHelper {}

/// Terminal line source: prompts through rustyline and keeps history
struct EditorInput {
    editor: Editor<TermishHelper, DefaultHistory>,
    history_path: Option<PathBuf>,
}

impl InputSource for EditorInput {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Some(line)
            }
            // Ctrl-C: drop the line, keep the shell
            Err(ReadlineError::Interrupted) => Some(String::new()),
            Err(ReadlineError::Eof) => None,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                None
            }
        }
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

impl Drop for EditorInput {
    fn drop(&mut self) {
        if let Some(path) = &self.history_path {
            if let Err(e) = self.editor.save_history(path) {
                debug!("history not saved to {}: {}", path.display(), e);
            }
        }
    }
}

fn refresh_names(shell: &Shell, names: &SharedNames) {
    let ctx = shell.context();
    let mut names = names.lock().unwrap_or_else(PoisonError::into_inner);
    names.clear();
    names.extend(CoreBuiltins.names().into_iter().map(String::from));
    names.extend(["jobs", "fg", "bg", "kill"].map(String::from));
    names.extend(ctx.functions.list().into_keys());
    names.extend(ctx.aliases.list().into_keys());
}

/// Run the interactive REPL until EOF or `exit`; returns the exit status
pub(crate) fn run_repl(config: &Config) -> RlResult<i32> {
    if let Err(e) = ctrlc::set_handler(|| {}) {
        warn!("cannot install SIGINT handler: {}", e);
    }
    if let Err(e) = termish::signals::setup_signal_handlers() {
        warn!("{}", e);
    }

    let rl_config = rustyline::Config::builder()
        .max_history_size(config.history_size)?
        .auto_add_history(false)
        .build();
    let mut editor = Editor::with_config(rl_config)?;
    let names: SharedNames = Arc::new(Mutex::new(BTreeSet::new()));
    editor.set_helper(Some(TermishHelper {
        names: Arc::clone(&names),
    }));

    let history_path = config.history_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let mut shell = Shell::from_config(config);
    shell.set_input(Box::new(EditorInput {
        editor,
        history_path,
    }));

    if config.banner {
        println!("termish {} - type `help` for built-in commands", VERSION);
    }

    load_termishrc(&mut shell);

    loop {
        if let Some(code) = shell.exit_requested() {
            return Ok(code);
        }
        refresh_names(&shell, &names);
        let prompt = if shell.in_block() { ">> " } else { "> " };
        let Some(line) = shell.read_input(prompt) else {
            break;
        };
        shell.interpret(&line);
    }

    Ok(shell
        .exit_requested()
        .unwrap_or_else(|| shell.context().last_status()))
}
