//! The shell driver
//!
//! The Shell owns all state and runs each input line through:
//! 1. Batch splitting on `;`, `&&`, `||`
//! 2. Block collection (if/while/for/function)
//! 3. Expansion (alias, variables, arithmetic, substitution, braces, globs)
//! 4. Assignments, function calls, `((expr))` and job commands
//! 5. Background jobs or the pipeline engine

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace, warn};

use crate::arith;
use crate::builtins::{Builtins, CoreBuiltins};
use crate::config::Config;
use crate::control::{
    keyword, parse_opener, Block, BlockKind, Keyword, ShellState, MAX_WHILE_ITERATIONS,
};
use crate::error::ShellError;
use crate::expand::subst::{has_substitution, substitute};
use crate::expand::{expand_alias, expand_arithmetic, expand_variables, expand_words};
use crate::input::{InputSource, NoInput, ScriptInput};
use crate::jobs::{JobManager, SystemJobManager};
use crate::parser::{split_batch, tokenize};
use crate::pipeline::{PipelineExecutor, Streams};
use crate::process::{ProcessManager, SystemProcessManager};
use crate::security::{is_command_allowed, mask_sensitive_args};
use crate::store::{is_identifier, ShellContext};

/// What the block machinery did with a command
enum Outcome {
    /// Stored in a block (or opened one); nothing ran
    Collected,
    /// A block ran, or a block keyword failed
    Ran(i32),
}

pub struct Shell {
    ctx: ShellContext,
    state: ShellState,
    builtins: Box<dyn Builtins>,
    processes: Box<dyn ProcessManager>,
    jobs: Box<dyn JobManager>,
    input: Box<dyn InputSource>,
    streams: Streams,
    bridge_capacity: usize,
    safe_mode: bool,
    max_recursion: usize,
    call_depth: usize,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        Shell {
            ctx: ShellContext::new(),
            state: ShellState::default(),
            builtins: Box::new(CoreBuiltins),
            processes: Box::new(SystemProcessManager::new()),
            jobs: Box::new(SystemJobManager::new()),
            input: Box::new(NoInput),
            streams: Streams::default(),
            bridge_capacity: config.bridge_capacity.max(2),
            safe_mode: config.safe_mode,
            max_recursion: config.max_recursion,
            call_depth: 0,
        }
    }

    pub fn set_builtins(&mut self, builtins: Box<dyn Builtins>) {
        self.builtins = builtins;
    }

    pub fn set_process_manager(&mut self, processes: Box<dyn ProcessManager>) {
        self.processes = processes;
    }

    pub fn set_job_manager(&mut self, jobs: Box<dyn JobManager>) {
        self.jobs = jobs;
    }

    /// Where further lines (script body, heredocs) come from
    pub fn set_input(&mut self, input: Box<dyn InputSource>) {
        self.input = input;
    }

    pub fn set_stdin(&mut self, file: File) {
        self.streams.stdin = Some(file);
    }

    pub fn set_stdout(&mut self, file: File) {
        self.streams.stdout = Some(file);
    }

    pub fn set_stderr(&mut self, file: File) {
        self.streams.stderr = Some(file);
    }

    pub fn set_safe_mode(&mut self, on: bool) {
        self.safe_mode = on;
    }

    pub fn context(&self) -> &ShellContext {
        &self.ctx
    }

    /// Whether a block is still being collected
    pub fn in_block(&self) -> bool {
        self.state.in_block()
    }

    pub fn depth(&self) -> usize {
        self.state.depth()
    }

    pub fn exit_requested(&self) -> Option<i32> {
        self.ctx.exit_requested()
    }

    pub fn read_input(&mut self, prompt: &str) -> Option<String> {
        self.input.read_line(prompt)
    }

    /// Feed every line from the input source to the driver until it runs
    /// dry or `exit` is called. Returns the exit code for the process.
    pub fn run(&mut self) -> i32 {
        loop {
            if let Some(code) = self.ctx.exit_requested() {
                return code;
            }
            // reap finished background jobs between commands
            self.jobs.list_jobs();
            let prompt = if self.state.in_block() { ">> " } else { "> " };
            let Some(line) = self.input.read_line(prompt) else {
                break;
            };
            self.interpret(&line);
        }
        if self.state.in_block() {
            debug!("input ended inside {} open block(s)", self.state.depth());
            self.state.clear();
        }
        self.ctx
            .exit_requested()
            .unwrap_or_else(|| self.ctx.last_status())
    }

    /// Run a script file; its remaining lines also feed heredocs
    pub fn run_script(&mut self, path: &Path) -> Result<i32, ShellError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ShellError::resource(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.input = Box::new(ScriptInput::new(&content));
        Ok(self.run())
    }

    /// Process one line of input and return the status of the last command
    /// that ran.
    pub fn interpret(&mut self, line: &str) -> i32 {
        debug!("interpret: {}", mask_sensitive_args(line));
        let mut status = self.ctx.last_status();
        let mut run_next = true;
        let mut pending_join: Option<String> = None;

        for (cmd, sep) in split_batch(line) {
            if self.ctx.exit_requested().is_some() {
                break;
            }
            if cmd.is_empty() || cmd.starts_with('#') {
                continue;
            }

            let join = pending_join.take();
            match self.control_line(&cmd, join.as_deref()) {
                Some(Outcome::Collected) => {
                    if (sep == "&&" || sep == "||") && keyword(&cmd).is_none() {
                        pending_join = Some(sep);
                    }
                    continue;
                }
                Some(Outcome::Ran(code)) => status = code,
                None if run_next => status = self.run_command(&cmd),
                None => trace!("skipped: {}", cmd),
            }
            self.ctx.set_last_status(status);

            run_next = match sep.as_str() {
                "&&" => status == 0,
                "||" => status != 0,
                _ => true,
            };
        }
        status
    }

    /// Block machinery for one raw command. `None` means the command is not
    /// part of any block and should run.
    fn control_line(&mut self, cmd: &str, join: Option<&str>) -> Option<Outcome> {
        match parse_opener(cmd) {
            Ok(Some(opener)) => {
                let items = if opener.kind == BlockKind::For && !self.state.in_block() {
                    let expanded = self.expand(&opener.items);
                    tokenize(&expanded)
                } else {
                    Vec::new()
                };
                self.state.push(Block::new(opener, items));
                return Some(Outcome::Collected);
            }
            Ok(None) => {}
            Err(e) => {
                self.report(e.into());
                return Some(Outcome::Ran(1));
            }
        }

        match keyword(cmd) {
            Some(Keyword::Else) => {
                return Some(match self.state.set_else() {
                    Ok(()) => Outcome::Collected,
                    Err(e) => {
                        self.report(e.into());
                        Outcome::Ran(1)
                    }
                });
            }
            Some(Keyword::End) => {
                return Some(match self.state.close(cmd.trim()) {
                    Ok(Some(block)) => Outcome::Ran(self.execute_block(block)),
                    Ok(None) => Outcome::Collected,
                    Err(e) => {
                        self.report(e.into());
                        Outcome::Ran(1)
                    }
                });
            }
            Some(Keyword::Filler) if self.state.in_block() => return Some(Outcome::Collected),
            _ => {}
        }

        let top = self.state.top_mut()?;
        match join {
            Some(sep) => top.extend_last(sep, cmd),
            None => top.push_line(cmd),
        }
        Some(Outcome::Collected)
    }

    fn execute_block(&mut self, block: Block) -> i32 {
        debug!("running {:?} block", block.kind);
        match block.kind {
            BlockKind::If => {
                let branch = if self.interpret(&block.condition) == 0 {
                    &block.body
                } else {
                    &block.else_body
                };
                self.run_lines(branch)
            }
            BlockKind::While => {
                let mut status = 0;
                for _ in 0..MAX_WHILE_ITERATIONS {
                    if self.ctx.exit_requested().is_some() || self.interpret(&block.condition) != 0 {
                        break;
                    }
                    status = self.run_lines(&block.body);
                }
                status
            }
            BlockKind::For => {
                let mut status = 0;
                for item in &block.items {
                    if self.ctx.exit_requested().is_some() {
                        break;
                    }
                    self.ctx.vars.set(&block.loop_var, item);
                    status = self.run_lines(&block.body);
                }
                status
            }
            BlockKind::Function => {
                let name = block.name().to_string();
                debug!("defined function {}", name);
                self.ctx.functions.set(&name, block.body);
                0
            }
        }
    }

    fn run_lines(&mut self, lines: &[String]) -> i32 {
        let mut status = 0;
        for line in lines {
            status = self.interpret(line);
            if self.ctx.exit_requested().is_some() {
                break;
            }
        }
        status
    }

    /// Variables, arithmetic, substitution, braces, tildes and globs
    fn expand(&mut self, text: &str) -> String {
        let text = self.expand_text(text);
        let text = expand_words(&text);
        trace!("expanded: {}", text);
        text
    }

    /// The line-level stages: variables, arithmetic and substitution
    fn expand_text(&mut self, text: &str) -> String {
        let text = expand_variables(text, &self.ctx.vars, self.ctx.last_status());
        let (text, errors) = expand_arithmetic(&text);
        for e in errors {
            self.report(e.into());
        }
        if has_substitution(&text) {
            substitute(&text, &mut |cmd| self.capture(cmd))
        } else {
            text
        }
    }

    fn run_command(&mut self, cmd: &str) -> i32 {
        let aliased = expand_alias(cmd, &self.ctx.aliases);
        let text = self.expand_text(&aliased);

        // arithmetic commands never see brace or glob expansion
        if let Some(expr) = text
            .trim()
            .strip_prefix("((")
            .and_then(|l| l.strip_suffix("))"))
        {
            return match arith::evaluate(expr) {
                Ok(value) => i32::from(value == 0),
                Err(e) => {
                    self.report(e.into());
                    1
                }
            };
        }

        let expanded = expand_words(&text);
        trace!("expanded: {}", expanded);
        let line = expanded.trim();
        if line.is_empty() {
            return 0;
        }

        if let Some((name, value)) = assignment(line) {
            self.ctx.vars.set(name, value);
            return 0;
        }

        let words = tokenize(line);
        let Some(first) = words.first() else {
            return 0;
        };

        if let Some(body) = self.ctx.functions.get(first) {
            return self.call_function(&words[1..], &body);
        }

        let (line, background) = match line.strip_suffix('&') {
            Some(rest) if !rest.ends_with('&') && !rest.ends_with('>') => (rest.trim_end(), true),
            _ => (line, false),
        };

        match first.as_str() {
            "jobs" if words.len() == 1 => return self.list_jobs(),
            "fg" | "bg" | "kill" => {
                if let Some(code) = self.job_command(&words) {
                    return code;
                }
            }
            _ => {}
        }

        if background {
            return self.start_background(line);
        }

        let mut executor = PipelineExecutor {
            builtins: &*self.builtins,
            ctx: &self.ctx,
            processes: &mut *self.processes,
            streams: &self.streams,
            bridge_capacity: self.bridge_capacity,
            safe_mode: self.safe_mode,
        };
        executor.execute(line, &mut *self.input)
    }

    fn call_function(&mut self, args: &[String], body: &[String]) -> i32 {
        if self.call_depth >= self.max_recursion {
            self.report(ShellError::resource(format!(
                "maximum function recursion depth ({}) exceeded",
                self.max_recursion
            )));
            return 1;
        }

        self.ctx.vars.push_scope();
        for (i, arg) in args.iter().enumerate() {
            self.ctx.vars.set(&(i + 1).to_string(), arg);
        }
        self.ctx.vars.set("#", &args.len().to_string());
        self.ctx.vars.set("@", &args.join(" "));

        self.call_depth += 1;
        let outer = std::mem::take(&mut self.state);
        let status = self.run_lines(body);
        self.state = outer;
        self.call_depth -= 1;

        self.ctx.vars.pop_scope();
        status
    }

    fn list_jobs(&mut self) -> i32 {
        let mut out = self.streams.writer();
        for job in self.jobs.list_jobs() {
            if let Err(e) = writeln!(out, "[{}] {} {} {}", job.id, job.pid, job.status, job.command)
            {
                warn!("jobs: {}", e);
                return 1;
            }
        }
        0
    }

    /// `fg %N`, `bg %N` and `kill %N`. A `kill` without `%` is not a job
    /// command and returns `None`.
    fn job_command(&mut self, words: &[String]) -> Option<i32> {
        let name = words[0].as_str();
        let arg = words.get(1);
        if name == "kill" && !arg.is_some_and(|a| a.starts_with('%')) {
            return None;
        }
        if !is_command_allowed(name, self.safe_mode) {
            self.streams.report(&format!(
                "Error: command '{}' is blocked in safe mode",
                name
            ));
            return Some(1);
        }

        let Some(id) = arg
            .and_then(|a| a.strip_prefix('%'))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            self.report(ShellError::usage(format!("{0}: usage: {0} %<job>", name)));
            return Some(1);
        };

        let found = match name {
            "fg" => {
                let mut out = self.streams.writer();
                self.jobs.bring_to_foreground(id, &mut out)
            }
            "bg" => self.jobs.continue_in_background(id),
            _ => self.jobs.stop_job(id),
        };
        if found {
            Some(0)
        } else {
            self.report(ShellError::usage(format!("{}: job not found: {}", name, id)));
            Some(1)
        }
    }

    fn start_background(&mut self, line: &str) -> i32 {
        if !is_command_allowed(line, self.safe_mode) {
            let name = line.split_whitespace().next().unwrap_or("");
            self.streams.report(&format!(
                "Error: command '{}' is blocked in safe mode",
                name
            ));
            return 1;
        }
        match self.jobs.start_job(line) {
            Ok(id) => {
                if let Err(e) = writeln!(self.streams.writer(), "[{}] {}", id, line) {
                    warn!("job [{}]: {}", id, e);
                }
                0
            }
            Err(e) => {
                self.report(e.into());
                1
            }
        }
    }

    /// Run `line` with stdout collected, for command substitution
    pub fn capture(&mut self, line: &str) -> String {
        let collected = match tempfile::tempfile().and_then(|f| Ok((f.try_clone()?, f))) {
            Ok(pair) => pair,
            Err(e) => {
                self.report(ShellError::resource(format!(
                    "cannot capture output of `{}`: {}",
                    line, e
                )));
                return String::new();
            }
        };
        let (sink, mut file) = collected;

        let outer_stdout = self.streams.stdout.replace(sink);
        let outer_state = std::mem::take(&mut self.state);
        let pending_exit = self.ctx.exit_requested();

        self.interpret(line);

        // `exit` inside a substitution only ends the substitution
        if pending_exit.is_none() {
            self.ctx.take_exit_request();
        }
        self.state = outer_state;
        self.streams.stdout = outer_stdout;

        let mut bytes = Vec::new();
        if let Err(e) = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut bytes))
        {
            warn!("reading substitution output: {}", e);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn report(&self, err: ShellError) {
        let msg = match &err {
            ShellError::Expansion(_) | ShellError::Usage(_) => err.to_string(),
            _ => format!("Error: {}", err),
        };
        self.streams.report(&msg);
    }
}

/// `NAME=value` with one pair of surrounding quotes stripped from the value.
/// Everything after the `=` is the value, spaces included.
fn assignment(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once('=')?;
    if !is_identifier(name) {
        return None;
    }
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return Some((name, inner));
        }
    }
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> (Shell, File) {
        shell_with(&Config::default())
    }

    fn shell_with(config: &Config) -> (Shell, File) {
        let file = tempfile::tempfile().unwrap();
        let mut shell = Shell::from_config(config);
        shell.set_stdout(file.try_clone().unwrap());
        shell.set_stderr(file.try_clone().unwrap());
        (shell, file)
    }

    fn output(file: &mut File) -> String {
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn assignment_forms() {
        assert_eq!(assignment("x=1"), Some(("x", "1")));
        assert_eq!(assignment("x=\"a b\""), Some(("x", "a b")));
        assert_eq!(assignment("x='q'"), Some(("x", "q")));
        assert_eq!(assignment("x=a b"), Some(("x", "a b")));
        assert_eq!(assignment("a-b=1"), None);
        assert_eq!(assignment("echo a=b"), None);
    }

    #[test]
    fn variables_and_status() {
        let (mut sh, mut out) = shell();
        sh.interpret("greeting=hello");
        sh.interpret("echo $greeting world");
        sh.interpret("false; echo $?");
        assert_eq!(output(&mut out), "hello world\n1\n");
    }

    #[test]
    fn and_or_chains() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.interpret("true && echo a || echo b"), 0);
        sh.interpret("false && echo c || echo d");
        sh.interpret("false || false && echo e");
        assert_eq!(output(&mut out), "a\nd\n");
    }

    #[test]
    fn arithmetic_command_and_expansion() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.interpret("((2 > 1))"), 0);
        assert_eq!(sh.interpret("((2 < 1))"), 1);
        sh.interpret("echo $((6 * 7))");
        sh.interpret("echo $((1 / 0))");
        assert_eq!(
            output(&mut out),
            "42\nArithmetic error: Division by zero\n$((1 / 0))\n"
        );
    }

    #[test]
    fn arithmetic_command_skips_word_expansion() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.interpret("(( 2 * 0 ))"), 1);
        assert_eq!(sh.interpret("(( 3 * 2 ))"), 0);
        sh.interpret("n=4");
        assert_eq!(sh.interpret("(( $n * 0 ))"), 1);
        assert_eq!(output(&mut out), "");
    }

    #[test]
    fn assignment_keeps_spaces_from_expansion() {
        let (mut sh, mut out) = shell();
        sh.interpret("pair=$(echo b a)");
        sh.interpret("copy=$pair");
        sh.interpret("echo got $copy");
        assert_eq!(output(&mut out), "got b a\n");
        assert_eq!(sh.context().vars.get("copy").as_deref(), Some("b a"));
    }

    #[test]
    fn capture_returns_output_and_restores_stdout() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.capture("echo one; echo two"), "one\ntwo\n");
        assert_eq!(sh.capture("true"), "");
        sh.interpret("echo after");
        assert_eq!(output(&mut out), "after\n");
    }

    #[test]
    fn command_substitution() {
        let (mut sh, mut out) = shell();
        sh.interpret("echo $(echo inner) `echo tick`");
        sh.interpret("v=$(echo $(echo nested))");
        sh.interpret("echo $v");
        assert_eq!(output(&mut out), "inner tick\nnested\n");
    }

    #[test]
    fn exit_inside_substitution_is_contained() {
        let (mut sh, _out) = shell();
        sh.interpret("echo $(exit 3)");
        assert_eq!(sh.exit_requested(), None);
        sh.interpret("exit 4; echo never");
        assert_eq!(sh.exit_requested(), Some(4));
    }

    #[test]
    fn blocks_collect_then_run() {
        let (mut sh, mut out) = shell();
        sh.interpret("if true");
        assert!(sh.in_block());
        sh.interpret("echo yes");
        sh.interpret("else");
        sh.interpret("echo no");
        assert_eq!(output(&mut out), "");
        sh.interpret("end");
        assert!(!sh.in_block());
        assert_eq!(output(&mut out), "yes\n");
    }

    #[test]
    fn control_errors() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.interpret("end"), 1);
        assert_eq!(sh.interpret("}"), 1);
        assert_eq!(sh.interpret("else"), 1);
        assert_eq!(
            output(&mut out),
            "Error: end without block\nError: end without block\nError: else without if\n"
        );
    }

    #[test]
    fn functions_get_arguments() {
        let (mut sh, mut out) = shell();
        sh.interpret("greet() {");
        sh.interpret("echo hi $1 ($#)");
        sh.interpret("}");
        sh.interpret("greet bob");
        assert_eq!(output(&mut out), "hi bob (1)\n");
        assert_eq!(sh.context().vars.get("1"), None);
    }

    #[test]
    fn recursion_is_bounded() {
        let config = Config {
            max_recursion: 20,
            ..Config::default()
        };
        let (mut sh, mut out) = shell_with(&config);
        sh.interpret("function loop { loop; }");
        assert_eq!(sh.interpret("loop"), 1);
        assert_eq!(
            output(&mut out),
            "Error: maximum function recursion depth (20) exceeded\n"
        );
    }

    #[test]
    fn job_command_usage() {
        let (mut sh, mut out) = shell();
        assert_eq!(sh.interpret("fg"), 1);
        assert_eq!(sh.interpret("bg %9"), 1);
        assert_eq!(
            output(&mut out),
            "fg: usage: fg %<job>\nbg: job not found: 9\n"
        );
    }
}
