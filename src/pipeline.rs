//! Pipeline execution
//!
//! A command line is split into `|` / `|>` stages, each with its own
//! redirections. When every stage is a built-in the stages run on scoped
//! threads connected by in-memory [`StreamBridge`]s; otherwise external
//! programs are chained with OS pipes and any built-in stage runs on a
//! thread reading and writing those pipes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread::{self, ScopedJoinHandle};

use log::{debug, warn};

use crate::bridge::{BridgeReader, BridgeWriter, StreamBridge};
use crate::builtins::{BuiltinIo, Builtins};
use crate::input::InputSource;
use crate::parser::{
    apply_trim_to_lines, parse_redirection, split_pipeline_operators, tokenize, RedirectionInfo,
};
use crate::process::ProcessManager;
use crate::security::{is_command_allowed, mask_sensitive_args};
use crate::store::ShellContext;

/// Overrides for the shell's own standard streams. `None` means the
/// process's stdin/stdout/stderr.
#[derive(Debug, Default)]
pub struct Streams {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

impl Streams {
    fn clone_handle(handle: &Option<File>) -> Option<File> {
        handle.as_ref().and_then(|f| f.try_clone().ok())
    }

    pub fn stdin_handle(&self) -> Option<File> {
        Self::clone_handle(&self.stdin)
    }

    pub fn stdout_handle(&self) -> Option<File> {
        Self::clone_handle(&self.stdout)
    }

    pub fn stderr_handle(&self) -> Option<File> {
        Self::clone_handle(&self.stderr)
    }

    pub fn reader(&self) -> Box<dyn Read + Send> {
        match self.stdin_handle() {
            Some(f) => Box::new(f),
            None => Box::new(io::stdin()),
        }
    }

    pub fn writer(&self) -> Box<dyn Write + Send> {
        match self.stdout_handle() {
            Some(f) => Box::new(f),
            None => Box::new(io::stdout()),
        }
    }

    pub fn error_writer(&self) -> Box<dyn Write + Send> {
        match self.stderr_handle() {
            Some(f) => Box::new(f),
            None => Box::new(io::stderr()),
        }
    }

    /// One line on the shell's error stream, mirrored to the log
    pub fn report(&self, msg: &str) {
        warn!("{}", msg);
        let _ = writeln!(self.error_writer(), "{}", msg);
    }
}

/// Writer that trims every line and drops the ones left empty
pub struct LineTrimmer<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> LineTrimmer<W> {
    pub fn new(inner: W) -> Self {
        LineTrimmer {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        let trimmed = apply_trim_to_lines(&String::from_utf8_lossy(line));
        self.inner.write_all(trimmed.as_bytes())
    }

    /// Write out a final unterminated line
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(&rest)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> Write for LineTrimmer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for LineTrimmer<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// One parsed pipeline stage
#[derive(Debug)]
struct Stage {
    info: RedirectionInfo,
    words: Vec<String>,
    trim: bool,
}

impl Stage {
    fn name(&self) -> Option<&str> {
        self.words.first().map(String::as_str)
    }
}

/// What a stage thread needs from the shell; shared across threads
#[derive(Clone, Copy)]
struct StageEnv<'a> {
    builtins: &'a dyn Builtins,
    ctx: &'a ShellContext,
    streams: &'a Streams,
}

impl StageEnv<'_> {
    fn is_builtin(&self, stage: &Stage) -> bool {
        stage.name().map_or(true, |name| self.builtins.is_builtin(name))
    }

    fn invoke(
        &self,
        command: &str,
        mut stdin: Box<dyn Read + Send>,
        mut stdout: Box<dyn Write + Send>,
        mut stderr: Box<dyn Write + Send>,
    ) -> i32 {
        if command.trim().is_empty() {
            return 0;
        }
        let code = self.builtins.invoke(
            command,
            self.ctx,
            BuiltinIo {
                stdin: &mut *stdin,
                stdout: &mut *stdout,
                stderr: &mut *stderr,
            },
        );
        let _ = stdout.flush();
        code
    }
}

fn open_output(path: &str, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
}

/// Files named by a stage's redirections
#[derive(Default)]
struct Redirected {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
}

impl Redirected {
    fn open(info: &RedirectionInfo) -> Result<Self, String> {
        let mut files = Redirected::default();
        if let Some(path) = &info.in_file {
            files.stdin = Some(
                File::open(path).map_err(|_| format!("Error: Cannot open input file: {}", path))?,
            );
        }
        if let Some(path) = &info.out_file {
            files.stdout = Some(
                open_output(path, info.append_out)
                    .map_err(|_| format!("Error: Cannot open output file: {}", path))?,
            );
        }
        if let Some(path) = &info.err_file {
            let shared = match (&info.out_file, &files.stdout) {
                (Some(out), Some(f)) if out == path => f.try_clone().ok(),
                _ => None,
            };
            files.stderr = match shared {
                Some(f) => Some(f),
                None => Some(
                    open_output(path, info.append_err)
                        .map_err(|_| format!("Error: Cannot open error file: {}", path))?,
                ),
            };
        }
        Ok(files)
    }
}

/// Read a heredoc body up to `delim` and store it in a fresh
/// `.heredoc_<random>` file in the current directory. Returns the file's
/// path; the file is left in place.
pub fn write_heredoc(delim: &str, input: &mut dyn InputSource) -> io::Result<String> {
    write_heredoc_in(Path::new("."), delim, input)
}

pub fn write_heredoc_in(
    dir: &Path,
    delim: &str,
    input: &mut dyn InputSource,
) -> io::Result<String> {
    let prompt = if input.is_interactive() { "> " } else { "" };
    let mut body = String::new();
    while let Some(line) = input.read_line(prompt) {
        if line.trim() == delim {
            break;
        }
        body.push_str(&line);
        body.push('\n');
    }

    let mut file = tempfile::Builder::new()
        .prefix(".heredoc_")
        .tempfile_in(dir)?;
    file.write_all(body.as_bytes())?;
    let (_, path) = file.keep()?;
    Ok(path.to_string_lossy().into_owned())
}

enum Waiter<'scope> {
    Process(u32),
    Thread(ScopedJoinHandle<'scope, i32>),
}

pub struct PipelineExecutor<'a> {
    pub builtins: &'a dyn Builtins,
    pub ctx: &'a ShellContext,
    pub processes: &'a mut dyn ProcessManager,
    pub streams: &'a Streams,
    pub bridge_capacity: usize,
    pub safe_mode: bool,
}

impl<'a> PipelineExecutor<'a> {
    fn env(&self) -> StageEnv<'a> {
        StageEnv {
            builtins: self.builtins,
            ctx: self.ctx,
            streams: self.streams,
        }
    }

    /// Run one pipeline and return the exit status of its last stage
    pub fn execute(&mut self, line: &str, input: &mut dyn InputSource) -> i32 {
        let mut stages = Vec::new();
        for segment in split_pipeline_operators(line) {
            let mut info = parse_redirection(&segment.cmd);
            if let Some(delim) = &info.here_doc {
                match write_heredoc(delim, input) {
                    Ok(path) => info.in_file = Some(path),
                    Err(e) => {
                        self.streams
                            .report(&format!("Error: Cannot write heredoc: {}", e));
                        return 1;
                    }
                }
            }
            let words = tokenize(&info.command);
            stages.push(Stage {
                info,
                words,
                trim: segment.trim_before_next,
            });
        }
        if stages.is_empty() {
            return 0;
        }

        for stage in &stages {
            let name = stage.name().unwrap_or("");
            if !is_command_allowed(name, self.safe_mode) {
                self.streams.report(&format!(
                    "Error: command '{}' is blocked in safe mode",
                    name
                ));
                return 1;
            }
        }

        let env = self.env();
        if stages.iter().all(|stage| env.is_builtin(stage)) {
            debug!(
                "built-in pipeline ({} stage(s)): {}",
                stages.len(),
                mask_sensitive_args(line)
            );
            self.run_builtins(stages)
        } else {
            debug!(
                "external pipeline ({} stage(s)): {}",
                stages.len(),
                mask_sensitive_args(line)
            );
            self.run_external(stages)
        }
    }

    fn run_builtins(&self, stages: Vec<Stage>) -> i32 {
        let env = self.env();
        let count = stages.len();
        let mut inputs: Vec<Option<BridgeReader>> = (0..count).map(|_| None).collect();
        let mut outputs: Vec<Option<BridgeWriter>> = (0..count).map(|_| None).collect();
        for i in 1..count {
            let (writer, reader) = StreamBridge::new(self.bridge_capacity);
            outputs[i - 1] = Some(writer);
            inputs[i] = Some(reader);
        }

        thread::scope(|scope| {
            let handles: Vec<_> = stages
                .into_iter()
                .zip(inputs)
                .zip(outputs)
                .map(|((stage, input), output)| {
                    scope.spawn(move || run_builtin_stage(env, stage, input, output))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(1))
                .last()
                .unwrap_or(0)
        })
    }

    fn run_external(&mut self, stages: Vec<Stage>) -> i32 {
        let env = self.env();
        let processes = &mut *self.processes;
        let count = stages.len();

        thread::scope(|scope| {
            let mut waiters = Vec::with_capacity(count);
            let mut upstream: Option<File> = None;

            for (i, stage) in stages.into_iter().enumerate() {
                let files = match Redirected::open(&stage.info) {
                    Ok(files) => files,
                    Err(msg) => {
                        env.streams.report(&msg);
                        return 1;
                    }
                };

                let stdin = files.stdin.or(upstream.take());
                let downstream = if i + 1 < count {
                    match processes.create_pipe() {
                        Ok((read, write)) => {
                            upstream = Some(read);
                            Some(write)
                        }
                        Err(e) => {
                            env.streams
                                .report(&format!("Failed to create pipe: {}", e));
                            return 1;
                        }
                    }
                } else {
                    None
                };
                let stdout = files.stdout.or(downstream);
                let stderr = files.stderr;

                let stdout = if stage.trim {
                    let (read, write) = match processes.create_pipe() {
                        Ok(pair) => pair,
                        Err(e) => {
                            env.streams
                                .report(&format!("Failed to create pipe: {}", e));
                            return 1;
                        }
                    };
                    scope.spawn(move || pump_trimmed(env, read, stdout));
                    Some(write)
                } else {
                    stdout
                };

                if env.is_builtin(&stage) {
                    let command = stage.info.command.clone();
                    let handle = scope.spawn(move || {
                        let stdin: Box<dyn Read + Send> = match stdin {
                            Some(f) => Box::new(f),
                            None => env.streams.reader(),
                        };
                        let stdout: Box<dyn Write + Send> = match stdout {
                            Some(f) => Box::new(f),
                            None => env.streams.writer(),
                        };
                        let stderr: Box<dyn Write + Send> = match stderr {
                            Some(f) => Box::new(f),
                            None => env.streams.error_writer(),
                        };
                        env.invoke(&command, stdin, stdout, stderr)
                    });
                    waiters.push(Waiter::Thread(handle));
                    continue;
                }

                let (program, args) = match stage.words.split_first() {
                    Some(split) => split,
                    None => continue,
                };
                let stdin = stdin.or_else(|| env.streams.stdin_handle());
                let stdout = stdout.or_else(|| env.streams.stdout_handle());
                let stderr = stderr.or_else(|| env.streams.stderr_handle());
                match processes.spawn(program, args, false, stdin, stdout, stderr) {
                    Ok(pid) => waiters.push(Waiter::Process(pid)),
                    Err(_) => {
                        env.streams.report(&format!(
                            "Failed to spawn: {} Error: {}",
                            stage.info.command,
                            processes.last_error()
                        ));
                        return 1;
                    }
                }
            }
            drop(upstream);

            let mut status = 0;
            for waiter in waiters {
                status = match waiter {
                    Waiter::Process(pid) => processes.wait(pid),
                    Waiter::Thread(handle) => handle.join().unwrap_or(1),
                };
            }
            status
        })
    }
}

fn run_builtin_stage(
    env: StageEnv<'_>,
    stage: Stage,
    input: Option<BridgeReader>,
    output: Option<BridgeWriter>,
) -> i32 {
    // bridge ends not used below are dropped on return, closing them
    let files = match Redirected::open(&stage.info) {
        Ok(files) => files,
        Err(msg) => {
            env.streams.report(&msg);
            return 1;
        }
    };

    let stdin: Box<dyn Read + Send> = match (files.stdin, input) {
        (Some(f), _) => Box::new(f),
        (None, Some(reader)) => Box::new(reader),
        (None, None) => env.streams.reader(),
    };
    let stdout: Box<dyn Write + Send> = match (files.stdout, output) {
        (Some(f), _) => Box::new(f),
        (None, Some(writer)) => Box::new(writer),
        (None, None) => env.streams.writer(),
    };
    let stdout: Box<dyn Write + Send> = if stage.trim {
        Box::new(LineTrimmer::new(stdout))
    } else {
        stdout
    };
    let stderr: Box<dyn Write + Send> = match files.stderr {
        Some(f) => Box::new(f),
        None => env.streams.error_writer(),
    };

    env.invoke(&stage.info.command, stdin, stdout, stderr)
}

/// Copy a stage's output to its destination, trimming lines on the way
fn pump_trimmed(env: StageEnv<'_>, mut from: File, to: Option<File>) {
    let sink: Box<dyn Write + Send> = match to {
        Some(f) => Box::new(f),
        None => env.streams.writer(),
    };
    let mut trimmer = LineTrimmer::new(sink);
    if let Err(e) = io::copy(&mut from, &mut trimmer) {
        debug!("trim pump stopped: {}", e);
    }
}
