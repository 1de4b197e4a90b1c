//! Spawning external programs
//!
//! The pipeline engine talks to the OS through [`ProcessManager`]: spawn a
//! program on given handles, wait for it, and create anonymous pipes to
//! connect stages. Handles are plain [`File`]s; `None` inherits the shell's.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::process::{Child, Command, Stdio};

#[cfg(unix)]
use std::os::fd::RawFd;

use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },
    #[error("cannot create pipe: {0}")]
    Pipe(io::Error),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

pub trait ProcessManager: Send {
    /// Start `program` with `args`, returning its pid
    fn spawn(
        &mut self,
        program: &str,
        args: &[String],
        background: bool,
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Option<File>,
    ) -> Result<u32, ProcessError>;

    /// Wait for a spawned process. -1 for an unknown pid, 128+N when killed
    /// by signal N.
    fn wait(&mut self, pid: u32) -> i32;

    /// Ask a spawned process to terminate
    fn kill(&mut self, pid: u32) -> bool;

    /// Anonymous pipe as `(read end, write end)`
    fn create_pipe(&mut self) -> Result<(File, File), ProcessError>;

    fn close_handle(&mut self, handle: File) {
        drop(handle);
    }

    /// Message of the most recent failure
    fn last_error(&self) -> &str;
}

/// [`ProcessManager`] over `std::process`
#[derive(Debug, Default)]
pub struct SystemProcessManager {
    children: HashMap<u32, Child>,
    last_error: String,
}

impl SystemProcessManager {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stdio(handle: Option<File>) -> Stdio {
    handle.map(Stdio::from).unwrap_or_else(Stdio::inherit)
}

/// Exit code of a finished child, 128+signal for one killed by a signal
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

impl ProcessManager for SystemProcessManager {
    fn spawn(
        &mut self,
        program: &str,
        args: &[String],
        background: bool,
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Option<File>,
    ) -> Result<u32, ProcessError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(stdio(stdin))
            .stdout(stdio(stdout))
            .stderr(stdio(stderr));

        #[cfg(unix)]
        if background {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        #[cfg(not(unix))]
        let _ = background;

        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                debug!("spawned {} as pid {}", program, pid);
                self.children.insert(pid, child);
                Ok(pid)
            }
            Err(source) => {
                self.last_error = source.to_string();
                Err(ProcessError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        }
    }

    fn wait(&mut self, pid: u32) -> i32 {
        let Some(mut child) = self.children.remove(&pid) else {
            return -1;
        };
        match child.wait() {
            Ok(status) => exit_code(status),
            Err(e) => {
                self.last_error = e.to_string();
                -1
            }
        }
    }

    fn kill(&mut self, pid: u32) -> bool {
        match self.children.get_mut(&pid) {
            Some(child) => match crate::signals::terminate_process(pid) {
                Ok(()) => true,
                Err(e) => {
                    self.last_error = e;
                    child.kill().is_ok()
                }
            },
            None => false,
        }
    }

    #[cfg(unix)]
    fn create_pipe(&mut self) -> Result<(File, File), ProcessError> {
        use std::os::fd::{FromRawFd, OwnedFd};

        let (read, write) = cloexec_pipe().map_err(|errno| {
            let err = io::Error::from(errno);
            self.last_error = err.to_string();
            ProcessError::Pipe(err)
        })?;
        // SAFETY: both descriptors were just created and nothing else owns them.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) };
        Ok((File::from(read), File::from(write)))
    }

    #[cfg(not(unix))]
    fn create_pipe(&mut self) -> Result<(File, File), ProcessError> {
        self.last_error = "pipes are not supported on this platform".into();
        Err(ProcessError::Unsupported("create_pipe"))
    }

    fn last_error(&self) -> &str {
        &self.last_error
    }
}

/// A pipe whose ends are close-on-exec from the start
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> nix::Result<(RawFd, RawFd)> {
    use nix::fcntl::OFlag;
    nix::unistd::pipe2(OFlag::O_CLOEXEC)
}

#[cfg(all(
    unix,
    not(any(target_os = "linux", target_os = "android", target_os = "freebsd"))
))]
fn cloexec_pipe() -> nix::Result<(RawFd, RawFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read, write) = nix::unistd::pipe()?;
    for fd in [read, write] {
        if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            let _ = nix::unistd::close(read);
            let _ = nix::unistd::close(write);
            return Err(e);
        }
    }
    Ok((read, write))
}
