//! Background jobs
//!
//! Each job runs in its own process group so it can be stopped, continued
//! and handed the terminal as a unit. Jobs are never killed implicitly; a
//! job leaves the table once its process has exited and been reaped.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};

use log::{debug, info, warn};
use thiserror::Error;

use crate::parser::{parse_redirection, tokenize, RedirectionInfo};

#[cfg(unix)]
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("empty command")]
    EmptyCommand,
    #[error("cannot open {path}: {source}")]
    Redirect { path: String, source: io::Error },
    #[error("failed to start {command}: {source}")]
    Spawn { command: String, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of a job for `jobs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: usize,
    pub pid: u32,
    pub command: String,
    pub status: JobStatus,
}

pub trait JobManager {
    /// Start `command` in the background and return its job id
    fn start_job(&mut self, command: &str) -> Result<usize, JobError>;

    /// Send SIGTERM to the job's process group
    fn stop_job(&mut self, id: usize) -> bool;

    /// Run the job in the foreground until it exits or stops again. A job
    /// that stops is announced on `out`.
    fn bring_to_foreground(&mut self, id: usize, out: &mut dyn Write) -> bool;

    /// Let a stopped job continue in the background
    fn continue_in_background(&mut self, id: usize) -> bool;

    /// Current jobs, after reaping the ones that have exited
    fn list_jobs(&mut self) -> Vec<JobInfo>;
}

#[derive(Debug)]
struct Job {
    id: usize,
    command: String,
    pid: u32,
    running: bool,
    #[cfg_attr(unix, allow(dead_code))]
    child: Child,
}

/// [`JobManager`] over OS processes
#[derive(Debug)]
pub struct SystemJobManager {
    jobs: BTreeMap<usize, Job>,
    next_id: usize,
}

impl Default for SystemJobManager {
    fn default() -> Self {
        SystemJobManager {
            jobs: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl SystemJobManager {
    pub fn new() -> Self {
        Self::default()
    }

}

fn open_output(path: &str, append: bool) -> Result<File, JobError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|source| JobError::Redirect {
            path: path.to_string(),
            source,
        })
}

fn apply_redirection(cmd: &mut Command, info: &RedirectionInfo) -> Result<(), JobError> {
    if let Some(path) = &info.in_file {
        let file = File::open(path).map_err(|source| JobError::Redirect {
            path: path.clone(),
            source,
        })?;
        cmd.stdin(file);
    }
    let out = match &info.out_file {
        Some(path) => Some(open_output(path, info.append_out)?),
        None => None,
    };
    match &info.err_file {
        Some(path) if info.out_file.as_ref() == Some(path) => {
            if let Some(out) = &out {
                let shared = out.try_clone().map_err(|source| JobError::Redirect {
                    path: path.clone(),
                    source,
                })?;
                cmd.stderr(shared);
            }
        }
        Some(path) => {
            cmd.stderr(open_output(path, info.append_err)?);
        }
        None => {}
    }
    if let Some(out) = out {
        cmd.stdout(out);
    }
    Ok(())
}

impl JobManager for SystemJobManager {
    fn start_job(&mut self, command: &str) -> Result<usize, JobError> {
        let info = parse_redirection(command);
        let words = tokenize(&info.command);
        let (program, args) = words.split_first().ok_or(JobError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        apply_redirection(&mut cmd, &info)?;
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| JobError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let id = self.next_id;
        self.next_id += 1;
        let pid = child.id();
        info!("job [{}] started: pid {} `{}`", id, pid, command);
        self.jobs.insert(
            id,
            Job {
                id,
                command: command.to_string(),
                pid,
                running: true,
                child,
            },
        );
        Ok(id)
    }

    fn stop_job(&mut self, id: usize) -> bool {
        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        match crate::signals::terminate_group(job.pid) {
            Ok(()) => {
                info!("job [{}] sent SIGTERM", id);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    #[cfg(unix)]
    fn bring_to_foreground(&mut self, id: usize, out: &mut dyn Write) -> bool {
        use crate::signals::{
            continue_group, give_terminal_to, restore_terminal_modes, save_terminal_modes,
            shell_pgid,
        };

        let Some(job) = self.jobs.get_mut(&id) else {
            return false;
        };

        let modes = save_terminal_modes();
        if let Err(e) = give_terminal_to(job.pid) {
            debug!("{}", e);
        }
        if !job.running {
            if let Err(e) = continue_group(job.pid) {
                warn!("{}", e);
            }
            job.running = true;
        }

        let status = waitpid(Pid::from_raw(job.pid as i32), Some(WaitPidFlag::WUNTRACED));

        if let Err(e) = give_terminal_to(shell_pgid()) {
            debug!("{}", e);
        }
        if let Some(modes) = &modes {
            restore_terminal_modes(modes);
        }

        match status {
            Ok(WaitStatus::Stopped(..)) => {
                job.running = false;
                if let Err(e) = writeln!(out, "[{}]+  Stopped  {}", job.id, job.command) {
                    warn!("job [{}]: {}", id, e);
                }
                info!("job [{}] stopped", id);
            }
            _ => {
                info!("job [{}] finished in foreground", id);
                self.jobs.remove(&id);
            }
        }
        true
    }

    #[cfg(not(unix))]
    fn bring_to_foreground(&mut self, id: usize, _out: &mut dyn Write) -> bool {
        let Some(mut job) = self.jobs.remove(&id) else {
            return false;
        };
        if let Err(e) = job.child.wait() {
            warn!("job [{}]: {}", id, e);
        }
        true
    }

    #[cfg(unix)]
    fn continue_in_background(&mut self, id: usize) -> bool {
        let Some(job) = self.jobs.get_mut(&id) else {
            return false;
        };
        match crate::signals::continue_group(job.pid) {
            Ok(()) => {
                job.running = true;
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn continue_in_background(&mut self, _id: usize) -> bool {
        false
    }

    #[cfg(unix)]
    fn list_jobs(&mut self) -> Vec<JobInfo> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        let mut finished = Vec::new();
        for job in self.jobs.values_mut() {
            match waitpid(Pid::from_raw(job.pid as i32), Some(flags)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Stopped(..)) => job.running = false,
                Ok(WaitStatus::Continued(_)) => job.running = true,
                Ok(_) | Err(_) => finished.push(job.id),
            }
        }
        for id in finished {
            info!("job [{}] done", id);
            self.jobs.remove(&id);
        }
        self.snapshot()
    }

    #[cfg(not(unix))]
    fn list_jobs(&mut self) -> Vec<JobInfo> {
        let finished: Vec<usize> = self
            .jobs
            .values_mut()
            .filter_map(|job| (!matches!(job.child.try_wait(), Ok(None))).then_some(job.id))
            .collect();
        for id in finished {
            self.jobs.remove(&id);
        }
        self.snapshot()
    }
}

impl SystemJobManager {
    fn snapshot(&self) -> Vec<JobInfo> {
        self.jobs
            .values()
            .map(|job| JobInfo {
                id: job.id,
                pid: job.pid,
                command: job.command.clone(),
                status: if job.running {
                    JobStatus::Running
                } else {
                    JobStatus::Stopped
                },
            })
            .collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_until_empty(jobs: &mut SystemJobManager) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if jobs.list_jobs().is_empty() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut jobs = SystemJobManager::new();
        assert_eq!(jobs.start_job("true").unwrap(), 1);
        assert_eq!(jobs.start_job("true").unwrap(), 2);
        assert!(wait_until_empty(&mut jobs));
    }

    #[test]
    fn running_job_is_listed_until_terminated() {
        let mut jobs = SystemJobManager::new();
        let id = jobs.start_job("sleep 5").unwrap();
        let listed = jobs.list_jobs();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].status, JobStatus::Running);
        assert_eq!(listed[0].command, "sleep 5");

        assert!(jobs.stop_job(id));
        assert!(wait_until_empty(&mut jobs));
    }

    #[test]
    fn redirected_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut jobs = SystemJobManager::new();
        jobs.start_job(&format!("echo hello > {}", out.display()))
            .unwrap();
        assert!(wait_until_empty(&mut jobs));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
    }

    #[test]
    fn unknown_ids_and_empty_commands() {
        let mut jobs = SystemJobManager::new();
        assert!(!jobs.stop_job(7));
        assert!(!jobs.bring_to_foreground(7, &mut io::sink()));
        assert!(!jobs.continue_in_background(7));
        assert!(matches!(jobs.start_job("  "), Err(JobError::EmptyCommand)));
        assert!(matches!(
            jobs.start_job("definitely-not-a-program-xyz"),
            Err(JobError::Spawn { .. })
        ));
    }

    #[test]
    fn foreground_waits_for_exit() {
        let mut jobs = SystemJobManager::new();
        let id = jobs.start_job("sleep 0.1").unwrap();
        let mut out = Vec::new();
        assert!(jobs.bring_to_foreground(id, &mut out));
        assert!(out.is_empty());
        assert!(jobs.list_jobs().is_empty());
    }

    #[test]
    fn foreground_job_that_stops_is_announced() {
        let command = "sh -c \"kill -STOP $$; exit 0\"";
        let mut jobs = SystemJobManager::new();
        let id = jobs.start_job(command).unwrap();
        let mut out = Vec::new();
        assert!(jobs.bring_to_foreground(id, &mut out));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("[{}]+  Stopped  {}\n", id, command)
        );
        assert_eq!(jobs.list_jobs()[0].status, JobStatus::Stopped);

        assert!(jobs.continue_in_background(id));
        assert!(wait_until_empty(&mut jobs));
    }
}
