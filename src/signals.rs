//! Signal and terminal handling for job control
//!
//! - SIGTSTP / SIGQUIT: caught and dropped, so the shell itself is never
//!   stopped or killed from the keyboard
//! - SIGCONT / SIGTERM: sent to job process groups
//! - terminal ownership: handed to a foreground job and taken back
//!
//! SIGINT is handled by the front end (see the `ctrlc` handler in the REPL).

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Install the shell's SIGTSTP and SIGQUIT handlers
#[cfg(unix)]
pub fn setup_signal_handlers() -> Result<(), String> {
    use signal_hook::consts::{SIGQUIT, SIGTSTP};
    use signal_hook::low_level;

    // SAFETY: the handlers do nothing, which is async-signal-safe.
    unsafe {
        low_level::register(SIGTSTP, || {})
            .map_err(|e| format!("Failed to register SIGTSTP handler: {}", e))?;
        low_level::register(SIGQUIT, || {})
            .map_err(|e| format!("Failed to register SIGQUIT handler: {}", e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn setup_signal_handlers() -> Result<(), String> {
    Ok(())
}

/// Send SIGTERM to a process
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> Result<(), String> {
    let pid = Pid::from_raw(pid as i32);
    kill(pid, Signal::SIGTERM).map_err(|e| format!("Failed to terminate process {}: {}", pid, e))
}

#[cfg(not(unix))]
pub fn terminate_process(_pid: u32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

/// Send SIGCONT to a process group
#[cfg(unix)]
pub fn continue_group(pgid: u32) -> Result<(), String> {
    let pgid = Pid::from_raw(pgid as i32);
    killpg(pgid, Signal::SIGCONT)
        .map_err(|e| format!("Failed to continue process group {}: {}", pgid, e))
}

#[cfg(not(unix))]
pub fn continue_group(_pgid: u32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

/// Send SIGTERM to a process group
#[cfg(unix)]
pub fn terminate_group(pgid: u32) -> Result<(), String> {
    let pgid = Pid::from_raw(pgid as i32);
    killpg(pgid, Signal::SIGTERM)
        .map_err(|e| format!("Failed to terminate process group {}: {}", pgid, e))
}

#[cfg(not(unix))]
pub fn terminate_group(_pgid: u32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

/// Whether stdin is a terminal
#[cfg(unix)]
pub fn is_interactive() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

#[cfg(not(unix))]
pub fn is_interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

/// Process group of the shell
#[cfg(unix)]
pub fn shell_pgid() -> u32 {
    nix::unistd::getpgrp().as_raw() as u32
}

/// Saved terminal modes, restored after a foreground job gives the terminal back
#[cfg(unix)]
pub struct TerminalModes(libc::termios);

#[cfg(not(unix))]
pub struct TerminalModes;

#[cfg(unix)]
pub fn save_terminal_modes() -> Option<TerminalModes> {
    if !is_interactive() {
        return None;
    }
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr fills the struct when it returns 0.
    unsafe {
        if libc::tcgetattr(libc::STDIN_FILENO, termios.as_mut_ptr()) == 0 {
            Some(TerminalModes(termios.assume_init()))
        } else {
            None
        }
    }
}

#[cfg(not(unix))]
pub fn save_terminal_modes() -> Option<TerminalModes> {
    None
}

#[cfg(unix)]
pub fn restore_terminal_modes(modes: &TerminalModes) {
    // SAFETY: `modes` holds a termios previously filled by tcgetattr.
    unsafe {
        libc::tcsetattr(libc::STDIN_FILENO, libc::TCSADRAIN, &modes.0);
    }
}

#[cfg(not(unix))]
pub fn restore_terminal_modes(_modes: &TerminalModes) {}

/// Make `pgid` the terminal's foreground process group. SIGTTOU is ignored
/// around the call so a background shell is not stopped by it.
#[cfg(unix)]
pub fn give_terminal_to(pgid: u32) -> Result<(), String> {
    if !is_interactive() {
        return Ok(());
    }
    // SAFETY: swapping the SIGTTOU disposition and calling tcsetpgrp on
    // stdin; the previous disposition is put back before returning.
    let rc = unsafe {
        let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        let rc = libc::tcsetpgrp(libc::STDIN_FILENO, pgid as libc::pid_t);
        libc::signal(libc::SIGTTOU, previous);
        rc
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(format!(
            "Failed to give terminal to process group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        ))
    }
}

#[cfg(not(unix))]
pub fn give_terminal_to(_pgid: u32) -> Result<(), String> {
    Err("Terminal control not supported on this platform".into())
}
