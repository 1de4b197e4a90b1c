use std::fs;
use std::path::{Path, PathBuf};

use termish::Shell;

/// `~/.termishrc`
pub(crate) fn rc_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".termishrc"))
}

/// Run ~/.termishrc if it exists
pub(crate) fn load_termishrc(shell: &mut Shell) {
    let Some(path) = rc_path() else {
        return;
    };
    if path.exists() {
        load_rc_file(shell, &path);
    }
}

/// Run each line of an rc file through the shell. Blank lines and comments
/// are skipped; a failing line is warned about and loading continues.
pub(crate) fn load_rc_file(shell: &mut Shell, path: &Path) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: {}: {}", path.display(), e);
            return;
        }
    };

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let status = shell.interpret(trimmed);
        if status != 0 && !shell.in_block() {
            eprintln!(
                "Warning: {} line {}: exit status {}",
                path.display(),
                line_num + 1,
                status
            );
        }
        if shell.exit_requested().is_some() {
            break;
        }
    }

    if shell.in_block() {
        eprintln!("Warning: {}: unterminated block", path.display());
    }
}
