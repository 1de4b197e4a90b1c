//! Safe mode and masking of secrets in logged command lines

/// Commands refused while safe mode is on
pub const BLOCKED_COMMANDS: &[&str] = &[
    "rm", "del", "rmdir", "rd", "format", "mkfs", "dd", "chmod", "chown", "kill", "taskkill",
    "shutdown", "reboot", "halt", "curl", "wget", "ssh", "scp", "sftp", "sudo", "su", "runas",
];

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "token",
    "api_key",
    "apikey",
    "secret",
    "credential",
    "cred",
    "auth",
    "key",
    "private",
];

/// Whether `command` (its first word) may run. Everything is allowed when
/// safe mode is off.
pub fn is_command_allowed(command: &str, safe_mode: bool) -> bool {
    if !safe_mode {
        return true;
    }
    let name = command.split_whitespace().next().unwrap_or("");
    let name = name.rsplit('/').next().unwrap_or(name).to_ascii_lowercase();
    !BLOCKED_COMMANDS.contains(&name.as_str())
}

fn mask_word(word: &str) -> Option<String> {
    let sep = word.find(['=', ':'])?;
    let key = word[..sep].to_ascii_lowercase();
    if !SENSITIVE_KEYS.iter().any(|k| key.contains(k)) {
        return None;
    }
    let value = &word[sep + 1..];
    if value.is_empty() {
        return None;
    }
    let quote = value
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .map(String::from)
        .unwrap_or_default();
    let closing = if !quote.is_empty() && value.len() > 1 && value.ends_with(quote.as_str()) {
        quote.as_str()
    } else {
        ""
    };
    Some(format!("{}{}***{}", &word[..=sep], quote, closing))
}

/// Replace the values of `key=value` / `key:value` words whose key looks
/// like a credential with `***`.
pub fn mask_sensitive_args(command: &str) -> String {
    command
        .split(' ')
        .map(|word| mask_word(word).unwrap_or_else(|| word.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_mode_blocks_listed_commands() {
        assert!(is_command_allowed("rm -rf /", false));
        assert!(!is_command_allowed("rm -rf /", true));
        assert!(!is_command_allowed("SUDO ls", true));
        assert!(!is_command_allowed("/bin/rm x", true));
        assert!(is_command_allowed("ls -l", true));
        assert!(is_command_allowed("", true));
    }

    #[test]
    fn masks_credentials() {
        assert_eq!(
            mask_sensitive_args("login user=bob password=hunter2"),
            "login user=bob password=***"
        );
        assert_eq!(mask_sensitive_args("curl TOKEN:abc"), "curl TOKEN:***");
        assert_eq!(mask_sensitive_args("x api_key=\"abc\""), "x api_key=\"***\"");
        assert_eq!(mask_sensitive_args("echo hello"), "echo hello");
    }
}
