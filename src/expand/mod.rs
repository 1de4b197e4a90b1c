//! Expansion chain
//!
//! Applied to each command in a fixed order:
//!
//! 1. alias (first word, once)
//! 2. variables (`$NAME`, `${NAME}`, `$?`, `$#`, `$@`)
//! 3. arithmetic (`$((expr))`)
//! 4. command substitution (`$(cmd)`, `` `cmd` ``)
//! 5. braces and globs, per unquoted word
//!
//! Stages 1 to 3 and 5 live here; substitution needs a way to run commands
//! and is driven by the shell through [`subst::substitute`].

pub mod brace;
pub mod subst;
pub mod wildcard;

use log::trace;

use crate::arith::{self, ArithError};
use crate::parser::split_words;
use crate::store::{AliasStore, VariableStore};

/// Replace the first word with its alias text. The replacement is not
/// itself looked up again.
pub fn expand_alias(line: &str, aliases: &AliasStore) -> String {
    let trimmed = line.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    match aliases.get(first) {
        Some(replacement) => {
            trace!("alias {} -> {}", first, replacement);
            format!("{}{}", replacement, rest)
        }
        None => line.to_string(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Expand `$NAME`, `${NAME}` and the special parameters `$?`, `$#`, `$@`.
///
/// Unknown names become empty. A `$` that does not start a name is kept,
/// which leaves `$(` and `$((` for the later stages.
pub fn expand_variables(text: &str, vars: &VariableStore, last_status: i32) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('?') => {
                out.push_str(&last_status.to_string());
                i += 2;
            }
            Some(&c @ ('#' | '@')) => {
                out.push_str(&vars.get(&c.to_string()).unwrap_or_default());
                i += 2;
            }
            Some('{') => {
                let close = chars[i + 2..].iter().position(|&c| c == '}');
                match close {
                    Some(len) => {
                        let name: String = chars[i + 2..i + 2 + len].iter().collect();
                        out.push_str(&vars.get(&name).unwrap_or_default());
                        i += len + 3;
                    }
                    None => {
                        out.push('$');
                        i += 1;
                    }
                }
            }
            Some(&c) if is_name_char(c) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(&vars.get(&name).unwrap_or_default());
                i = end;
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }
    out
}

/// Index of the `))` closing an arithmetic expansion whose body starts at
/// `start`
fn arithmetic_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' if depth == 0 => {
                return (bytes.get(i + 1) == Some(&b')')).then_some(i);
            }
            b')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Replace each `$((expr))` with its value.
///
/// A failed evaluation keeps the original text and its error is returned
/// alongside the expanded string.
pub fn expand_arithmetic(text: &str) -> (String, Vec<ArithError>) {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut errors = Vec::new();
    let mut i = 0;
    let mut copied = 0;

    while i + 2 < bytes.len() {
        if &bytes[i..i + 3] != b"$((" {
            i += 1;
            continue;
        }
        let Some(end) = arithmetic_end(bytes, i + 3) else {
            break;
        };
        out.push_str(&text[copied..i]);

        let (inner, inner_errors) = expand_arithmetic(&text[i + 3..end]);
        errors.extend(inner_errors);
        match arith::evaluate(&inner) {
            Ok(value) => out.push_str(&value.to_string()),
            Err(e) => {
                errors.push(e);
                out.push_str(&text[i..end + 2]);
            }
        }
        i = end + 2;
        copied = i;
    }
    out.push_str(&text[copied..]);
    (out, errors)
}

/// `~` and `~/...` to the home directory
pub fn expand_tilde(word: &str) -> String {
    if word == "~" || word.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}{}", home.to_string_lossy(), &word[1..]);
        }
    }
    word.to_string()
}

fn quote_if_needed(word: String) -> String {
    if word.contains(char::is_whitespace) {
        format!("\"{}\"", word)
    } else {
        word
    }
}

/// Brace, tilde and glob expansion on every unquoted word of a line.
///
/// Words that contain a double quote are passed through untouched. Glob
/// results with whitespace are quoted again so they stay one argument.
pub fn expand_words(line: &str) -> String {
    let mut words = Vec::new();
    for word in split_words(line) {
        if word.contains('"') {
            words.push(word);
            continue;
        }
        for braced in brace::expand(&expand_tilde(&word)) {
            if wildcard::has_glob_chars(&braced) {
                words.extend(wildcard::expand(&braced).into_iter().map(quote_if_needed));
            } else {
                words.push(braced);
            }
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_replaces_first_word_once() {
        let aliases = AliasStore::new();
        aliases.set("ll", "ls -l".to_string());
        aliases.set("ls", "should-not-apply".to_string());
        assert_eq!(expand_alias("ll /tmp", &aliases), "ls -l /tmp");
        assert_eq!(expand_alias("echo ll", &aliases), "echo ll");
    }

    #[test]
    fn variables_expand() {
        let vars = VariableStore::new();
        vars.set("termish_name", "world");
        assert_eq!(
            expand_variables("hello $termish_name!", &vars, 0),
            "hello world!"
        );
        assert_eq!(expand_variables("${termish_name}s", &vars, 0), "worlds");
        assert_eq!(expand_variables("[$termish_unset_var]", &vars, 0), "[]");
    }

    #[test]
    fn special_and_lone_dollars() {
        let vars = VariableStore::new();
        assert_eq!(expand_variables("status $?", &vars, 3), "status 3");
        assert_eq!(expand_variables("cost $", &vars, 0), "cost $");
        assert_eq!(expand_variables("$ (x)", &vars, 0), "$ (x)");
        assert_eq!(expand_variables("$(date) $((1))", &vars, 0), "$(date) $((1))");
    }

    #[test]
    fn arithmetic_expands() {
        let (out, errors) = expand_arithmetic("echo $((2 + 3 * 4)) and $(( (1+1) * 3 ))");
        assert_eq!(out, "echo 14 and 6");
        assert!(errors.is_empty());
    }

    #[test]
    fn nested_arithmetic() {
        let (out, errors) = expand_arithmetic("$((1 + $((2 * 3))))");
        assert_eq!(out, "7");
        assert!(errors.is_empty());
    }

    #[test]
    fn failed_arithmetic_keeps_text() {
        let (out, errors) = expand_arithmetic("x=$((10 / 0)) y");
        assert_eq!(out, "x=$((10 / 0)) y");
        assert_eq!(errors, vec![ArithError::DivisionByZero]);
    }

    #[test]
    fn words_expand_braces_but_not_quotes() {
        assert_eq!(expand_words("echo a{1,2} \"{x,y}\""), "echo a1 a2 \"{x,y}\"");
        assert_eq!(expand_words("echo {1..3}"), "echo 1 2 3");
    }

    #[test]
    fn tilde() {
        if let Some(home) = std::env::var_os("HOME") {
            let home = home.to_string_lossy().to_string();
            assert_eq!(expand_tilde("~"), home);
            assert_eq!(expand_tilde("~/x"), format!("{}/x", home));
        }
        assert_eq!(expand_tilde("a~b"), "a~b");
    }
}
