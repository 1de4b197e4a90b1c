//! Built-in commands
//!
//! The pipeline engine only knows the [`Builtins`] trait: whether a name is
//! built in, and how to run a command line against a set of streams.
//! [`CoreBuiltins`] is the set the shell ships with. Filesystem utilities
//! (ls, cp, chmod, ...) are left to external programs.

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::parser::tokenize;
use crate::store::{is_identifier, ShellContext};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Streams a built-in runs against: pipeline bridges, OS pipes, redirected
/// files or the shell's own stdio.
pub struct BuiltinIo<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Built-in command dispatcher
pub trait Builtins: Send + Sync {
    fn is_builtin(&self, name: &str) -> bool;

    /// Run `line` (command name first) and return its exit status
    fn invoke(&self, line: &str, ctx: &ShellContext, io: BuiltinIo<'_>) -> i32;

    /// Names for completion and `help`
    fn names(&self) -> Vec<&str> {
        Vec::new()
    }
}

const BUILTINS: &[(&str, &str)] = &[
    ("alias", "alias [name=value ...]   define or list aliases"),
    ("cat", "cat [file ...]           copy files or stdin to stdout"),
    ("cd", "cd [dir | - | ~]         change directory"),
    ("echo", "echo [-n] args ...       print arguments"),
    ("env", "env                      list environment variables"),
    ("exit", "exit [code]              leave the shell"),
    ("export", "export NAME[=value] ...  set environment variables"),
    ("false", "false                    fail"),
    ("grep", "grep [-ivnc] text [file] print lines containing text"),
    ("head", "head [-n N] [file ...]   first lines"),
    ("help", "help                     this list"),
    ("pwd", "pwd                      print working directory"),
    ("set", "set                      list shell variables"),
    ("sort", "sort [-rnu] [file ...]   sort lines"),
    ("tail", "tail [-n N] [file ...]   last lines"),
    ("true", "true                     succeed"),
    ("type", "type name ...            describe how a name would run"),
    ("unalias", "unalias name ...         remove aliases"),
    ("unset", "unset name ...           remove variables"),
    ("version", "version                  print the shell version"),
    ("wc", "wc [-lwc] [file ...]     count lines, words, bytes"),
];

/// The shell's default built-in commands
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreBuiltins;

impl Builtins for CoreBuiltins {
    fn is_builtin(&self, name: &str) -> bool {
        BUILTINS.iter().any(|(n, _)| *n == name)
    }

    fn invoke(&self, line: &str, ctx: &ShellContext, io: BuiltinIo<'_>) -> i32 {
        let words = tokenize(line);
        let Some((name, args)) = words.split_first() else {
            return 0;
        };
        let BuiltinIo {
            stdin,
            stdout,
            stderr,
        } = io;

        let result = match name.as_str() {
            "alias" => alias(args, ctx, stdout, stderr),
            "cat" => cat(args, stdin, stdout, stderr),
            "cd" => cd(args, stdout, stderr),
            "echo" => echo(args, stdout),
            "env" => list(ctx.env.list(), stdout),
            "exit" => Ok(exit(args, ctx, stderr)),
            "export" => export(args, ctx, stdout, stderr),
            "false" => Ok(1),
            "grep" => grep(args, stdin, stdout, stderr),
            "head" => head_tail(args, true, stdin, stdout, stderr),
            "help" => help(stdout),
            "pwd" => env::current_dir().and_then(|dir| {
                writeln!(stdout, "{}", dir.display())?;
                Ok(0)
            }),
            "set" => list(ctx.vars.list(), stdout),
            "sort" => sort(args, stdin, stdout, stderr),
            "tail" => head_tail(args, false, stdin, stdout, stderr),
            "true" => Ok(0),
            "type" => type_of(args, self, ctx, stdout, stderr),
            "unalias" => unalias(args, ctx, stderr),
            "unset" => {
                for name in args {
                    ctx.vars.unset(name);
                    ctx.env.unset(name);
                }
                Ok(0)
            }
            "version" => writeln!(stdout, "termish {}", VERSION).map(|_| 0),
            "wc" => wc(args, stdin, stdout, stderr),
            other => {
                let _ = writeln!(stderr, "{}: not a builtin", other);
                Ok(127)
            }
        };

        let _ = stdout.flush();
        match result {
            Ok(code) => code,
            // the reader went away first; not this command's failure
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => 0,
            Err(e) => {
                let _ = writeln!(stderr, "{}: {}", name, e);
                1
            }
        }
    }

    fn names(&self) -> Vec<&str> {
        BUILTINS.iter().map(|(n, _)| *n).collect()
    }
}

/// Look up an executable on `PATH`
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.is_file().then_some(path);
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Split leading `-xyz` flags from operands. `-N` (a bare number) is kept
/// as an operand for head/tail to interpret.
fn split_flags(args: &[String]) -> (Vec<char>, Vec<String>) {
    let mut flags = Vec::new();
    let mut rest = Vec::new();
    let mut operands = false;
    for arg in args {
        let is_flag = !operands
            && arg.len() > 1
            && arg.starts_with('-')
            && !arg[1..].chars().all(|c| c.is_ascii_digit());
        if is_flag {
            flags.extend(arg[1..].chars());
        } else {
            operands = true;
            rest.push(arg.clone());
        }
    }
    (flags, rest)
}

/// All text from the named files, or from stdin when there are none.
/// Unreadable files are reported and make the status 1.
fn gather(
    name: &str,
    files: &[String],
    stdin: &mut dyn Read,
    stderr: &mut dyn Write,
) -> io::Result<(String, i32)> {
    if files.is_empty() {
        let mut bytes = Vec::new();
        stdin.read_to_end(&mut bytes)?;
        return Ok((String::from_utf8_lossy(&bytes).into_owned(), 0));
    }

    let mut text = String::new();
    let mut status = 0;
    for file in files {
        match fs::read(file) {
            Ok(bytes) => text.push_str(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                writeln!(stderr, "{}: {}: {}", name, file, e)?;
                status = 1;
            }
        }
    }
    Ok((text, status))
}

fn echo(args: &[String], stdout: &mut dyn Write) -> io::Result<i32> {
    let (newline, args) = match args.first().map(String::as_str) {
        Some("-n") => (false, &args[1..]),
        _ => (true, args),
    };
    write!(stdout, "{}", args.join(" "))?;
    if newline {
        writeln!(stdout)?;
    }
    Ok(0)
}

fn cat(
    args: &[String],
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    if args.is_empty() {
        io::copy(stdin, stdout)?;
        return Ok(0);
    }
    let mut status = 0;
    for file in args {
        if file == "-" {
            io::copy(stdin, stdout)?;
            continue;
        }
        match fs::File::open(file) {
            Ok(mut f) => {
                io::copy(&mut f, stdout)?;
            }
            Err(e) => {
                writeln!(stderr, "cat: {}: {}", file, e)?;
                status = 1;
            }
        }
    }
    Ok(status)
}

fn grep(
    args: &[String],
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    let (flags, operands) = split_flags(args);
    let Some((pattern, files)) = operands.split_first() else {
        writeln!(stderr, "grep: usage: grep [-ivnc] PATTERN [FILE...]")?;
        return Ok(2);
    };
    let ignore_case = flags.contains(&'i');
    let invert = flags.contains(&'v');
    let numbered = flags.contains(&'n');
    let count_only = flags.contains(&'c');

    let (text, status) = gather("grep", files, stdin, stderr)?;
    let needle = if ignore_case {
        pattern.to_lowercase()
    } else {
        pattern.clone()
    };

    let mut matches = 0;
    for (idx, line) in text.lines().enumerate() {
        let hit = if ignore_case {
            line.to_lowercase().contains(&needle)
        } else {
            line.contains(&needle)
        };
        if hit == invert {
            continue;
        }
        matches += 1;
        if count_only {
            continue;
        }
        if numbered {
            writeln!(stdout, "{}:{}", idx + 1, line)?;
        } else {
            writeln!(stdout, "{}", line)?;
        }
    }
    if count_only {
        writeln!(stdout, "{}", matches)?;
    }

    Ok(if status != 0 {
        2
    } else if matches > 0 {
        0
    } else {
        1
    })
}

fn sort(
    args: &[String],
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    let (flags, files) = split_flags(args);
    let (text, status) = gather("sort", &files, stdin, stderr)?;
    let mut lines: Vec<&str> = text.lines().collect();

    if flags.contains(&'n') {
        let key = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
        lines.sort_by(|a, b| key(a).total_cmp(&key(b)));
    } else {
        lines.sort();
    }
    if flags.contains(&'u') {
        lines.dedup();
    }
    if flags.contains(&'r') {
        lines.reverse();
    }
    for line in lines {
        writeln!(stdout, "{}", line)?;
    }
    Ok(status)
}

fn head_tail(
    args: &[String],
    head: bool,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    let name = if head { "head" } else { "tail" };
    let mut count = 10usize;
    let mut files = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = if arg == "-n" {
            iter.next().map(String::as_str)
        } else if let Some(n) = arg.strip_prefix("-n") {
            Some(n)
        } else if let Some(n) = arg.strip_prefix('-').filter(|n| !n.is_empty()) {
            Some(n)
        } else {
            files.push(arg.clone());
            continue;
        };
        match value.and_then(|v| v.parse::<usize>().ok()) {
            Some(n) => count = n,
            None => {
                writeln!(stderr, "{}: invalid line count", name)?;
                return Ok(2);
            }
        }
    }

    let (text, status) = gather(name, &files, stdin, stderr)?;
    let lines: Vec<&str> = text.lines().collect();
    let selected = if head {
        &lines[..count.min(lines.len())]
    } else {
        &lines[lines.len().saturating_sub(count)..]
    };
    for line in selected {
        writeln!(stdout, "{}", line)?;
    }
    Ok(status)
}

fn wc(
    args: &[String],
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    let (flags, files) = split_flags(args);
    let (text, status) = gather("wc", &files, stdin, stderr)?;
    let lines = text.matches('\n').count();
    let words = text.split_whitespace().count();
    let bytes = text.len();

    let mut fields = Vec::new();
    if flags.is_empty() || flags.contains(&'l') {
        fields.push(lines.to_string());
    }
    if flags.is_empty() || flags.contains(&'w') {
        fields.push(words.to_string());
    }
    if flags.is_empty() || flags.contains(&'c') {
        fields.push(bytes.to_string());
    }
    writeln!(stdout, "{}", fields.join(" "))?;
    Ok(status)
}

fn cd(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> io::Result<i32> {
    let target = match args.first().map(String::as_str) {
        None | Some("~") => env::var("HOME").unwrap_or_else(|_| "/".to_string()),
        Some("-") => match env::var("OLDPWD") {
            Ok(old) => {
                writeln!(stdout, "{}", old)?;
                old
            }
            Err(_) => {
                writeln!(stderr, "cd: OLDPWD not set")?;
                return Ok(1);
            }
        },
        Some(dir) => crate::expand::expand_tilde(dir),
    };

    let previous = env::current_dir().ok();
    if let Err(e) = env::set_current_dir(&target) {
        writeln!(stderr, "cd: {}: {}", target, e)?;
        return Ok(1);
    }
    if let Some(previous) = previous {
        env::set_var("OLDPWD", previous);
    }
    if let Ok(now) = env::current_dir() {
        env::set_var("PWD", now);
    }
    Ok(0)
}

fn strip_value_quotes(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn alias(
    args: &[String],
    ctx: &ShellContext,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    if args.is_empty() {
        for (name, value) in ctx.aliases.list() {
            writeln!(stdout, "alias {}='{}'", name, value)?;
        }
        return Ok(0);
    }
    let mut status = 0;
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                ctx.aliases.set(name, strip_value_quotes(value).to_string());
            }
            _ => match ctx.aliases.get(arg) {
                Some(value) => writeln!(stdout, "alias {}='{}'", arg, value)?,
                None => {
                    writeln!(stderr, "alias: {}: not found", arg)?;
                    status = 1;
                }
            },
        }
    }
    Ok(status)
}

fn unalias(args: &[String], ctx: &ShellContext, stderr: &mut dyn Write) -> io::Result<i32> {
    let mut status = 0;
    for name in args {
        if !ctx.aliases.unset(name) {
            writeln!(stderr, "unalias: {}: not found", name)?;
            status = 1;
        }
    }
    Ok(status)
}

fn export(
    args: &[String],
    ctx: &ShellContext,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    if args.is_empty() {
        return list(ctx.env.list(), stdout);
    }
    let mut status = 0;
    for arg in args {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(strip_value_quotes(value).to_string())),
            None => (arg.as_str(), ctx.vars.get(arg)),
        };
        if !is_identifier(name) {
            writeln!(stderr, "export: `{}': not a valid identifier", arg)?;
            status = 1;
            continue;
        }
        let value = value.unwrap_or_default();
        ctx.vars.set(name, &value);
        ctx.env.set(name, &value);
    }
    Ok(status)
}

fn exit(args: &[String], ctx: &ShellContext, stderr: &mut dyn Write) -> i32 {
    let code = match args.first() {
        None => ctx.last_status(),
        Some(arg) => match arg.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                let _ = writeln!(stderr, "exit: {}: numeric argument required", arg);
                2
            }
        },
    };
    ctx.request_exit(code);
    code
}

fn help(stdout: &mut dyn Write) -> io::Result<i32> {
    writeln!(stdout, "termish {} built-in commands:", VERSION)?;
    for (_, usage) in BUILTINS {
        writeln!(stdout, "    {}", usage)?;
    }
    writeln!(stdout, "    jobs | fg %N | bg %N | kill %N   job control")?;
    writeln!(
        stdout,
        "    if/while/for/function ... end   control flow (`}}` also ends a block)"
    )?;
    Ok(0)
}

fn list(
    entries: std::collections::BTreeMap<String, String>,
    stdout: &mut dyn Write,
) -> io::Result<i32> {
    for (name, value) in entries {
        writeln!(stdout, "{}={}", name, value)?;
    }
    Ok(0)
}

fn type_of(
    args: &[String],
    builtins: &CoreBuiltins,
    ctx: &ShellContext,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> io::Result<i32> {
    let mut status = 0;
    for name in args {
        if let Some(value) = ctx.aliases.get(name) {
            writeln!(stdout, "{} is aliased to `{}'", name, value)?;
        } else if ctx.functions.has(name) {
            writeln!(stdout, "{} is a function", name)?;
        } else if builtins.is_builtin(name) {
            writeln!(stdout, "{} is a shell builtin", name)?;
        } else if let Some(path) = find_in_path(name) {
            writeln!(stdout, "{} is {}", name, path.display())?;
        } else {
            writeln!(stderr, "type: {}: not found", name)?;
            status = 1;
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(line: &str, input: &str) -> (i32, String, String) {
        let ctx = ShellContext::new();
        run_with(&ctx, line, input)
    }

    fn run_with(ctx: &ShellContext, line: &str, input: &str) -> (i32, String, String) {
        let mut stdin = input.as_bytes();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = CoreBuiltins.invoke(
            line,
            ctx,
            BuiltinIo {
                stdin: &mut stdin,
                stdout: &mut stdout,
                stderr: &mut stderr,
            },
        );
        (
            code,
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    #[test]
    fn echo_joins_arguments() {
        assert_eq!(run("echo hello   world", ""), (0, "hello world\n".into(), String::new()));
        assert_eq!(run("echo -n \"a  b\"", "").1, "a  b");
    }

    #[test]
    fn cat_copies_stdin() {
        assert_eq!(run("cat", "line1\nline2\n").1, "line1\nline2\n");
    }

    #[test]
    fn cat_reports_missing_file() {
        let (code, _, err) = run("cat /definitely/not/here", "");
        assert_eq!(code, 1);
        assert!(err.starts_with("cat: /definitely/not/here:"));
    }

    #[test]
    fn grep_filters() {
        let input = "apple\nBanana\ncherry\n";
        assert_eq!(run("grep an", input), (0, "Banana\n".into(), String::new()));
        assert_eq!(run("grep -i b", input).1, "Banana\n");
        assert_eq!(run("grep -v a", input).1, "cherry\n");
        assert_eq!(run("grep -c e", input).1, "2\n");
        assert_eq!(run("grep -n rr", input).1, "3:cherry\n");
        assert_eq!(run("grep zzz", input).0, 1);
    }

    #[test]
    fn sort_variants() {
        assert_eq!(run("sort", "b\na\nc\n").1, "a\nb\nc\n");
        assert_eq!(run("sort -r", "b\na\nc\n").1, "c\nb\na\n");
        assert_eq!(run("sort -n", "10\n9\n100\n").1, "9\n10\n100\n");
        assert_eq!(run("sort -u", "b\na\nb\n").1, "a\nb\n");
    }

    #[test]
    fn head_and_tail() {
        let input = "1\n2\n3\n4\n5\n";
        assert_eq!(run("head -n 2", input).1, "1\n2\n");
        assert_eq!(run("head -3", input).1, "1\n2\n3\n");
        assert_eq!(run("tail -n 2", input).1, "4\n5\n");
        assert_eq!(run("tail -n 9", input).1, input);
        assert_eq!(run("head -n x", input).0, 2);
    }

    #[test]
    fn wc_counts() {
        assert_eq!(run("wc", "a b\nc\n").1, "2 3 6\n");
        assert_eq!(run("wc -l", "a b\nc\n").1, "2\n");
    }

    #[test]
    fn alias_and_unalias() {
        let ctx = ShellContext::new();
        assert_eq!(run_with(&ctx, "alias ll=\"ls -l\"", "").0, 0);
        assert_eq!(ctx.aliases.get("ll").as_deref(), Some("ls -l"));
        assert_eq!(run_with(&ctx, "alias", "").1, "alias ll='ls -l'\n");
        assert_eq!(run_with(&ctx, "unalias ll", "").0, 0);
        assert_eq!(run_with(&ctx, "unalias ll", "").0, 1);
    }

    #[test]
    fn export_sets_variable_and_environment() {
        let ctx = ShellContext::new();
        assert_eq!(run_with(&ctx, "export TERMISH_BUILTIN_EXPORT=yes", "").0, 0);
        assert_eq!(std::env::var("TERMISH_BUILTIN_EXPORT").as_deref(), Ok("yes"));
        assert_eq!(run_with(&ctx, "unset TERMISH_BUILTIN_EXPORT", "").0, 0);
        assert!(std::env::var("TERMISH_BUILTIN_EXPORT").is_err());
        assert_eq!(run_with(&ctx, "export 1-bad=x", "").0, 1);
    }

    #[test]
    fn exit_records_request() {
        let ctx = ShellContext::new();
        assert_eq!(run_with(&ctx, "exit 4", "").0, 4);
        assert_eq!(ctx.exit_requested(), Some(4));
    }

    #[test]
    fn type_describes_names() {
        let ctx = ShellContext::new();
        ctx.functions.set("greet", vec!["echo hi".into()]);
        assert_eq!(run_with(&ctx, "type echo", "").1, "echo is a shell builtin\n");
        assert_eq!(run_with(&ctx, "type greet", "").1, "greet is a function\n");
        assert_eq!(run_with(&ctx, "type no-such-cmd-xyz", "").0, 1);
    }

    #[test]
    fn true_false_and_registry() {
        assert_eq!(run("true", "").0, 0);
        assert_eq!(run("false", "").0, 1);
        assert!(CoreBuiltins.is_builtin("grep"));
        assert!(!CoreBuiltins.is_builtin("ls"));
        assert!(CoreBuiltins.names().contains(&"echo"));
    }
}
