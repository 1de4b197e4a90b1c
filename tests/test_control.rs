//! Integration tests for if/while/for/function blocks

#[path = "common/mod.rs"]
mod common;
use common::{captured_shell, feed, output, Config};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use termish::{BuiltinIo, Builtins, CoreBuiltins, ShellContext};

/// Core built-ins plus `tick`, which counts its calls
struct Counting {
    ticks: Arc<AtomicUsize>,
}

impl Builtins for Counting {
    fn is_builtin(&self, name: &str) -> bool {
        name == "tick" || CoreBuiltins.is_builtin(name)
    }

    fn invoke(&self, line: &str, ctx: &ShellContext, io: BuiltinIo<'_>) -> i32 {
        if line.trim() == "tick" {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            return 0;
        }
        CoreBuiltins.invoke(line, ctx, io)
    }
}

#[test]
fn test_while_stops_at_iteration_cap() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let (mut shell, mut out) = captured_shell(&Config::default());
    shell.set_builtins(Box::new(Counting {
        ticks: Arc::clone(&ticks),
    }));

    feed(&mut shell, &["while true", "tick", "end"]);
    assert_eq!(ticks.load(Ordering::SeqCst), 10_000);
    assert!(!shell.in_block());
    assert_eq!(output(&mut out), "");
}

#[test]
fn test_if_else_branches() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(&mut shell, &["if false", "echo then", "else", "echo otherwise", "end"]);
    feed(&mut shell, &["if true; echo then; else; echo otherwise; end"]);
    assert_eq!(output(&mut out), "otherwise\nthen\n");
}

#[test]
fn test_for_over_range() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(&mut shell, &["for i in {1..3}", "echo item $i", "end"]);
    assert_eq!(output(&mut out), "item 1\nitem 2\nitem 3\n");
    assert_eq!(shell.context().vars.get("i").as_deref(), Some("3"));
}

#[test]
fn test_if_nested_in_while() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(
        &mut shell,
        &[
            "n=0",
            "while (($n < 3))",
            "if (($n == 1))",
            "echo one",
            "else",
            "echo other $n",
            "end",
            "n=$(($n + 1))",
        ],
    );
    assert_eq!(shell.depth(), 1);
    feed(&mut shell, &["end"]);
    assert_eq!(output(&mut out), "other 0\none\nother 2\n");
}

#[test]
fn test_function_arguments_and_scope() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(
        &mut shell,
        &["function add", "echo $(($1 + $2)) from $# args", "end"],
    );
    feed(&mut shell, &["add 2 3", "echo arg=$1."]);
    assert_eq!(output(&mut out), "5 from 2 args\narg=.\n");
}

#[test]
fn test_brace_function_on_one_line() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(&mut shell, &["shout() { echo loud $1; }", "shout it"]);
    assert_eq!(output(&mut out), "loud it\n");
}

#[test]
fn test_stray_terminators() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    assert_eq!(shell.interpret("end"), 1);
    assert_eq!(shell.interpret("}"), 1);
    assert_eq!(shell.interpret("else"), 1);
    assert_eq!(
        output(&mut out),
        "Error: end without block\nError: end without block\nError: else without if\n"
    );
}

#[test]
fn test_and_or_with_blocks() {
    let (mut shell, mut out) = captured_shell(&Config::default());
    feed(&mut shell, &["if false || true", "echo joined", "end && echo after"]);
    assert_eq!(output(&mut out), "joined\nafter\n");
}
