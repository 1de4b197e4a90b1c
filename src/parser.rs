//! Command-line parsing for termish
//!
//! Splits raw input into tokens, batch commands, pipeline segments and
//! redirection descriptors. Nothing in here fails: text that does not parse
//! as an operator is kept as literal command text.

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{all_consuming, value},
    IResult,
};

/// Redirections and heredoc delimiter pulled out of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectionInfo {
    /// The command text with every redirection removed
    pub command: String,
    pub in_file: Option<String>,
    pub out_file: Option<String>,
    pub err_file: Option<String>,
    pub append_out: bool,
    pub append_err: bool,
    /// Heredoc delimiter (`<< EOF`)
    pub here_doc: Option<String>,
}

impl RedirectionInfo {
    pub fn is_here_doc(&self) -> bool {
        self.here_doc.is_some()
    }
}

/// One stage of a `|` / `|>` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSegment {
    pub cmd: String,
    /// Set by `|>`: this stage's output is line-trimmed before the next stage reads it
    pub trim_before_next: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectOp {
    Input,
    HereDoc,
    Output,
    Append,
    Error,
    ErrorAppend,
    Both,
    BothAppend,
}

/// Recognize a whole token as a redirection operator (longest forms first)
fn redirect_op(input: &str) -> IResult<&str, RedirectOp> {
    all_consuming(alt((
        value(RedirectOp::BothAppend, tag("&>>")),
        value(RedirectOp::Both, alt((tag("&>"), tag(">&")))),
        value(RedirectOp::ErrorAppend, tag("2>>")),
        value(RedirectOp::Error, tag("2>")),
        value(RedirectOp::Append, alt((tag("1>>"), tag(">>")))),
        value(RedirectOp::Output, alt((tag("1>"), tag(">")))),
        value(RedirectOp::HereDoc, tag("<<")),
        value(RedirectOp::Input, tag("<")),
    )))(input)
}

/// Split a command into tokens on unquoted whitespace.
///
/// Double quotes group words and are stripped. An unterminated quote runs to
/// the end of the input. Empty tokens are never produced.
pub fn tokenize(cmd: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in cmd.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Like [`tokenize`], but the quote characters stay in the words so the
/// text can be reassembled unchanged.
pub fn split_words(cmd: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in cmd.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Remove double quotes from a word
pub fn strip_quotes(word: &str) -> String {
    word.chars().filter(|&c| c != '"').collect()
}

/// For each character, whether it sits outside double quotes, backticks and
/// `$(...)`. Separators are only recognized on bare characters.
fn bare_mask(chars: &[char]) -> Vec<bool> {
    let mut mask = Vec::with_capacity(chars.len());
    let mut in_double = false;
    let mut in_backtick = false;
    let mut subst_depth = 0usize;
    let mut escaped = false;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if escaped {
            escaped = false;
            mask.push(false);
        } else if c == '\\' {
            escaped = true;
            mask.push(false);
        } else if in_backtick {
            if c == '`' {
                in_backtick = false;
            }
            mask.push(false);
        } else if c == '"' {
            in_double = !in_double;
            mask.push(false);
        } else if in_double {
            mask.push(false);
        } else if c == '`' {
            in_backtick = true;
            mask.push(false);
        } else if c == '$' && chars.get(i + 1) == Some(&'(') {
            subst_depth += 1;
            mask.push(false);
            mask.push(false);
            i += 2;
            continue;
        } else if subst_depth > 0 {
            match c {
                '(' => subst_depth += 1,
                ')' => subst_depth -= 1,
                _ => {}
            }
            mask.push(false);
        } else {
            mask.push(true);
        }
        i += 1;
    }
    mask
}

/// Split a line into `(command, separator)` pairs on `;`, `&&` and `||`.
///
/// Separators inside double quotes, backticks or `$(...)` are part of the
/// command. The last command's separator is empty; a trailing empty command
/// is dropped.
pub fn split_batch(input: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = input.chars().collect();
    let bare = bare_mask(&chars);
    let mut batch = Vec::new();
    let mut current = String::new();

    let mut i = 0;
    while i < chars.len() {
        if bare[i] {
            let doubled = i + 1 < chars.len() && bare[i + 1] && chars[i + 1] == chars[i];
            let sep = match chars[i] {
                ';' => Some(";"),
                '&' if doubled => Some("&&"),
                '|' if doubled => Some("||"),
                _ => None,
            };
            if let Some(sep) = sep {
                batch.push((current.trim().to_string(), sep.to_string()));
                current.clear();
                i += sep.len();
                continue;
            }
        }
        current.push(chars[i]);
        i += 1;
    }

    let last = current.trim();
    if !last.is_empty() {
        batch.push((last.to_string(), String::new()));
    }
    batch
}

/// Pull redirections out of a command.
///
/// Each operator consumes exactly one following word. A trailing operator
/// with nothing after it is dropped.
pub fn parse_redirection(cmd: &str) -> RedirectionInfo {
    let mut info = RedirectionInfo::default();
    let mut words = Vec::new();
    let mut iter = split_words(cmd).into_iter();

    while let Some(word) = iter.next() {
        let op = match redirect_op(&word) {
            Ok((_, op)) => op,
            Err(_) => {
                words.push(word);
                continue;
            }
        };
        let Some(target) = iter.next() else {
            break;
        };
        let target = strip_quotes(&target);
        match op {
            RedirectOp::Input => info.in_file = Some(target),
            RedirectOp::HereDoc => info.here_doc = Some(target),
            RedirectOp::Output | RedirectOp::Append => {
                info.out_file = Some(target);
                info.append_out = op == RedirectOp::Append;
            }
            RedirectOp::Error | RedirectOp::ErrorAppend => {
                info.err_file = Some(target);
                info.append_err = op == RedirectOp::ErrorAppend;
            }
            RedirectOp::Both | RedirectOp::BothAppend => {
                let append = op == RedirectOp::BothAppend;
                info.out_file = Some(target.clone());
                info.err_file = Some(target);
                info.append_out = append;
                info.append_err = append;
            }
        }
    }

    info.command = words.join(" ");
    info
}

/// Split a pipeline on `|` and `|>`.
///
/// `|>` marks the segment before it for line trimming. A doubled `||` is
/// not a pipe and stays in the segment text. Empty segments are dropped.
pub fn split_pipeline_operators(line: &str) -> Vec<PipelineSegment> {
    let chars: Vec<char> = line.chars().collect();
    let bare = bare_mask(&chars);
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut push = |current: &mut String, trim: bool| {
        let cmd = current.trim().to_string();
        current.clear();
        if !cmd.is_empty() {
            segments.push(PipelineSegment {
                cmd,
                trim_before_next: trim,
            });
        }
    };

    let mut i = 0;
    while i < chars.len() {
        if bare[i] && chars[i] == '|' {
            match chars.get(i + 1) {
                Some('>') => {
                    push(&mut current, true);
                    i += 2;
                    continue;
                }
                Some('|') => {
                    current.push_str("||");
                    i += 2;
                    continue;
                }
                _ => {
                    push(&mut current, false);
                    i += 1;
                    continue;
                }
            }
        }
        current.push(chars[i]);
        i += 1;
    }
    push(&mut current, false);
    segments
}

/// Trim spaces and tabs from every line, dropping lines left empty.
/// Each kept line ends with `\n`.
pub fn apply_trim_to_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        let line = line.trim_matches(|c| c == ' ' || c == '\t');
        if !line.is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(c, s)| (c.to_string(), s.to_string()))
            .collect()
    }

    #[test]
    fn tokenize_simple() {
        assert_eq!(tokenize("echo hello world"), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn tokenize_quoted_region_keeps_spaces() {
        assert_eq!(tokenize("echo \"hello world\""), vec!["echo", "hello world"]);
    }

    #[test]
    fn tokenize_collapses_whitespace() {
        assert_eq!(tokenize("  echo   a \t b  "), vec!["echo", "a", "b"]);
    }

    #[test]
    fn tokenize_unterminated_quote_runs_to_end() {
        assert_eq!(tokenize("echo \"a b"), vec!["echo", "a b"]);
    }

    #[test]
    fn tokenize_never_yields_empty_tokens() {
        for input in ["", "   ", "\"\"", "a \"\" b", "\" \""] {
            assert!(tokenize(input).iter().all(|t| !t.is_empty()), "{:?}", input);
        }
    }

    #[test]
    fn split_batch_semicolon() {
        assert_eq!(split_batch("a;b"), batch(&[("a", ";"), ("b", "")]));
    }

    #[test]
    fn split_batch_and_or() {
        assert_eq!(
            split_batch("a && b || c"),
            batch(&[("a", "&&"), ("b", "||"), ("c", "")])
        );
    }

    #[test]
    fn split_batch_single_command() {
        assert_eq!(split_batch("echo hello"), batch(&[("echo hello", "")]));
    }

    #[test]
    fn split_batch_trailing_separator() {
        assert_eq!(split_batch("echo a;"), batch(&[("echo a", ";")]));
    }

    #[test]
    fn split_batch_ignores_quoted_separators() {
        assert_eq!(
            split_batch("echo \"a;b && c\"; echo d"),
            batch(&[("echo \"a;b && c\"", ";"), ("echo d", "")])
        );
    }

    #[test]
    fn split_batch_ignores_substitution_separators() {
        assert_eq!(
            split_batch("echo $(true; echo x) `a;b`"),
            batch(&[("echo $(true; echo x) `a;b`", "")])
        );
    }

    #[test]
    fn single_ampersand_is_not_a_separator() {
        assert_eq!(split_batch("sleep 1 &"), batch(&[("sleep 1 &", "")]));
    }

    #[test]
    fn redirection_none() {
        let info = parse_redirection("echo hello");
        assert_eq!(info.command, "echo hello");
        assert!(info.in_file.is_none());
        assert!(info.out_file.is_none());
        assert!(!info.is_here_doc());
    }

    #[test]
    fn redirection_output_and_append() {
        let info = parse_redirection("echo hello > out.txt");
        assert_eq!(info.command, "echo hello");
        assert_eq!(info.out_file.as_deref(), Some("out.txt"));
        assert!(!info.append_out);

        let info = parse_redirection("echo hello >> out.txt");
        assert_eq!(info.out_file.as_deref(), Some("out.txt"));
        assert!(info.append_out);

        let info = parse_redirection("echo hello 1> out.txt");
        assert_eq!(info.out_file.as_deref(), Some("out.txt"));
    }

    #[test]
    fn redirection_input_and_error() {
        let info = parse_redirection("cat < input.txt 2>> err.log");
        assert_eq!(info.command, "cat");
        assert_eq!(info.in_file.as_deref(), Some("input.txt"));
        assert_eq!(info.err_file.as_deref(), Some("err.log"));
        assert!(info.append_err);
    }

    #[test]
    fn redirection_both_streams_share_a_path() {
        for op in ["&>", ">&"] {
            let info = parse_redirection(&format!("make {} build.log", op));
            assert_eq!(info.command, "make");
            assert_eq!(info.out_file.as_deref(), Some("build.log"));
            assert_eq!(info.err_file.as_deref(), Some("build.log"));
            assert!(!info.append_out && !info.append_err);
        }
        let info = parse_redirection("make &>> build.log");
        assert!(info.append_out && info.append_err);
    }

    #[test]
    fn redirection_heredoc() {
        let info = parse_redirection("cat << EOF");
        assert_eq!(info.command, "cat");
        assert_eq!(info.here_doc.as_deref(), Some("EOF"));
        assert!(info.is_here_doc());
    }

    #[test]
    fn redirection_trailing_operator_dropped() {
        let info = parse_redirection("echo hi >");
        assert_eq!(info.command, "echo hi");
        assert!(info.out_file.is_none());
    }

    #[test]
    fn redirection_keeps_quoted_words() {
        let info = parse_redirection("echo \"a > b\" > \"my file.txt\"");
        assert_eq!(info.command, "echo \"a > b\"");
        assert_eq!(info.out_file.as_deref(), Some("my file.txt"));
    }

    #[test]
    fn pipeline_segments() {
        let segs = split_pipeline_operators("ls -l | grep txt |> sort");
        assert_eq!(
            segs,
            vec![
                PipelineSegment { cmd: "ls -l".into(), trim_before_next: false },
                PipelineSegment { cmd: "grep txt".into(), trim_before_next: true },
                PipelineSegment { cmd: "sort".into(), trim_before_next: false },
            ]
        );
    }

    #[test]
    fn pipeline_ignores_quoted_pipe() {
        let segs = split_pipeline_operators("echo \"a|b\" | cat");
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].cmd, "echo \"a|b\"");
    }

    #[test]
    fn trim_lines() {
        assert_eq!(apply_trim_to_lines("  a  \n\t b\t\n   \nc"), "a\nb\nc\n");
        assert_eq!(apply_trim_to_lines(""), "");
    }
}
