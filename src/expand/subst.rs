//! Command substitution: `$(...)` and `` `...` ``

/// True if the text holds a `$(` (but not `$((`) or a backtick
pub fn has_substitution(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| match b {
        b'`' => true,
        b'$' => bytes.get(i + 1) == Some(&b'(') && bytes.get(i + 2) != Some(&b'('),
        _ => false,
    })
}

/// Find the `)` closing the `(` at `open`. Parentheses inside single or
/// double quotes do not count and `\` escapes the next character.
pub fn find_matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Rewrite `` `cmd` `` as `$(cmd)`. An escaped backtick is not a delimiter;
/// inside a backtick section `` \` `` becomes a literal backtick. An
/// unterminated backtick is left as typed.
pub fn backticks_to_dollar(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if chars.get(i + 1) == Some(&'`') => {
                out.push_str("\\`");
                i += 2;
            }
            '`' => {
                let mut inner = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    match chars[j] {
                        '\\' if chars.get(j + 1) == Some(&'`') => {
                            inner.push('`');
                            j += 2;
                        }
                        '`' => {
                            closed = true;
                            break;
                        }
                        c => {
                            inner.push(c);
                            j += 1;
                        }
                    }
                }
                if closed {
                    out.push_str("$(");
                    out.push_str(&inner);
                    out.push(')');
                    i = j + 1;
                } else {
                    out.extend(&chars[i..]);
                    i = chars.len();
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Replace every command substitution with the output of `run`.
///
/// Inner substitutions are resolved first, so `$(echo $(echo hi))` runs
/// `echo hi` and then `echo hi` again with its output. Trailing newlines
/// are stripped from each output. `$((` is left alone.
pub fn substitute(text: &str, run: &mut dyn FnMut(&str) -> String) -> String {
    let text = backticks_to_dollar(text);
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < text.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'(') {
            if bytes.get(i + 2) == Some(&b'(') {
                out.push_str("$((");
                i += 3;
                continue;
            }
            if let Some(close) = find_matching_paren(&text, i + 1) {
                let inner = substitute(&text[i + 2..close], run);
                let output = run(&inner);
                out.push_str(output.trim_end_matches(['\n', '\r']));
                i = close + 1;
                continue;
            }
        }
        let Some(c) = text[i..].chars().next() else {
            break;
        };
        out.push(c);
        i += c.len_utf8();
    }
    out
}
