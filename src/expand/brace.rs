//! Brace expansion: `{a,b,c}`, `{1..5}`, `{a..e}`, nested `{a,{b,c}}`

/// Locate the first `{` that has a matching `}`. Backslash-escaped braces
/// are ignored.
fn find_brace_pair(bytes: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => {
                if let Some(close) = matching_close(bytes, i) {
                    return Some((i, close));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split on commas that are not nested inside inner braces
fn split_top_level(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&content[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&content[start..]);
    parts
}

/// `lo..hi` with both ends integers, or both single letters
fn expand_range(content: &str) -> Option<Vec<String>> {
    let (lo, hi) = content.split_once("..")?;

    if let (Ok(lo), Ok(hi)) = (lo.parse::<i64>(), hi.parse::<i64>()) {
        let items = if lo <= hi {
            (lo..=hi).map(|n| n.to_string()).collect()
        } else {
            (hi..=lo).rev().map(|n| n.to_string()).collect()
        };
        return Some(items);
    }

    let mut lo_chars = lo.chars();
    let mut hi_chars = hi.chars();
    match (lo_chars.next(), lo_chars.next(), hi_chars.next(), hi_chars.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            let items = if a <= b {
                (a..=b).map(String::from).collect()
            } else {
                (b..=a).rev().map(String::from).collect()
            };
            Some(items)
        }
        _ => None,
    }
}

/// Expand every brace group in a word.
///
/// The first matched group is replaced by each of its items in turn and the
/// result is expanded again, so nested and repeated groups all expand. A
/// group with neither a comma nor a range loses its braces (`{solo}` gives
/// `solo`). A `{` without a match stays literal.
pub fn expand(word: &str) -> Vec<String> {
    let Some((open, close)) = find_brace_pair(word.as_bytes()) else {
        return vec![word.to_string()];
    };

    let prefix = &word[..open];
    let content = &word[open + 1..close];
    let suffix = &word[close + 1..];

    let items: Vec<String> = match expand_range(content) {
        Some(range) => range,
        None => split_top_level(content)
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    items
        .iter()
        .flat_map(|item| expand(&format!("{}{}{}", prefix, item, suffix)))
        .collect()
}
