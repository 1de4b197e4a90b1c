//! Filename globbing: `*`, `?`, `[...]` and recursive `**`

use std::fs;
use std::path::Path;

pub fn has_glob_chars(word: &str) -> bool {
    word.contains(['*', '?', '['])
}

/// Match `c` against the class starting at `pattern[start] == '['`.
///
/// Returns whether it matched and the index after the closing `]`, or
/// `None` for an unterminated class.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some('!') | Some('^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        if pattern[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            if pattern[i] <= c && c <= pattern[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

/// Classic backtracking glob match of a single name.
///
/// `*` matches any run, `?` any one character except a path separator,
/// `[...]` a character class. An unterminated class never matches.
pub fn match_pattern(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ni));
                    pi += 1;
                    continue;
                }
                '?' => {
                    if n[ni] != '/' && n[ni] != '\\' {
                        pi += 1;
                        ni += 1;
                        continue;
                    }
                }
                '[' => {
                    if let Some((true, next)) = match_class(&p, pi, n[ni]) {
                        pi = next;
                        ni += 1;
                        continue;
                    }
                }
                c => {
                    if c == n[ni] {
                        pi += 1;
                        ni += 1;
                        continue;
                    }
                }
            }
        }
        match star {
            Some((sp, sn)) => {
                pi = sp + 1;
                ni = sn + 1;
                star = Some((sp, sn + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn join_shown(shown: &str, name: &str) -> String {
    if shown.is_empty() {
        name.to_string()
    } else if shown.ends_with('/') {
        format!("{}{}", shown, name)
    } else {
        format!("{}/{}", shown, name)
    }
}

/// Sorted entries of `dir` matching one pattern component. Hidden entries
/// only match a component that itself starts with `.`.
fn matching_entries(dir: &Path, component: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.') || component.starts_with('.'))
        .filter(|name| match_pattern(component, name))
        .collect();
    names.sort();
    names
}

fn subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

fn walk(dir: &Path, shown: &str, parts: &[&str], out: &mut Vec<String>) {
    let Some((&first, rest)) = parts.split_first() else {
        if !shown.is_empty() {
            out.push(shown.to_string());
        }
        return;
    };

    if first == "**" {
        // zero more directories, then one more directory with ** still active
        walk(dir, shown, rest, out);
        for sub in subdirectories(dir) {
            walk(&dir.join(&sub), &join_shown(shown, &sub), parts, out);
        }
        return;
    }

    if has_glob_chars(first) {
        for name in matching_entries(dir, first) {
            let path = dir.join(&name);
            if rest.is_empty() {
                out.push(join_shown(shown, &name));
            } else if path.is_dir() {
                walk(&path, &join_shown(shown, &name), rest, out);
            }
        }
    } else {
        let path = dir.join(first);
        if rest.is_empty() {
            if fs::symlink_metadata(&path).is_ok() {
                out.push(join_shown(shown, first));
            }
        } else if path.is_dir() {
            walk(&path, &join_shown(shown, first), rest, out);
        }
    }
}

/// Expand a pattern against the filesystem, relative paths resolving under
/// `base`. A pattern that matches nothing comes back unchanged.
pub fn expand_in(base: &Path, pattern: &str) -> Vec<String> {
    if !has_glob_chars(pattern) {
        return vec![pattern.to_string()];
    }

    let (root, shown) = if pattern.starts_with('/') {
        (Path::new("/").to_path_buf(), "/")
    } else {
        (base.to_path_buf(), "")
    };
    let parts: Vec<&str> = pattern.split('/').filter(|p| !p.is_empty()).collect();

    let mut out = Vec::new();
    walk(&root, shown, &parts, &mut out);

    if out.is_empty() {
        vec![pattern.to_string()]
    } else {
        out
    }
}

/// Expand a pattern relative to the current directory
pub fn expand(pattern: &str) -> Vec<String> {
    expand_in(Path::new("."), pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, File};
    use tempfile::tempdir;

    #[test]
    fn star_and_question() {
        assert!(match_pattern("*.txt", "file.txt"));
        assert!(match_pattern("f*e*.txt", "fileee.txt"));
        assert!(!match_pattern("*.txt", "file.rs"));
        assert!(match_pattern("file?.txt", "file1.txt"));
        assert!(!match_pattern("file?.txt", "file.txt"));
        assert!(!match_pattern("a?b", "a/b"));
        assert!(match_pattern("*", ""));
    }

    #[test]
    fn character_classes() {
        assert!(match_pattern("[abc]", "b"));
        assert!(match_pattern("[a-z]1", "q1"));
        assert!(!match_pattern("[!a-z]", "q"));
        assert!(match_pattern("[^a-z]", "Q"));
        assert!(match_pattern("[]x]", "]"));
        assert!(!match_pattern("[abc", "a"));
    }

    #[test]
    fn expands_sorted_and_skips_hidden() {
        let dir = tempdir().unwrap();
        for name in ["file2.txt", "file1.txt", ".hidden", "notes.md"] {
            File::create(dir.path().join(name)).unwrap();
        }
        assert_eq!(expand_in(dir.path(), "*.txt"), vec!["file1.txt", "file2.txt"]);
        assert!(expand_in(dir.path(), ".*").contains(&".hidden".to_string()));
        assert!(!expand_in(dir.path(), "*").contains(&".hidden".to_string()));
    }

    #[test]
    fn no_match_returns_pattern() {
        let dir = tempdir().unwrap();
        assert_eq!(expand_in(dir.path(), "*.nothing"), vec!["*.nothing"]);
    }

    #[test]
    fn directory_components() {
        let dir = tempdir().unwrap();
        create_dir_all(dir.path().join("src/a")).unwrap();
        File::create(dir.path().join("src/main.rs")).unwrap();
        File::create(dir.path().join("src/a/mod.rs")).unwrap();
        assert_eq!(expand_in(dir.path(), "src/*.rs"), vec!["src/main.rs"]);
        assert_eq!(expand_in(dir.path(), "*/a/*.rs"), vec!["src/a/mod.rs"]);
    }

    #[test]
    fn recursive_double_star() {
        let dir = tempdir().unwrap();
        create_dir_all(dir.path().join("a/b")).unwrap();
        File::create(dir.path().join("top.rs")).unwrap();
        File::create(dir.path().join("a/mid.rs")).unwrap();
        File::create(dir.path().join("a/b/deep.rs")).unwrap();
        let found = expand_in(dir.path(), "**/*.rs");
        assert_eq!(found, vec!["top.rs", "a/mid.rs", "a/b/deep.rs"]);
    }
}
