//! # Pattern Matching
//!
//! Glob pattern matching for artifact paths. Patterns support `*` (single
//! segment), `?` (single character), `**` (any number of path segments),
//! and `[...]` character classes. Patterns are compiled to regexes so they
//! can be matched repeatedly without re-parsing.

use regex::Regex;

/// Compile a glob pattern into an anchored regex.
///
/// `**/` matches zero or more leading path segments, a trailing or bare
/// `**` matches any remainder, `*` matches within a single segment, and
/// `?` matches a single non-separator character.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let normalized = normalize(pattern);
    Regex::new(&format!("^{}$", glob_to_regex(&normalized)))
}

/// Check whether a path matches a glob pattern.
///
/// Invalid patterns never match.
pub fn match_pattern(path: &str, pattern: &str) -> bool {
    match compile_pattern(pattern) {
        Ok(regex) => regex.is_match(&normalize(path)),
        Err(_) => false,
    }
}

/// Check whether a path matches any of the given patterns.
pub fn match_patterns(path: &str, patterns: &[impl AsRef<str>]) -> bool {
    let normalized = normalize(path);
    patterns.iter().any(|pattern| {
        compile_pattern(pattern.as_ref())
            .map(|regex| regex.is_match(&normalized))
            .unwrap_or(false)
    })
}

fn normalize(value: &str) -> String {
    value.replace('\\', "/").trim_matches('/').to_string()
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    if i + 2 < chars.len() && chars[i + 2] == '/' {
                        // `**/` matches zero or more whole segments
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                } else {
                    out.push_str("[^/]*");
                    i += 1;
                }
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                // Character class, passed through to the regex engine with
                // glob's `!` negation mapped to regex `^`
                let mut j = i + 1;
                out.push('[');
                if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
                    out.push('^');
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    out.push(chars[j]);
                    j += 1;
                }
                out.push(']');
                i = j + 1;
            }
            c @ ('.' | '+' | '^' | '$' | '{' | '}' | '|' | '(' | ')') => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}
