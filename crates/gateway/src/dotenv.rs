//! `.env` / `.env.local` loader (§6 SUPPLEMENT).
//!
//! No corpus crate implements this exact grammar, so it is hand-rolled
//! here in the line-oriented-parser style `sa-providers::sse` and
//! `sa-domain::config`'s validation lists both use: parse tolerantly,
//! collect per-line errors instead of failing the whole file, and let the
//! caller decide whether any of them matter.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

fn key_re() -> &'static Regex {
    static KEY_RE: OnceLock<Regex> = OnceLock::new();
    KEY_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Why a single line failed to parse as a `KEY=value` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DotenvErrorReason {
    MissingEquals,
    EmptyKey,
    InvalidKey,
}

impl std::fmt::Display for DotenvErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingEquals => "missing_equals",
            Self::EmptyKey => "empty_key",
            Self::InvalidKey => "invalid_key",
        };
        f.write_str(s)
    }
}

/// A non-fatal parse failure for one line of one file.
#[derive(Debug, Clone)]
pub struct DotenvError {
    pub file: String,
    pub line_number: usize,
    pub raw: String,
    pub reason: DotenvErrorReason,
}

/// Load `.env` then `.env.local` from `dir`, later files overriding
/// earlier ones, and apply the result to the process environment via
/// `set_var` for any key not already set there (existing process env
/// always wins over either file, matching the precedence `export`-style
/// shells give an already-exported variable).
///
/// Returns the merged key/value map plus every per-line error
/// encountered across both files, in file-then-line order.
pub fn load(dir: &Path) -> (HashMap<String, String>, Vec<DotenvError>) {
    let mut vars = HashMap::new();
    let mut errors = Vec::new();

    for name in [".env", ".env.local"] {
        let path = dir.join(name);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        parse_into(name, &contents, &mut vars, &mut errors);
    }

    for (key, value) in &vars {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }

    (vars, errors)
}

fn parse_into(file: &str, contents: &str, vars: &mut HashMap<String, String>, errors: &mut Vec<DotenvError>) {
    for (idx, raw_line) in contents.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some(eq) = body.find('=') else {
            errors.push(DotenvError {
                file: file.to_owned(),
                line_number,
                raw: raw_line.to_owned(),
                reason: DotenvErrorReason::MissingEquals,
            });
            continue;
        };

        let key = body[..eq].trim();
        if key.is_empty() {
            errors.push(DotenvError {
                file: file.to_owned(),
                line_number,
                raw: raw_line.to_owned(),
                reason: DotenvErrorReason::EmptyKey,
            });
            continue;
        }
        if !key_re().is_match(key) {
            errors.push(DotenvError {
                file: file.to_owned(),
                line_number,
                raw: raw_line.to_owned(),
                reason: DotenvErrorReason::InvalidKey,
            });
            continue;
        }

        let raw_value = body[eq + 1..].trim();
        let value = parse_value(raw_value);
        vars.insert(key.to_owned(), value);
    }
}

fn parse_value(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return unescape_double_quoted(inner);
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return inner.to_owned();
    }
    strip_inline_comment(raw).trim_end().to_owned()
}

fn unescape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Strip a ` # ...` inline comment: only a `#` preceded by whitespace ends
/// the value, so `FOO=a#b` keeps its literal `#`.
fn strip_inline_comment(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    let mut prev_was_space = true;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && prev_was_space {
            return &raw[..i];
        }
        prev_was_space = b.is_ascii_whitespace();
    }
    raw
}
