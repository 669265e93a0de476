pub mod line_index;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const BEGIN_MARK: &str = "/* begin import: ";
const END_MARK: &str = "/* end import: ";

/// Expanded source text plus the map from physical lines back to the file
/// and local line they came from.
pub struct Expanded {
    pub text: String,
    pub origins: OriginMap,
}

/// Where one physical line of the expanded text originated.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub file: String,
    pub line: u32,
}

pub struct OriginMap {
    entries: Vec<Origin>,
}

impl OriginMap {
    /// Reconstruct origins by replaying the sentinel markers.
    pub fn build(expanded: &str, root: &str) -> OriginMap {
        let mut stack: Vec<(String, u32)> = vec![(root.to_string(), 1)];
        let mut entries = Vec::new();
        for line in expanded.lines() {
            let t = line.trim();
            if let Some(path) = t.strip_prefix(BEGIN_MARK).and_then(|r| r.strip_suffix(" */")) {
                // The sentinel stands where the include directive was.
                let top = stack.last_mut().expect("origin stack never empties");
                entries.push(Origin { file: top.0.clone(), line: top.1 });
                top.1 += 1;
                stack.push((path.to_string(), 1));
            } else if t.strip_prefix(END_MARK).and_then(|r| r.strip_suffix(" */")).is_some() {
                if stack.len() > 1 {
                    stack.pop();
                }
                let top = stack.last().expect("origin stack never empties");
                entries.push(Origin { file: top.0.clone(), line: top.1 });
            } else {
                let top = stack.last_mut().expect("origin stack never empties");
                entries.push(Origin { file: top.0.clone(), line: top.1 });
                top.1 += 1;
            }
        }
        OriginMap { entries }
    }

    /// Origin of the 1-based expanded line, if in range.
    pub fn lookup(&self, expanded_line: u32) -> Option<&Origin> {
        self.entries.get(expanded_line.saturating_sub(1) as usize)
    }
}

/// Returns the quoted path when a line is an include directive.
fn include_target(line: &str) -> Option<&str> {
    let t = line.trim_start();
    for prefix in ["use \"", "import \"", "include \"", "#include \""] {
        if let Some(rest) = t.strip_prefix(prefix) {
            if let Some(end) = rest.find('"') {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

fn expand_into(text: &str, dir: &Path, visiting: &mut HashSet<PathBuf>, out: &mut String) {
    for line in text.lines() {
        if let Some(rel) = include_target(line) {
            let target = dir.join(rel);
            let canon = fs::canonicalize(&target).unwrap_or_else(|_| target.clone());
            if visiting.contains(&canon) {
                continue; // cycle: silently broken
            }
            // Best effort: an unreadable include contributes an empty body.
            let body = fs::read_to_string(&canon).unwrap_or_default();
            out.push_str(BEGIN_MARK);
            out.push_str(&canon.display().to_string());
            out.push_str(" */\n");
            visiting.insert(canon.clone());
            let child_dir = canon.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            expand_into(&body, &child_dir, visiting, out);
            visiting.remove(&canon);
            out.push_str(END_MARK);
            out.push_str(&canon.display().to_string());
            out.push_str(" */\n");
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
}

/// Read a source file, expand its includes, and build the origin map.
pub fn expand_file(path: &Path) -> io::Result<Expanded> {
    let text = fs::read_to_string(path)?;
    let canon = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let dir = canon
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut visiting = HashSet::new();
    visiting.insert(canon);
    let mut out = String::new();
    expand_into(&text, &dir, &mut visiting, &mut out);
    let name = path.display().to_string();
    let origins = OriginMap::build(&out, &name);
    Ok(Expanded { text: out, origins })
}

/// Expand in-memory source (REPL, tests). Includes resolve against the
/// current directory.
pub fn expand_str(text: &str, name: &str) -> Expanded {
    let mut visiting = HashSet::new();
    let mut out = String::new();
    expand_into(text, Path::new("."), &mut visiting, &mut out);
    let origins = OriginMap::build(&out, name);
    Expanded { text: out, origins }
}

// ── Statement accumulation ──────────────────────────────────────────────

/// One logical statement with the expanded-text position where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub text: String,
    pub line: u32,
    pub col: u32,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn word_at(bytes: &[u8], i: usize, word: &[u8]) -> bool {
    if i + word.len() > bytes.len() || &bytes[i..i + word.len()] != word {
        return false;
    }
    let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
    let after_ok = i + word.len() == bytes.len() || !is_ident_byte(bytes[i + word.len()]);
    before_ok && after_ok
}

/// Count block opens (`do`, `{`) and closes (`end`, `}`) on one line,
/// outside quoted strings and only at paren/bracket depth zero. A trailing
/// `//` comment is excluded from the count.
pub fn line_balance(line: &str) -> (u32, u32) {
    let bytes = line.as_bytes();
    let mut opens = 0u32;
    let mut closes = 0u32;
    let mut in_str = false;
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_str {
            if b == b'"' {
                in_str = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => in_str = true,
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => break,
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b'{' if depth == 0 => opens += 1,
            b'}' if depth == 0 => closes += 1,
            b'd' if depth == 0 && word_at(bytes, i, b"do") => {
                opens += 1;
                i += 2;
                continue;
            }
            b'e' if depth == 0 && word_at(bytes, i, b"end") => {
                closes += 1;
                i += 3;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    (opens, closes)
}

fn is_comment_line(trimmed: &str) -> bool {
    trimmed.is_empty()
        || trimmed.starts_with(';')
        || trimmed.starts_with('#')
        || trimmed.starts_with("//")
}

/// Group the expanded text into logical statements by block balance.
/// Blank lines, single-line comments, and whole block comments are
/// filtered; everything else accumulates until `do`/`end` and `{`/`}`
/// come back into balance.
pub fn split_statements(expanded: &str) -> Vec<RawStatement> {
    let mut out = Vec::new();
    let mut in_block_comment = false;
    let mut current: Option<(String, u32, u32, i64)> = None;

    for (i, line) in expanded.lines().enumerate() {
        let lineno = i as u32 + 1;
        let trimmed = line.trim();

        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if is_comment_line(trimmed) {
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block_comment = true;
            }
            continue;
        }

        let (opens, closes) = line_balance(line);
        let delta = opens as i64 - closes as i64;
        let mut finished = false;
        match current.as_mut() {
            None => {
                let indent = line.len() - line.trim_start().len();
                let col = indent as u32 + 1;
                if delta > 0 {
                    current = Some((line.trim_start().to_string(), lineno, col, delta));
                } else {
                    out.push(RawStatement {
                        text: line.trim_start().to_string(),
                        line: lineno,
                        col,
                    });
                }
            }
            Some((text, _, _, bal)) => {
                text.push('\n');
                text.push_str(line);
                *bal += delta;
                finished = *bal <= 0;
            }
        }
        if finished {
            if let Some((text, l, c, _)) = current.take() {
                out.push(RawStatement { text, line: l, col: c });
            }
        }
    }

    // An unbalanced trailing statement is handed off anyway; the parser
    // reports the missing `end`.
    if let Some((text, l, c, _)) = current {
        out.push(RawStatement { text, line: l, col: c });
    }
    out
}
