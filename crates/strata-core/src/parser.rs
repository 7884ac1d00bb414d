//! Spec file parser.
//!
//! Grammar, one command per logical line:
//!
//! ```text
//! # comment
//! FROM name[:tag]
//! PARAMS arg...
//! RUN command line, passed to the sandbox as-is
//! BOOT title [params...]
//! INCLUDE file...
//! ```
//!
//! Keywords are case-insensitive, a trailing `\` continues a line, and
//! double quotes group whitespace in PARAMS/BOOT/INCLUDE arguments.
//! INCLUDE paths are relative to the including file and are expanded inline.

use crate::descriptor::{Command, Descriptor};
use crate::error::{BuildError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use strata_store::{BootEntry, BuildKey};

/// Line-level parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number (0 when the whole file is at fault).
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    /// Create a parse error for a line.
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a spec file into a descriptor named after the file stem.
pub fn parse_file(path: &Path) -> Result<Descriptor> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| BuildError::Parse {
            path: path.to_path_buf(),
            source: ParseError::new(0, "file name is not valid UTF-8"),
        })?
        .to_string();

    let mut includes = Vec::new();
    let commands = parse_path(path, &mut includes)?;
    tracing::debug!(
        path = %path.display(),
        name = %name,
        commands = commands.len(),
        "Parsed spec file"
    );
    Ok(Descriptor {
        commands,
        ..Descriptor::new(name)
    })
}

/// Parse spec source text that has no file of its own.
///
/// INCLUDE is rejected since there is no directory to resolve it against.
pub fn parse_str(content: &str) -> std::result::Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    for (line, text) in preprocess(content) {
        match parse_line(line, &text)? {
            Line::Command(command) => commands.push(command),
            Line::Include(_) => {
                return Err(ParseError::new(line, "INCLUDE is only allowed in spec files"))
            }
        }
    }
    Ok(commands)
}

fn parse_path(path: &Path, stack: &mut Vec<PathBuf>) -> Result<Vec<Command>> {
    let parse_err = |line: usize, message: String| BuildError::Parse {
        path: path.to_path_buf(),
        source: ParseError::new(line, message),
    };

    let canonical = std::fs::canonicalize(path)
        .map_err(|e| parse_err(0, format!("cannot open spec file: {e}")))?;
    if stack.contains(&canonical) {
        return Err(parse_err(0, "include cycle".into()));
    }
    let content = std::fs::read_to_string(&canonical)
        .map_err(|e| parse_err(0, format!("cannot read spec file: {e}")))?;
    let base_dir = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    stack.push(canonical);
    let mut commands = Vec::new();
    for (line, text) in preprocess(&content) {
        let parsed = parse_line(line, &text).map_err(|source| BuildError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        match parsed {
            Line::Command(command) => commands.push(command),
            Line::Include(files) => {
                for file in files {
                    commands.extend(parse_path(&base_dir.join(file), stack)?);
                }
            }
        }
    }
    stack.pop();
    Ok(commands)
}

enum Line {
    Command(Command),
    Include(Vec<String>),
}

/// Join continuation lines and drop comments and blanks.
///
/// Returns `(first line number, logical line)` pairs.
fn preprocess(content: &str) -> Vec<(usize, String)> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut continuation = false;

    for (index, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && !continuation) {
            continue;
        }

        let (body, more) = match trimmed.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed, false),
        };
        if !continuation {
            start = index + 1;
            current.clear();
        } else if !body.is_empty() && !current.is_empty() {
            current.push(' ');
        }
        current.push_str(body);
        continuation = more;

        if !continuation && !current.is_empty() {
            result.push((start, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        result.push((start, current));
    }
    result
}

fn parse_line(line: usize, text: &str) -> std::result::Result<Line, ParseError> {
    let text = text.trim();
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };

    let command = match keyword.to_ascii_uppercase().as_str() {
        "FROM" => {
            let args = split_args(line, rest)?;
            let [reference] = args.as_slice() else {
                return Err(ParseError::new(line, "FROM takes exactly one image reference"));
            };
            let key: BuildKey = reference
                .parse()
                .map_err(|e| ParseError::new(line, format!("FROM {reference}: {e}")))?;
            Command::From(key)
        }
        "PARAMS" => {
            let args = split_args(line, rest)?;
            if args.is_empty() {
                return Err(ParseError::new(line, "PARAMS needs at least one argument"));
            }
            Command::Params(args)
        }
        "RUN" => {
            if rest.is_empty() {
                return Err(ParseError::new(line, "RUN needs a command"));
            }
            Command::Run(rest.to_string())
        }
        "BOOT" => {
            let mut args = split_args(line, rest)?.into_iter();
            let title = args
                .next()
                .ok_or_else(|| ParseError::new(line, "BOOT needs a title"))?;
            Command::Boot(BootEntry {
                title,
                params: args.collect(),
            })
        }
        "INCLUDE" => {
            let files = split_args(line, rest)?;
            if files.is_empty() {
                return Err(ParseError::new(line, "INCLUDE needs at least one file"));
            }
            return Ok(Line::Include(files));
        }
        _ => return Err(ParseError::new(line, format!("unknown command {keyword}"))),
    };
    Ok(Line::Command(command))
}

/// Split on whitespace, keeping double-quoted runs together.
fn split_args(line: usize, s: &str) -> std::result::Result<Vec<String>, ParseError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => break,
            },
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(ParseError::new(line, "unterminated quote"));
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}
