//! Glob matching for source patterns.
//!
//! Patterns are case-sensitive: dataset families are told apart by case
//! (`EIDA50*.nc` vs `*ga6*.nc`), so nothing here folds case. A pattern with no
//! `/` is matched against the filename only; a pattern with `/` is matched
//! against the path relative to the source directory.

use crate::error::{LocateError, PatternError};
use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

/// What part of a candidate path the pattern is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    FileName,
    RelativePath,
}

/// Compiled source pattern.
#[derive(Debug, Clone)]
pub struct FilenameMatcher {
    pattern: String,
    matcher: GlobMatcher,
    scope: MatchScope,
    max_depth: Option<usize>,
}

impl FilenameMatcher {
    /// Compile a glob. Leading slashes are stripped; matching is always relative.
    pub fn compile(raw: &str) -> Result<Self, PatternError> {
        let pattern = raw.trim().trim_start_matches('/').to_string();
        if pattern.is_empty() {
            return Err(PatternError {
                pattern: raw.to_string(),
                message: "pattern is empty".to_string(),
            });
        }

        let matcher = GlobBuilder::new(&pattern)
            .case_insensitive(false)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|e| PatternError {
                pattern: raw.to_string(),
                message: e.kind().to_string(),
            })?
            .compile_matcher();

        // `**` only recurses when the pattern has a separator; `**.nc` is a
        // filename pattern like `*.nc`
        let (scope, max_depth) = if !pattern.contains('/') {
            (MatchScope::FileName, Some(1))
        } else if pattern.contains("**") {
            (MatchScope::RelativePath, None)
        } else {
            let components = pattern.split('/').filter(|s| !s.is_empty()).count();
            (MatchScope::RelativePath, Some(components))
        };

        Ok(Self {
            pattern,
            matcher,
            scope,
            max_depth,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn scope(&self) -> MatchScope {
        self.scope
    }

    /// Directory levels below the source directory a scan must visit.
    /// `None` means unbounded (`**`).
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Match a `/`-separated candidate relative to the source directory.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim_start_matches('/');
        match self.scope {
            MatchScope::FileName => {
                let name = candidate.rsplit('/').next().unwrap_or(candidate);
                self.matcher.is_match(name)
            }
            MatchScope::RelativePath => self.matcher.is_match(candidate),
        }
    }

    /// Match a path relative to the source directory.
    pub fn matches_path(&self, relative: &Path) -> bool {
        match self.scope {
            MatchScope::FileName => relative
                .file_name()
                .map(|name| self.matcher.is_match(name.to_string_lossy().as_ref()))
                .unwrap_or(false),
            MatchScope::RelativePath => self.matcher.is_match(to_forward_slashes(relative)),
        }
    }

    /// Translate into a SQLite `GLOB` operand (case-sensitive, `*`/`?`/`[...]`).
    ///
    /// The translation may be looser than the glob (`**/` becomes `*`); callers
    /// re-check rows with [`FilenameMatcher::matches`].
    pub fn to_index_glob(&self) -> Result<String, LocateError> {
        to_sqlite_glob(&self.pattern).map_err(LocateError::QueryError)
    }
}

/// Render a path with `/` separators regardless of platform.
pub fn to_forward_slashes(path: &Path) -> String {
    let path_str = path.to_string_lossy();
    if cfg!(windows) {
        path_str.replace('\\', "/")
    } else {
        path_str.into_owned()
    }
}

/// Escape a literal string for use inside a SQLite `GLOB` operand.
pub fn escape_sqlite_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        match c {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

fn to_sqlite_glob(pattern: &str) -> Result<String, String> {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                    }
                }
                out.push('*');
            }
            '?' => out.push('?'),
            '[' => {
                out.push('[');
                match chars.next() {
                    Some('!') => out.push('^'),
                    Some(first) => out.push(first),
                    None => return Err(format!("unterminated character class in '{pattern}'")),
                }
                loop {
                    match chars.next() {
                        Some(']') => {
                            out.push(']');
                            break;
                        }
                        Some(next) => out.push(next),
                        None => {
                            return Err(format!("unterminated character class in '{pattern}'"))
                        }
                    }
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&escape_sqlite_glob(&escaped.to_string())),
                None => return Err(format!("dangling escape in '{pattern}'")),
            },
            '{' | '}' => {
                return Err(format!(
                    "brace alternation in '{pattern}' cannot be expressed as an index query"
                ))
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}
