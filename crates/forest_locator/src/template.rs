//! `${NAME}` path templates and the environment snapshot they expand against.

use crate::error::TemplateError;
use std::collections::BTreeMap;

/// Read-only snapshot of template variables.
///
/// Taken once per configuration load. Expansion never consults the process
/// environment directly, so a fixed snapshot always yields the same paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment. Non-UTF-8 entries are skipped.
    pub fn capture() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

fn tokenize(template: &str) -> Result<Vec<Token<'_>>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            tokens.push(Token::Literal(&rest[..start]));
        }
        let position = offset + start;
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or(TemplateError::Unterminated { position })?;
        let name = &after[..end];
        if !is_valid_name(name) {
            return Err(TemplateError::InvalidName {
                name: name.to_string(),
                position,
            });
        }
        tokens.push(Token::Variable(name));

        let consumed = start + 2 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    Ok(tokens)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace every `${NAME}` in `template` with its value from `env`.
///
/// Substituted values are not re-scanned. A `$` not followed by `{` is literal.
pub fn expand(template: &str, env: &Environment) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for token in tokenize(template)? {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Variable(name) => {
                let value = env.get(name).ok_or_else(|| TemplateError::MissingVariable {
                    name: name.to_string(),
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

/// Names referenced by `template`, in order of first appearance.
pub fn variables(template: &str) -> Result<Vec<&str>, TemplateError> {
    let mut names: Vec<&str> = Vec::new();
    for token in tokenize(template)? {
        if let Token::Variable(name) = token {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Referenced names absent from `env`.
pub fn missing_variables(template: &str, env: &Environment) -> Result<Vec<String>, TemplateError> {
    Ok(variables(template)?
        .into_iter()
        .filter(|name| env.get(name).is_none())
        .map(str::to_string)
        .collect())
}
