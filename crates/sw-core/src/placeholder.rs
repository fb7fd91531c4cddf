//! `${key}` placeholder substitution for migration scripts.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"))
}

/// Key/value pairs substituted into scripts before splitting and
/// (unless early checksum mode is on) before checksumming.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: HashMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Parse a delimited `key=value,key2=value2` string.
    ///
    /// Entries without `=` are ignored; keys and values are trimmed.
    pub fn parse(text: &str) -> Self {
        let values = text
            .split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { values }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every resolvable `${key}` token; unresolved tokens are left
    /// as they are.
    pub fn apply<'a>(&self, content: &'a str) -> Cow<'a, str> {
        if self.values.is_empty() || !content.contains("${") {
            return Cow::Borrowed(content);
        }
        placeholder_re().replace_all(content, |caps: &Captures<'_>| {
            match self.values.get(caps[1].trim()) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
    }
}

#[cfg(test)]
#[path = "placeholder_test.rs"]
mod tests;
