//! Shared serde helpers for configuration values that accept either a
//! delimited string or a structured YAML value.

use serde::Deserialize;
use std::collections::HashMap;

/// Serde default function that returns `true`.
///
/// Used for boolean fields that should default to enabled/active.
pub fn default_true() -> bool {
    true
}

/// A list given either as `"a,b,c"` or as a YAML sequence.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrList {
    Text(String),
    List(Vec<String>),
}

impl StringOrList {
    pub(crate) fn into_items(self) -> Vec<String> {
        match self {
            StringOrList::Text(text) => split_list(&text),
            StringOrList::List(items) => items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

/// A map given either as `"k=v,k2=v2"` or as a YAML mapping.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrMap {
    Text(String),
    Map(HashMap<String, String>),
}

/// Split a comma-separated list, trimming and dropping empty items.
pub(crate) fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
