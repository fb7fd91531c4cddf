//! Migration version parsing and ordering.
//!
//! A version token comes from a migration name such as `V1.2_3__add_users`,
//! `R__refresh_views` or `I__grants`. Versions form a strict total order:
//! repeatable-init migrations first, then numbered versions compared segment by
//! segment, then repeatable migrations ordered by comment.

use crate::error::CoreResult;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

const SEGMENT_DELIMITERS: [char; 3] = ['.', '_', '-'];

/// The kind of migration a version token describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionKind {
    /// Numbered migration, applied once (`V1.2__name`)
    Version,
    /// Repeatable migration run after the numbered ones (`R__name`)
    Repeatable,
    /// Repeatable migration run before anything else (`I__name`)
    Init,
    /// Baseline script recorded in place of every version up to its own
    BootInit,
}

impl VersionKind {
    /// Single-character tag stored in the history `mtype` column.
    pub fn code(self) -> char {
        match self {
            VersionKind::Version => 'V',
            VersionKind::Repeatable => 'R',
            VersionKind::Init => 'I',
            VersionKind::BootInit => 'B',
        }
    }

    /// Map a history `mtype` tag back to a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "V" | "v" => Some(VersionKind::Version),
            "R" | "r" => Some(VersionKind::Repeatable),
            "I" | "i" => Some(VersionKind::Init),
            "B" | "b" => Some(VersionKind::BootInit),
            _ => None,
        }
    }

    /// Sort bucket: init before versions before repeatables.
    fn rank(self) -> u8 {
        match self {
            VersionKind::Init => 0,
            VersionKind::Version | VersionKind::BootInit => 1,
            VersionKind::Repeatable => 2,
        }
    }
}

/// A parsed, immutable migration version.
#[derive(Debug, Clone)]
pub struct MigrationVersion {
    raw: String,
    kind: VersionKind,
    segments: Vec<u64>,
    /// `delimiters[i]` sits between `segments[i]` and `segments[i + 1]`
    delimiters: Vec<char>,
    comment: String,
}

impl MigrationVersion {
    /// Parse a raw version token.
    ///
    /// The first non-numeric token ends parsing with a warning; this is how
    /// `-SNAPSHOT` style qualifiers are dropped. A token with no numeric
    /// segment at all yields an empty version that sorts before `0`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let original = raw.trim();
        let mut value = original.strip_suffix(".sql").unwrap_or(original);
        if let Some(rest) = value.strip_prefix(&['V', 'v'][..]) {
            value = rest;
        }

        let (value, comment) = match value.find("__") {
            Some(pos) => (&value[..pos], &value[pos + 2..]),
            None => (value, ""),
        };

        if value.starts_with(&['R', 'r'][..]) {
            return Ok(Self::repeatable(original, VersionKind::Repeatable, comment));
        }
        if value.starts_with(&['I', 'i'][..]) {
            return Ok(Self::repeatable(original, VersionKind::Init, comment));
        }

        let mut segments = Vec::new();
        let mut delimiters = Vec::new();
        let mut pending_delimiter = None;
        let mut token_start = 0;
        let chars: Vec<(usize, char)> = value.char_indices().collect();
        for i in 0..=chars.len() {
            let at_delimiter = chars
                .get(i)
                .map(|(_, c)| SEGMENT_DELIMITERS.contains(c))
                .unwrap_or(true);
            if !at_delimiter {
                continue;
            }
            let end = chars.get(i).map(|(pos, _)| *pos).unwrap_or(value.len());
            let token = &value[token_start..end];
            match token.parse::<u64>() {
                Ok(n) => {
                    if let Some(delim) = pending_delimiter {
                        delimiters.push(delim);
                    }
                    segments.push(n);
                }
                Err(_) => {
                    log::warn!(
                        "Ignoring non-numeric version token '{}' in migration version '{}'",
                        &value[token_start..],
                        original
                    );
                    break;
                }
            }
            if let Some((pos, c)) = chars.get(i) {
                pending_delimiter = Some(*c);
                token_start = pos + c.len_utf8();
            }
        }

        Ok(Self {
            raw: original.to_string(),
            kind: VersionKind::Version,
            segments,
            delimiters,
            comment: comment.to_string(),
        })
    }

    fn repeatable(raw: &str, kind: VersionKind, comment: &str) -> Self {
        Self {
            raw: raw.to_string(),
            kind,
            segments: Vec::new(),
            delimiters: Vec::new(),
            comment: comment.to_string(),
        }
    }

    /// The token as it was supplied.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> VersionKind {
        self.kind
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Numeric segments (empty for repeatable kinds).
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    /// True for both repeatable kinds (`R__` and `I__`).
    pub fn is_repeatable(&self) -> bool {
        matches!(self.kind, VersionKind::Repeatable | VersionKind::Init)
    }

    /// True for `I__` migrations that run before everything else.
    pub fn is_repeatable_init(&self) -> bool {
        self.kind == VersionKind::Init
    }

    /// True for `R__` migrations that run after the numbered versions.
    pub fn is_repeatable_last(&self) -> bool {
        self.kind == VersionKind::Repeatable
    }

    pub fn is_boot_init(&self) -> bool {
        self.kind == VersionKind::BootInit
    }

    /// Identity key used in the history table: normalised version for
    /// numbered kinds, lower-cased comment for repeatable kinds.
    pub fn key(&self) -> String {
        if self.is_repeatable() {
            self.comment.to_lowercase()
        } else {
            self.normalised()
        }
    }

    /// Render the version with every delimiter as `.` (`R`/`I` for the
    /// repeatable kinds).
    pub fn normalised(&self) -> String {
        match self.kind {
            VersionKind::Repeatable => "R".to_string(),
            VersionKind::Init => "I".to_string(),
            VersionKind::Version | VersionKind::BootInit => self
                .segments
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    /// The version following this one: last segment incremented, original
    /// delimiters kept. Repeatable kinds have no successor and return a copy.
    pub fn next_version(&self) -> MigrationVersion {
        if self.is_repeatable() || self.segments.is_empty() {
            return self.clone();
        }
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            *last += 1;
        }
        let mut raw = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                raw.push(self.delimiters.get(i - 1).copied().unwrap_or('.'));
            }
            raw.push_str(&segment.to_string());
        }
        MigrationVersion {
            raw,
            kind: self.kind,
            segments,
            delimiters: self.delimiters.clone(),
            comment: String::new(),
        }
    }

    /// The same version re-tagged as a boot-init baseline.
    pub fn as_boot_init(&self) -> MigrationVersion {
        MigrationVersion {
            kind: VersionKind::BootInit,
            ..self.clone()
        }
    }

    /// Rebuild a version from a stored history row.
    pub fn from_history(kind: VersionKind, version: &str, comment: &str) -> CoreResult<Self> {
        match kind {
            VersionKind::Repeatable | VersionKind::Init => Ok(Self::repeatable(
                &format!("{}__{}", kind.code(), comment),
                kind,
                comment,
            )),
            VersionKind::Version | VersionKind::BootInit => {
                let mut parsed = Self::parse(version)?;
                parsed.kind = kind;
                parsed.comment = comment.to_string();
                Ok(parsed)
            }
        }
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.kind.rank().cmp(&other.kind.rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match self.kind {
            VersionKind::Version | VersionKind::BootInit => self
                .segments
                .cmp(&other.segments)
                .then_with(|| self.is_boot_init().cmp(&other.is_boot_init())),
            VersionKind::Repeatable | VersionKind::Init => self.comment.cmp(&other.comment),
        }
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MigrationVersion {}

impl Hash for MigrationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.rank().hash(state);
        match self.kind {
            VersionKind::Version | VersionKind::BootInit => {
                self.segments.hash(state);
                self.is_boot_init().hash(state);
            }
            VersionKind::Repeatable | VersionKind::Init => self.comment.hash(state),
        }
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
#[path = "version_test.rs"]
mod tests;
