//! Line-oriented SQL script splitter.
//!
//! Scripts are read one line at a time. A statement ends at a `;` at the end of
//! a line (optionally followed by an inline `--` comment), at a lone `GO` line,
//! or at the end of the script. Procedure bodies opened with `$$` (or a
//! `... PROCEDURE ...` header) are never split on `;`.
//!
//! Quote tracking only counts `'` characters per accumulated statement; it is
//! not a tokenizer. A line such as `values ('x;-- y')` with an even quote count
//! ends at the `;` inside the literal, and existing scripts depend on that.

use std::collections::HashSet;

/// Marker that opens and closes a procedure body.
const BODY_MARKER: &str = "$$";

/// How many leading characters are inspected for a `PROCEDURE` header.
const PROCEDURE_PREFIX_LEN: usize = 26;

/// Statements of one script, routed by the platform's transactional rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitScript {
    /// Statements executed inside the migration transaction
    pub transactional: Vec<String>,
    /// Statements deferred until after commit (e.g. `create index concurrently`)
    pub non_transactional: Vec<String>,
}

impl SplitScript {
    pub fn is_empty(&self) -> bool {
        self.transactional.is_empty() && self.non_transactional.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactional.len() + self.non_transactional.len()
    }
}

/// Split a script into statements, in order, keeping the first occurrence of
/// any repeated statement text.
pub fn split(script: &str) -> Vec<String> {
    let mut separator = StatementSeparator::default();
    for line in script.lines() {
        separator.next_line(line);
    }
    separator.finish_script();

    let mut seen = HashSet::new();
    separator
        .statements
        .into_iter()
        .filter(|stmt| seen.insert(stmt.clone()))
        .collect()
}

/// Split a script and route each statement with `is_transactional`.
pub fn split_classified<F>(script: &str, is_transactional: F) -> SplitScript
where
    F: Fn(&str) -> bool,
{
    let mut result = SplitScript::default();
    for stmt in split(script) {
        if is_transactional(&stmt) {
            result.transactional.push(stmt);
        } else {
            log::debug!("Deferring non-transactional statement: {stmt}");
            result.non_transactional.push(stmt);
        }
    }
    result
}

#[derive(Default)]
struct StatementSeparator {
    statements: Vec<String>,
    buffer: String,
    quote_count: usize,
    line_count: usize,
    in_body: bool,
    trim_delimiter: bool,
}

impl StatementSeparator {
    fn next_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("go") {
            self.end_statement();
            return;
        }

        let markers = line.matches(BODY_MARKER).count();
        if markers > 0 && (self.in_body || markers % 2 == 1) {
            self.line_with_marker(line);
            return;
        }

        if self.in_body {
            self.append(line);
            return;
        }

        if self.buffer.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            return;
        }

        // client directive restoring the default delimiter after a `delimiter $$` block
        if self.buffer.is_empty() && trimmed.eq_ignore_ascii_case("delimiter ;") {
            return;
        }

        if self.line_count == 0 && is_procedure_start(line) {
            self.in_body = true;
            self.line_count += 1;
            self.append(line);
            return;
        }

        self.line_count += 1;
        self.quote_count += line.matches('\'').count();
        if self.quote_count % 2 == 1 {
            self.append(line);
            return;
        }

        let content = line.trim_end();
        match content.rfind(';') {
            None => self.append(line),
            Some(pos) if pos + 1 == content.len() => {
                self.append(content);
                self.end_statement();
            }
            Some(pos) => {
                let remainder = content[pos + 1..].trim();
                if remainder.starts_with("--") {
                    self.append(&content[..=pos]);
                    self.end_statement();
                } else {
                    self.append(line);
                }
            }
        }
    }

    fn line_with_marker(&mut self, line: &str) {
        if self.in_body {
            if self.trim_delimiter {
                let stripped = line.replace(BODY_MARKER, "");
                self.append(&stripped);
            } else {
                self.append(line);
            }
            self.end_statement();
        } else {
            // `delimiter $$` is a client directive, not part of the statement
            self.trim_delimiter = line.trim().eq_ignore_ascii_case("delimiter $$");
            if !self.trim_delimiter {
                self.append(line);
            }
            self.in_body = true;
        }
    }

    fn append(&mut self, line: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
    }

    fn end_statement(&mut self) {
        let stmt = self.buffer.trim();
        if !stmt.is_empty() {
            self.statements.push(stmt.to_string());
        }
        self.buffer.clear();
        self.quote_count = 0;
        self.line_count = 0;
        self.in_body = false;
        self.trim_delimiter = false;
    }

    fn finish_script(&mut self) {
        self.end_statement();
    }
}

fn is_procedure_start(line: &str) -> bool {
    if line.chars().count() <= PROCEDURE_PREFIX_LEN {
        return false;
    }
    let prefix: String = line.chars().take(PROCEDURE_PREFIX_LEN).collect();
    prefix.to_uppercase().contains(" PROCEDURE ")
}

#[cfg(test)]
#[path = "splitter_test.rs"]
mod tests;
