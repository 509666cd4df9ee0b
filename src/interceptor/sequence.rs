//! Sequence-backed keys for a table shared with another writer.
//!
//! A second system inserts into the same table and picks its own keys, so
//! the native identity counter cannot be trusted. Before every insert into
//! the table the sequence is restarted at `max(key) + 1`, and the first value
//! of every inserted row is replaced with `NEXT VALUE FOR <sequence>`.

use super::CommandInterceptor;
use crate::command::render::quote_ident;
use crate::command::{Command, CommandKind, KeySource};
use tracing::debug;

/// Which table, key column and sequence the rewrite targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSettings {
    pub table: String,
    pub key_column: String,
    pub sequence: String,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self::new("Logging", "Id", "LoggingSeq")
    }
}

impl SequenceSettings {
    pub fn new(table: &str, key_column: &str, sequence: &str) -> Self {
        Self {
            table: table.to_string(),
            key_column: key_column.to_string(),
            sequence: sequence.to_string(),
        }
    }

    /// The text that identifies an insert into the target table.
    pub fn marker(&self) -> String {
        format!("INSERT INTO {}", quote_ident(&self.table))
    }

    pub fn next_value_expr(&self) -> String {
        format!("NEXT VALUE FOR {}", quote_ident(&self.sequence))
    }

    fn variable(&self) -> String {
        let sanitized: String = self
            .sequence
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("@{}ResetSql", sanitized)
    }

    fn reset_value_expr(&self) -> String {
        format!(
            "'ALTER SEQUENCE {} RESTART WITH ' + CAST((SELECT ISNULL(MAX({}), 0) + 1 FROM {}) AS nvarchar(20))",
            quote_ident(&self.sequence),
            quote_ident(&self.key_column),
            quote_ident(&self.table)
        )
    }

    fn reset_lines(&self, declared: bool) -> [String; 2] {
        let assign = if declared {
            format!("SET {} = {};", self.variable(), self.reset_value_expr())
        } else {
            format!(
                "DECLARE {} nvarchar(255) = {};",
                self.variable(),
                self.reset_value_expr()
            )
        };
        [assign, format!("EXEC sp_executesql {};", self.variable())]
    }
}

/// Rewrites `text` when it contains an insert into the target table.
///
/// Returns `None` when the text does not mention the table, so callers can
/// leave such commands untouched. Row order, row count and every value but
/// the first of each row are preserved byte for byte.
pub fn rewrite_sequence_insert(text: &str, settings: &SequenceSettings) -> Option<String> {
    let marker = settings.marker();
    if !text.contains(&marker) {
        return None;
    }

    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let next_value = settings.next_value_expr();
    let lines: Vec<&str> = text.split(newline).collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut declared = false;
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        idx += 1;

        if !line.contains(&marker) {
            out.push(line.to_string());
            continue;
        }

        out.extend(settings.reset_lines(declared));
        declared = true;
        out.push(line.to_string());

        let mut in_rows = false;
        while idx < lines.len() {
            let current = lines[idx];
            let trimmed = current.trim_start();

            if !is_row_line(trimmed) {
                if !in_rows && trimmed.to_ascii_uppercase().starts_with("OUTPUT") {
                    out.push(current.to_string());
                    idx += 1;
                    continue;
                }
                break;
            }

            in_rows = true;
            out.push(replace_first_value(current, &next_value));
            idx += 1;

            if !current.trim_end().ends_with("),") {
                break;
            }
        }
    }

    Some(out.join(newline))
}

fn is_row_line(trimmed: &str) -> bool {
    trimmed.starts_with('(') || trimmed.to_ascii_uppercase().starts_with("VALUES")
}

/// Replaces the first value expression inside the row's parentheses.
fn replace_first_value(line: &str, replacement: &str) -> String {
    let Some(open) = line.find('(') else {
        return line.to_string();
    };

    let start = open + 1;
    let mut depth = 0usize;
    let mut end = line.len();
    for (offset, ch) in line[start..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ',' | ')' if depth == 0 => {
                end = start + offset;
                break;
            }
            _ => {}
        }
    }

    let slot = &line[start..end];
    if slot.trim().is_empty() {
        return line.to_string();
    }
    let leading = slot.len() - slot.trim_start().len();
    let trailing = slot.len() - slot.trim_end().len();

    format!(
        "{}{}{}{}",
        &line[..start + leading],
        replacement,
        &slot[slot.len() - trailing..],
        &line[end..]
    )
}

/// Interceptor applying [`rewrite_sequence_insert`] and switching the
/// logical insert to sequence keys.
#[derive(Debug, Clone, Default)]
pub struct SequenceKeyInterceptor {
    settings: SequenceSettings,
}

impl SequenceKeyInterceptor {
    pub fn new(settings: SequenceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SequenceSettings {
        &self.settings
    }
}

impl CommandInterceptor for SequenceKeyInterceptor {
    fn reader_executing(&self, command: &mut Command) {
        let Some(rewritten) = rewrite_sequence_insert(&command.text, &self.settings) else {
            return;
        };

        debug!(
            table = %self.settings.table,
            sequence = %self.settings.sequence,
            "rewrote insert to use sequence keys"
        );
        command.text = rewritten;

        if let CommandKind::Insert {
            table, key_source, ..
        } = &mut command.kind
            && table.eq_ignore_ascii_case(&self.settings.table)
        {
            *key_source = KeySource::Sequence {
                name: self.settings.sequence.clone(),
                restart_from_max: true,
            };
        }
    }

    fn name(&self) -> &str {
        "sequence-key"
    }
}
