//! Structured CREATE TABLE handling for bootstrap.
//!
//! ClickHouse Cloud reports cloud-only storage engines (`SharedMergeTree`
//! and friends) in `SHOW CREATE TABLE` output. Before a table definition
//! can be replayed on an on-premise server, the engine clause has to be
//! rewritten to its standard counterpart, and any engine arguments dropped
//! (they encode cluster-specific paths and replica names).
//!
//! Instead of regex surgery over the whole statement, the engine clause is
//! parsed once into a small model ([`EngineClause`]) and the normalization
//! is a pure mapping over [`EngineKind`]. All DDL text outside the engine
//! clause is preserved byte-for-byte.

use crate::error::{RelayError, Result};

/// The storage engine family of a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineKind {
    MergeTree,
    ReplacingMergeTree,
    AggregatingMergeTree,
    SummingMergeTree,
    /// Any engine outside the merge-tree family (Log, Memory, ...).
    /// Left untouched by normalization.
    Other(String),
}

impl EngineKind {
    /// Parse an engine name, recognizing the cloud `Shared` prefix.
    ///
    /// Returns the kind and whether the name carried the `Shared` prefix.
    fn parse(name: &str) -> (Self, bool) {
        let (base, shared) = match name.strip_prefix("Shared") {
            Some(rest) if Self::is_family_name(rest) => (rest, true),
            _ => (name, false),
        };
        let kind = match base {
            "MergeTree" => Self::MergeTree,
            "ReplacingMergeTree" => Self::ReplacingMergeTree,
            "AggregatingMergeTree" => Self::AggregatingMergeTree,
            "SummingMergeTree" => Self::SummingMergeTree,
            other => Self::Other(other.to_string()),
        };
        (kind, shared)
    }

    fn is_family_name(name: &str) -> bool {
        matches!(
            name,
            "MergeTree" | "ReplacingMergeTree" | "AggregatingMergeTree" | "SummingMergeTree"
        )
    }

    /// True for engines whose arguments are dropped during normalization.
    pub fn is_merge_family(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// The on-premise engine name.
    pub fn name(&self) -> &str {
        match self {
            Self::MergeTree => "MergeTree",
            Self::ReplacingMergeTree => "ReplacingMergeTree",
            Self::AggregatingMergeTree => "AggregatingMergeTree",
            Self::SummingMergeTree => "SummingMergeTree",
            Self::Other(name) => name,
        }
    }
}

/// The parsed `ENGINE = ...` clause of a CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineClause {
    pub kind: EngineKind,
    /// Whether the source declared the cloud `Shared` variant.
    pub shared: bool,
    /// Raw argument text inside the parentheses, if any.
    pub args: Option<String>,
    /// Byte range of the full clause within the statement.
    span: (usize, usize),
}

/// Locate and parse the engine clause of a CREATE TABLE statement.
pub fn parse_engine_clause(statement: &str) -> Result<EngineClause> {
    let start = find_engine_keyword(statement)
        .ok_or_else(|| RelayError::Ddl("no ENGINE clause found".to_string()))?;

    let mut pos = start + "ENGINE".len();
    let bytes = statement.as_bytes();

    pos = skip_whitespace(statement, pos);
    if bytes.get(pos) != Some(&b'=') {
        return Err(RelayError::Ddl("expected '=' after ENGINE".to_string()));
    }
    pos = skip_whitespace(statement, pos + 1);

    let name_start = pos;
    while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
        pos += 1;
    }
    if pos == name_start {
        return Err(RelayError::Ddl("missing engine name".to_string()));
    }
    let name = &statement[name_start..pos];

    // Optional parenthesized arguments, nesting- and quote-aware
    let mut args = None;
    let after_name = skip_whitespace(statement, pos);
    if bytes.get(after_name) == Some(&b'(') {
        let close = matching_paren(statement, after_name)?;
        args = Some(statement[after_name + 1..close].to_string());
        pos = close + 1;
    }

    let (kind, shared) = EngineKind::parse(name);
    Ok(EngineClause {
        kind,
        shared,
        args,
        span: (start, pos),
    })
}

/// Rewrite a cloud CREATE TABLE statement for an on-premise server.
///
/// `Shared{,Replacing,Aggregating}MergeTree` maps to its standard
/// counterpart, and merge-family engine arguments are dropped. Engines
/// outside the family pass through unchanged. Idempotent: normalizing an
/// already-normalized statement returns it as-is.
pub fn normalize_create_statement(statement: &str) -> Result<String> {
    let clause = parse_engine_clause(statement)?;

    let rendered = if clause.kind.is_merge_family() {
        if clause.args.is_some() {
            format!("ENGINE = {}()", clause.kind.name())
        } else {
            format!("ENGINE = {}", clause.kind.name())
        }
    } else {
        // Not ours to rewrite; reproduce the original clause text
        return Ok(statement.to_string());
    };

    let (start, end) = clause.span;
    Ok(format!(
        "{}{}{}",
        &statement[..start],
        rendered,
        &statement[end..]
    ))
}

/// Find the byte offset of the `ENGINE` keyword (whole word, any case).
fn find_engine_keyword(statement: &str) -> Option<usize> {
    let upper = statement.to_ascii_uppercase();
    let bytes = statement.as_bytes();
    let mut from = 0;
    while let Some(rel) = upper[from..].find("ENGINE") {
        let idx = from + rel;
        let before_ok = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric() && bytes[idx - 1] != b'_';
        let after = idx + "ENGINE".len();
        let after_ok = after >= bytes.len()
            || (!bytes[after].is_ascii_alphanumeric() && bytes[after] != b'_');
        if before_ok && after_ok {
            return Some(idx);
        }
        from = idx + 1;
    }
    None
}

fn skip_whitespace(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Byte offset of the `)` matching the `(` at `open`, skipping nested
/// parentheses and single-quoted strings.
fn matching_paren(s: &str, open: usize) -> Result<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut pos = open;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\'' if !in_string => in_string = true,
            b'\'' if in_string => {
                // Doubled quote is an escaped quote inside the string
                if bytes.get(pos + 1) == Some(&b'\'') {
                    pos += 1;
                } else {
                    in_string = false;
                }
            }
            b'(' if !in_string => depth += 1,
            b')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Ok(pos);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    Err(RelayError::Ddl("unbalanced parentheses in engine arguments".to_string()))
}
