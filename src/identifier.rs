//! SQL identifier safety
//!
//! Every table or column name derived from a filename, a spreadsheet header or
//! naming-oracle output passes through `sanitize_identifier` before it reaches
//! any DDL/DML statement.

use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;

/// Fallback used when a filename or oracle table name sanitizes to nothing
pub const TABLE_FALLBACK: &str = "uploaded_table";

/// Prefix for table names that would otherwise start with a digit
pub const TABLE_PREFIX: &str = "uploaded";

/// Prefix for column names that would otherwise start with a digit
pub const COLUMN_PREFIX: &str = "col";

lazy_static! {
    static ref UNSAFE_RUN: Regex = Regex::new(r"[^a-zA-Z0-9_]+").unwrap();
    static ref SAFE_IDENTIFIER: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
}

/// Turn an arbitrary string into a lower-case SQL identifier.
///
/// Runs of characters outside `[A-Za-z0-9_]` collapse to one underscore,
/// leading/trailing underscores are trimmed, and the result is lower-cased.
/// An empty result becomes `fallback`; a leading digit gets `prefix_`.
pub fn sanitize_identifier(raw: &str, fallback: &str, prefix: &str) -> String {
    let replaced = UNSAFE_RUN.replace_all(raw, "_");
    let mut normalized = replaced.trim_matches('_').to_ascii_lowercase();

    if normalized.is_empty() {
        normalized = fallback.to_string();
    }
    if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        normalized = format!("{}_{}", prefix, normalized);
    }
    normalized
}

/// Sanitize a candidate table name with the table fallback/prefix pair
pub fn sanitize_table_name(raw: &str) -> String {
    sanitize_identifier(raw, TABLE_FALLBACK, TABLE_PREFIX)
}

/// Sanitize a column name; `position` is 1-based and only used for the fallback
pub fn sanitize_column_name(raw: &str, position: usize) -> String {
    sanitize_identifier(raw, &format!("col_{}", position), COLUMN_PREFIX)
}

/// True if `name` already has the shape `sanitize_identifier` produces
pub fn is_safe_identifier(name: &str) -> bool {
    SAFE_IDENTIFIER.is_match(name)
}

/// Quote an identifier for interpolation into a SQLite statement
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Find a table name that does not collide with an existing table.
///
/// The candidate is sanitized first; `exists` is asked about the bare name
/// and then `name_2`, `name_3`, ... until it answers `false`. Callers must
/// probe the physical store inside `exists`, not only the in-memory catalog.
pub fn unique_table_name<F>(base_candidate: &str, mut exists: F) -> Result<String>
where
    F: FnMut(&str) -> Result<bool>,
{
    let base = sanitize_table_name(base_candidate);
    let mut candidate = base.clone();
    let mut suffix = 1;
    while exists(&candidate)? {
        suffix += 1;
        candidate = format!("{}_{}", base, suffix);
    }
    Ok(candidate)
}

/// Name-level dedup within a single table: `name`, `name_2`, `name_3`, ...
pub fn dedupe_name<F>(base: &str, mut taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    let mut candidate = base.to_string();
    let mut suffix = 1;
    while taken(&candidate) {
        suffix += 1;
        candidate = format!("{}_{}", base, suffix);
    }
    candidate
}
