//! Export preparation pipeline
//!
//! Collected records pass through `prepare` (normalize scalars, fill gaps,
//! bound cell and column sizes), then `sanitize` (mask sensitive columns),
//! then `validate` before anything reaches the writer. Sanitize relies on
//! prepare having already reduced every cell to a scalar, which is why the
//! ordering is part of the contract. Nothing in the pipeline mutates its
//! input; each stage returns a new collection.
//!
//! # Module Structure
//!
//! - [`writer`] - The downstream writer seam and the CSV fallback writer

pub mod writer;

use chrono::DateTime;
use regex::RegexSet;
use serde_json::Value;

/// A row: column name to scalar value.
pub type Record = serde_json::Map<String, Value>;

/// Replacement for values in sensitive columns.
pub const DEFAULT_MASK: &str = "***MASKED***";

/// Column-name patterns masked by default: password / secret / token /
/// credential / auth / key-like names.
const DEFAULT_PATTERNS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "credential",
    r"\bauth",
    "(api|access|private|session|encryption)[_-]?key",
    "key[_-]?material",
];

/// Normalization options for [`prepare`].
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Render timezone-bearing timestamps as naive wall-clock times.
    pub strip_timezone: bool,
    /// Stand-in for null or missing values.
    pub null_sentinel: String,
    /// Hard cap on cell length (the spreadsheet cell limit).
    pub max_cell_len: usize,
    pub min_width: u16,
    pub max_width: u16,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            strip_timezone: true,
            null_sentinel: "N/A".to_string(),
            max_cell_len: 32_767,
            min_width: 8,
            max_width: 80,
        }
    }
}

/// A named column with its bounded display width.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub width: u16,
}

/// Output of [`prepare`]: ordered columns plus scalar-typed rows.
#[derive(Debug, Clone, Default)]
pub struct PreparedRecords {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Record>,
}

impl PreparedRecords {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Normalize raw records into scalar-typed rows with a stable column order.
///
/// Columns appear in first-seen order across the input. Missing and null
/// values become the sentinel, timestamps lose their timezone when
/// requested, over-long strings are truncated, and nested structures are
/// flattened to compact JSON strings so every cell is a scalar.
pub fn prepare(records: &[Record], options: &PrepareOptions) -> PreparedRecords {
    let mut column_order: Vec<String> = Vec::new();
    for record in records {
        for name in record.keys() {
            if !column_order.iter().any(|c| c == name) {
                column_order.push(name.clone());
            }
        }
    }

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let mut row = Record::new();
        for name in &column_order {
            let value = match record.get(name) {
                Some(value) => normalize_value(value, options),
                None => Value::String(options.null_sentinel.clone()),
            };
            row.insert(name.clone(), value);
        }
        rows.push(row);
    }

    let columns = column_order
        .into_iter()
        .map(|name| {
            let widest = rows
                .iter()
                .map(|row| row.get(&name).map_or(0, display_len))
                .max()
                .unwrap_or(0);
            let width = widest
                .max(name.chars().count())
                .clamp(options.min_width as usize, options.max_width as usize);
            ColumnSpec {
                name,
                width: width as u16,
            }
        })
        .collect();

    PreparedRecords { columns, rows }
}

fn normalize_value(value: &Value, options: &PrepareOptions) -> Value {
    match value {
        Value::Null => Value::String(options.null_sentinel.clone()),
        Value::String(s) => {
            let rendered = if options.strip_timezone {
                match DateTime::parse_from_rfc3339(s) {
                    // Keep the wall-clock time as written, drop the offset.
                    Ok(dt) => dt.naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
                    Err(_) => s.clone(),
                }
            } else {
                s.clone()
            };
            Value::String(truncate(&rendered, options.max_cell_len))
        }
        Value::Bool(_) | Value::Number(_) => value.clone(),
        // Nested structures become compact JSON so rows stay scalar-typed.
        other => {
            let rendered = other.to_string();
            Value::String(truncate(&rendered, options.max_cell_len))
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        s.chars().take(max_len).collect()
    }
}

fn display_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Null => 0,
        other => other.to_string().chars().count(),
    }
}

/// Case-insensitive column-name patterns for [`sanitize`].
pub struct SanitizePatterns {
    set: RegexSet,
}

impl SanitizePatterns {
    pub fn new(patterns: &[&str]) -> Result<Self, regex::Error> {
        let set = regex::RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(Self { set })
    }

    pub fn matches(&self, column: &str) -> bool {
        self.set.is_match(column)
    }
}

impl Default for SanitizePatterns {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS).expect("default sanitize patterns are valid")
    }
}

/// Replace every value in columns whose names match the pattern set.
///
/// Runs after [`prepare`]; non-matching columns pass through untouched.
pub fn sanitize(
    prepared: &PreparedRecords,
    patterns: &SanitizePatterns,
    mask: &str,
) -> PreparedRecords {
    let masked: Vec<bool> = prepared
        .columns
        .iter()
        .map(|c| patterns.matches(&c.name))
        .collect();

    if masked.iter().any(|&m| m) {
        let names: Vec<&str> = prepared
            .columns
            .iter()
            .zip(&masked)
            .filter(|(_, &m)| m)
            .map(|(c, _)| c.name.as_str())
            .collect();
        tracing::info!("Masking sensitive columns: {}", names.join(", "));
    }

    let rows = prepared
        .rows
        .iter()
        .map(|row| {
            let mut out = row.clone();
            for (column, &is_masked) in prepared.columns.iter().zip(&masked) {
                if is_masked && out.contains_key(&column.name) {
                    out.insert(column.name.clone(), Value::String(mask.to_string()));
                }
            }
            out
        })
        .collect();

    PreparedRecords {
        columns: prepared.columns.clone(),
        rows,
    }
}

/// Pre-export check result. Non-fatal by contract.
#[derive(Debug, Clone)]
pub struct Validation {
    pub ok: bool,
    pub message: String,
}

/// Check required columns and estimate output size before writing.
///
/// In dry-run mode this is as far as an export goes; the message describes
/// what would have been written.
pub fn validate(
    prepared: &PreparedRecords,
    resource_type: &str,
    required_columns: &[&str],
    dry_run: bool,
) -> Validation {
    let names = prepared.column_names();
    let missing: Vec<&str> = required_columns
        .iter()
        .filter(|required| !names.contains(*required))
        .copied()
        .collect();

    if !missing.is_empty() {
        return Validation {
            ok: false,
            message: format!(
                "{}: missing required columns: {}",
                resource_type,
                missing.join(", ")
            ),
        };
    }

    let est_bytes: usize = prepared
        .rows
        .iter()
        .flat_map(|row| row.values())
        .map(display_len)
        .sum();

    Validation {
        ok: true,
        message: format!(
            "{}: {} records, {} columns, ~{} KiB{}",
            resource_type,
            prepared.rows.len(),
            prepared.columns.len(),
            est_bytes.div_ceil(1024),
            if dry_run { " (dry run, not written)" } else { "" }
        ),
    }
}
