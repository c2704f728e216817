//! Downstream writer seam and output helpers
//!
//! The spreadsheet engine is an external collaborator: the pipeline hands a
//! [`RecordWriter`] a normalized, sanitized record set and a target path and
//! expects the resolved path back, or an error on I/O failure (which is
//! fatal to a run). [`CsvWriter`] is the bundled fallback so exports work
//! with no spreadsheet engine installed.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::PreparedRecords;

/// Downstream export writer.
pub trait RecordWriter {
    /// Write the record set to `path` under the given sheet name, returning
    /// the resolved path on success.
    fn write(&self, records: &PreparedRecords, sheet: &str, path: &Path) -> Result<PathBuf>;
}

/// Plain CSV writer, the fallback export format.
#[derive(Debug, Default)]
pub struct CsvWriter;

impl RecordWriter for CsvWriter {
    fn write(&self, records: &PreparedRecords, sheet: &str, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut out = String::new();
        let header: Vec<String> = records
            .columns
            .iter()
            .map(|c| csv_escape(&c.name))
            .collect();
        out.push_str(&header.join(","));
        out.push('\n');

        for row in &records.rows {
            let cells: Vec<String> = records
                .columns
                .iter()
                .map(|c| csv_escape(&render_cell(row.get(&c.name))))
                .collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }

        std::fs::write(path, out)
            .with_context(|| format!("Failed to write export to {}", path.display()))?;

        tracing::info!(
            sheet,
            rows = records.rows.len(),
            "Exported records to {}",
            path.display()
        );
        Ok(path.to_path_buf())
    }
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Standardized export filename:
/// `ACCOUNT-resource[-suffix]-export-MM.DD.YYYY.ext`.
pub fn export_filename(
    account_name: &str,
    resource_type: &str,
    suffix: Option<&str>,
    ext: &str,
    date: Option<NaiveDate>,
) -> String {
    let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
    let stamp = date.format("%m.%d.%Y");
    match suffix {
        Some(suffix) => format!(
            "{}-{}-{}-export-{}.{}",
            account_name, resource_type, suffix, stamp, ext
        ),
        None => format!("{}-{}-export-{}.{}", account_name, resource_type, stamp, ext),
    }
}

/// The output directory under a root, created on first use.
pub fn output_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join("output");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{prepare, PrepareOptions, Record};
    use serde_json::json;

    fn sample() -> PreparedRecords {
        let rows: Vec<Record> = vec![
            [
                ("Name".to_string(), json!("web, primary")),
                ("Count".to_string(), json!(3)),
            ]
            .into_iter()
            .collect(),
            [
                ("Name".to_string(), json!("he said \"hi\"")),
                ("Count".to_string(), json!(1)),
            ]
            .into_iter()
            .collect(),
        ];
        prepare(&rows, &PrepareOptions::default())
    }

    #[test]
    fn filename_shapes() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 27).unwrap();
        assert_eq!(
            export_filename("PROD-ACCOUNT", "ec2", None, "csv", Some(date)),
            "PROD-ACCOUNT-ec2-export-02.27.2025.csv"
        );
        assert_eq!(
            export_filename("PROD-ACCOUNT", "ec2", Some("running"), "csv", Some(date)),
            "PROD-ACCOUNT-ec2-running-export-02.27.2025.csv"
        );
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn writes_and_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("export.csv");
        let written = CsvWriter.write(&sample(), "EC2 Instances", &path).unwrap();
        assert_eq!(written, path);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("Name,Count"));
        assert_eq!(lines.next(), Some("\"web, primary\",3"));
        assert_eq!(lines.next(), Some("\"he said \"\"hi\"\"\",1"));
    }

    #[test]
    fn output_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let out = output_dir(dir.path()).unwrap();
        assert!(out.is_dir());
        assert!(out.ends_with("output"));
    }
}
