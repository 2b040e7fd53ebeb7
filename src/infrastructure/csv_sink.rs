//! CSV file sink for harvested notices
//!
//! One `<prefix>_<YYYYmmdd_HHMMSS_mmm>.csv` file per batch, UTF-8 with a BOM so
//! spreadsheet tools pick the encoding. Identity and date columns come first, the
//! rest follow in name order. Nested values are flattened into a single cell.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{Span, info};

use crate::domain::collaborators::{RecordSink, SinkError};
use crate::domain::record::NoticeRecord;
use crate::infrastructure::atomic_file;
use crate::infrastructure::config::StorageConfig;

const BOM: &str = "\u{feff}";

/// Leading columns, in this order, when present
const PRIORITY_COLUMNS: &[&str] = &[
    "bid_notice_number",
    "bid_notice_name",
    "announcement_agency",
    "bid_method",
    "announcement_date",
    "deadline_date",
    "budget_amount",
    "status",
];

pub struct CsvRecordSink {
    config: StorageConfig,
    span: Span,
}

impl CsvRecordSink {
    pub fn new(config: StorageConfig, span: Span) -> Self {
        Self { config, span }
    }
}

#[async_trait]
impl RecordSink for CsvRecordSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn save(&self, records: &[NoticeRecord]) -> Result<PathBuf, SinkError> {
        let rows = records
            .iter()
            .map(|record| match serde_json::to_value(record)? {
                Value::Object(map) => Ok(map),
                other => Err(SinkError::Rejected(format!("record is not an object: {other}"))),
            })
            .collect::<Result<Vec<_>, SinkError>>()?;
        let bytes = render(&rows, self.config.csv_delimiter)?;

        let path = self.config.output_file("csv");
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_file::write_bytes_atomic(&target, &bytes))
            .await
            .map_err(|e| SinkError::Rejected(format!("writer task failed: {e}")))??;

        let _enter = self.span.enter();
        info!("💾 Saved {} notices to {:?}", records.len(), path);
        Ok(path)
    }
}

fn columns(rows: &[Map<String, Value>]) -> Vec<String> {
    let mut rest: BTreeSet<&str> = rows.iter().flat_map(|row| row.keys().map(String::as_str)).collect();
    let mut ordered: Vec<String> = PRIORITY_COLUMNS
        .iter()
        .filter(|column| rest.remove(**column))
        .map(|column| (*column).to_string())
        .collect();
    ordered.extend(rest.into_iter().map(str::to_string));
    ordered
}

fn render(rows: &[Map<String, Value>], sep: char) -> io::Result<Vec<u8>> {
    let header = columns(rows);
    let mut buf: Vec<u8> = BOM.as_bytes().to_vec();
    write_row(&mut buf, &header, sep)?;
    for row in rows {
        let cells: Vec<String> = header
            .iter()
            .map(|column| row.get(column).map(cell_text).unwrap_or_default())
            .collect();
        write_row(&mut buf, &cells, sep)?;
    }
    Ok(buf)
}

/// Lists join with `"; "`, objects render as `key: value` pairs joined with `", "`.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join("; "),
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{k}: {}", cell_text(v)))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(mut w: W, row: &[String], sep: char) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if first {
            first = false;
        } else {
            write!(w, "{sep}")?;
        }
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::RawItem;
    use crate::test_utils::{complete_detail, listing_row};
    use serde_json::json;
    use tempfile::TempDir;

    fn sink_in(dir: &TempDir) -> CsvRecordSink {
        CsvRecordSink::new(
            StorageConfig {
                output_dir: dir.path().join("data"),
                csv_output: true,
                ..StorageConfig::default()
            },
            Span::none(),
        )
    }

    fn record(id: &str, name: &str) -> NoticeRecord {
        let mut raw: RawItem = listing_row(id, name, "City").with(
            "attached_files",
            json!([{"filename": "spec.pdf", "url": "https://example.org/spec.pdf"}, {"filename": "plan.hwp"}]),
        );
        raw.merge(&complete_detail());
        NoticeRecord::try_from_raw(&raw).unwrap()
    }

    fn read_lines(path: &std::path::Path) -> Vec<String> {
        let text = std::fs::read_to_string(path).unwrap();
        let text = text.strip_prefix(BOM).expect("file starts with a BOM");
        text.lines().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn header_starts_with_identity_columns() {
        let dir = TempDir::new().unwrap();
        let path = sink_in(&dir).save(&[record("A1", "Road works")]).await.unwrap();

        assert_eq!(path.extension().unwrap(), "csv");
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        let header: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(&header[..3], &["bid_notice_number", "bid_notice_name", "announcement_agency"]);
        let rest = &header[PRIORITY_COLUMNS.len()..];
        let mut sorted = rest.to_vec();
        sorted.sort_unstable();
        assert_eq!(rest, &sorted[..]);
        assert!(lines[1].starts_with("A1,Road works,City,"));
    }

    #[tokio::test]
    async fn separators_and_quotes_are_escaped() {
        let dir = TempDir::new().unwrap();
        let path = sink_in(&dir)
            .save(&[record("A2", "Paving, \"phase 2\"")])
            .await
            .unwrap();

        let lines = read_lines(&path);
        assert!(lines[1].starts_with("A2,\"Paving, \"\"phase 2\"\"\",City,"));
    }

    #[test]
    fn nested_values_flatten_into_one_cell() {
        let files = json!([{"filename": "spec.pdf", "url": null}, {"filename": "plan.hwp", "size": "2MB"}]);
        assert_eq!(cell_text(&files), "filename: spec.pdf; filename: plan.hwp, size: 2MB");
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(42)), "42");
    }

    #[test]
    fn empty_batch_writes_header_only() {
        let bytes = render(&[], ',').unwrap();
        assert_eq!(bytes, format!("{BOM}\n").into_bytes());
    }
}
