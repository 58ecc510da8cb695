//! JSON and CSV export of dashboard datasets.
//!
//! The public entry points never fail loudly: they log the problem and
//! return `false`, leaving the caller free to show a toast and move on.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use crate::models::Row;

pub const JSON_MIME: &str = "application/json";
pub const CSV_MIME: &str = "text/csv;charset=utf-8;";
/// Spreadsheet tools need the byte-order mark to read UTF-8 CSV correctly.
pub const CSV_BOM: &str = "\u{FEFF}";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("invalid data for JSON export: expected an object or array")]
    InvalidJson,

    #[error("invalid data for CSV export: no rows")]
    EmptyCsv,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to save {path}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A generated file ready to be handed to a download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFile {
    pub filename: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Where exported files end up.
pub trait DownloadTarget: Send + Sync {
    fn save(&self, file: &DownloadFile) -> Result<(), ExportError>;
}

/// Saves into a directory. Content is staged in a temporary file next to
/// the destination and only renamed into place once fully written; the
/// staging file is removed if anything fails.
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    dir: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DownloadTarget for DirectoryTarget {
    fn save(&self, file: &DownloadFile) -> Result<(), ExportError> {
        let path = self.dir.join(&file.filename);
        let save_err = |source: std::io::Error| ExportError::Save {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(save_err)?;
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(save_err)?;
        staged.write_all(&file.bytes).map_err(save_err)?;
        staged.flush().map_err(save_err)?;
        staged.persist(&path).map_err(|err| save_err(err.error))?;

        tracing::debug!(path = %path.display(), mime = file.mime, "saved export");
        Ok(())
    }
}

/// Keeps saved files in memory.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    files: Mutex<Vec<DownloadFile>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> Vec<DownloadFile> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DownloadTarget for MemoryTarget {
    fn save(&self, file: &DownloadFile) -> Result<(), ExportError> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file.clone());
        Ok(())
    }
}

pub fn render_json(data: &Value) -> Result<String, ExportError> {
    if !(data.is_object() || data.is_array()) {
        return Err(ExportError::InvalidJson);
    }
    Ok(serde_json::to_string_pretty(data)?)
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn needs_quotes(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}

/// One cell per line. The `csv` writer would quote a lone empty field as
/// `""`; here an empty cell is an empty line.
fn render_single_column(rows: &[Row], header: &str) -> String {
    let mut output = String::from(CSV_BOM);
    let cells = std::iter::once(header.to_string())
        .chain(rows.iter().map(|row| csv_cell(row.get(header))));
    for cell in cells {
        if needs_quotes(&cell) {
            output.push('"');
            output.push_str(&cell.replace('"', "\"\""));
            output.push('"');
        } else {
            output.push_str(&cell);
        }
        output.push('\n');
    }
    output
}

/// Renders rows as BOM-prefixed CSV. Columns are `headers` when given,
/// otherwise the keys of the first row in order.
pub fn render_csv(rows: &[Row], headers: Option<&[&str]>) -> Result<String, ExportError> {
    let first = rows.first().ok_or(ExportError::EmptyCsv)?;
    let headers: Vec<String> = match headers {
        Some(headers) => headers.iter().map(|header| header.to_string()).collect(),
        None => first.keys().cloned().collect(),
    };
    if let [header] = headers.as_slice() {
        return Ok(render_single_column(rows, header));
    }

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(CSV_BOM.as_bytes().to_vec());

    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(headers.iter().map(|header| csv_cell(row.get(header))))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Csv(err.into_error().into()))?;
    String::from_utf8(bytes).map_err(|err| {
        ExportError::Csv(std::io::Error::new(std::io::ErrorKind::InvalidData, err).into())
    })
}

fn try_export_json(
    target: &dyn DownloadTarget,
    data: &Value,
    filename: &str,
) -> Result<(), ExportError> {
    let content = render_json(data)?;
    target.save(&DownloadFile {
        filename: format!("{filename}.json"),
        mime: JSON_MIME,
        bytes: content.into_bytes(),
    })
}

fn try_export_csv(
    target: &dyn DownloadTarget,
    rows: &[Row],
    filename: &str,
    headers: Option<&[&str]>,
) -> Result<(), ExportError> {
    let content = render_csv(rows, headers)?;
    target.save(&DownloadFile {
        filename: format!("{filename}.csv"),
        mime: CSV_MIME,
        bytes: content.into_bytes(),
    })
}

pub fn export_to_json(target: &dyn DownloadTarget, data: &Value, filename: &str) -> bool {
    match try_export_json(target, data, filename) {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("JSON export error: {err}");
            false
        }
    }
}

pub fn export_to_csv(
    target: &dyn DownloadTarget,
    rows: &[Row],
    filename: &str,
    headers: Option<&[&str]>,
) -> bool {
    match try_export_csv(target, rows, filename, headers) {
        Ok(()) => true,
        Err(err) => {
            tracing::error!("CSV export error: {err}");
            false
        }
    }
}

/// `{ "exportDate": ..., "data": datasets }`
pub fn wrap_datasets(datasets: &Value, exported_at: DateTime<Utc>) -> Value {
    json!({
        "exportDate": exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "data": datasets,
    })
}

pub fn export_multiple_datasets_to_json(
    target: &dyn DownloadTarget,
    datasets: &Value,
    filename: &str,
) -> bool {
    if !(datasets.is_object() || datasets.is_array()) {
        tracing::error!("Multiple datasets export error: {}", ExportError::InvalidJson);
        return false;
    }
    export_to_json(target, &wrap_datasets(datasets, Utc::now()), filename)
}

/// Flattens nested objects and arrays to JSON text so every cell is a
/// scalar.
pub fn prepare_data_for_csv(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|(key, value)| {
                    let flat = match value {
                        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
                        scalar => scalar.clone(),
                    };
                    (key.clone(), flat)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn saved_text(target: &MemoryTarget) -> String {
        let files = target.files();
        assert_eq!(files.len(), 1);
        String::from_utf8(files[0].bytes.clone()).unwrap()
    }

    #[test]
    fn empty_csv_fails_without_saving() {
        let target = MemoryTarget::new();
        assert!(!export_to_csv(&target, &[], "f", None));
        assert!(target.files().is_empty());
    }

    #[test]
    fn single_row_csv_succeeds() {
        let target = MemoryTarget::new();
        assert!(export_to_csv(&target, &[row(json!({"a": 1}))], "f", None));

        let files = target.files();
        assert_eq!(files[0].filename, "f.csv");
        assert_eq!(files[0].mime, CSV_MIME);
        assert_eq!(saved_text(&target), "\u{FEFF}a\n1\n");
    }

    #[test]
    fn csv_quotes_commas_and_quotes() {
        let target = MemoryTarget::new();
        let rows = vec![row(json!({"note": "a,\"b", "plain": "x"}))];
        assert!(export_to_csv(&target, &rows, "notes", None));

        let text = saved_text(&target);
        assert_eq!(text, "\u{FEFF}note,plain\n\"a,\"\"b\",x\n");
    }

    #[test]
    fn csv_quotes_newlines_and_blanks_nulls() {
        let rows = vec![row(json!({"a": "line1\nline2", "b": null}))];
        let text = render_csv(&rows, None).unwrap();
        assert_eq!(text, "\u{FEFF}a,b\n\"line1\nline2\",\n");
    }

    #[test]
    fn explicit_headers_pick_columns() {
        let rows = vec![
            row(json!({"cuisine": "川菜", "count": 2, "extra": true})),
            row(json!({"cuisine": "粤菜"})),
        ];
        let text = render_csv(&rows, Some(&["count", "cuisine"])).unwrap();
        assert_eq!(text, "\u{FEFF}count,cuisine\n2,川菜\n,粤菜\n");
    }

    #[test]
    fn single_column_blanks_stay_empty_lines() {
        assert_eq!(render_csv(&[row(json!({"a": null}))], None).unwrap(), "\u{FEFF}a\n\n");
        assert_eq!(render_csv(&[row(json!({"a": ""}))], None).unwrap(), "\u{FEFF}a\n\n");

        let rows = vec![row(json!({"cuisine": "川菜"})), row(json!({"other": 1}))];
        assert_eq!(
            render_csv(&rows, None).unwrap(),
            "\u{FEFF}cuisine\n川菜\n\n"
        );

        let rows = vec![row(json!({"note": "a,\"b", "x": 1}))];
        assert_eq!(
            render_csv(&rows, Some(&["note"])).unwrap(),
            "\u{FEFF}note\n\"a,\"\"b\"\n"
        );
    }

    #[test]
    fn csv_reads_back_with_a_reader() {
        let original = "a,\"b";
        let text = render_csv(&[row(json!({"v": original}))], None).unwrap();
        let body = text.trim_start_matches(CSV_BOM);

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], original);
    }

    #[test]
    fn memory_target_keeps_saving_after_a_panic() {
        let target = std::sync::Arc::new(MemoryTarget::new());
        let holder = std::sync::Arc::clone(&target);
        let _ = std::thread::spawn(move || {
            let _guard = holder.files.lock().unwrap();
            panic!("writer crashed");
        })
        .join();

        assert!(export_to_csv(target.as_ref(), &[row(json!({"a": 1}))], "f", None));
        assert_eq!(target.files().len(), 1);
    }

    #[test]
    fn json_export_pretty_prints() {
        let target = MemoryTarget::new();
        assert!(export_to_json(&target, &json!({"a": [1]}), "dump"));

        let files = target.files();
        assert_eq!(files[0].filename, "dump.json");
        assert_eq!(files[0].mime, JSON_MIME);
        assert_eq!(saved_text(&target), "{\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn json_export_rejects_scalars() {
        let target = MemoryTarget::new();
        assert!(!export_to_json(&target, &Value::Null, "f"));
        assert!(!export_to_json(&target, &json!("text"), "f"));
        assert!(!export_multiple_datasets_to_json(&target, &json!(3), "f"));
        assert!(target.files().is_empty());
    }

    #[test]
    fn datasets_are_wrapped_with_export_date() {
        let at = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let wrapped = wrap_datasets(&json!({"cuisines": []}), at);
        assert_eq!(
            wrapped,
            json!({"exportDate": "2024-06-15T12:00:00.000Z", "data": {"cuisines": []}})
        );

        let target = MemoryTarget::new();
        assert!(export_multiple_datasets_to_json(&target, &json!({"a": 1}), "all"));
        let saved: Value = serde_json::from_str(&saved_text(&target)).unwrap();
        assert!(saved["exportDate"].is_string());
        assert_eq!(saved["data"], json!({"a": 1}));
    }

    #[test]
    fn nested_values_flatten_to_json_text() {
        let flat = prepare_data_for_csv(&[row(json!({"tags": ["辣", "鲜"], "n": 1}))]);
        assert_eq!(flat[0]["tags"], json!("[\"辣\",\"鲜\"]"));
        assert_eq!(flat[0]["n"], json!(1));
    }

    #[test]
    fn directory_target_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path().join("exports"));
        assert!(export_to_csv(&target, &[row(json!({"a": "x"}))], "out", None));

        let written = std::fs::read_to_string(dir.path().join("exports/out.csv")).unwrap();
        assert_eq!(written, "\u{FEFF}a\nx\n");
        let leftovers = std::fs::read_dir(dir.path().join("exports")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
