//! Parsing of uploaded payloads into frames

use crate::error::{IntakeError, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use polars::prelude::*;
use std::collections::HashMap;
use std::io::Cursor;
use std::str::FromStr;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Whole floats outside this range would saturate as i64
const I64_FLOAT_RANGE: std::ops::Range<f64> = (i64::MIN as f64)..(i64::MAX as f64);

/// Declared kind of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

impl FromStr for FileKind {
    type Err = IntakeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileKind::Csv),
            "excel" | "xlsx" | "xls" | "spreadsheet" => Ok(FileKind::Spreadsheet),
            other => Err(IntakeError::UnsupportedFileKind(other.to_string())),
        }
    }
}

impl FileKind {
    /// Guess from a file extension, used by the CLI when `--kind` is omitted
    pub fn from_extension(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

/// Parse `bytes` as `kind`. The result may have zero rows; callers decide
/// whether that is an error.
pub fn parse_upload(bytes: &[u8], kind: FileKind) -> Result<DataFrame> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(IntakeError::EmptyUpload);
    }
    match kind {
        FileKind::Csv => parse_csv(bytes),
        FileKind::Spreadsheet => parse_spreadsheet(bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> Result<DataFrame> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| IntakeError::Parse(format!("Failed to read CSV: {}", e)))?;
    Ok(df)
}

fn parse_spreadsheet(bytes: &[u8]) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| IntakeError::Parse("Workbook has no worksheets".to_string()))??;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Err(IntakeError::EmptyUpload);
    };
    let headers = mangle_headers(header_row);

    let mut cells: Vec<Vec<Data>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (idx, column) in cells.iter_mut().enumerate() {
            column.push(row.get(idx).cloned().unwrap_or(Data::Empty));
        }
    }

    let columns = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| cells_to_series(name, &values))
        .collect::<Vec<_>>();
    Ok(DataFrame::new(columns)?)
}

/// Stringify header cells; blank headers become `Unnamed: <i>` and repeats
/// get `.1`, `.2`, ... suffixes.
fn mangle_headers(row: &[Data]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut headers = Vec::with_capacity(row.len());
    for (idx, cell) in row.iter().enumerate() {
        let text = cell_text(cell).unwrap_or_default();
        let base = if text.trim().is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            text
        };

        let mut name = base.clone();
        while let Some(count) = seen.get_mut(&name) {
            *count += 1;
            name = format!("{}.{}", base, count);
        }
        seen.insert(name.clone(), 0);
        seen.entry(base).or_insert(0);
        headers.push(name);
    }
    headers
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && I64_FLOAT_RANGE.contains(f) => Some(format!("{}", *f as i64)),
        Data::DateTime(dt) => dt.as_datetime().map(|dt| {
            if dt.time() == chrono::NaiveTime::MIN {
                dt.date().format("%Y-%m-%d").to_string()
            } else {
                dt.format("%Y-%m-%d %H:%M:%S").to_string()
            }
        }),
        Data::Error(_) => None,
        other => Some(other.to_string()),
    }
}

/// One column of cells as a uniformly typed series
fn cells_to_series(name: &str, values: &[Data]) -> Series {
    let present = values.iter().filter(|v| !matches!(v, Data::Empty | Data::Error(_)));
    let (mut ints, mut numbers, mut bools) = (true, true, true);
    for value in present {
        match value {
            Data::Int(_) => bools = false,
            Data::Float(f) => {
                bools = false;
                if f.fract() != 0.0 || !I64_FLOAT_RANGE.contains(f) {
                    ints = false;
                }
            }
            Data::Bool(_) => {
                ints = false;
                numbers = false;
            }
            _ => {
                ints = false;
                numbers = false;
                bools = false;
            }
        }
    }

    if ints {
        let data: Vec<Option<i64>> = values
            .iter()
            .map(|v| match v {
                Data::Int(i) => Some(*i),
                Data::Float(f) => Some(*f as i64),
                _ => None,
            })
            .collect();
        Series::new(name, data)
    } else if numbers {
        let data: Vec<Option<f64>> = values
            .iter()
            .map(|v| match v {
                Data::Int(i) => Some(*i as f64),
                Data::Float(f) => Some(*f),
                _ => None,
            })
            .collect();
        Series::new(name, data)
    } else if bools {
        let data: Vec<Option<bool>> = values
            .iter()
            .map(|v| match v {
                Data::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        Series::new(name, data)
    } else {
        let data: Vec<Option<String>> = values.iter().map(cell_text).collect();
        Series::new(name, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_parsing() {
        assert_eq!("csv".parse::<FileKind>().unwrap(), FileKind::Csv);
        assert_eq!("XLSX".parse::<FileKind>().unwrap(), FileKind::Spreadsheet);
        assert_eq!("excel".parse::<FileKind>().unwrap(), FileKind::Spreadsheet);
        assert!(matches!(
            "pdf".parse::<FileKind>(),
            Err(IntakeError::UnsupportedFileKind(kind)) if kind == "pdf"
        ));
        assert_eq!(
            FileKind::from_extension(std::path::Path::new("data/sales.xls")),
            Some(FileKind::Spreadsheet)
        );
        assert_eq!(FileKind::from_extension(std::path::Path::new("notes.txt")), None);
    }

    #[test]
    fn test_parse_csv_strips_bom() {
        let payload = "\u{feff}订单号,金额\nA001,12.5\nA002,30\n";
        let df = parse_upload(payload.as_bytes(), FileKind::Csv).unwrap();
        assert_eq!(df.get_column_names(), vec!["订单号", "金额"]);
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("金额").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_parse_csv_infers_types_from_all_rows() {
        let mut payload = String::from("code,price\n");
        for i in 0..150 {
            payload.push_str(&format!("{},{}\n", i, i));
        }
        payload.push_str("N/A,9.99\n");

        let df = parse_upload(payload.as_bytes(), FileKind::Csv).unwrap();
        assert_eq!(df.height(), 151);
        assert_eq!(df.column("code").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("price").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("price").unwrap().get(150).unwrap(), AnyValue::Float64(9.99));
    }

    #[test]
    fn test_parse_empty_payload() {
        assert!(matches!(parse_upload(b"", FileKind::Csv), Err(IntakeError::EmptyUpload)));
        assert!(matches!(parse_upload(b" \n", FileKind::Csv), Err(IntakeError::EmptyUpload)));
    }

    #[test]
    fn test_header_only_csv_has_no_rows() {
        let df = parse_upload(b"a,b\n", FileKind::Csv).unwrap();
        assert_eq!(df.height(), 0);
    }

    #[test]
    fn test_garbage_spreadsheet_is_parse_error() {
        let err = parse_upload(b"not a workbook", FileKind::Spreadsheet).unwrap_err();
        assert!(matches!(err, IntakeError::Parse(_)));
    }

    #[test]
    fn test_mangle_headers() {
        let row = vec![
            Data::String("name".to_string()),
            Data::Empty,
            Data::String("name".to_string()),
            Data::String("name".to_string()),
            Data::Float(2024.0),
        ];
        assert_eq!(
            mangle_headers(&row),
            vec!["name", "Unnamed: 1", "name.1", "name.2", "2024"]
        );
    }

    #[test]
    fn test_cells_to_series_typing() {
        let ints = cells_to_series("a", &[Data::Int(1), Data::Float(2.0), Data::Empty]);
        assert_eq!(ints.dtype(), &DataType::Int64);
        assert_eq!(ints.null_count(), 1);

        let floats = cells_to_series("b", &[Data::Int(1), Data::Float(2.5)]);
        assert_eq!(floats.dtype(), &DataType::Float64);

        // whole but beyond i64: must stay float instead of saturating
        let big = cells_to_series("big", &[Data::Float(1e20), Data::Float(2.0)]);
        assert_eq!(big.dtype(), &DataType::Float64);
        assert_eq!(big.get(0).unwrap(), AnyValue::Float64(1e20));

        let bools = cells_to_series("c", &[Data::Bool(true), Data::Empty]);
        assert_eq!(bools.dtype(), &DataType::Boolean);

        let mixed = cells_to_series("d", &[Data::Int(1), Data::String("x".to_string())]);
        assert_eq!(mixed.dtype(), &DataType::String);
    }
}
