use super::grid::{Cell, RawGrid, parse_date};
use calamine::{Data, Reader, Xlsx};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.trim().to_lowercase();
        if lower.ends_with(".csv") {
            Some(FileFormat::Csv)
        } else if lower.ends_with(".xlsx") {
            Some(FileFormat::Xlsx)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("file is not valid utf-8")]
    Encoding,
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("xlsx error: {0}")]
    Xlsx(#[from] calamine::XlsxError),
    #[error("workbook has no worksheets")]
    NoWorksheet,
}

pub fn decode(bytes: &[u8], format: FileFormat) -> Result<RawGrid, DecodeError> {
    match format {
        FileFormat::Csv => decode_csv(bytes),
        FileFormat::Xlsx => decode_xlsx(bytes),
    }
}

fn decode_csv(bytes: &[u8]) -> Result<RawGrid, DecodeError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|_| DecodeError::Encoding)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records();
    let headers = match records.next() {
        Some(record) => record?.iter().map(str::to_string).collect(),
        None => return Ok(RawGrid::default()),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    if value.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::text(value)
                    }
                })
                .collect(),
        );
    }

    Ok(RawGrid { headers, rows })
}

fn decode_xlsx(bytes: &[u8]) -> Result<RawGrid, DecodeError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(DecodeError::NoWorksheet)??;

    let mut rows = range.rows();
    let headers = match rows.next() {
        Some(row) => row.iter().map(header_from_data).collect(),
        None => return Ok(RawGrid::default()),
    };
    let rows = rows
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    Ok(RawGrid { headers, rows })
}

fn header_from_data(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        other => cell_from_data(other).as_text().unwrap_or_default(),
    }
}

pub(crate) fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(value) => Cell::Text(value.clone()),
        Data::Float(value) => Cell::Number(*value),
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Bool(value) => Cell::Bool(*value),
        Data::DateTime(value) => value
            .as_datetime()
            .map(|dt| Cell::Date(dt.date()))
            .unwrap_or(Cell::Number(value.as_f64())),
        Data::DateTimeIso(value) => parse_date(value)
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Text(value.clone())),
        Data::DurationIso(value) => Cell::Text(value.clone()),
    }
}
