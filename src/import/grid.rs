use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M"];

/// One decoded spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

#[derive(Debug, Error, PartialEq)]
pub enum CoerceError {
    #[error("`{0}` is not a number")]
    NotANumber(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed textual form, `None` when blank.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(value) => Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            Cell::Number(value) => Some(format_number(*value)),
            Cell::Bool(value) => Some(value.to_string()),
            Cell::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
        }
    }

    /// `Ok(None)` for blank cells, an error when the content is not numeric.
    pub fn as_number(&self) -> Result<Option<f64>, CoerceError> {
        match self {
            cell if cell.is_blank() => Ok(None),
            Cell::Number(value) if value.is_finite() => Ok(Some(*value)),
            Cell::Text(value) => parse_number(value)
                .map(Some)
                .ok_or_else(|| CoerceError::NotANumber(value.trim().to_string())),
            other => Err(CoerceError::NotANumber(
                other.as_text().unwrap_or_default(),
            )),
        }
    }

    /// Sale dates pass through: recognised dates are rewritten as ISO
    /// `YYYY-MM-DD`, anything else is kept as its trimmed text.
    pub fn as_sale_date(&self) -> Option<String> {
        match self {
            Cell::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
            Cell::Text(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(
                    parse_date(trimmed)
                        .map(|date| date.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| trimmed.to_string()),
                )
            }
            other => other.as_text(),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Accepts `25.5`, `25,5`, `1,234.50` and `1.234,50`. A comma is a decimal
/// separator only when one or two digits follow it, so `1,234` is rejected
/// rather than guessed. `NaN`/`inf` are rejected too.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.rfind(','), trimmed.rfind('.')) {
        (None, _) => trimmed.to_string(),
        (Some(comma), Some(dot)) if dot > comma => {
            let (whole, fraction) = trimmed.split_at(dot);
            if !is_grouped(whole, ',') {
                return None;
            }
            format!("{}{fraction}", whole.replace(',', ""))
        }
        (Some(comma), dot) => {
            let (whole, fraction) = (&trimmed[..comma], &trimmed[comma + 1..]);
            if !(1..=2).contains(&fraction.len()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let whole = match dot {
                Some(_) if is_grouped(whole, '.') => whole.replace('.', ""),
                Some(_) => return None,
                None if whole.contains(',') => return None,
                None => whole.to_string(),
            };
            format!("{whole}.{fraction}")
        }
    };
    candidate
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// `1,234,567` style digit groups: a 1-3 digit lead, then groups of exactly three.
fn is_grouped(whole: &str, separator: char) -> bool {
    let digits = whole.strip_prefix(['-', '+']).unwrap_or(whole);
    let mut groups = digits.split(separator);
    let lead_ok = groups
        .next()
        .is_some_and(|lead| (1..=3).contains(&lead.len()) && lead.bytes().all(|b| b.is_ascii_digit()));
    lead_ok && groups.all(|group| group.len() == 3 && group.bytes().all(|b| b.is_ascii_digit()))
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Decoder output: a header row plus raw data rows of any length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based position among the data rows of the file.
    pub line: usize,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn cell(&self, idx: usize) -> &Cell {
        self.cells.get(idx).unwrap_or(&Cell::Empty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl NormalizedGrid {
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// The first `limit` rows as plain cell sequences, aligned with the headers.
    pub fn sample(&self, limit: usize) -> Vec<Vec<Cell>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| row.cells.clone())
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("file has no header row")]
    NoHeaders,
    #[error("file has no data rows")]
    NoRows,
}

/// Aligns every row with the header row and drops rows with nothing in them.
///
/// Blank headers become `column_<n>` and repeated headers get a ` (<k>)`
/// suffix so each column has a unique, addressable name.
pub fn normalize(raw: RawGrid) -> Result<NormalizedGrid, GridError> {
    if raw.headers.is_empty() {
        return Err(GridError::NoHeaders);
    }
    let headers = unique_headers(&raw.headers);
    let width = headers.len();

    let rows = raw
        .rows
        .into_iter()
        .enumerate()
        .filter_map(|(idx, mut cells)| {
            cells.resize(width, Cell::Empty);
            if cells.iter().all(Cell::is_blank) {
                return None;
            }
            Some(Row {
                line: idx + 1,
                cells,
            })
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return Err(GridError::NoRows);
    }
    Ok(NormalizedGrid { headers, rows })
}

fn unique_headers(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .enumerate()
        .map(|(idx, header)| {
            let base = match header.trim() {
                "" => format!("column_{}", idx + 1),
                trimmed => trimmed.to_string(),
            };
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{base} ({suffix})");
                suffix += 1;
            }
            candidate
        })
        .collect()
}
