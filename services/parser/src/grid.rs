//! Raw report bytes -> string grid
//!
//! Every source ends up as a `Vec<Vec<String>>` regardless of packaging:
//! - CSV: decoded from the source's legacy encoding (mostly Shift-JIS)
//! - ZIP: the single contained CSV is extracted first
//! - XLS: first sheet, date/time cells rendered as `YYYY/MM/DD HH:MM` text
//!
//! Trailing junk (blank rows, short rows, total/summary rows) is trimmed from
//! the tail only; some sources interleave legitimate short rows mid-file.

use std::io::{Cursor, Read};

use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Reader};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Two-dimensional grid of trimmed string cells.
pub type Grid = Vec<Vec<String>>;

/// Markers identifying a total/summary row at the end of a report.
const SUMMARY_MARKERS: &[&str] = &["合計", "総計", "計", "合 計", "Total", "TOTAL"];

/// Byte encoding of a text source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    ShiftJis,
    Utf8,
}

/// How a source file is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Csv,
    Xls,
    Zip,
}

/// Decode bytes to text. Undecodable sequences become U+FFFD and are logged.
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    let encoding_rs = match encoding {
        TextEncoding::ShiftJis => encoding_rs::SHIFT_JIS,
        TextEncoding::Utf8 => encoding_rs::UTF_8,
    };
    // decode() sniffs and strips a BOM
    let (text, used, had_errors) = encoding_rs.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "replacement characters while decoding");
    }
    text.into_owned()
}

/// Split CSV text into a grid. Rows may have differing lengths.
pub fn csv_to_grid(text: &str) -> Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut grid = Grid::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

/// Extract the only CSV entry of a ZIP archive.
pub fn unzip_single_csv(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let csv_indices: Vec<usize> = (0..archive.len())
        .filter(|&i| {
            archive
                .by_index(i)
                .map(|f| !f.is_dir() && f.name().to_lowercase().ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();

    let [index] = csv_indices[..] else {
        return Err(Error::ArchiveContents(csv_indices.len()));
    };

    let mut entry = archive.by_index(index)?;
    debug!(name = entry.name(), size = entry.size(), "extracting archive entry");
    let mut out = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut out)?;
    Ok(out)
}

/// Last serial a spreadsheet can hold (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Convert a spreadsheet date cell to a naive datetime in the workbook's own
/// date system (1900 or 1904). Serials outside what a spreadsheet can hold
/// yield `None`.
pub fn excel_datetime(dt: &ExcelDateTime) -> Option<NaiveDateTime> {
    let serial = dt.as_f64();
    if !(0.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    dt.as_datetime()
}

/// Render a spreadsheet cell the way the CSV sources would have written it.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(dt) => match excel_datetime(dt) {
            // pure time of day
            Some(ndt) if dt.as_f64() < 1.0 => ndt.format("%H:%M").to_string(),
            // pure date
            Some(ndt) if ndt.time() == NaiveTime::MIN => ndt.format("%Y/%m/%d").to_string(),
            Some(ndt) => ndt.format("%Y/%m/%d %H:%M").to_string(),
            None => dt.as_f64().to_string(),
        },
    }
}

/// Read the first sheet of a workbook (xls, xlsx, ods) into a grid.
pub fn spreadsheet_to_grid(bytes: &[u8]) -> Result<Grid> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let sheet_names = workbook.sheet_names().to_vec();
    let Some(sheet_name) = sheet_names.first() else {
        return Ok(Grid::new());
    };

    let range = workbook.worksheet_range(sheet_name)?;
    let (rows, cols) = range.get_size();
    debug!(sheet = %sheet_name, rows, cols, "reading worksheet");

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

/// Decode any supported source into a tail-trimmed grid.
pub fn bytes_to_grid(bytes: &[u8], kind: FileKind, encoding: TextEncoding) -> Result<Grid> {
    let mut grid = match kind {
        FileKind::Csv => csv_to_grid(&decode_text(bytes, encoding))?,
        FileKind::Zip => csv_to_grid(&decode_text(&unzip_single_csv(bytes)?, encoding))?,
        FileKind::Xls => spreadsheet_to_grid(bytes)?,
    };
    trim_tail(&mut grid);
    Ok(grid)
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

fn is_summary_row(row: &[String]) -> bool {
    row.iter()
        .find(|c| !c.trim().is_empty())
        .map(|first| {
            let first = first.trim();
            SUMMARY_MARKERS.contains(&first)
                || first.starts_with("合計")
                || first.starts_with("総計")
        })
        .unwrap_or(false)
}

/// Drop empty, short (<= 2 columns) and summary rows from the end of the grid.
pub fn trim_tail(grid: &mut Grid) {
    while let Some(last) = grid.last() {
        let non_blank = last.iter().filter(|c| !c.trim().is_empty()).count();
        if is_blank_row(last) || last.len() <= 2 || non_blank <= 2 || is_summary_row(last) {
            grid.pop();
        } else {
            break;
        }
    }
}

/// Normalise a header label: no whitespace, ASCII parentheses.
pub fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '（' => '(',
            '）' => ')',
            other => other,
        })
        .collect()
}

/// Index of the first row holding a cell equal to `token`.
pub fn find_header_row(grid: &Grid, token: &str) -> Result<usize> {
    let token = normalize_label(token);
    grid.iter()
        .position(|row| row.iter().any(|c| normalize_label(c) == token))
        .ok_or(Error::HeaderNotFound(token))
}

/// Find column index by matching against known labels.
///
/// Exact matches win over substring matches so that e.g. `その他` does not
/// resolve to `火力(その他)`.
pub fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_label(h)).collect();
    let candidates: Vec<String> = candidates.iter().map(|c| normalize_label(c)).collect();

    for candidate in &candidates {
        if let Some(idx) = normalized.iter().position(|h| h == candidate) {
            return Some(idx);
        }
    }
    for candidate in &candidates {
        if let Some(idx) = normalized.iter().position(|h| h.contains(candidate.as_str())) {
            return Some(idx);
        }
    }
    None
}
