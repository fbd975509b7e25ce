//! Low-level input access: raw bytes (gzip-aware), text grids and
//! spreadsheet grids.

use std::borrow::Cow;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::Path;

use calamine::{Data, Range, Reader, Xls, Xlsx};
use flate2::read::GzDecoder;

use crate::error::{IngestError, Result};

/// One cell of a parsed input grid.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Text cell from raw input; blank text becomes `Empty`.
    pub fn text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Cell::Empty => Cow::Borrowed(""),
            Cell::Number(n) => Cow::Owned(n.to_string()),
            Cell::Text(t) => Cow::Borrowed(t.as_str()),
        }
    }

    /// Integer content; spreadsheets may store `1` as `1.0`.
    pub fn as_int(&self) -> Option<i64> {
        let whole = |f: f64| (f.is_finite() && f.fract() == 0.0).then_some(f as i64);
        match self {
            Cell::Empty => None,
            Cell::Number(n) => whole(*n),
            Cell::Text(t) => t
                .parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(whole)),
        }
    }
}

/// Rows of cells, as laid out in the source file.
pub type Grid = Vec<Vec<Cell>>;

/// Cell at (row, col), `Empty` when out of range.
pub fn cell_at(grid: &Grid, row: usize, col: usize) -> &Cell {
    static EMPTY: Cell = Cell::Empty;
    grid.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
}

// ── Raw bytes ───────────────────────────────────────────────────────

/// True when the file name ends in `.gz`.
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("gz"))
}

/// Open a file, transparently decompressing `.gz` inputs.
fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if is_gzip_path(path) {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Read the whole (decompressed) file.
pub fn read_bytes(path: &Path) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    open_input(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Read up to `n` leading (decompressed) bytes.
pub fn read_signature(path: &Path, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n);
    open_input(path)?.take(n as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Spreadsheet container kinds recognizable from leading bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    /// Zip archive (`PK\x03\x04`), i.e. xlsx/xlsm.
    Zip,
    /// OLE2 compound document, i.e. legacy xls.
    Ole,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

pub fn container_of(signature: &[u8]) -> Option<Container> {
    if signature.starts_with(ZIP_MAGIC) {
        Some(Container::Zip)
    } else if signature.starts_with(OLE_MAGIC) {
        Some(Container::Ole)
    } else {
        None
    }
}

// ── Text grids ──────────────────────────────────────────────────────

/// Decode legacy text exports; invalid UTF-8 is replaced, a BOM dropped.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Split tab-separated text into a grid.
pub fn text_grid(text: &str) -> Grid {
    text.lines()
        .map(|line| line.trim_end_matches('\r').split('\t').map(Cell::text).collect())
        .collect()
}

/// Whitespace-separated tokens of `line` as (first char, end char, token).
fn tokens(line: &str) -> Vec<(usize, usize, &str)> {
    let mut out = Vec::new();
    let mut open: Option<(usize, usize)> = None;
    let mut chars = 0;
    for (pos, (byte, ch)) in line.char_indices().enumerate() {
        chars = pos + 1;
        match (ch.is_whitespace(), open) {
            (false, None) => open = Some((pos, byte)),
            (true, Some((start, from))) => {
                out.push((start, pos, &line[from..byte]));
                open = None;
            }
            _ => {}
        }
    }
    if let Some((start, from)) = open {
        out.push((start, chars, &line[from..]));
    }
    out
}

/// Header column a token belongs to: the one it overlaps most, else the
/// nearest one.
fn column_of(columns: &[(usize, usize)], start: usize, end: usize) -> Option<usize> {
    columns
        .iter()
        .enumerate()
        .min_by_key(|&(_, &(from, to))| {
            let overlap = end.min(to).saturating_sub(start.max(from));
            let gap = if overlap > 0 {
                0
            } else {
                from.saturating_sub(end).max(start.saturating_sub(to))
            };
            (std::cmp::Reverse(overlap), gap)
        })
        .map(|(col, _)| col)
}

/// Cut one fixed-width line into `columns`; columns without a token are
/// `Empty`, tokens sharing a column are joined with a space.
fn fixed_width_row(line: &str, columns: &[(usize, usize)]) -> Vec<Cell> {
    let mut cells = vec![String::new(); columns.len()];
    for (start, end, token) in tokens(line) {
        let Some(col) = column_of(columns, start, end) else { continue };
        if !cells[col].is_empty() {
            cells[col].push(' ');
        }
        cells[col].push_str(token);
    }
    cells.iter().map(|c| Cell::text(c)).collect()
}

/// Split fixed-width text into a grid.
///
/// The first line accepted by `is_header` fixes the column positions: it
/// and every later line are cut into those columns, so blank cells stay in
/// place. Lines above it are split on runs of whitespace.
pub fn fixed_width_grid(text: &str, is_header: impl Fn(&[Cell]) -> bool) -> Grid {
    let mut columns: Option<Vec<(usize, usize)>> = None;
    let mut grid = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(columns) = &columns {
            grid.push(fixed_width_row(line, columns));
            continue;
        }
        let spans = tokens(line);
        let cells: Vec<Cell> = spans.iter().map(|&(_, _, t)| Cell::text(t)).collect();
        if is_header(&cells) {
            columns = Some(spans.iter().map(|&(start, end, _)| (start, end)).collect());
        }
        grid.push(cells);
    }
    grid
}

/// Parse comma-delimited bytes into a grid. Rows may differ in length.
pub fn csv_grid(bytes: &[u8]) -> Result<Grid> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in rdr.byte_records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|field| Cell::text(&String::from_utf8_lossy(field)))
                .collect(),
        );
    }
    Ok(grid)
}

// ── Spreadsheet grids ───────────────────────────────────────────────

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::text(s),
        other => Cell::text(&other.to_string()),
    }
}

fn range_to_grid(range: &Range<Data>) -> Grid {
    range
        .rows()
        .map(|row| row.iter().map(data_to_cell).collect())
        .collect()
}

fn sheets_of<RS, R>(mut workbook: R) -> Result<Vec<(String, Grid)>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: Display,
{
    let names = workbook.sheet_names().to_owned();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| IngestError::Spreadsheet(format!("sheet '{}': {}", name, e)))?;
        sheets.push((name, range_to_grid(&range)));
    }
    Ok(sheets)
}

/// Every worksheet of an in-memory workbook, as (sheet name, grid).
pub fn workbook_grids(bytes: Vec<u8>) -> Result<Vec<(String, Grid)>> {
    match container_of(&bytes) {
        Some(Container::Zip) => {
            let workbook = Xlsx::new(Cursor::new(bytes))
                .map_err(|e| IngestError::Spreadsheet(format!("Failed to open xlsx: {}", e)))?;
            sheets_of(workbook)
        }
        Some(Container::Ole) => {
            let workbook = Xls::new(Cursor::new(bytes))
                .map_err(|e| IngestError::Spreadsheet(format!("Failed to open xls: {}", e)))?;
            sheets_of(workbook)
        }
        None => Err(IngestError::Spreadsheet(
            "no spreadsheet container signature".to_string(),
        )),
    }
}
