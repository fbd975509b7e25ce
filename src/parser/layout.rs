//! Pieces shared by every layout: header discovery, preamble keys,
//! parameter synthesis from metadata rows, and die-row extraction.
//!
//! Column positions found in the header are returned as values
//! (`HeaderLayout`, `ParamSlot`) and passed into extraction explicitly.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::assembler::unique_id;
use crate::columns::{classify_header, classify_meta_label, classify_preamble_key};
use crate::columns::{ColumnRole, MetaRow, PreambleKey};
use crate::config::{LimitDirection, LimitPolicy, ReaderConfig};
use crate::error::{IngestError, Result};
use crate::reader::{cell_at, Cell, Grid};
use crate::types::{Parameter, Wafer};
use crate::units::{canonical_unit, canonicalize_cell, extract_value_and_unit, magnitude_multiplier};

/// Column indices of the structural (non-parameter) fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Structural {
    pub seq: Option<usize>,
    pub bin: usize,
    pub x: usize,
    pub y: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ParamColumn {
    pub col: usize,
    pub name: String,
}

/// A located parameter header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HeaderLayout {
    pub row: usize,
    pub structural: Structural,
    pub columns: Vec<ParamColumn>,
}

impl HeaderLayout {
    /// Layout of `cells` when they form a header: X, Y and bin columns are
    /// required, the sequence column is optional. First match of a role wins.
    pub fn from_row(row: usize, cells: &[Cell], markers: &[String]) -> Option<Self> {
        let (mut seq, mut bin, mut x, mut y) = (None, None, None, None);
        let mut columns = Vec::new();
        for (col, cell) in cells.iter().enumerate() {
            let Cell::Text(text) = cell else { continue };
            match classify_header(text, markers) {
                ColumnRole::Sequence => {
                    seq.get_or_insert(col);
                }
                ColumnRole::Bin => {
                    bin.get_or_insert(col);
                }
                ColumnRole::X => {
                    x.get_or_insert(col);
                }
                ColumnRole::Y => {
                    y.get_or_insert(col);
                }
                ColumnRole::Parameter => columns.push(ParamColumn {
                    col,
                    name: text.clone(),
                }),
                ColumnRole::Ignored => {}
            }
        }
        Some(Self {
            row,
            structural: Structural {
                seq,
                bin: bin?,
                x: x?,
                y: y?,
            },
            columns,
        })
    }
}

/// First header row at or after `from`.
pub(crate) fn find_header(grid: &Grid, from: usize, markers: &[String]) -> Option<HeaderLayout> {
    grid.iter()
        .enumerate()
        .skip(from)
        .find_map(|(row, cells)| HeaderLayout::from_row(row, cells, markers))
}

// ── Preamble ────────────────────────────────────────────────────────

/// Identity values found above the header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Preamble {
    pub lot_id: Option<String>,
    pub product: Option<String>,
    pub wafer_id: Option<String>,
}

/// `Key: Value` in one cell or across cells, or `Key<sep>Value`.
fn key_value(cells: &[Cell]) -> Option<(String, String)> {
    let first = cells.first().filter(|c| !c.is_empty())?;
    let line = cells
        .iter()
        .filter(|c| !c.is_empty())
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if let Some((key, value)) = line.split_once(':') {
        let value = value.trim();
        if !value.is_empty() {
            return Some((key.trim().to_string(), value.to_string()));
        }
    }
    let value = cells.iter().skip(1).find(|c| !c.is_empty())?;
    Some((first.as_str().into_owned(), value.as_str().into_owned()))
}

pub(crate) fn scan_preamble(grid: &Grid, end: usize) -> Preamble {
    let mut preamble = Preamble::default();
    for cells in grid.iter().take(end) {
        let Some((key, value)) = key_value(cells) else { continue };
        let slot = match classify_preamble_key(&key) {
            Some(PreambleKey::Lot) => &mut preamble.lot_id,
            Some(PreambleKey::Product) => &mut preamble.product,
            Some(PreambleKey::Wafer) => &mut preamble.wafer_id,
            None => continue,
        };
        slot.get_or_insert(value);
    }
    preamble
}

// ── Metadata rows ───────────────────────────────────────────────────

/// Row indices of the metadata block belonging to a header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct MetadataRows {
    pub unit: Option<usize>,
    pub lower: Option<usize>,
    pub upper: Option<usize>,
    pub single: Option<usize>,
    pub conditions: Vec<usize>,
}

/// Label of a metadata row: its first non-empty cell.
pub(crate) fn row_label(cells: &[Cell]) -> Option<MetaRow> {
    cells
        .iter()
        .find(|c| !c.is_empty())
        .and_then(|c| classify_meta_label(&c.as_str()))
}

/// Labelled rows after the header, up to the first die row.
/// Returns the rows and the index where die data starts.
pub(crate) fn scan_labelled_metadata(grid: &Grid, header: &HeaderLayout) -> (MetadataRows, usize) {
    let mut meta = MetadataRows::default();
    let mut row = header.row + 1;
    while row < grid.len() {
        let cells = &grid[row];
        if parse_die(cells, &header.structural).is_some() {
            break;
        }
        match row_label(cells) {
            Some(MetaRow::Unit) => {
                meta.unit.get_or_insert(row);
            }
            Some(MetaRow::LowerLimit) => {
                meta.lower.get_or_insert(row);
            }
            Some(MetaRow::UpperLimit) => {
                meta.upper.get_or_insert(row);
            }
            Some(MetaRow::SingleLimit) => {
                meta.single.get_or_insert(row);
            }
            Some(MetaRow::Condition) => meta.conditions.push(row),
            None => debug!(row = row + 1, "skipping unlabelled row above die data"),
        }
        row += 1;
    }
    (meta, row)
}

// ── Parameters ──────────────────────────────────────────────────────

/// Where a parameter's values live and how to scale them.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ParamSlot {
    pub id: String,
    pub col: usize,
    pub multiplier: f64,
}

fn meta_cell(grid: &Grid, row: Option<usize>, col: usize) -> Cell {
    row.map_or(Cell::Empty, |r| cell_at(grid, r, col).clone())
}

/// Unit given in a limit cell such as `"1uA"`.
fn unit_of(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Text(t) => Some(extract_value_and_unit(t).1).filter(|u| !u.is_empty()),
        _ => None,
    }
}

fn synthesize(
    grid: &Grid,
    column: &ParamColumn,
    id: String,
    meta: &MetadataRows,
    policy: &LimitPolicy,
) -> (Parameter, f64) {
    let col = column.col;
    let unit_cell = meta_cell(grid, meta.unit, col);
    let lower_cell = meta_cell(grid, meta.lower, col);
    let upper_cell = meta_cell(grid, meta.upper, col);
    let single_cell = meta_cell(grid, meta.single, col);

    let source_unit = Some(unit_cell.as_str().trim().to_string())
        .filter(|u| !u.is_empty())
        .or_else(|| [&lower_cell, &upper_cell, &single_cell].into_iter().find_map(unit_of))
        .unwrap_or_default();
    let multiplier = magnitude_multiplier(&source_unit);

    let mut lower = canonicalize_cell(&lower_cell, multiplier);
    let mut upper = canonicalize_cell(&upper_cell, multiplier);
    if lower.is_none() && upper.is_none() {
        if let Some(limit) = canonicalize_cell(&single_cell, multiplier) {
            match policy.direction_for(&column.name) {
                LimitDirection::Lower => lower = Some(limit),
                LimitDirection::Upper => upper = Some(limit),
            }
        }
    }
    if let (Some(lo), Some(hi)) = (lower, upper) {
        if lo > hi {
            warn!(param = %id, lower = lo, upper = hi, "spec limits reversed; swapping");
            std::mem::swap(&mut lower, &mut upper);
        }
    }

    let conditions = meta
        .conditions
        .iter()
        .map(|&r| cell_at(grid, r, col))
        .filter(|c| !c.is_empty())
        .map(|c| c.as_str().into_owned())
        .collect();

    let param = Parameter {
        id,
        name: column.name.clone(),
        unit: canonical_unit(&source_unit),
        lower_limit: lower,
        upper_limit: upper,
        conditions,
        stats: None,
    };
    (param, multiplier)
}

/// One parameter per header column, ids uniqued within the file.
pub(crate) fn build_parameters(
    grid: &Grid,
    header: &HeaderLayout,
    meta: &MetadataRows,
    policy: &LimitPolicy,
) -> (Vec<Parameter>, Vec<ParamSlot>) {
    let mut params: Vec<Parameter> = Vec::with_capacity(header.columns.len());
    let mut slots = Vec::with_capacity(header.columns.len());
    for column in &header.columns {
        let id = unique_id(&column.name, |id| params.iter().any(|p| p.id == id));
        let (param, multiplier) = synthesize(grid, column, id, meta, policy);
        slots.push(ParamSlot {
            id: param.id.clone(),
            col: column.col,
            multiplier,
        });
        params.push(param);
    }
    (params, slots)
}

// ── Die rows ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DieKey {
    pub seq: Option<i64>,
    pub bin: i64,
    pub x: i64,
    pub y: i64,
}

/// Structural fields of a die row; `None` if any present column is not an integer.
pub(crate) fn parse_die(cells: &[Cell], s: &Structural) -> Option<DieKey> {
    let int = |col: usize| cells.get(col).and_then(Cell::as_int);
    let seq = match s.seq {
        Some(col) => Some(int(col)?),
        None => None,
    };
    Some(DieKey {
        seq,
        bin: int(s.bin)?,
        x: int(s.x)?,
        y: int(s.y)?,
    })
}

#[derive(Default)]
struct ConversionFailures {
    count: usize,
    first: Option<(usize, usize, String)>,
}

/// Accumulates die rows for one wafer.
pub(crate) struct WaferBuilder<'a> {
    wafer: Wafer,
    slots: &'a [ParamSlot],
    values: Vec<Vec<Option<f64>>>,
    failures: Vec<ConversionFailures>,
}

impl<'a> WaferBuilder<'a> {
    pub fn new(wafer_id: impl Into<String>, source: &Path, slots: &'a [ParamSlot]) -> Self {
        Self {
            wafer: Wafer::new(wafer_id, PathBuf::from(source)),
            slots,
            values: vec![Vec::new(); slots.len()],
            failures: slots.iter().map(|_| ConversionFailures::default()).collect(),
        }
    }

    /// Add one die. Cells that cannot be converted are stored as null.
    pub fn push(&mut self, row: usize, cells: &[Cell], die: DieKey) {
        let seq = die.seq.unwrap_or(self.wafer.chip_count() as i64 + 1);
        self.wafer.seq.push(seq);
        self.wafer.bin.push(die.bin);
        self.wafer.x.push(die.x);
        self.wafer.y.push(die.y);

        let empty = Cell::Empty;
        for (i, slot) in self.slots.iter().enumerate() {
            let cell = cells.get(slot.col).unwrap_or(&empty);
            let value = canonicalize_cell(cell, slot.multiplier).filter(|v| v.is_finite());
            if value.is_none() && !cell.is_empty() {
                let failures = &mut self.failures[i];
                failures.count += 1;
                failures
                    .first
                    .get_or_insert_with(|| (row + 1, slot.col + 1, cell.as_str().into_owned()));
            }
            self.values[i].push(value);
        }
    }

    pub fn chip_count(&self) -> usize {
        self.wafer.chip_count()
    }

    /// Finish the wafer, logging conversion failures once per column.
    pub fn finish(mut self) -> Wafer {
        for ((slot, failures), values) in self.slots.iter().zip(self.failures).zip(self.values) {
            if let Some((row, column, text)) = failures.first {
                let err = IngestError::ValueConversion { row, column, text };
                warn!(
                    file = %self.wafer.source.display(),
                    wafer = %self.wafer.wafer_id,
                    param = %slot.id,
                    count = failures.count,
                    "{}; stored as null",
                    err
                );
            }
            self.wafer.chip_data.insert(slot.id.clone(), values);
        }
        self.wafer
    }
}

// ── Labelled layout ─────────────────────────────────────────────────

/// Result of parsing one labelled sheet (one wafer).
#[derive(Debug)]
pub(crate) struct LabelledSheet {
    pub preamble: Preamble,
    pub params: Vec<Parameter>,
    pub wafer: Wafer,
}

/// Parse a grid in the labelled layout shared by DCP text and workbooks.
pub(crate) fn parse_labelled(
    grid: &Grid,
    source: &Path,
    fallback_wafer_id: &str,
    config: &ReaderConfig,
) -> Result<LabelledSheet> {
    let header = find_header(grid, 0, &config.continuation_markers).ok_or_else(|| {
        IngestError::MetadataNotFound {
            path: source.to_path_buf(),
            what: "parameter header row with X, Y and Bin columns".to_string(),
        }
    })?;
    let preamble = scan_preamble(grid, header.row);
    let (meta, data_start) = scan_labelled_metadata(grid, &header);
    let (params, slots) = build_parameters(grid, &header, &meta, &config.limit_policy);

    let wafer_id = preamble
        .wafer_id
        .clone()
        .unwrap_or_else(|| fallback_wafer_id.to_string());
    let mut builder = WaferBuilder::new(wafer_id, source, &slots);
    let mut skipped = 0usize;
    for (row, cells) in grid.iter().enumerate().skip(data_start) {
        match parse_die(cells, &header.structural) {
            Some(die) => builder.push(row, cells, die),
            None if cells.iter().any(|c| !c.is_empty()) => skipped += 1,
            None => {}
        }
    }
    if skipped > 0 {
        debug!(file = %source.display(), skipped, "non-die rows after data start");
    }
    debug!(
        file = %source.display(),
        header_row = header.row + 1,
        params = params.len(),
        dies = builder.chip_count(),
        "parsed labelled sheet"
    );

    Ok(LabelledSheet {
        preamble,
        params,
        wafer: builder.finish(),
    })
}
