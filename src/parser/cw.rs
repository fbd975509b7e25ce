//! CW delimited reader. Metadata sits at fixed offsets below the parameter
//! header; dies follow either as one block (single-wafer files) or as
//! `WAFER:,<id>,<count>` blocks (multi-wafer files).

use std::path::Path;

use tracing::{debug, warn};

use crate::columns::MetaRow;
use crate::config::ReaderConfig;
use crate::error::{IngestError, Result};
use crate::parser::layout::{
    build_parameters, parse_die, row_label, scan_preamble, HeaderLayout, MetadataRows, ParamSlot,
    WaferBuilder,
};
use crate::parser::{ids_from_file_name, FileContents, FormatReader};
use crate::reader::{cell_at, csv_grid, read_bytes, Cell, Grid};
use crate::types::{FormatKind, Wafer};

const UNIT_OFFSET: usize = 1;
const LOWER_OFFSET: usize = 2;
const UPPER_OFFSET: usize = 3;
const CONDITION_OFFSET: usize = 4;

/// Scanner states while walking a CW grid top to bottom.
#[derive(Debug)]
enum CwState {
    SeekingParamHeader,
    ParamHeaderFound(HeaderLayout),
    SeekingWaferBlock { from: usize },
    WaferBlockFound(Marker),
    Done,
}

/// A `WAFER:` marker row.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Marker {
    row: usize,
    wafer_id: Option<String>,
    die_count: usize,
}

/// Header whose first four columns are exactly the structural columns.
fn cw_header(row: usize, cells: &[Cell], markers: &[String]) -> Option<HeaderLayout> {
    let layout = HeaderLayout::from_row(row, cells, markers)?;
    let s = &layout.structural;
    let seq = s.seq?;
    let mut cols = [seq, s.bin, s.x, s.y];
    cols.sort_unstable();
    (cols == [0, 1, 2, 3]).then_some(layout)
}

#[derive(Clone, Debug, Default)]
pub struct CwReader {
    config: ReaderConfig,
}

impl CwReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    fn is_marker_label(&self, cell: &Cell) -> bool {
        match cell {
            Cell::Text(t) => t.trim().eq_ignore_ascii_case(self.config.wafer_block_marker.trim()),
            _ => false,
        }
    }

    /// Next marker row at or after `from` declaring a positive die count.
    /// Marker rows passed over for a bad count are logged and pushed onto
    /// `ignored`.
    fn next_marker(&self, grid: &Grid, from: usize, ignored: &mut Vec<usize>) -> Option<Marker> {
        for (row, cells) in grid.iter().enumerate().skip(from) {
            if !cells.first().is_some_and(|c| self.is_marker_label(c)) {
                continue;
            }
            match cell_at(grid, row, 2).as_int() {
                Some(n) if n > 0 => {
                    let wafer_id = Some(cell_at(grid, row, 1).as_str().trim().to_string())
                        .filter(|id| !id.is_empty());
                    return Some(Marker {
                        row,
                        wafer_id,
                        die_count: n as usize,
                    });
                }
                _ => {
                    warn!(
                        row = row + 1,
                        count = %cell_at(grid, row, 2).as_str(),
                        "wafer marker without a positive die count; ignored"
                    );
                    ignored.push(row);
                }
            }
        }
        None
    }

    /// Fixed-offset metadata rows below the header, then any condition rows.
    /// Returns the rows and the index after the metadata block.
    fn fixed_metadata(&self, grid: &Grid, header: &HeaderLayout, source: &Path) -> Result<(MetadataRows, usize)> {
        if header.row + UPPER_OFFSET >= grid.len() {
            return Err(IngestError::MetadataNotFound {
                path: source.to_path_buf(),
                what: "unit and limit rows below the parameter header".to_string(),
            });
        }
        for (offset, expected) in [
            (UNIT_OFFSET, MetaRow::Unit),
            (LOWER_OFFSET, MetaRow::LowerLimit),
            (UPPER_OFFSET, MetaRow::UpperLimit),
        ] {
            let row = header.row + offset;
            let found = row_label(&grid[row]);
            if found != Some(expected) {
                warn!(
                    file = %source.display(),
                    row = row + 1,
                    expected = ?expected,
                    found = ?found,
                    "unexpected metadata label; using the row by position"
                );
            }
        }

        let mut meta = MetadataRows {
            unit: Some(header.row + UNIT_OFFSET),
            lower: Some(header.row + LOWER_OFFSET),
            upper: Some(header.row + UPPER_OFFSET),
            ..MetadataRows::default()
        };
        let mut row = header.row + CONDITION_OFFSET;
        while row < grid.len() && row_label(&grid[row]) == Some(MetaRow::Condition) {
            meta.conditions.push(row);
            row += 1;
        }
        Ok((meta, row))
    }

    /// Dies of one marked block. Every row of the declared span must be a die.
    fn extract_block(
        &self,
        grid: &Grid,
        header: &HeaderLayout,
        slots: &[ParamSlot],
        marker: &Marker,
        wafer_id: &str,
        source: &Path,
    ) -> Result<Wafer> {
        let start = marker.row + self.config.wafer_block_data_offset;
        let available = grid.len().saturating_sub(start);
        let malformed = |available| IngestError::MalformedWaferBlock {
            wafer: wafer_id.to_string(),
            row: marker.row + 1,
            declared: marker.die_count,
            available,
        };
        if marker.die_count > available {
            return Err(malformed(available));
        }

        let mut builder = WaferBuilder::new(wafer_id, source, slots);
        for (i, cells) in grid[start..start + marker.die_count].iter().enumerate() {
            let die = parse_die(cells, &header.structural).ok_or_else(|| malformed(i))?;
            builder.push(start + i, cells, die);
        }
        Ok(builder.finish())
    }

    /// Every die row from `start` to the end of the grid.
    fn extract_single(
        &self,
        grid: &Grid,
        header: &HeaderLayout,
        slots: &[ParamSlot],
        start: usize,
        wafer_id: &str,
        source: &Path,
    ) -> Option<Wafer> {
        let mut builder = WaferBuilder::new(wafer_id, source, slots);
        for (row, cells) in grid.iter().enumerate().skip(start) {
            if let Some(die) = parse_die(cells, &header.structural) {
                builder.push(row, cells, die);
            }
        }
        (builder.chip_count() > 0).then(|| builder.finish())
    }

    /// Parse a CW grid already split into cells.
    pub fn parse_grid(&self, grid: &Grid, source: &Path) -> Result<FileContents> {
        self.scan_grid(grid, source).map(|(contents, _)| contents)
    }

    /// [`CwReader::parse_grid`], also returning the marker rows ignored for
    /// a bad die count.
    fn scan_grid(&self, grid: &Grid, source: &Path) -> Result<(FileContents, Vec<usize>)> {
        let (lot_fallback, wafer_fallback) = ids_from_file_name(source);
        let markers = &self.config.continuation_markers;
        let mut contents = FileContents::default();
        let mut header = None;
        let mut slots = Vec::new();
        let mut ignored = Vec::new();
        let mut state = CwState::SeekingParamHeader;

        loop {
            state = match state {
                CwState::SeekingParamHeader => {
                    let found = grid
                        .iter()
                        .enumerate()
                        .find_map(|(row, cells)| cw_header(row, cells, markers));
                    match found {
                        Some(layout) => CwState::ParamHeaderFound(layout),
                        None => {
                            return Err(IngestError::MetadataNotFound {
                                path: source.to_path_buf(),
                                what: "CW parameter header (sequence, bin, X, Y in the first four columns)"
                                    .to_string(),
                            })
                        }
                    }
                }
                CwState::ParamHeaderFound(layout) => {
                    let preamble = scan_preamble(grid, layout.row);
                    let (meta, data_start) = self.fixed_metadata(grid, &layout, source)?;
                    let (params, param_slots) =
                        build_parameters(grid, &layout, &meta, &self.config.limit_policy);
                    contents.lot_id = preamble.lot_id.unwrap_or_else(|| lot_fallback.clone());
                    contents.product = preamble.product.unwrap_or_default();
                    contents.params = params;
                    slots = param_slots;

                    let next = match self.next_marker(grid, data_start, &mut ignored) {
                        Some(marker) => CwState::WaferBlockFound(marker),
                        None => {
                            let wafer_id = preamble.wafer_id.unwrap_or_else(|| wafer_fallback.clone());
                            contents
                                .wafers
                                .extend(self.extract_single(grid, &layout, &slots, data_start, &wafer_id, source));
                            CwState::Done
                        }
                    };
                    header = Some(layout);
                    next
                }
                CwState::SeekingWaferBlock { from } => match self.next_marker(grid, from, &mut ignored) {
                    Some(marker) => CwState::WaferBlockFound(marker),
                    None => CwState::Done,
                },
                CwState::WaferBlockFound(marker) => {
                    let Some(layout) = header.as_ref() else {
                        break;
                    };
                    let wafer_id = marker.wafer_id.clone().unwrap_or_else(|| {
                        format!("{}-{}", wafer_fallback, contents.wafers.len() + 1)
                    });
                    match self.extract_block(grid, layout, &slots, &marker, &wafer_id, source) {
                        Ok(wafer) => {
                            debug!(wafer = %wafer_id, dies = wafer.chip_count(), "wafer block read");
                            contents.wafers.push(wafer);
                            CwState::SeekingWaferBlock {
                                from: marker.row + self.config.wafer_block_data_offset + marker.die_count,
                            }
                        }
                        Err(e) => {
                            warn!(file = %source.display(), error = %e, "skipping wafer block");
                            CwState::SeekingWaferBlock { from: marker.row + 1 }
                        }
                    }
                }
                CwState::Done => break,
            };
        }

        Ok((contents, ignored))
    }
}

impl FormatReader for CwReader {
    fn kind(&self) -> FormatKind {
        FormatKind::CwText
    }

    fn read_file(&self, path: &Path) -> Result<FileContents> {
        let grid = csv_grid(&read_bytes(path)?)?;
        self.parse_grid(&grid, path)
    }
}
