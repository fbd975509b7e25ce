//! Spreadsheet readers: native MEX workbooks (one wafer per worksheet) and
//! spreadsheets disguised behind a `.txt` extension (first worksheet only).

use std::path::Path;

use tracing::debug;

use crate::config::ReaderConfig;
use crate::error::{IngestError, Result};
use crate::parser::layout::parse_labelled;
use crate::parser::{ids_from_file_name, FileContents, FormatReader};
use crate::reader::{read_bytes, workbook_grids, Grid};
use crate::types::FormatKind;

#[derive(Clone, Debug, Default)]
pub struct MexReader {
    config: ReaderConfig,
}

impl MexReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Parse worksheets already loaded as (sheet name, grid). Sheets without
    /// a parameter header are skipped; the sheet name is the fallback wafer id.
    pub fn parse_sheets(&self, sheets: Vec<(String, Grid)>, source: &Path) -> Result<FileContents> {
        let (lot_fallback, _) = ids_from_file_name(source);
        let mut contents = FileContents::default();
        let mut lot_id = None;

        for (name, grid) in sheets {
            let sheet = match parse_labelled(&grid, source, &name, &self.config) {
                Ok(sheet) => sheet,
                Err(e) => {
                    debug!(file = %source.display(), sheet = %name, error = %e, "skipping worksheet");
                    continue;
                }
            };
            if lot_id.is_none() {
                lot_id = sheet.preamble.lot_id;
            }
            if contents.product.is_empty() {
                contents.product = sheet.preamble.product.unwrap_or_default();
            }
            for param in sheet.params {
                if !contents.params.iter().any(|p| p.id == param.id) {
                    contents.params.push(param);
                }
            }
            contents.wafers.push(sheet.wafer);
        }

        if contents.wafers.is_empty() {
            return Err(IngestError::MetadataNotFound {
                path: source.to_path_buf(),
                what: "worksheet with a parameter header row".to_string(),
            });
        }
        contents.lot_id = lot_id.unwrap_or(lot_fallback);
        Ok(contents)
    }
}

impl FormatReader for MexReader {
    fn kind(&self) -> FormatKind {
        FormatKind::MexSpreadsheet
    }

    fn read_file(&self, path: &Path) -> Result<FileContents> {
        let sheets = workbook_grids(read_bytes(path)?)?;
        self.parse_sheets(sheets, path)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DisguisedReader {
    config: ReaderConfig,
}

impl DisguisedReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Parse the first worksheet in the DCP layout; ids fall back to the
    /// file name.
    pub fn parse_first_sheet(&self, sheets: Vec<(String, Grid)>, source: &Path) -> Result<FileContents> {
        let (lot_fallback, wafer_fallback) = ids_from_file_name(source);
        let (_, grid) = sheets
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::MetadataNotFound {
                path: source.to_path_buf(),
                what: "worksheet".to_string(),
            })?;
        let sheet = parse_labelled(&grid, source, &wafer_fallback, &self.config)?;
        Ok(FileContents {
            lot_id: sheet.preamble.lot_id.unwrap_or(lot_fallback),
            product: sheet.preamble.product.unwrap_or_default(),
            params: sheet.params,
            wafers: vec![sheet.wafer],
        })
    }
}

impl FormatReader for DisguisedReader {
    fn kind(&self) -> FormatKind {
        FormatKind::DisguisedSpreadsheet
    }

    fn read_file(&self, path: &Path) -> Result<FileContents> {
        let sheets = workbook_grids(read_bytes(path)?)?;
        self.parse_first_sheet(sheets, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Cell;

    fn sheet(rows: &[&[Cell]]) -> Grid {
        rows.iter().map(|r| r.to_vec()).collect()
    }

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn wafer_sheet(wafer: Option<&str>, vth: f64) -> Grid {
        let mut rows: Vec<Vec<Cell>> = vec![vec![t("Lot ID"), t("LOTX")]];
        if let Some(w) = wafer {
            rows.push(vec![t("Wafer ID"), t(w)]);
        }
        rows.extend(sheet(&[
            &[t("No"), t("Bin"), t("X"), t("Y"), t("VTH"), t("RDSON")],
            &[t("Unit"), Cell::Empty, Cell::Empty, Cell::Empty, t("V"), t("mOhm")],
            &[t("Limit"), Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty, n(850.0)],
            &[n(1.0), n(1.0), n(3.0), n(4.0), n(vth), n(640.0)],
            &[n(2.0), n(1.0), n(4.0), n(4.0), Cell::Empty, n(700.0)],
        ]));
        rows
    }

    #[test]
    fn test_mex_one_wafer_per_sheet() {
        let sheets = vec![
            ("W01".to_string(), wafer_sheet(None, 3.0)),
            ("notes".to_string(), sheet(&[&[t("free text")]])),
            ("W02".to_string(), wafer_sheet(Some("02"), 3.2)),
        ];
        let contents = MexReader::default()
            .parse_sheets(sheets, Path::new("LOTX.xlsx"))
            .unwrap();
        assert_eq!(contents.lot_id, "LOTX");
        assert_eq!(contents.params.len(), 2);
        let ids: Vec<_> = contents.wafers.iter().map(|w| w.wafer_id.as_str()).collect();
        assert_eq!(ids, vec!["W01", "02"]);
        assert_eq!(contents.wafers[0].x, vec![3, 4]);

        let rdson = &contents.params[1];
        assert_eq!(rdson.unit, "Ohm");
        assert!((rdson.upper_limit.unwrap() - 0.85).abs() < 1e-12);
        let values = contents.wafers[1].chip_data.column("RDSON").unwrap();
        assert!((values[0].unwrap() - 0.64).abs() < 1e-12);
        assert_eq!(contents.wafers[1].chip_data.column("VTH").unwrap()[1], None);
    }

    #[test]
    fn test_mex_without_header_fails() {
        let sheets = vec![("Sheet1".to_string(), sheet(&[&[t("nothing")]]))];
        let err = MexReader::default()
            .parse_sheets(sheets, Path::new("a.xls"))
            .unwrap_err();
        assert!(matches!(err, IngestError::MetadataNotFound { .. }));
    }

    #[test]
    fn test_disguised_first_sheet_only() {
        let sheets = vec![
            ("Data".to_string(), wafer_sheet(None, 2.8)),
            ("Data2".to_string(), wafer_sheet(None, 2.9)),
        ];
        let contents = DisguisedReader::default()
            .parse_first_sheet(sheets, Path::new("LOTY_11.txt"))
            .unwrap();
        assert_eq!(contents.wafers.len(), 1);
        assert_eq!(contents.wafers[0].wafer_id, "11");
        assert_eq!(contents.lot_id, "LOTX");
    }

    #[test]
    fn test_disguised_empty_workbook() {
        let err = DisguisedReader::default()
            .parse_first_sheet(Vec::new(), Path::new("LOTY_11.txt"))
            .unwrap_err();
        assert!(matches!(err, IngestError::MetadataNotFound { .. }));
    }
}
