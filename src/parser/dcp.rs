//! DCP text reader: tab-separated (or fixed-width) exports, one wafer per file.

use std::path::Path;

use crate::config::ReaderConfig;
use crate::error::Result;
use crate::parser::layout::{parse_labelled, HeaderLayout};
use crate::parser::{ids_from_file_name, FileContents, FormatReader};
use crate::reader::{decode_text, fixed_width_grid, read_bytes, text_grid, Grid};
use crate::types::FormatKind;

#[derive(Clone, Debug, Default)]
pub struct DcpReader {
    config: ReaderConfig,
}

impl DcpReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Tab-separated text, or fixed-width text cut at the header's columns.
    fn grid_of(&self, text: &str) -> Grid {
        if text.contains('\t') {
            return text_grid(text);
        }
        let markers = &self.config.continuation_markers;
        fixed_width_grid(text, |cells| HeaderLayout::from_row(0, cells, markers).is_some())
    }

    /// Parse already-decoded DCP text; `source` names the wafer and lot
    /// when the preamble does not.
    pub fn parse_text(&self, text: &str, source: &Path) -> Result<FileContents> {
        let grid = self.grid_of(text);
        let (lot_fallback, wafer_fallback) = ids_from_file_name(source);
        let sheet = parse_labelled(&grid, source, &wafer_fallback, &self.config)?;
        Ok(FileContents {
            lot_id: sheet.preamble.lot_id.unwrap_or(lot_fallback),
            product: sheet.preamble.product.unwrap_or_default(),
            params: sheet.params,
            wafers: vec![sheet.wafer],
        })
    }
}

impl FormatReader for DcpReader {
    fn kind(&self) -> FormatKind {
        FormatKind::DcpText
    }

    fn read_file(&self, path: &Path) -> Result<FileContents> {
        let bytes = read_bytes(path)?;
        self.parse_text(&decode_text(&bytes), path)
    }
}
