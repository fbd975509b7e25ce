//! Format readers: turn source files into parameters and wafers, and
//! batch ingestion of many files into one lot.

mod cw;
mod dcp;
mod layout;
mod mex;

pub use cw::CwReader;
pub use dcp::DcpReader;
pub use mex::{DisguisedReader, MexReader};

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ReaderConfig;
use crate::error::Result;
use crate::reader::is_gzip_path;
use crate::sniff::detect_format;
use crate::types::{FormatKind, Lot, Parameter, Wafer};

/// Everything a reader extracted from one file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileContents {
    pub lot_id: String,
    pub product: String,
    pub params: Vec<Parameter>,
    pub wafers: Vec<Wafer>,
}

/// One concrete source layout.
pub trait FormatReader {
    fn kind(&self) -> FormatKind;

    /// Parse one file. Errors are fatal for that file only.
    fn read_file(&self, path: &Path) -> Result<FileContents>;

    /// Read every file into one lot; files that fail are logged and skipped.
    fn read(&self, paths: &[PathBuf], pass_bin: i64) -> Lot {
        let mut lot = Lot::new("", pass_bin);
        for path in paths {
            match self.read_file(path) {
                Ok(contents) => lot.absorb(contents),
                Err(e) => warn!(
                    file = %path.display(),
                    format = %self.kind(),
                    error = %e,
                    "skipping file"
                ),
            }
        }
        lot.refresh_combined();
        lot
    }
}

/// Reader for a detected format.
pub fn reader_for(kind: FormatKind, config: ReaderConfig) -> Box<dyn FormatReader> {
    match kind {
        FormatKind::DcpText => Box::new(DcpReader::new(config)),
        FormatKind::CwText => Box::new(CwReader::new(config)),
        FormatKind::MexSpreadsheet => Box::new(MexReader::new(config)),
        FormatKind::DisguisedSpreadsheet => Box::new(DisguisedReader::new(config)),
    }
}

/// Lot and wafer ids from the `<lot>_<wafer>` / `<lot>-<wafer>` file-name
/// convention. A name without separators is used for both.
pub(crate) fn ids_from_file_name(path: &Path) -> (String, String) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let stem = if is_gzip_path(path) {
        Path::new(stem)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(stem)
    } else {
        stem
    };
    let tokens: Vec<&str> = stem.split(['_', '-']).filter(|t| !t.is_empty()).collect();
    match tokens.as_slice() {
        [first, .., last] => (first.to_string(), last.to_string()),
        _ => (stem.to_string(), stem.to_string()),
    }
}

/// Ingest files of any supported format into one lot, with default settings.
pub fn read_lot<P: AsRef<Path>>(paths: &[P], pass_bin: i64) -> Lot {
    read_lot_with_config(paths, &ReaderConfig::default().with_pass_bin(pass_bin))
}

/// Ingest files of any supported format into one lot.
///
/// Each file is sniffed and handed to its reader; a file that cannot be
/// classified or parsed is logged and skipped. The lot reflects everything
/// that could be read; check `wafers`/`params` for emptiness.
pub fn read_lot_with_config<P: AsRef<Path>>(paths: &[P], config: &ReaderConfig) -> Lot {
    let mut lot = Lot::new("", config.pass_bin);

    for path in paths {
        let path = path.as_ref();
        let kind = match detect_format(path) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping file");
                continue;
            }
        };
        match reader_for(kind, config.clone()).read_file(path) {
            Ok(contents) => {
                info!(
                    file = %path.display(),
                    format = %kind,
                    wafers = contents.wafers.len(),
                    params = contents.params.len(),
                    "file read"
                );
                lot.absorb(contents);
            }
            Err(e) => warn!(file = %path.display(), format = %kind, error = %e, "skipping file"),
        }
    }

    let dies = lot.refresh_combined().len();
    info!(
        lot = %lot.lot_id,
        wafers = lot.wafers.len(),
        params = lot.params.len(),
        dies,
        "lot assembled"
    );
    lot
}
