//! Format sniffer: extension first, then the container signature for `.txt`.

use std::path::Path;

use tracing::debug;

use crate::error::{IngestError, Result};
use crate::reader::{container_of, is_gzip_path, read_signature};
use crate::types::FormatKind;

const SIGNATURE_LEN: usize = 8;

/// Lower-cased extension, looking through a trailing `.gz`.
fn effective_extension(path: &Path) -> Option<String> {
    let inner = if is_gzip_path(path) {
        Path::new(path.file_stem()?)
    } else {
        path
    };
    inner
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Decide which reader handles `path`.
///
/// `.txt` files whose first bytes carry a zip or OLE2 container signature
/// are spreadsheets with a misleading extension.
pub fn detect_format(path: &Path) -> Result<FormatKind> {
    let ext = effective_extension(path);
    let kind = match ext.as_deref() {
        Some("txt") => {
            let signature = read_signature(path, SIGNATURE_LEN)?;
            match container_of(&signature) {
                Some(container) => {
                    debug!(file = %path.display(), container = ?container, "spreadsheet behind .txt");
                    FormatKind::DisguisedSpreadsheet
                }
                None => FormatKind::DcpText,
            }
        }
        Some("csv") => FormatKind::CwText,
        Some("xls" | "xlsx" | "xlsm") => FormatKind::MexSpreadsheet,
        _ => {
            let signature = read_signature(path, SIGNATURE_LEN).unwrap_or_default();
            return Err(IngestError::UnrecognizedFormat {
                path: path.to_path_buf(),
                detail: format!(
                    "extension '{}', signature [{}]",
                    ext.unwrap_or_default(),
                    hex(&signature)
                ),
            });
        }
    };
    debug!(file = %path.display(), format = %kind, "format detected");
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_extension_rules() {
        let dir = tempfile::tempdir().unwrap();
        let txt = write(dir.path(), "a_01.txt", b"No\tX\tY\tBin\n");
        let csv = write(dir.path(), "a.CSV", b"Seq,Bin,X,Y\n");
        let xlsx = write(dir.path(), "a.xlsx", b"PK\x03\x04");
        assert_eq!(detect_format(&txt).unwrap(), FormatKind::DcpText);
        assert_eq!(detect_format(&csv).unwrap(), FormatKind::CwText);
        assert_eq!(detect_format(&xlsx).unwrap(), FormatKind::MexSpreadsheet);
    }

    #[test]
    fn test_disguised_spreadsheet() {
        let dir = tempfile::tempdir().unwrap();
        let zip = write(dir.path(), "lot_01.txt", b"PK\x03\x04\x14\x00\x06\x00");
        let ole = write(dir.path(), "lot_02.txt", &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1]);
        assert_eq!(detect_format(&zip).unwrap(), FormatKind::DisguisedSpreadsheet);
        assert_eq!(detect_format(&ole).unwrap(), FormatKind::DisguisedSpreadsheet);
    }

    #[test]
    fn test_text_starting_with_pk_is_dcp() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "lot_04.txt", b"PKG:\tTO220\nNo\tX\tY\tBin\n");
        assert_eq!(detect_format(&path).unwrap(), FormatKind::DcpText);
    }

    #[test]
    fn test_gzip_looks_through_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"PK\x03\x04").unwrap();
        let path = write(dir.path(), "lot_03.txt.gz", &enc.finish().unwrap());
        assert_eq!(detect_format(&path).unwrap(), FormatKind::DisguisedSpreadsheet);
        assert_eq!(
            effective_extension(Path::new("a.csv.gz")).as_deref(),
            Some("csv")
        );
    }

    #[test]
    fn test_unrecognized_reports_extension_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.dat", b"\x00\x01");
        let err = detect_format(&path).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, IngestError::UnrecognizedFormat { .. }));
        assert!(msg.contains("'dat'"));
        assert!(msg.contains("00 01"));
    }

    #[test]
    fn test_missing_txt_is_io_error() {
        let err = detect_format(Path::new("/nonexistent/lot_01.txt")).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
