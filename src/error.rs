//! Error kinds raised while ingesting CP test files.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// No format handler claims the file.
    #[error("Unrecognized format for {}: {detail}", path.display())]
    UnrecognizedFormat { path: PathBuf, detail: String },

    /// Parameter header or limit rows are missing.
    #[error("Metadata not found in {}: {what}", path.display())]
    MetadataNotFound { path: PathBuf, what: String },

    /// Declared die count does not fit the rows that follow the marker.
    #[error("Malformed wafer block '{wafer}' at row {row}: declared {declared} dies, {available} rows available")]
    MalformedWaferBlock {
        wafer: String,
        row: usize,
        declared: usize,
        available: usize,
    },

    /// A cell could not be read as a number.
    #[error("Cannot convert '{text}' at row {row}, column {column}")]
    ValueConversion {
        row: usize,
        column: usize,
        text: String,
    },

    #[error("Duplicate parameter id: {0}")]
    DuplicateParameterId(String),

    /// A calculated parameter formula failed.
    #[error("Formula for '{id}' failed: {message}")]
    Formula { id: String, message: String },

    #[error("Unknown cleaning method: {0}")]
    UnknownCleanMethod(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = IngestError::MalformedWaferBlock {
            wafer: "03".into(),
            row: 12,
            declared: 50,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("'03'"));
        assert!(msg.contains("row 12"));
        assert!(msg.contains("declared 50"));
    }

    #[test]
    fn test_unrecognized_format_names_path() {
        let err = IngestError::UnrecognizedFormat {
            path: PathBuf::from("lot/a.dat"),
            detail: "extension 'dat'".into(),
        };
        assert!(err.to_string().contains("lot/a.dat"));
    }
}
