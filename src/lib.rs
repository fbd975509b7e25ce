//! cp-ingest: reads circuit-probe test files from several legacy layouts,
//! normalizes units, and assembles wafers into one lot with a combined
//! per-die table. Optional Python bindings.

pub mod assembler;
pub mod clean;
pub mod columns;
pub mod config;
pub mod error;
pub mod export;
pub mod parser;
pub mod reader;
pub mod sniff;
pub mod stats;
pub mod types;
pub mod units;

#[cfg(feature = "python")]
mod python;

pub use assembler::combine;
pub use clean::{add_calculated_parameter, clean, CleanMethod, CleanReport};
pub use config::{LimitDirection, LimitPolicy, ReaderConfig};
pub use error::{IngestError, Result};
pub use parser::{read_lot, read_lot_with_config, FormatReader};
pub use sniff::detect_format;
pub use types::{ChipData, CombinedTable, FormatKind, Lot, ParamStats, Parameter, Wafer};
