//! Lot / wafer / parameter data model.

#[cfg(feature = "python")]
use pyo3::prelude::*;
use std::fmt;
use std::path::PathBuf;

/// Source file layouts the sniffer can tell apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// Tab or fixed-width DCP text.
    DcpText,
    /// Comma-delimited CW export, single- or multi-wafer.
    CwText,
    /// Native spreadsheet (xls/xlsx).
    MexSpreadsheet,
    /// Spreadsheet content behind a `.txt` extension.
    DisguisedSpreadsheet,
}

impl FormatKind {
    pub fn name(self) -> &'static str {
        match self {
            FormatKind::DcpText => "DCP_TEXT",
            FormatKind::CwText => "CW_TEXT",
            FormatKind::MexSpreadsheet => "MEX_SPREADSHEET",
            FormatKind::DisguisedSpreadsheet => "DISGUISED_SPREADSHEET",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary statistics, filled in after aggregation.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "python", pyclass)]
pub struct ParamStats {
    /// Number of non-null values.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub count: usize,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub mean: Option<f64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub std_dev: Option<f64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub median: Option<f64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub min: Option<f64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub max: Option<f64>,
    /// Percentage of non-null values inside the spec limits.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub yield_pct: Option<f64>,
}

/// One measured quantity tracked across every die of a lot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "python", pyclass)]
pub struct Parameter {
    /// Unique within a lot.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub id: String,
    /// Display/group name as written in the source header.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub name: String,
    /// Canonical (unprefixed) unit.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub unit: String,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub lower_limit: Option<f64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub upper_limit: Option<f64>,
    /// Test conditions, verbatim and in source order.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub conditions: Vec<String>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub stats: Option<ParamStats>,
}

impl Parameter {
    pub fn new(id: impl Into<String>, unit: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            unit: unit.into(),
            lower_limit: None,
            upper_limit: None,
            conditions: Vec::new(),
            stats: None,
        }
    }

    pub fn with_limits(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_limit = lower;
        self.upper_limit = upper;
        self
    }

    pub fn has_limits(&self) -> bool {
        self.lower_limit.is_some() || self.upper_limit.is_some()
    }

    /// True when `value` satisfies every limit that is set.
    pub fn within_limits(&self, value: f64) -> bool {
        self.lower_limit.map_or(true, |lo| value >= lo)
            && self.upper_limit.map_or(true, |hi| value <= hi)
    }

    /// Same definition, ignoring derived statistics.
    pub fn same_definition(&self, other: &Parameter) -> bool {
        self.id == other.id
            && self.unit == other.unit
            && self.lower_limit == other.lower_limit
            && self.upper_limit == other.upper_limit
            && self.conditions == other.conditions
    }
}

/// Per-die values keyed by parameter id, in insertion order.
/// Missing or untestable cells are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChipData {
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl ChipData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column, replacing any column with the same id.
    pub fn insert(&mut self, id: impl Into<String>, values: Vec<Option<f64>>) {
        let id = id.into();
        match self.columns.iter_mut().find(|(k, _)| *k == id) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((id, values)),
        }
    }

    pub fn column(&self, id: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.as_slice())
    }

    pub fn column_mut(&mut self, id: &str) -> Option<&mut Vec<Option<f64>>> {
        self.columns
            .iter_mut()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.columns.iter().any(|(k, _)| k == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Die-level results of one physical wafer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "python", pyclass)]
pub struct Wafer {
    #[cfg_attr(feature = "python", pyo3(get))]
    pub wafer_id: String,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub source: PathBuf,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub seq: Vec<i64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub bin: Vec<i64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub x: Vec<i64>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub y: Vec<i64>,
    pub chip_data: ChipData,

    // Filled in by `stats::compute_statistics`, never by a reader.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub pass_count: Option<usize>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub fail_count: Option<usize>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub yield_pct: Option<f64>,
}

impl Wafer {
    pub fn new(wafer_id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            wafer_id: wafer_id.into(),
            source: source.into(),
            seq: Vec::new(),
            bin: Vec::new(),
            x: Vec::new(),
            y: Vec::new(),
            chip_data: ChipData::new(),
            pass_count: None,
            fail_count: None,
            yield_pct: None,
        }
    }

    pub fn chip_count(&self) -> usize {
        self.seq.len()
    }

    /// (width, height) in dies, from the coordinate range.
    pub fn extent(&self) -> Option<(i64, i64)> {
        let (min_x, max_x) = min_max(&self.x)?;
        let (min_y, max_y) = min_max(&self.y)?;
        Some((max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Check that every per-die sequence has `chip_count` entries.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.chip_count();
        for (name, len) in [("bin", self.bin.len()), ("x", self.x.len()), ("y", self.y.len())] {
            if len != n {
                return Err(format!("wafer {}: {} has {} entries, expected {}", self.wafer_id, name, len, n));
            }
        }
        for (id, values) in self.chip_data.iter() {
            if values.len() != n {
                return Err(format!(
                    "wafer {}: column {} has {} entries, expected {}",
                    self.wafer_id,
                    id,
                    values.len(),
                    n
                ));
            }
        }
        Ok(())
    }
}

fn min_max(values: &[i64]) -> Option<(i64, i64)> {
    let min = *values.iter().min()?;
    let max = *values.iter().max()?;
    Some((min, max))
}

/// Position of a combined-table row in its wafer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DieRef {
    pub wafer: usize,
    pub die: usize,
}

/// Lot-wide table: one row per die across every wafer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CombinedTable {
    pub wafer_id: Vec<String>,
    pub seq: Vec<i64>,
    pub bin: Vec<i64>,
    pub x: Vec<i64>,
    pub y: Vec<i64>,
    /// One column per lot parameter, in lot order.
    pub data: ChipData,
    /// Source wafer/die of each row.
    pub origin: Vec<DieRef>,
}

impl CombinedTable {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn column(&self, id: &str) -> Option<&[Option<f64>]> {
        self.data.column(id)
    }
}

/// One test batch: the aggregate root owning wafers and parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "python", pyclass)]
pub struct Lot {
    #[cfg_attr(feature = "python", pyo3(get))]
    pub lot_id: String,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub product: String,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub pass_bin: i64,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub params: Vec<Parameter>,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub wafers: Vec<Wafer>,

    // Rebuilt by `Lot::refresh_combined`.
    pub combined: Option<CombinedTable>,
}

impl Lot {
    pub fn new(lot_id: impl Into<String>, pass_bin: i64) -> Self {
        Self {
            lot_id: lot_id.into(),
            product: String::new(),
            pass_bin,
            params: Vec::new(),
            wafers: Vec::new(),
            combined: None,
        }
    }

    pub fn parameter(&self, id: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.id == id)
    }

    pub fn has_parameter(&self, id: &str) -> bool {
        self.parameter(id).is_some()
    }

    pub fn wafer(&self, wafer_id: &str) -> Option<&Wafer> {
        self.wafers.iter().find(|w| w.wafer_id == wafer_id)
    }

    /// Sum of die counts over all wafers.
    pub fn chip_count(&self) -> usize {
        self.wafers.iter().map(Wafer::chip_count).sum()
    }
}
