//! PyO3 bindings: exposes `read_lot_rs()` and the data model to Python.

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::clean::{clean, CleanMethod, DEFAULT_THRESHOLD};
use crate::export::write_cleaned_file;
use crate::parser;
use crate::stats::compute_statistics;
use crate::types::{Lot, ParamStats, Parameter, Wafer};

/// Read CP test files of any supported format into one lot.
///
/// Files that cannot be read are skipped (see the log).
#[pyfunction]
#[pyo3(signature = (paths, pass_bin = 1))]
fn read_lot_rs(paths: Vec<String>, pass_bin: i64) -> Lot {
    let mut lot = parser::read_lot(paths.as_slice(), pass_bin);
    compute_statistics(&mut lot);
    lot
}

#[pymethods]
impl Lot {
    /// Rows in the combined table.
    fn combined_len(&self) -> usize {
        self.combined.as_ref().map_or(0, |t| t.len())
    }

    /// One combined-table column, `None` for missing values.
    fn combined_column(&self, id: &str) -> Option<Vec<Option<f64>>> {
        self.combined.as_ref()?.column(id).map(<[_]>::to_vec)
    }

    #[pyo3(name = "clean", signature = (method = "IQR", threshold = DEFAULT_THRESHOLD))]
    fn py_clean(&mut self, method: &str, threshold: f64) -> PyResult<usize> {
        let method: CleanMethod = method
            .parse()
            .map_err(|e: crate::error::IngestError| PyValueError::new_err(e.to_string()))?;
        let report = clean(self, method, threshold);
        compute_statistics(self);
        Ok(report.total())
    }

    /// Write the cleaned hand-off CSV.
    #[pyo3(signature = (path, priority = Vec::new()))]
    fn write_cleaned(&self, path: &str, priority: Vec<String>) -> PyResult<()> {
        write_cleaned_file(self, path, &priority).map_err(|e| PyIOError::new_err(e.to_string()))
    }
}

#[pymethods]
impl Wafer {
    fn column(&self, id: &str) -> Option<Vec<Option<f64>>> {
        self.chip_data.column(id).map(<[_]>::to_vec)
    }

    fn param_ids(&self) -> Vec<String> {
        self.chip_data.ids().map(str::to_string).collect()
    }
}

/// Python module: cp_ingest
#[pymodule]
fn cp_ingest(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(read_lot_rs, m)?)?;
    m.add_class::<Lot>()?;
    m.add_class::<Wafer>()?;
    m.add_class::<Parameter>()?;
    m.add_class::<ParamStats>()?;
    Ok(())
}
