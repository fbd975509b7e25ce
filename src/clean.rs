//! Cleaning and derived parameters over the combined table.
//!
//! Both operations write through to the wafers' own chip data and then
//! rebuild the combined table, so wafer-level and lot-level views agree.
//! Rows are never removed.

use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use crate::assembler::combine;
use crate::error::{IngestError, Result};
use crate::stats::{mean, quantile, sorted_values, std_dev};
use crate::types::{CombinedTable, Lot, Parameter};

/// Default sigma multiplier for [`CleanMethod::StdDev`].
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Tukey fence multiplier for [`CleanMethod::Iqr`].
const IQR_FENCE: f64 = 1.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanMethod {
    /// `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
    Iqr,
    /// `[mean - threshold * sigma, mean + threshold * sigma]`.
    StdDev,
}

impl FromStr for CleanMethod {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IQR" => Ok(CleanMethod::Iqr),
            "STD_DEV" | "STDDEV" | "STD" | "SIGMA" => Ok(CleanMethod::StdDev),
            _ => Err(IngestError::UnknownCleanMethod(s.to_string())),
        }
    }
}

impl fmt::Display for CleanMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanMethod::Iqr => "IQR",
            CleanMethod::StdDev => "STD_DEV",
        })
    }
}

/// Inclusive bounds outside which a value is an outlier. `None` when the
/// column has too few values to estimate them.
pub fn outlier_bounds(sorted: &[f64], method: CleanMethod, threshold: f64) -> Option<(f64, f64)> {
    match method {
        CleanMethod::Iqr => {
            let q1 = quantile(sorted, 0.25)?;
            let q3 = quantile(sorted, 0.75)?;
            let iqr = q3 - q1;
            Some((q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr))
        }
        CleanMethod::StdDev => {
            let m = mean(sorted)?;
            let sd = std_dev(sorted)?;
            Some((m - threshold * sd, m + threshold * sd))
        }
    }
}

/// Cells nulled by one [`clean`] pass, per parameter id in lot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CleanReport {
    pub nulled: Vec<(String, usize)>,
}

impl CleanReport {
    pub fn total(&self) -> usize {
        self.nulled.iter().map(|(_, n)| n).sum()
    }

    pub fn nulled_in(&self, id: &str) -> usize {
        self.nulled
            .iter()
            .find(|(p, _)| p == id)
            .map_or(0, |(_, n)| *n)
    }
}

/// Replace out-of-bound values with null, column by column.
pub fn clean(lot: &mut Lot, method: CleanMethod, threshold: f64) -> CleanReport {
    let table = combine(lot);
    let mut report = CleanReport::default();

    for param in &lot.params {
        let Some(values) = table.column(&param.id) else { continue };
        let Some((lo, hi)) = outlier_bounds(&sorted_values(values), method, threshold) else {
            report.nulled.push((param.id.clone(), 0));
            continue;
        };
        let mut nulled = 0;
        for (row, value) in values.iter().enumerate() {
            let Some(v) = value else { continue };
            if *v >= lo && *v <= hi {
                continue;
            }
            let origin = table.origin[row];
            if let Some(cell) = lot.wafers[origin.wafer]
                .chip_data
                .column_mut(&param.id)
                .and_then(|col| col.get_mut(origin.die))
            {
                *cell = None;
                nulled += 1;
            }
        }
        report.nulled.push((param.id.clone(), nulled));
    }

    lot.refresh_combined();
    info!(
        lot = %lot.lot_id,
        method = %method,
        threshold,
        nulled = report.total(),
        "outliers removed"
    );
    report
}

/// A derived column computed from the combined table.
pub type Formula = dyn Fn(&CombinedTable) -> std::result::Result<Vec<Option<f64>>, String>;

/// Register `param` and fill it from `formula`.
///
/// Fails without touching the lot when the id is taken, the formula errors,
/// or the column length does not match the table.
pub fn add_calculated_with(lot: &mut Lot, param: Parameter, formula: &Formula) -> Result<()> {
    if lot.has_parameter(&param.id) {
        let err = IngestError::DuplicateParameterId(param.id.clone());
        warn!(lot = %lot.lot_id, "{}; calculated parameter not added", err);
        return Err(err);
    }

    let table = combine(lot);
    let column = formula(&table)
        .and_then(|column| {
            if column.len() == table.len() {
                Ok(column)
            } else {
                Err(format!("produced {} values for {} rows", column.len(), table.len()))
            }
        })
        .map_err(|message| IngestError::Formula {
            id: param.id.clone(),
            message,
        });
    let column = match column {
        Ok(column) => column,
        Err(e) => {
            warn!(lot = %lot.lot_id, "{}", e);
            return Err(e);
        }
    };

    let mut per_wafer: Vec<Vec<Option<f64>>> =
        lot.wafers.iter().map(|w| vec![None; w.chip_count()]).collect();
    for (origin, value) in table.origin.iter().zip(column) {
        per_wafer[origin.wafer][origin.die] = value.filter(|v| v.is_finite());
    }
    for (wafer, values) in lot.wafers.iter_mut().zip(per_wafer) {
        wafer.chip_data.insert(param.id.clone(), values);
    }

    let id = param.id.clone();
    lot.register_parameter(param)?;
    lot.refresh_combined();
    info!(lot = %lot.lot_id, param = %id, "calculated parameter added");
    Ok(())
}

/// [`add_calculated_with`] for a unit-less parameter named `id`.
pub fn add_calculated_parameter<F>(lot: &mut Lot, id: &str, formula: F) -> Result<()>
where
    F: Fn(&CombinedTable) -> std::result::Result<Vec<Option<f64>>, String> + 'static,
{
    add_calculated_with(lot, Parameter::new(id, ""), &formula)
}

/// A parameter definition paired with the formula that fills it.
pub struct CalculatedParameter {
    pub param: Parameter,
    pub formula: Box<Formula>,
}

impl CalculatedParameter {
    pub fn new<F>(param: Parameter, formula: F) -> Self
    where
        F: Fn(&CombinedTable) -> std::result::Result<Vec<Option<f64>>, String> + 'static,
    {
        Self {
            param,
            formula: Box::new(formula),
        }
    }
}

/// Add several calculated parameters in order. A failing one is logged and
/// skipped; the rest still run. Returns the ids that were added.
pub fn apply_calculated_parameters(lot: &mut Lot, specs: Vec<CalculatedParameter>) -> Vec<String> {
    let mut added = Vec::new();
    for spec in specs {
        let id = spec.param.id.clone();
        if add_calculated_with(lot, spec.param, &*spec.formula).is_ok() {
            added.push(id);
        }
    }
    added
}

fn column<'a>(table: &'a CombinedTable, id: &str) -> std::result::Result<&'a [Option<f64>], String> {
    table.column(id).ok_or_else(|| format!("unknown parameter '{}'", id))
}

/// `numerator / denominator`; null where either side is null or the
/// denominator is zero.
pub fn ratio(
    numerator: &str,
    denominator: &str,
) -> impl Fn(&CombinedTable) -> std::result::Result<Vec<Option<f64>>, String> {
    let (num, den) = (numerator.to_string(), denominator.to_string());
    move |table| {
        let a = column(table, &num)?;
        let b = column(table, &den)?;
        Ok(a.iter()
            .zip(b)
            .map(|(x, y)| match (x, y) {
                (Some(x), Some(y)) if *y != 0.0 => Some(x / y),
                _ => None,
            })
            .collect())
    }
}

/// `minuend - subtrahend`; null where either side is null.
pub fn difference(
    minuend: &str,
    subtrahend: &str,
) -> impl Fn(&CombinedTable) -> std::result::Result<Vec<Option<f64>>, String> {
    let (a_id, b_id) = (minuend.to_string(), subtrahend.to_string());
    move |table| {
        let a = column(table, &a_id)?;
        let b = column(table, &b_id)?;
        Ok(a.iter()
            .zip(b)
            .map(|(x, y)| Some((*x)? - (*y)?))
            .collect())
    }
}
