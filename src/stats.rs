//! Minimal aggregation over the combined table: per-parameter summaries
//! and per-wafer pass/fail counts.

use tracing::debug;

use crate::assembler::combine;
use crate::types::{Lot, ParamStats};

/// Quantile `q` in `[0, 1]` of sorted values, linearly interpolated.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Non-null, finite values of a column, sorted ascending.
pub fn sorted_values(values: &[Option<f64>]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().flatten().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Summary of one column; `within` decides whether a value passes the limits.
pub fn describe(values: &[Option<f64>], within: impl Fn(f64) -> bool) -> ParamStats {
    let sorted = sorted_values(values);
    let passing = sorted.iter().filter(|&&v| within(v)).count();
    ParamStats {
        count: sorted.len(),
        mean: mean(&sorted),
        std_dev: std_dev(&sorted),
        median: quantile(&sorted, 0.5),
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        yield_pct: (!sorted.is_empty()).then(|| passing as f64 * 100.0 / sorted.len() as f64),
    }
}

/// Fill in `Parameter::stats` from the combined table and each wafer's
/// pass/fail counts from `lot.pass_bin`.
pub fn compute_statistics(lot: &mut Lot) {
    let table = match lot.combined.take() {
        Some(table) => table,
        None => combine(lot),
    };

    for param in &mut lot.params {
        let stats = match table.column(&param.id) {
            Some(values) => describe(values, |v| param.within_limits(v)),
            None => ParamStats::default(),
        };
        param.stats = Some(stats);
    }

    let pass_bin = lot.pass_bin;
    for wafer in &mut lot.wafers {
        let total = wafer.chip_count();
        let pass = wafer.bin.iter().filter(|&&b| b == pass_bin).count();
        wafer.pass_count = Some(pass);
        wafer.fail_count = Some(total - pass);
        wafer.yield_pct = (total > 0).then(|| pass as f64 * 100.0 / total as f64);
        debug!(wafer = %wafer.wafer_id, pass, total, "wafer yield");
    }

    lot.combined = Some(table);
}
