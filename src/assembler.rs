//! Lot assembly: registers parameters and wafers, and projects every
//! wafer into the lot-wide combined table.

use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::parser::FileContents;
use crate::types::{ChipData, CombinedTable, DieRef, Lot, Parameter, Wafer};

/// First id not rejected by `taken`: `base`, then `base2`, `base3`, ...
pub fn unique_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

impl Lot {
    /// Id derived from `base` that no registered parameter uses yet.
    pub fn unique_parameter_id(&self, base: &str) -> String {
        unique_id(base, |id| self.has_parameter(id))
    }

    /// Register one parameter; an existing id is rejected, never merged.
    pub fn register_parameter(&mut self, param: Parameter) -> Result<()> {
        if self.has_parameter(&param.id) {
            return Err(IngestError::DuplicateParameterId(param.id));
        }
        self.params.push(param);
        Ok(())
    }

    /// Register parameters read from a file. Re-registering an identical
    /// definition is a no-op; a conflicting one is rejected with a warning.
    /// Returns the ids that were rejected.
    pub fn append_parameters(&mut self, params: Vec<Parameter>) -> Vec<String> {
        let mut rejected = Vec::new();
        for param in params {
            match self.parameter(&param.id) {
                Some(existing) if existing.same_definition(&param) => {
                    debug!(param = %param.id, "parameter already registered");
                }
                Some(_) => {
                    let err = IngestError::DuplicateParameterId(param.id.clone());
                    warn!(lot = %self.lot_id, "{}; keeping the first definition", err);
                    rejected.push(param.id);
                }
                None => self.params.push(param),
            }
        }
        rejected
    }

    /// Append a wafer; a clashing wafer id gets a numeric suffix.
    /// Returns the id the wafer was stored under, or `None` when its per-die
    /// sequences disagree in length and it was rejected.
    pub fn append_wafer(&mut self, mut wafer: Wafer) -> Option<String> {
        if let Err(reason) = wafer.validate() {
            warn!(
                lot = %self.lot_id,
                source = %wafer.source.display(),
                reason = %reason,
                "inconsistent wafer rejected"
            );
            return None;
        }
        if self.wafer(&wafer.wafer_id).is_some() {
            let renamed = unique_id(&wafer.wafer_id, |id| self.wafer(id).is_some());
            warn!(
                lot = %self.lot_id,
                wafer = %wafer.wafer_id,
                source = %wafer.source.display(),
                renamed = %renamed,
                "duplicate wafer id"
            );
            wafer.wafer_id = renamed;
        }
        let id = wafer.wafer_id.clone();
        self.wafers.push(wafer);
        Some(id)
    }

    /// Merge everything one reader produced for a single file.
    pub fn absorb(&mut self, contents: FileContents) {
        if self.lot_id.is_empty() {
            self.lot_id = contents.lot_id;
        }
        if self.product.is_empty() {
            self.product = contents.product;
        }
        self.append_parameters(contents.params);
        for wafer in contents.wafers {
            self.append_wafer(wafer);
        }
    }

    /// Rebuild the stored combined table and return it.
    pub fn refresh_combined(&mut self) -> &CombinedTable {
        let table = combine(self);
        self.combined.insert(table)
    }
}

/// Concatenate every wafer into one table: wafer-append order, then
/// sequence order within each wafer. One column per lot parameter; a wafer
/// without that column contributes nulls. Pure: the lot is not touched.
pub fn combine(lot: &Lot) -> CombinedTable {
    let total = lot.chip_count();
    let mut table = CombinedTable {
        wafer_id: Vec::with_capacity(total),
        seq: Vec::with_capacity(total),
        bin: Vec::with_capacity(total),
        x: Vec::with_capacity(total),
        y: Vec::with_capacity(total),
        data: ChipData::new(),
        origin: Vec::with_capacity(total),
    };

    for (w, wafer) in lot.wafers.iter().enumerate() {
        if let Err(reason) = wafer.validate() {
            warn!(lot = %lot.lot_id, reason = %reason, "inconsistent wafer left out of the combined table");
            continue;
        }
        let mut order: Vec<usize> = (0..wafer.chip_count()).collect();
        order.sort_by_key(|&i| wafer.seq[i]);
        for i in order {
            table.wafer_id.push(wafer.wafer_id.clone());
            table.seq.push(wafer.seq[i]);
            table.bin.push(wafer.bin[i]);
            table.x.push(wafer.x[i]);
            table.y.push(wafer.y[i]);
            table.origin.push(DieRef { wafer: w, die: i });
        }
    }

    for param in &lot.params {
        let columns: Vec<Option<&[Option<f64>]>> = lot
            .wafers
            .iter()
            .map(|wafer| wafer.chip_data.column(&param.id))
            .collect();
        let values = table
            .origin
            .iter()
            .map(|r| columns[r.wafer].and_then(|col| col.get(r.die).copied().flatten()))
            .collect();
        table.data.insert(param.id.clone(), values);
    }

    table
}
