//! Cleaned hand-off file: identity columns, priority parameters, then the
//! remaining parameters alphabetically.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::assembler::combine;
use crate::error::Result;
use crate::types::Lot;

pub const IDENTITY_COLUMNS: [&str; 6] = ["LotID", "WaferID", "Seq", "Bin", "X", "Y"];

/// `d.dde±XX`: at least two exponent digits, always signed.
fn scientific(value: f64, decimals: usize) -> String {
    let raw = format!("{:.*e}", decimals, value);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => raw,
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Three significant digits, shortest form (`%.3g`).
fn general3(value: f64) -> String {
    let sci = format!("{:.2e}", value);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if !(-4..3).contains(&exp) {
        let s = scientific(value, 2);
        match s.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
            None => s,
        }
    } else {
        let decimals = (2 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

/// Cell text for the cleaned file: `9.90e-05`, `0.50`, `123`, `1.23e+04`;
/// empty for missing values.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => {
            let magnitude = v.abs();
            if v == 0.0 {
                "0.00".to_string()
            } else if magnitude < 1e-4 {
                scientific(v, 2)
            } else if magnitude < 10.0 {
                format!("{:.2}", v)
            } else {
                general3(v)
            }
        }
        _ => String::new(),
    }
}

/// Parameter ids in output order: `priority` ids present in the lot (in
/// that order), then the rest sorted alphabetically.
pub fn cleaned_columns(lot: &Lot, priority: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for id in priority {
        if lot.has_parameter(id) && !columns.contains(id) {
            columns.push(id.clone());
        }
    }
    let mut rest: Vec<String> = lot
        .params
        .iter()
        .map(|p| p.id.clone())
        .filter(|id| !columns.contains(id))
        .collect();
    rest.sort();
    columns.extend(rest);
    columns
}

/// Write the combined table of `lot` as the cleaned CSV file.
pub fn write_cleaned<W: Write>(lot: &Lot, writer: W, priority: &[String]) -> Result<()> {
    let owned;
    let table = match &lot.combined {
        Some(table) => table,
        None => {
            owned = combine(lot);
            &owned
        }
    };
    let columns = cleaned_columns(lot, priority);

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(IDENTITY_COLUMNS.iter().copied().chain(columns.iter().map(String::as_str)))?;

    let data: Vec<Option<&[Option<f64>]>> = columns.iter().map(|id| table.column(id)).collect();
    for row in 0..table.len() {
        let mut record = vec![
            lot.lot_id.clone(),
            table.wafer_id[row].clone(),
            table.seq[row].to_string(),
            table.bin[row].to_string(),
            table.x[row].to_string(),
            table.y[row].to_string(),
        ];
        record.extend(
            data.iter()
                .map(|col| format_value(col.and_then(|c| c.get(row).copied().flatten()))),
        );
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_cleaned_file<P: AsRef<Path>>(lot: &Lot, path: P, priority: &[String]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_cleaned(lot, BufWriter::new(file), priority)?;
    info!(lot = %lot.lot_id, file = %path.display(), "cleaned file written");
    Ok(())
}
