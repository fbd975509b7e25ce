//! Unit normalizer: splits `"3.3mV"`-style text into value and unit, and
//! scales SI-prefixed units to their canonical base unit.

use std::sync::LazyLock;

use regex::Regex;

use crate::reader::Cell;

/// Leading numeric literal followed by an optional unit token.
static VALUE_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-zμµΩ%/]*)")
        .expect("valid value/unit pattern")
});

/// SI magnitude prefixes. `m`/`M` are distinct (milli/mega).
const PREFIXES: &[(char, f64)] = &[
    ('f', 1e-15),
    ('p', 1e-12),
    ('n', 1e-9),
    ('u', 1e-6),
    ('μ', 1e-6),
    ('µ', 1e-6),
    ('m', 1e-3),
    ('k', 1e3),
    ('K', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
];

/// Unprefixed units, including plural and long forms.
const BASE_UNITS: &[&str] = &[
    "V", "A", "Ohm", "OHM", "ohm", "Ω", "Hz", "HZ", "F", "s", "S", "H", "W", "%",
    "Volt", "Volts", "Amp", "Amps", "Ampere", "Amperes", "Ohms", "ohms", "Farad",
    "Farads", "Henry", "Henries", "Sec", "sec", "Second", "Seconds", "Siemens",
    "Watt", "Watts",
];

fn is_base_unit(token: &str) -> bool {
    // "A/s" counts as a base unit when its numerator does.
    let numerator = token.split('/').next().unwrap_or(token);
    !numerator.is_empty() && BASE_UNITS.contains(&numerator)
}

/// Split a unit into (multiplier, base unit) when it carries a known prefix.
fn split_prefix(unit: &str) -> Option<(f64, &str)> {
    let unit = unit.trim();
    if unit.is_empty() || is_base_unit(unit) {
        return None;
    }
    let mut chars = unit.chars();
    let first = chars.next()?;
    let rest = chars.as_str();
    if !is_base_unit(rest) {
        return None;
    }
    PREFIXES
        .iter()
        .find(|(p, _)| *p == first)
        .map(|(_, m)| (*m, rest))
}

/// Split text into a leading numeric literal and the unit token after it.
///
/// Returns `(None, "")` when the text does not start with a number.
pub fn extract_value_and_unit(text: &str) -> (Option<f64>, String) {
    let Some(caps) = VALUE_UNIT.captures(text) else {
        return (None, String::new());
    };
    let value = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
    match value {
        Some(v) => (
            Some(v),
            caps.get(2).map_or_else(String::new, |m| m.as_str().to_string()),
        ),
        None => (None, String::new()),
    }
}

/// Multiplier of the SI prefix carried by `unit`; 1.0 for base or unknown units.
pub fn magnitude_multiplier(unit: &str) -> f64 {
    split_prefix(unit).map_or(1.0, |(m, _)| m)
}

/// The unit with any recognized prefix removed (`"mV"` -> `"V"`).
pub fn canonical_unit(unit: &str) -> String {
    match split_prefix(unit) {
        Some((_, base)) => base.to_string(),
        None => unit.trim().to_string(),
    }
}

/// Text such as `"3.3mV"` expressed in the canonical unit (`0.0033`).
pub fn parse_canonical(text: &str) -> Option<f64> {
    let (value, unit) = extract_value_and_unit(text);
    value.map(|v| v * magnitude_multiplier(&unit))
}

/// Canonical value of a cell. Bare numbers are returned unchanged.
pub fn to_canonical(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) => Some(*n),
        Cell::Text(t) => parse_canonical(t),
        Cell::Empty => None,
    }
}

/// Inverse of the multiplier step: `value` expressed in `target_unit`.
pub fn from_canonical(value: f64, target_unit: &str) -> Option<f64> {
    let multiplier = magnitude_multiplier(target_unit);
    if value.is_nan() || multiplier == 0.0 {
        return None;
    }
    Some(value / multiplier)
}

/// Canonical value of a data cell in a column whose source unit scales by
/// `column_multiplier`. A unit written inside the cell takes precedence.
pub fn canonicalize_cell(cell: &Cell, column_multiplier: f64) -> Option<f64> {
    match cell {
        Cell::Number(n) => Some(n * column_multiplier),
        Cell::Text(t) => {
            let (value, unit) = extract_value_and_unit(t);
            let value = value?;
            if unit.is_empty() {
                Some(value * column_multiplier)
            } else {
                Some(value * magnitude_multiplier(&unit))
            }
        }
        Cell::Empty => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12_f64.max(b.abs() * 1e-9)
    }

    #[test]
    fn test_extract_value_and_unit() {
        assert_eq!(extract_value_and_unit("3.3mV"), (Some(3.3), "mV".to_string()));
        assert_eq!(extract_value_and_unit(" -1.5e-3 uA"), (Some(-1.5e-3), "uA".to_string()));
        assert_eq!(extract_value_and_unit("47kOhm"), (Some(47.0), "kOhm".to_string()));
        assert_eq!(extract_value_and_unit("10"), (Some(10.0), String::new()));
        assert_eq!(extract_value_and_unit(".5A/s"), (Some(0.5), "A/s".to_string()));
    }

    #[test]
    fn test_extract_without_number() {
        assert_eq!(extract_value_and_unit("mV"), (None, String::new()));
        assert_eq!(extract_value_and_unit(""), (None, String::new()));
        assert_eq!(extract_value_and_unit("OVER"), (None, String::new()));
    }

    #[test]
    fn test_magnitude_multiplier() {
        assert_eq!(magnitude_multiplier("mV"), 1e-3);
        assert_eq!(magnitude_multiplier("MOhm"), 1e6);
        assert_eq!(magnitude_multiplier("uA"), 1e-6);
        assert_eq!(magnitude_multiplier("μA"), 1e-6);
        assert_eq!(magnitude_multiplier("nF"), 1e-9);
        assert_eq!(magnitude_multiplier("kΩ"), 1e3);
        assert_eq!(magnitude_multiplier("pA/s"), 1e-12);
        assert_eq!(magnitude_multiplier("GHz"), 1e9);
    }

    #[test]
    fn test_base_units_have_no_prefix() {
        for unit in ["V", "A", "Ohm", "Hz", "F", "s", "H", "Volts", "A/s", ""] {
            assert_eq!(magnitude_multiplier(unit), 1.0, "unit {unit:?}");
        }
    }

    #[test]
    fn test_farad_is_not_femto() {
        assert_eq!(magnitude_multiplier("F"), 1.0);
        assert_eq!(magnitude_multiplier("fF"), 1e-15);
        assert_eq!(canonical_unit("F"), "F");
    }

    #[test]
    fn test_unknown_units_fail_open() {
        assert_eq!(magnitude_multiplier("min"), 1.0);
        assert_eq!(magnitude_multiplier("dB"), 1.0);
        assert_eq!(magnitude_multiplier("m"), 1.0);
    }

    #[test]
    fn test_canonical_unit() {
        assert_eq!(canonical_unit("mV"), "V");
        assert_eq!(canonical_unit("kOhm"), "Ohm");
        assert_eq!(canonical_unit(" V "), "V");
        assert_eq!(canonical_unit("dB"), "dB");
    }

    #[test]
    fn test_to_canonical() {
        assert!(approx(parse_canonical("3.3mV").unwrap(), 0.0033));
        assert_eq!(parse_canonical("10.0"), Some(10.0));
        assert_eq!(parse_canonical("n/a"), None);
        assert_eq!(to_canonical(&Cell::Number(0.25)), Some(0.25));
        assert_eq!(to_canonical(&Cell::Empty), None);
        assert!(approx(to_canonical(&Cell::Text("100uA".into())).unwrap(), 1e-4));
    }

    #[test]
    fn test_from_canonical() {
        assert!(approx(from_canonical(0.0033, "mV").unwrap(), 3.3));
        assert_eq!(from_canonical(2.0, "V"), Some(2.0));
        assert_eq!(from_canonical(f64::NAN, "V"), None);
    }

    #[test]
    fn test_canonicalize_cell_prefers_cell_unit() {
        assert!(approx(canonicalize_cell(&Cell::Text("5".into()), 1e-6).unwrap(), 5e-6));
        assert!(approx(canonicalize_cell(&Cell::Text("5mA".into()), 1e-6).unwrap(), 5e-3));
        assert!(approx(canonicalize_cell(&Cell::Number(2.0), 1e-3).unwrap(), 2e-3));
        assert_eq!(canonicalize_cell(&Cell::Text("FAIL".into()), 1.0), None);
    }

    const SUPPORTED: &[&str] = &["f", "p", "n", "u", "μ", "m", "k", "M", "G", "T"];

    proptest! {
        #[test]
        fn prop_round_trip(value in -1.0e6f64..1.0e6, idx in 0usize..SUPPORTED.len()) {
            let unit = format!("{}V", SUPPORTED[idx]);
            let canonical = parse_canonical(&format!("{value}{unit}")).unwrap();
            let back = from_canonical(canonical, &unit).unwrap();
            let again = parse_canonical(&format!("{back}{unit}")).unwrap();
            prop_assert!(approx(again, canonical));
        }

        #[test]
        fn prop_prefix_is_unit_independent(idx in 0usize..SUPPORTED.len()) {
            let p = SUPPORTED[idx];
            prop_assert_eq!(
                magnitude_multiplier(&format!("{p}V")),
                magnitude_multiplier(&format!("{p}A"))
            );
        }
    }
}
