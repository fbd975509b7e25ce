//! Table-driven classification of header cells, metadata row labels and
//! preamble keys. Matching ignores case and punctuation (`"No.U"` == `"NOU"`).

/// Role of a column in a parameter header row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Sequence,
    Bin,
    X,
    Y,
    Parameter,
    Ignored,
}

impl ColumnRole {
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ColumnRole::Sequence | ColumnRole::Bin | ColumnRole::X | ColumnRole::Y
        )
    }
}

const HEADER_ROLES: &[(&str, ColumnRole)] = &[
    ("NO", ColumnRole::Sequence),
    ("NOU", ColumnRole::Sequence),
    ("SEQ", ColumnRole::Sequence),
    ("SEQNO", ColumnRole::Sequence),
    ("SERIAL", ColumnRole::Sequence),
    ("SERIALNO", ColumnRole::Sequence),
    ("DIENO", ColumnRole::Sequence),
    ("CHIPNO", ColumnRole::Sequence),
    ("DUT", ColumnRole::Sequence),
    ("INDEX", ColumnRole::Sequence),
    ("BIN", ColumnRole::Bin),
    ("HBIN", ColumnRole::Bin),
    ("HARDBIN", ColumnRole::Bin),
    ("SBIN", ColumnRole::Bin),
    ("SOFTBIN", ColumnRole::Bin),
    ("BINNO", ColumnRole::Bin),
    ("CATEGORY", ColumnRole::Bin),
    ("CAT", ColumnRole::Bin),
    ("X", ColumnRole::X),
    ("XADR", ColumnRole::X),
    ("XCOORD", ColumnRole::X),
    ("XPOS", ColumnRole::X),
    ("DIEX", ColumnRole::X),
    ("Y", ColumnRole::Y),
    ("YADR", ColumnRole::Y),
    ("YCOORD", ColumnRole::Y),
    ("YPOS", ColumnRole::Y),
    ("DIEY", ColumnRole::Y),
    ("SITE", ColumnRole::Ignored),
    ("SITENO", ColumnRole::Ignored),
    ("TIME", ColumnRole::Ignored),
    ("TESTTIME", ColumnRole::Ignored),
    ("PF", ColumnRole::Ignored),
    ("PASSFAIL", ColumnRole::Ignored),
    ("WAFER", ColumnRole::Ignored),
    ("WAFERID", ColumnRole::Ignored),
    ("LOT", ColumnRole::Ignored),
    ("LOTID", ColumnRole::Ignored),
];

/// Kinds of labelled metadata rows following a parameter header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaRow {
    Unit,
    LowerLimit,
    UpperLimit,
    /// One limit whose direction comes from the limit policy.
    SingleLimit,
    Condition,
}

const META_LABELS: &[(&str, MetaRow)] = &[
    ("UNIT", MetaRow::Unit),
    ("UNITS", MetaRow::Unit),
    ("LIMITL", MetaRow::LowerLimit),
    ("SL", MetaRow::LowerLimit),
    ("LSL", MetaRow::LowerLimit),
    ("MIN", MetaRow::LowerLimit),
    ("LOWER", MetaRow::LowerLimit),
    ("LOLIMIT", MetaRow::LowerLimit),
    ("LOLIM", MetaRow::LowerLimit),
    ("LIMITU", MetaRow::UpperLimit),
    ("SU", MetaRow::UpperLimit),
    ("USL", MetaRow::UpperLimit),
    ("MAX", MetaRow::UpperLimit),
    ("UPPER", MetaRow::UpperLimit),
    ("HILIMIT", MetaRow::UpperLimit),
    ("HILIM", MetaRow::UpperLimit),
    ("LIMIT", MetaRow::SingleLimit),
    ("SPEC", MetaRow::SingleLimit),
];

const CONDITION_PREFIXES: &[&str] = &["BIAS", "COND"];

/// Keys recognized in the key/value preamble above the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreambleKey {
    Lot,
    Product,
    Wafer,
}

const PREAMBLE_KEYS: &[(&str, PreambleKey)] = &[
    ("LOT", PreambleKey::Lot),
    ("LOTID", PreambleKey::Lot),
    ("LOTNO", PreambleKey::Lot),
    ("LOTNUMBER", PreambleKey::Lot),
    ("DEVICE", PreambleKey::Product),
    ("DEVICENAME", PreambleKey::Product),
    ("PRODUCT", PreambleKey::Product),
    ("PRODUCTNAME", PreambleKey::Product),
    ("PARTTYPE", PreambleKey::Product),
    ("WAFER", PreambleKey::Wafer),
    ("WAFERID", PreambleKey::Wafer),
    ("WAFERNO", PreambleKey::Wafer),
];

/// Uppercase alphanumerics only.
pub fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn lookup<T: Copy>(table: &[(&str, T)], key: &str) -> Option<T> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Role of one header cell. Empty cells and continuation markers
/// (e.g. `SAME`) are ignored; unknown names are parameters.
pub fn classify_header(cell: &str, continuation_markers: &[String]) -> ColumnRole {
    let trimmed = cell.trim();
    if trimmed.is_empty()
        || continuation_markers
            .iter()
            .any(|m| m.eq_ignore_ascii_case(trimmed))
    {
        return ColumnRole::Ignored;
    }
    let key = normalize_label(trimmed);
    if key.is_empty() {
        return ColumnRole::Ignored;
    }
    lookup(HEADER_ROLES, &key).unwrap_or(ColumnRole::Parameter)
}

pub fn classify_meta_label(label: &str) -> Option<MetaRow> {
    let key = normalize_label(label);
    if key.is_empty() {
        return None;
    }
    if CONDITION_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return Some(MetaRow::Condition);
    }
    lookup(META_LABELS, &key)
}

pub fn classify_preamble_key(label: &str) -> Option<PreambleKey> {
    lookup(PREAMBLE_KEYS, &normalize_label(label))
}
