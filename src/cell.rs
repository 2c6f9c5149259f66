use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single typed cell of a table.
///
/// Numbers are stored as `f64` regardless of whether the source had an
/// integer; `Missing` stands in for empty fields, blank spreadsheet cells and
/// JSON `null`. Non-finite numbers are never produced by the parsers.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Missing,
}

/// Kind of a column, derived from the values it currently holds.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Boolean,
    Text,
    Empty,
}

/// Hashable identity of a non-missing value, used for grouping, unique
/// counts and mode.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Number(u64),
    Bool(bool),
    Text(String),
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<ValueKey> {
        match self {
            // -0.0 and 0.0 group together
            CellValue::Number(v) => Some(ValueKey::Number((*v + 0.0).to_bits())),
            CellValue::Bool(v) => Some(ValueKey::Bool(*v)),
            CellValue::Text(v) => Some(ValueKey::Text(v.clone())),
            CellValue::Missing => None,
        }
    }

    /// Parses free-form user input into a value of the given column kind.
    ///
    /// Input that does not fit the kind is kept as text, so a typo never
    /// loses what the user typed. Empty input becomes `Missing`.
    pub fn coerce(input: &str, kind: ColumnKind) -> CellValue {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return CellValue::Missing;
        }
        match kind {
            ColumnKind::Numeric => parse_number(trimmed)
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(input.to_string())),
            ColumnKind::Boolean => parse_bool(trimmed)
                .map(CellValue::Bool)
                .unwrap_or_else(|| CellValue::Text(input.to_string())),
            ColumnKind::Text => CellValue::Text(input.to_string()),
            ColumnKind::Empty => CellValue::infer(input),
        }
    }

    /// Best guess for a lone value with no column context.
    pub fn infer(input: &str) -> CellValue {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            CellValue::Missing
        } else if let Some(n) = parse_number(trimmed) {
            CellValue::Number(n)
        } else if let Some(b) = parse_bool(trimmed) {
            CellValue::Bool(b)
        } else {
            CellValue::Text(input.to_string())
        }
    }

    /// Converts a text cell to the column kind when it parses cleanly.
    /// Every other value is returned unchanged.
    pub fn conform_to(self, kind: ColumnKind) -> CellValue {
        let parsed = match (&self, kind) {
            (CellValue::Text(s), ColumnKind::Numeric) => parse_number(s.trim()).map(CellValue::Number),
            (CellValue::Text(s), ColumnKind::Boolean) => parse_bool(s.trim()).map(CellValue::Bool),
            _ => None,
        };
        parsed.unwrap_or(self)
    }

    /// JSON scalar for the HTTP API.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Number(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Text(v) => serde_json::Value::String(v.clone()),
            CellValue::Bool(v) => serde_json::Value::Bool(*v),
            CellValue::Missing => serde_json::Value::Null,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> CellValue {
        match value {
            serde_json::Value::Null => CellValue::Missing,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or(CellValue::Missing),
            serde_json::Value::String(s) if s.is_empty() => CellValue::Missing,
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(v) => write!(f, "{}", format_number(*v)),
            CellValue::Text(v) => f.write_str(v),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Missing => Ok(()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Number(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Number(v as f64)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl ColumnKind {
    /// Derives the kind of a column from its values.
    pub fn of<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> ColumnKind {
        let mut kind = ColumnKind::Empty;
        for value in values {
            let this = match value {
                CellValue::Number(_) => ColumnKind::Numeric,
                CellValue::Bool(_) => ColumnKind::Boolean,
                CellValue::Text(_) => return ColumnKind::Text,
                CellValue::Missing => continue,
            };
            kind = match kind {
                ColumnKind::Empty => this,
                k if k == this => k,
                _ => return ColumnKind::Text,
            };
        }
        kind
    }

    pub fn is_numeric(self) -> bool {
        self == ColumnKind::Numeric
    }
}

/// Orders values for display and grouping: numbers ascending, then
/// booleans, then text, then missing.
pub fn compare_values(a: &CellValue, b: &CellValue) -> Ordering {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) => 0,
            CellValue::Bool(_) => 1,
            CellValue::Text(_) => 2,
            CellValue::Missing => 3,
        }
    }
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.total_cmp(y),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Parses a finite number. `NaN` and infinities are rejected.
pub fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Integral values print without a fractional part.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_respects_column_kind() {
        assert_eq!(CellValue::coerce("20", ColumnKind::Numeric), CellValue::Number(20.0));
        assert_eq!(CellValue::coerce("abc", ColumnKind::Numeric), CellValue::Text("abc".into()));
        assert_eq!(CellValue::coerce("20", ColumnKind::Text), CellValue::Text("20".into()));
        assert_eq!(CellValue::coerce("TRUE", ColumnKind::Boolean), CellValue::Bool(true));
        assert_eq!(CellValue::coerce("  ", ColumnKind::Numeric), CellValue::Missing);
        assert_eq!(CellValue::coerce("1.5", ColumnKind::Empty), CellValue::Number(1.5));
    }

    #[test]
    fn test_non_finite_numbers_are_text() {
        assert_eq!(CellValue::infer("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(CellValue::infer("inf"), CellValue::Text("inf".into()));
    }

    #[test]
    fn test_column_kind_of() {
        let nums = [CellValue::Number(1.0), CellValue::Missing, CellValue::Number(2.0)];
        assert_eq!(ColumnKind::of(&nums), ColumnKind::Numeric);

        let mixed = [CellValue::Number(1.0), CellValue::Bool(true)];
        assert_eq!(ColumnKind::of(&mixed), ColumnKind::Text);

        let empty = [CellValue::Missing, CellValue::Missing];
        assert_eq!(ColumnKind::of(&empty), ColumnKind::Empty);

        let bools = [CellValue::Bool(false)];
        assert_eq!(ColumnKind::of(&bools), ColumnKind::Boolean);
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Number(20.0).to_string(), "20");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");
        assert_eq!(CellValue::Missing.to_string(), "");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_json_scalars() {
        let v = serde_json::json!(3);
        assert_eq!(CellValue::from_json(&v), CellValue::Number(3.0));
        assert_eq!(CellValue::from_json(&serde_json::Value::Null), CellValue::Missing);
        assert_eq!(CellValue::Text("x".into()).to_json(), serde_json::json!("x"));
        assert_eq!(CellValue::Missing.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_negative_zero_groups_with_zero() {
        assert_eq!(CellValue::Number(-0.0).key(), CellValue::Number(0.0).key());
    }
}
