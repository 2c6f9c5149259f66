use crate::cell::{CellValue, ColumnKind, parse_bool, parse_number};
use crate::table::{RowId, Table};
use log::warn;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Comparison applied by a [`FilterPredicate`].
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
}

impl FilterOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Equals => ordering == Ordering::Equal,
            FilterOp::NotEquals => ordering != Ordering::Equal,
            FilterOp::Greater => ordering == Ordering::Greater,
            FilterOp::Less => ordering == Ordering::Less,
            FilterOp::GreaterOrEqual => ordering != Ordering::Less,
            FilterOp::LessOrEqual => ordering != Ordering::Greater,
            FilterOp::Contains => false,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            FilterOp::Equals => "=",
            FilterOp::NotEquals => "!=",
            FilterOp::Greater => ">",
            FilterOp::Less => "<",
            FilterOp::GreaterOrEqual => ">=",
            FilterOp::LessOrEqual => "<=",
            FilterOp::Contains => "contains",
        }
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => Ok(FilterOp::Equals),
            "!=" | "<>" | "≠" | "ne" | "not_equals" => Ok(FilterOp::NotEquals),
            ">" | "gt" | "greater" => Ok(FilterOp::Greater),
            "<" | "lt" | "less" => Ok(FilterOp::Less),
            ">=" | "≥" | "ge" | "greater_or_equal" => Ok(FilterOp::GreaterOrEqual),
            "<=" | "≤" | "le" | "less_or_equal" => Ok(FilterOp::LessOrEqual),
            "~" | "contains" => Ok(FilterOp::Contains),
            other => Err(format!("unknown filter operator: {}", other)),
        }
    }
}

/// A `(column, operator, value)` filter. The value is kept as the raw text
/// the user typed and coerced against the column at evaluation time.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FilterPredicate {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl FilterPredicate {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        FilterPredicate {
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.symbol(), self.value)
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum FilterError {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("cannot compare numeric column `{column}` with `{value}`")]
    Incomparable { column: String, value: String },
}

/// Result of evaluating a predicate. When `error` is set the predicate could
/// not be applied and `row_ids` holds every row of the master.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutcome {
    pub row_ids: Vec<RowId>,
    pub error: Option<FilterError>,
}

/// The filtered table together with the master identifier of each of its rows.
///
/// `kinds` are the master's column kinds. A filter that leaves a numeric
/// column empty does not turn it into an empty one.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct View {
    pub ids: Vec<RowId>,
    pub table: Table,
    pub kinds: Vec<ColumnKind>,
}

impl View {
    pub fn of(master: &Table, ids: Vec<RowId>) -> View {
        View {
            table: master.select(&ids),
            kinds: master.column_kinds(),
            ids,
        }
    }

    /// Master kind of the column at `index`.
    pub fn kind(&self, index: usize) -> ColumnKind {
        self.kinds.get(index).copied().unwrap_or(ColumnKind::Empty)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Applies a predicate and returns the matching table.
///
/// Fails open: if the predicate cannot be evaluated the master is returned
/// unchanged. Use [`evaluate`] to find out whether that happened.
pub fn apply_filter(master: &Table, predicate: Option<&FilterPredicate>) -> Table {
    master.select(&evaluate(master, predicate).row_ids)
}

/// Fail-open evaluation that still reports what went wrong.
pub fn evaluate(master: &Table, predicate: Option<&FilterPredicate>) -> FilterOutcome {
    match try_evaluate(master, predicate) {
        Ok(row_ids) => FilterOutcome { row_ids, error: None },
        Err(error) => {
            warn!("filter ignored: {}", error);
            FilterOutcome {
                row_ids: (0..master.len()).collect(),
                error: Some(error),
            }
        }
    }
}

/// Strict evaluation: returns the identifiers of matching rows in master order.
pub fn try_evaluate(
    master: &Table,
    predicate: Option<&FilterPredicate>,
) -> Result<Vec<RowId>, FilterError> {
    let predicate = match predicate {
        Some(p) if !p.value.is_empty() => p,
        _ => return Ok((0..master.len()).collect()),
    };

    let index = master
        .column_index(&predicate.column)
        .ok_or_else(|| FilterError::UnknownColumn(predicate.column.clone()))?;

    let cells = master.column_values(index).enumerate();

    if predicate.op == FilterOp::Contains {
        let needle = predicate.value.to_lowercase();
        return Ok(cells
            .filter(|(_, cell)| !cell.is_missing() && cell.to_string().to_lowercase().contains(&needle))
            .map(|(id, _)| id)
            .collect());
    }

    let operand = Operand::for_column(master.column_kind(index), &predicate.value);

    // A numeric column never equals text; ordering against text is an error.
    if let Operand::Unparsed = operand {
        return match predicate.op {
            FilterOp::Equals => Ok(Vec::new()),
            FilterOp::NotEquals => Ok((0..master.len()).collect()),
            _ => Err(FilterError::Incomparable {
                column: predicate.column.clone(),
                value: predicate.value.clone(),
            }),
        };
    }

    Ok(cells
        .filter(|(_, cell)| match operand.compare(cell) {
            Some(ordering) => predicate.op.accepts(ordering),
            // Missing cells only ever satisfy "not equal".
            None => predicate.op == FilterOp::NotEquals,
        })
        .map(|(id, _)| id)
        .collect())
}

enum Operand<'a> {
    Number(f64),
    Bool(bool),
    Text(&'a str),
    /// Non-numeric value against a numeric column.
    Unparsed,
}

impl<'a> Operand<'a> {
    fn for_column(kind: ColumnKind, value: &'a str) -> Operand<'a> {
        match kind {
            ColumnKind::Numeric => parse_number(value.trim())
                .map(Operand::Number)
                .unwrap_or(Operand::Unparsed),
            ColumnKind::Boolean => parse_bool(value.trim())
                .map(Operand::Bool)
                .unwrap_or(Operand::Text(value)),
            ColumnKind::Text | ColumnKind::Empty => Operand::Text(value),
        }
    }

    /// Orders `cell` relative to the operand; `None` for missing cells.
    fn compare(&self, cell: &CellValue) -> Option<Ordering> {
        if cell.is_missing() {
            return None;
        }
        match (self, cell) {
            (Operand::Number(n), CellValue::Number(x)) => x.partial_cmp(n),
            (Operand::Bool(b), CellValue::Bool(x)) => Some(x.cmp(b)),
            (Operand::Text(t), _) => Some(cell.to_string().as_str().cmp(t)),
            (Operand::Number(n), _) => Some(cell.to_string().cmp(&crate::cell::format_number(*n))),
            (Operand::Bool(b), _) => Some(cell.to_string().cmp(&b.to_string())),
            (Operand::Unparsed, _) => None,
        }
    }
}
