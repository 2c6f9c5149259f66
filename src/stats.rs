//! Summary and per-column descriptive statistics.
//!
//! Shared by the statistics endpoint, the CLI `stats` command and the PDF
//! report. All functions skip missing values.

use crate::cell::{CellValue, ColumnKind, ValueKey, compare_values};
use crate::filter::View;
use crate::table::Table;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct Summary {
    pub rows: usize,
    pub columns: usize,
    pub missing: usize,
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnStats {
    Numeric {
        name: String,
        mean: Option<f64>,
        median: Option<f64>,
        std_dev: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        unique: usize,
    },
    Categorical {
        name: String,
        unique: usize,
        most_frequent: Option<String>,
    },
}

impl ColumnStats {
    pub fn name(&self) -> &str {
        match self {
            ColumnStats::Numeric { name, .. } | ColumnStats::Categorical { name, .. } => name,
        }
    }
}

pub fn summarize(table: &Table) -> Summary {
    Summary {
        rows: table.len(),
        columns: table.width(),
        missing: table.missing_count(),
    }
}

pub fn describe(table: &Table) -> Vec<ColumnStats> {
    (0..table.width())
        .map(|i| describe_index(table, i, table.column_kind(i)))
        .collect()
}

pub fn describe_column(table: &Table, name: &str) -> Option<ColumnStats> {
    table
        .column_index(name)
        .map(|i| describe_index(table, i, table.column_kind(i)))
}

/// Like [`describe`], but columns keep the kind they have in the master.
pub fn describe_view(view: &View) -> Vec<ColumnStats> {
    (0..view.table.width())
        .map(|i| describe_index(&view.table, i, view.kind(i)))
        .collect()
}

pub fn describe_view_column(view: &View, name: &str) -> Option<ColumnStats> {
    view.table
        .column_index(name)
        .map(|i| describe_index(&view.table, i, view.kind(i)))
}

fn describe_index(table: &Table, index: usize, kind: ColumnKind) -> ColumnStats {
    let name = table.columns()[index].clone();
    let unique = unique_count(table.column_values(index));

    if kind == ColumnKind::Numeric {
        let numbers: Vec<f64> = table.column_values(index).filter_map(CellValue::as_number).collect();
        ColumnStats::Numeric {
            name,
            mean: mean(&numbers),
            median: median(&numbers),
            std_dev: std_dev(&numbers),
            min: numbers.iter().copied().reduce(f64::min),
            max: numbers.iter().copied().reduce(f64::max),
            unique,
        }
    } else {
        ColumnStats::Categorical {
            name,
            unique,
            most_frequent: mode(table.column_values(index)).map(|v| v.to_string()),
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
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

/// Most frequent non-missing value; ties go to the value seen first.
pub fn mode<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> Option<CellValue> {
    let mut counts: HashMap<ValueKey, (usize, usize)> = HashMap::new();
    let mut firsts: Vec<&CellValue> = Vec::new();

    for value in values {
        let Some(key) = value.key() else { continue };
        let slot = firsts.len();
        let entry = counts.entry(key).or_insert_with(|| {
            firsts.push(value);
            (0, slot)
        });
        entry.0 += 1;
    }

    counts
        .into_values()
        .max_by(|(count_a, first_a), (count_b, first_b)| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(_, first)| firsts[first].clone())
}

pub fn unique_count<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> usize {
    let mut seen = std::collections::HashSet::new();
    values.into_iter().filter_map(CellValue::key).filter(|k| seen.insert(k.clone())).count()
}

/// Distinct non-missing values in display order.
pub fn distinct_sorted<'a>(values: impl IntoIterator<Item = &'a CellValue>) -> Vec<CellValue> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<CellValue> = values
        .into_iter()
        .filter(|v| v.key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect();
    out.sort_by(compare_values);
    out
}
