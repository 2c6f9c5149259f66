//! In-place cleaning operations on the master table.
//!
//! None of these fail: unknown columns and out-of-range rows are ignored and
//! the returned counts say what actually happened.

use crate::cell::{CellValue, ColumnKind};
use crate::stats;
use crate::table::{RowId, Table};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// How `fillna` chooses the replacement for a missing cell.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "strategy", content = "value", rename_all = "snake_case")]
pub enum FillStrategy {
    /// Raw user text, coerced to each column's kind.
    Value(String),
    Mean,
    Median,
    Mode,
}

impl FromStr for FillStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(FillStrategy::Mean),
            "median" => Ok(FillStrategy::Median),
            "mode" => Ok(FillStrategy::Mode),
            other => Err(format!("unknown fill strategy: {}", other)),
        }
    }
}

impl fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillStrategy::Value(v) => write!(f, "value `{}`", v),
            FillStrategy::Mean => f.write_str("mean"),
            FillStrategy::Median => f.write_str("median"),
            FillStrategy::Mode => f.write_str("mode"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct RenameReport {
    pub renamed: Vec<(String, String)>,
    pub rejected: Vec<(String, String)>,
}

/// Drops the named columns. Returns how many were removed.
pub fn delete_columns<S: AsRef<str>>(table: &mut Table, names: &[S]) -> usize {
    let mut removed = 0;
    for name in names {
        match table.column_index(name.as_ref()) {
            Some(index) => {
                table.remove_column(index);
                removed += 1;
            }
            None => debug!("delete_columns: unknown column `{}` ignored", name.as_ref()),
        }
    }
    removed
}

/// Drops the rows at the given identifiers. Out-of-range identifiers are
/// ignored. Surviving rows are renumbered `0..len`, so any identifier held
/// from before the call is stale afterwards.
pub fn delete_rows(table: &mut Table, ids: &[RowId]) -> usize {
    let doomed: BTreeSet<RowId> = ids.iter().copied().filter(|&id| id < table.len()).collect();
    if doomed.len() < ids.len() {
        debug!("delete_rows: {} identifiers out of range or repeated", ids.len() - doomed.len());
    }
    table.retain_rows(|id| !doomed.contains(&id));
    doomed.len()
}

/// Replaces missing cells according to `strategy`. Returns the number of
/// cells filled.
///
/// Mean and median only touch numeric columns; missing cells elsewhere are
/// left as they are. Mode fills every column with its most frequent value.
pub fn fillna(table: &mut Table, strategy: &FillStrategy) -> usize {
    if let FillStrategy::Value(v) = strategy {
        if v.trim().is_empty() {
            debug!("fillna with an empty value is a no-op");
            return 0;
        }
    }

    let mut filled = 0;
    for index in 0..table.width() {
        let kind = table.column_kind(index);
        let replacement = match strategy {
            FillStrategy::Value(v) => Some(CellValue::coerce(v, kind)),
            FillStrategy::Mean | FillStrategy::Median if kind != ColumnKind::Numeric => None,
            FillStrategy::Mean => stats::mean(&numbers(table, index)).map(CellValue::Number),
            FillStrategy::Median => stats::median(&numbers(table, index)).map(CellValue::Number),
            FillStrategy::Mode => stats::mode(table.column_values(index)),
        };
        let Some(replacement) = replacement else { continue };

        for cell in table.column_cells_mut(index).filter(|c| c.is_missing()) {
            *cell = replacement.clone();
            filled += 1;
        }
    }

    debug!("fillna ({}): {} cells filled", strategy, filled);
    filled
}

fn numbers(table: &Table, index: usize) -> Vec<f64> {
    table.column_values(index).filter_map(CellValue::as_number).collect()
}

/// Renames columns. Unmapped columns keep their names.
///
/// A rename is rejected, and the column keeps its old name, when the target
/// is blank or would clash with the final name of another column that is
/// either not being renamed or comes earlier in column order.
pub fn rename_columns<I, K, V>(table: &mut Table, mapping: I) -> RenameReport
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let old: Vec<String> = table.columns().to_vec();
    let mut new = old.clone();
    let mut report = RenameReport::default();
    let mut mapped: HashSet<usize> = HashSet::new();

    for (from, to) in mapping {
        let (from, to) = (from.as_ref().trim(), to.as_ref().trim());
        let Some(index) = old.iter().position(|c| c == from) else {
            debug!("rename: unknown column `{}` ignored", from);
            continue;
        };
        if !mapped.insert(index) {
            continue;
        }
        if to.is_empty() {
            report.rejected.push((from.to_string(), to.to_string()));
            continue;
        }
        new[index] = to.to_string();
    }

    // Revert clashing renames until none are left; each pass only reverts.
    loop {
        let clash = (0..new.len()).find(|&i| {
            new[i] != old[i]
                && (0..new.len()).any(|j| j != i && new[j] == new[i] && (new[j] == old[j] || j < i))
        });
        match clash {
            Some(i) => {
                warn!("rename `{}` -> `{}` rejected: name already in use", old[i], new[i]);
                report.rejected.push((old[i].clone(), new[i].clone()));
                new[i] = old[i].clone();
            }
            None => break,
        }
    }

    for (i, (before, after)) in old.iter().zip(new.iter()).enumerate() {
        if before != after && mapped.contains(&i) {
            report.renamed.push((before.clone(), after.clone()));
        }
    }

    table.set_column_names(new);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        Table::from_rows(
            vec!["n".into(), "s".into(), "b".into()],
            vec![
                vec![1.into(), "x".into(), true.into()],
                vec![CellValue::Missing, CellValue::Missing, CellValue::Missing],
                vec![3.into(), "x".into(), false.into()],
                vec![4.into(), "y".into(), false.into()],
            ],
        )
    }

    #[test]
    fn test_delete_columns_ignores_unknown() {
        let mut t = table();
        assert_eq!(delete_columns(&mut t, &["s", "zzz"]), 1);
        assert_eq!(t.columns(), &["n".to_string(), "b".to_string()]);
        assert_eq!(t.row(0), Some(&[CellValue::Number(1.0), CellValue::Bool(true)][..]));
    }

    #[test]
    fn test_delete_rows_renumbers_contiguously() {
        let mut t = table();
        assert_eq!(delete_rows(&mut t, &[1, 1, 42]), 1);
        assert_eq!(t.len(), 3);
        assert_eq!(t.value(1, "n"), Some(&CellValue::Number(3.0)));
        assert_eq!(t.value(2, "n"), Some(&CellValue::Number(4.0)));
    }

    #[test]
    fn test_fillna_mean() {
        let mut t = Table::from_rows(
            vec!["v".into()],
            vec![vec![1.into()], vec![CellValue::Missing], vec![3.into()]],
        );
        assert_eq!(fillna(&mut t, &FillStrategy::Mean), 1);
        let values: Vec<_> = t.column_values(0).cloned().collect();
        assert_eq!(values, vec![1.into(), 2.into(), CellValue::from(3)]);
    }

    #[test]
    fn test_fillna_median_skips_non_numeric_columns() {
        let mut t = table();
        assert_eq!(fillna(&mut t, &FillStrategy::Median), 1);
        assert_eq!(t.value(1, "n"), Some(&CellValue::Number(3.0)));
        assert_eq!(t.value(1, "s"), Some(&CellValue::Missing));
        assert_eq!(t.value(1, "b"), Some(&CellValue::Missing));
    }

    #[test]
    fn test_fillna_mode_fills_every_column() {
        let mut t = table();
        assert_eq!(fillna(&mut t, &FillStrategy::Mode), 3);
        // n: 1, 3, 4 all tie; the first one wins
        assert_eq!(t.value(1, "n"), Some(&CellValue::Number(1.0)));
        assert_eq!(t.value(1, "s"), Some(&CellValue::Text("x".into())));
        assert_eq!(t.value(1, "b"), Some(&CellValue::Bool(false)));
    }

    #[test]
    fn test_fillna_fixed_value_is_coerced() {
        let mut t = table();
        assert_eq!(fillna(&mut t, &FillStrategy::Value("0".into())), 3);
        assert_eq!(t.value(1, "n"), Some(&CellValue::Number(0.0)));
        assert_eq!(t.value(1, "s"), Some(&CellValue::Text("0".into())));
        assert_eq!(t.value(1, "b"), Some(&CellValue::Text("0".into())));

        let mut t = table();
        assert_eq!(fillna(&mut t, &FillStrategy::Value(" ".into())), 0);
    }

    #[test]
    fn test_rename_simple_and_swap() {
        let mut t = table();
        let report = rename_columns(&mut t, [("n", "num"), ("zzz", "q")]);
        assert_eq!(t.columns()[0], "num");
        assert_eq!(report.renamed, vec![("n".to_string(), "num".to_string())]);

        let mut t = table();
        rename_columns(&mut t, [("n", "s"), ("s", "n")]);
        assert_eq!(t.columns(), &["s".to_string(), "n".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_rename_collisions_are_rejected() {
        let mut t = table();
        let report = rename_columns(&mut t, [("n", "b"), ("s", "z"), ("b", "z")]);
        assert_eq!(t.columns(), &["n".to_string(), "z".to_string(), "b".to_string()]);
        assert_eq!(report.renamed, vec![("s".to_string(), "z".to_string())]);
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn test_rename_blank_target_is_rejected() {
        let mut t = table();
        let report = rename_columns(&mut t, [("n", "  ")]);
        assert_eq!(t.columns()[0], "n");
        assert_eq!(report.rejected.len(), 1);
    }
}
