use crate::cell::{CellValue, ColumnKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Positional row identifier: the 0-based index of a row in the master table.
pub type RowId = usize;

/// Row-major table of typed cells with ordered, uniquely named columns.
///
/// Every row has exactly `width()` cells. A row's identifier is its
/// position, so identifiers stay valid across filtering and appends but are
/// renumbered by row deletion.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns: unique_column_names(columns),
            rows: Vec::new(),
        }
    }

    /// Builds a table, padding short rows with `Missing` and dropping cells
    /// beyond the header width.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut table = Table::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_kind(&self, index: usize) -> ColumnKind {
        ColumnKind::of(self.column_values(index))
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.column_index(name).map(|i| self.column_kind(i))
    }

    pub fn column_kinds(&self) -> Vec<ColumnKind> {
        (0..self.width()).map(|i| self.column_kind(i)).collect()
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &CellValue> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    pub fn row(&self, id: RowId) -> Option<&[CellValue]> {
        self.rows.get(id).map(|r| r.as_slice())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CellValue]> + '_ {
        self.rows.iter().map(|r| r.as_slice())
    }

    pub fn value(&self, id: RowId, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(id)?.get(index)
    }

    /// Overwrites one cell. Returns false when the row or column is out of range.
    pub fn set_value(&mut self, id: RowId, index: usize, value: CellValue) -> bool {
        match self.rows.get_mut(id).and_then(|row| row.get_mut(index)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Appends a row at the end and returns its identifier.
    pub fn push_row(&mut self, mut row: Vec<CellValue>) -> RowId {
        row.resize(self.columns.len(), CellValue::Missing);
        self.rows.push(row);
        self.rows.len() - 1
    }

    /// Copies the given rows, in the given order, into a new table with the
    /// same columns. Identifiers past the end are skipped.
    pub fn select(&self, ids: &[RowId]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: ids.iter().filter_map(|&id| self.rows.get(id).cloned()).collect(),
        }
    }

    pub fn missing_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .filter(|v| v.is_missing())
            .count()
    }

    pub(crate) fn remove_column(&mut self, index: usize) {
        if index >= self.columns.len() {
            return;
        }
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
    }

    /// Keeps the rows for which `keep` returns true; survivors are renumbered.
    pub(crate) fn retain_rows(&mut self, mut keep: impl FnMut(RowId) -> bool) {
        let mut id = 0;
        self.rows.retain(|_| {
            let kept = keep(id);
            id += 1;
            kept
        });
    }

    pub(crate) fn column_cells_mut(&mut self, index: usize) -> impl Iterator<Item = &mut CellValue> + '_ {
        self.rows.iter_mut().filter_map(move |row| row.get_mut(index))
    }

    /// Replaces the column names. The caller guarantees uniqueness and arity.
    pub(crate) fn set_column_names(&mut self, names: Vec<String>) {
        debug_assert_eq!(names.len(), self.columns.len());
        self.columns = names;
    }
}

/// Makes header names unique the way spreadsheet tools usually do: repeats
/// become `name.1`, `name.2`, ... and blank headers become `Unnamed: <i>`.
pub fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());

    for (i, name) in names.into_iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("Unnamed: {}", i)
        } else {
            name
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", base, n);
            n += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["A".into(), "B".into()],
            vec![
                vec![1.into(), "x".into()],
                vec![2.into(), "y".into()],
                vec![3.into()],
            ],
        )
    }

    #[test]
    fn test_from_rows_pads_short_rows() {
        let t = sample();
        assert_eq!(t.len(), 3);
        assert_eq!(t.value(2, "B"), Some(&CellValue::Missing));
        assert_eq!(t.missing_count(), 1);
    }

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(vec!["A".into(), "A".into(), "".into(), "A".into()]);
        assert_eq!(names, vec!["A", "A.1", "Unnamed: 2", "A.2"]);
    }

    #[test]
    fn test_select_keeps_columns_and_order() {
        let t = sample();
        let s = t.select(&[2, 0, 99]);
        assert_eq!(s.columns(), t.columns());
        assert_eq!(s.len(), 2);
        assert_eq!(s.value(0, "A"), Some(&CellValue::Number(3.0)));
        assert_eq!(s.value(1, "A"), Some(&CellValue::Number(1.0)));
    }

    #[test]
    fn test_retain_rows_renumbers() {
        let mut t = sample();
        t.retain_rows(|id| id != 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.value(1, "A"), Some(&CellValue::Number(3.0)));
    }

    #[test]
    fn test_column_kinds() {
        let t = sample();
        assert_eq!(t.kind_of("A"), Some(ColumnKind::Numeric));
        assert_eq!(t.kind_of("B"), Some(ColumnKind::Text));
        assert_eq!(t.kind_of("C"), None);
    }

    #[test]
    fn test_set_value_out_of_range() {
        let mut t = sample();
        assert!(t.set_value(0, 1, "q".into()));
        assert!(!t.set_value(9, 0, 1.into()));
        assert!(!t.set_value(0, 9, 1.into()));
    }
}
