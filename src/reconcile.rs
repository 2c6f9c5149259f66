use crate::cell::CellValue;
use crate::filter::View;
use crate::table::{RowId, Table};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row coming back from the editable view.
///
/// `row_id` is the master identifier the row was shown with, or `None` for
/// a row the user inserted. `values` may hold any subset of the columns.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct EditedRow {
    #[serde(default)]
    pub row_id: Option<RowId>,
    #[serde(default)]
    pub values: BTreeMap<String, CellValue>,
}

impl EditedRow {
    pub fn existing(row_id: RowId) -> Self {
        EditedRow {
            row_id: Some(row_id),
            values: BTreeMap::new(),
        }
    }

    pub fn inserted() -> Self {
        EditedRow::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }
}

/// What a merge did to the master.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct MergeReport {
    /// Existing rows that received at least one value.
    pub updated: usize,
    /// Identifiers given to appended rows, in append order.
    pub appended: Vec<RowId>,
    /// Identifiers that did not refer to a master row.
    pub skipped: Vec<RowId>,
}

/// Snapshot of a view in the shape the editor hands back, one entry per
/// view row with every column filled in.
pub fn rows_for_editing(view: &View) -> Vec<EditedRow> {
    let columns = view.table.columns();
    view.ids
        .iter()
        .zip(view.table.rows())
        .map(|(&id, cells)| EditedRow {
            row_id: Some(id),
            values: columns.iter().cloned().zip(cells.iter().cloned()).collect(),
        })
        .collect()
}

/// Returns a new master with the edited rows merged in.
pub fn merge(master: &Table, edited: &[EditedRow]) -> Table {
    let mut merged = master.clone();
    merge_into(&mut merged, edited);
    merged
}

/// Writes edits back into `master` in place and appends inserted rows.
///
/// Rows that exist in the master but are missing from `edited` are left
/// alone; deletion is a separate operation.
pub fn merge_into(master: &mut Table, edited: &[EditedRow]) -> MergeReport {
    let kinds = master.column_kinds();
    let mut report = MergeReport::default();

    for row in edited {
        let Some(id) = row.row_id else { continue };
        if id >= master.len() {
            warn!("edit for unknown row {} skipped ({} rows in table)", id, master.len());
            report.skipped.push(id);
            continue;
        }

        let mut touched = false;
        for (column, value) in &row.values {
            match master.column_index(column) {
                Some(index) => {
                    let value = value.clone().conform_to(kinds[index]);
                    touched |= master.set_value(id, index, value);
                }
                None => debug!("edit for unknown column `{}` ignored", column),
            }
        }
        if touched {
            report.updated += 1;
        }
    }

    for row in edited.iter().filter(|r| r.row_id.is_none()) {
        let mut cells = vec![CellValue::Missing; master.width()];
        for (column, value) in &row.values {
            if let Some(index) = master.column_index(column) {
                cells[index] = value.clone().conform_to(kinds[index]);
            }
        }
        let id = master.push_row(cells);
        report.appended.push(id);
    }

    debug!(
        "merged edits: {} updated, {} appended, {} skipped",
        report.updated,
        report.appended.len(),
        report.skipped.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOp, FilterPredicate, evaluate};
    use pretty_assertions::assert_eq;

    fn master() -> Table {
        Table::from_rows(
            vec!["A".into(), "B".into()],
            vec![
                vec![1.into(), "x".into()],
                vec![2.into(), "y".into()],
                vec![3.into(), "z".into()],
            ],
        )
    }

    fn view(master: &Table, p: &FilterPredicate) -> View {
        View::of(master, evaluate(master, Some(p)).row_ids)
    }

    #[test]
    fn test_unchanged_view_merge_is_noop() {
        let m = master();
        for value in ["1", "2", "9"] {
            let v = view(&m, &FilterPredicate::new("A", FilterOp::Greater, value));
            assert_eq!(merge(&m, &rows_for_editing(&v)), m);
        }
    }

    #[test]
    fn test_edit_through_filtered_view() {
        let m = master();
        let v = view(&m, &FilterPredicate::new("A", FilterOp::Greater, "1"));
        assert_eq!(v.ids, vec![1, 2]);

        let mut rows = rows_for_editing(&v);
        rows[0].values.insert("A".into(), 20.into());

        let merged = merge(&m, &rows);
        let expected = Table::from_rows(
            vec!["A".into(), "B".into()],
            vec![
                vec![1.into(), "x".into()],
                vec![20.into(), "y".into()],
                vec![3.into(), "z".into()],
            ],
        );
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_append_assigns_next_identifier() {
        let mut m = master();
        let report = merge_into(&mut m, &[EditedRow::inserted().with("B", "w")]);
        assert_eq!(report.appended, vec![3]);
        assert_eq!(m.len(), 4);
        assert_eq!(m.row(3), Some(&[CellValue::Missing, "w".into()][..]));
    }

    #[test]
    fn test_appends_keep_relative_order() {
        let mut m = master();
        let rows = vec![
            EditedRow::inserted().with("A", 10),
            EditedRow::existing(0).with("B", "q"),
            EditedRow::inserted().with("A", 11),
        ];
        let report = merge_into(&mut m, &rows);
        assert_eq!(report.appended, vec![3, 4]);
        assert_eq!(report.updated, 1);
        assert_eq!(m.value(3, "A"), Some(&CellValue::Number(10.0)));
        assert_eq!(m.value(4, "A"), Some(&CellValue::Number(11.0)));
        assert_eq!(m.value(0, "B"), Some(&CellValue::Text("q".into())));
    }

    #[test]
    fn test_rows_missing_from_edit_are_not_deleted() {
        let mut m = master();
        let report = merge_into(&mut m, &[EditedRow::existing(1).with("A", 5)]);
        assert_eq!(report.updated, 1);
        assert_eq!(m.len(), 3);
        assert_eq!(m.value(0, "A"), Some(&CellValue::Number(1.0)));
        assert_eq!(m.value(2, "A"), Some(&CellValue::Number(3.0)));
    }

    #[test]
    fn test_partial_rows_leave_other_columns() {
        let mut m = master();
        merge_into(&mut m, &[EditedRow::existing(2).with("A", 30)]);
        assert_eq!(m.value(2, "B"), Some(&CellValue::Text("z".into())));
    }

    #[test]
    fn test_unknown_ids_and_columns_are_skipped() {
        let mut m = master();
        let rows = vec![
            EditedRow::existing(7).with("A", 1),
            EditedRow::existing(0).with("nope", 1),
        ];
        let report = merge_into(&mut m, &rows);
        assert_eq!(report.skipped, vec![7]);
        assert_eq!(report.updated, 0);
        assert_eq!(m, master());
    }

    #[test]
    fn test_typed_text_is_conformed_to_column_kind() {
        let mut m = master();
        merge_into(&mut m, &[EditedRow::existing(0).with("A", "42")]);
        assert_eq!(m.value(0, "A"), Some(&CellValue::Number(42.0)));
        merge_into(&mut m, &[EditedRow::existing(0).with("A", "n/a")]);
        assert_eq!(m.value(0, "A"), Some(&CellValue::Text("n/a".into())));
    }
}
