//! One user's editing session.
//!
//! A [`Session`] owns the master table, the pristine copy taken at import,
//! the active filter and the view derived from it, and the charts built so
//! far. Every mutating method recomputes the view and autosaves the master.
//! Without a table loaded, filter, edit and cleaning calls do nothing, while
//! chart, report and export calls return [`DataflowError::NoTable`].

use crate::cleaning::{self, FillStrategy, RenameReport};
use crate::config::SessionConfig;
use crate::downloader;
use crate::error::{DataflowError, Result};
use crate::filter::{self, FilterError, FilterPredicate, View};
use crate::graph::{self, Aggregation, ChartKind, ChartRequest};
use crate::loader;
use crate::reconcile::{self, EditedRow, MergeReport};
use crate::report;
use crate::saving;
use crate::table::{RowId, Table};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

pub struct Session {
    config: SessionConfig,
    file_name: Option<String>,
    master: Option<Table>,
    original: Option<Table>,
    predicate: Option<FilterPredicate>,
    view: View,
    filter_error: Option<FilterError>,
    charts: Vec<(ChartKind, Aggregation, PathBuf)>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            config,
            file_name: None,
            master: None,
            original: None,
            predicate: None,
            view: View::default(),
            filter_error: None,
            charts: Vec::new(),
        }
    }

    /// Opens a session and reloads its last autosave, if any.
    ///
    /// The restored table also becomes the restore point for
    /// [`Session::restore_original`]; the import-time copy does not survive
    /// a restart.
    pub fn resume(config: SessionConfig) -> Self {
        let mut session = Session::new(config);
        if let Some(table) = saving::try_restore(session.config.autosave_dir()) {
            info!(
                "resumed autosave from {}: {} rows",
                session.config.dir.display(),
                table.len()
            );
            session.original = Some(table.clone());
            session.master = Some(table);
            session.refresh();
        }
        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn has_table(&self) -> bool {
        self.master.is_some()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn master(&self) -> Option<&Table> {
        self.master.as_ref()
    }

    pub fn original(&self) -> Option<&Table> {
        self.original.as_ref()
    }

    pub fn predicate(&self) -> Option<&FilterPredicate> {
        self.predicate.as_ref()
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Why the active filter could not be applied, if it could not.
    pub fn filter_error(&self) -> Option<&FilterError> {
        self.filter_error.as_ref()
    }

    /// Paths of the charts built so far, in the order they were first built.
    pub fn charts(&self) -> Vec<PathBuf> {
        self.charts.iter().map(|(_, _, p)| p.clone()).collect()
    }

    pub fn import_file(&mut self, path: impl AsRef<Path>) -> Result<&View> {
        let path = path.as_ref();
        let table = loader::load_table(path)?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.replace_table(table, name);
        Ok(&self.view)
    }

    pub fn import_bytes(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<&View> {
        let table = loader::load_table_from_bytes(file_name, bytes)?;
        self.replace_table(table, Some(file_name.to_string()));
        Ok(&self.view)
    }

    fn replace_table(&mut self, table: Table, file_name: Option<String>) {
        info!(
            "imported {}: {} rows x {} columns",
            file_name.as_deref().unwrap_or("table"),
            table.len(),
            table.width()
        );
        self.original = Some(table.clone());
        self.master = Some(table);
        self.file_name = file_name;
        self.predicate = None;
        self.charts.clear();
        self.changed();
    }

    pub fn set_filter(&mut self, predicate: FilterPredicate) -> &View {
        if self.master.is_some() {
            debug!("filter set: {}", predicate);
            self.predicate = Some(predicate);
            self.refresh();
        }
        &self.view
    }

    pub fn clear_filter(&mut self) -> &View {
        if self.predicate.take().is_some() {
            self.refresh();
        }
        &self.view
    }

    /// Merges rows edited through the view back into the master.
    pub fn apply_edits(&mut self, edited: &[EditedRow]) -> MergeReport {
        let Some(master) = self.master.as_mut() else {
            return MergeReport::default();
        };
        let report = reconcile::merge_into(master, edited);
        self.changed();
        report
    }

    /// Rows of the current view in the shape [`Session::apply_edits`] takes.
    pub fn rows_for_editing(&self) -> Vec<EditedRow> {
        reconcile::rows_for_editing(&self.view)
    }

    pub fn delete_columns<S: AsRef<str>>(&mut self, names: &[S]) -> usize {
        let Some(master) = self.master.as_mut() else { return 0 };
        let removed = cleaning::delete_columns(master, names);
        if removed > 0 {
            let column_gone = self
                .predicate
                .as_ref()
                .is_some_and(|p| master.column_index(&p.column).is_none());
            if column_gone {
                debug!("filter column deleted, filter cleared");
                self.predicate = None;
            }
            self.changed();
        }
        removed
    }

    /// Deletes master rows. Identifiers of the remaining rows are renumbered.
    pub fn delete_rows(&mut self, ids: &[RowId]) -> usize {
        let Some(master) = self.master.as_mut() else { return 0 };
        let removed = cleaning::delete_rows(master, ids);
        if removed > 0 {
            self.changed();
        }
        removed
    }

    pub fn fillna(&mut self, strategy: &FillStrategy) -> usize {
        let Some(master) = self.master.as_mut() else { return 0 };
        let filled = cleaning::fillna(master, strategy);
        if filled > 0 {
            self.changed();
        }
        filled
    }

    /// Renames columns; an active filter follows its column's new name.
    pub fn rename_columns<I, K, V>(&mut self, mapping: I) -> RenameReport
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Some(master) = self.master.as_mut() else {
            return RenameReport::default();
        };
        let report = cleaning::rename_columns(master, mapping);
        if !report.renamed.is_empty() {
            if let Some(predicate) = self.predicate.as_mut() {
                if let Some((_, to)) = report.renamed.iter().find(|(from, _)| *from == predicate.column) {
                    predicate.column = to.clone();
                }
            }
            self.changed();
        }
        report
    }

    /// Puts the import-time table back and clears the filter.
    pub fn restore_original(&mut self) -> &View {
        if let Some(original) = &self.original {
            self.master = Some(original.clone());
            self.predicate = None;
            self.changed();
        }
        &self.view
    }

    /// Discards the table and everything derived from it.
    pub fn clear(&mut self) {
        self.master = None;
        self.original = None;
        self.file_name = None;
        self.predicate = None;
        self.charts.clear();
        self.refresh();
        if let Err(e) = saving::clear_autosave(self.config.autosave_dir()) {
            warn!("could not remove autosave: {}", e);
        }
    }

    /// Renders a chart of the current view and remembers it for the report.
    pub fn build_chart(&mut self, request: &ChartRequest) -> Result<PathBuf> {
        if self.master.is_none() {
            return Err(DataflowError::NoTable);
        }
        let path = graph::build_chart(&self.view, request, &self.config.export_dir)?;

        let (kind, aggregation) = (request.kind, request.effective_aggregation());
        match self
            .charts
            .iter_mut()
            .find(|(k, a, _)| *k == kind && *a == aggregation)
        {
            Some(entry) => entry.2 = path.clone(),
            None => self.charts.push((kind, aggregation, path.clone())),
        }
        Ok(path)
    }

    pub fn build_report(&self) -> Result<PathBuf> {
        if self.master.is_none() {
            return Err(DataflowError::NoTable);
        }
        report::build_report(&self.view, &self.charts(), &self.config.export_dir)
    }

    /// CSV bytes of the current view.
    pub fn export_csv(&self) -> Result<Vec<u8>> {
        if self.master.is_none() {
            return Err(DataflowError::NoTable);
        }
        downloader::to_csv(&self.view.table)
    }

    /// XLSX bytes of the current view.
    pub fn export_xlsx(&self) -> Result<Vec<u8>> {
        if self.master.is_none() {
            return Err(DataflowError::NoTable);
        }
        downloader::to_xlsx(&self.view.table)
    }

    /// Recomputes the view from the master and the active filter.
    fn refresh(&mut self) {
        let Some(master) = &self.master else {
            self.view = View::default();
            self.filter_error = None;
            return;
        };
        let outcome = filter::evaluate(master, self.predicate.as_ref());
        self.filter_error = outcome.error;
        self.view = View::of(master, outcome.row_ids);
    }

    /// Refreshes the view and autosaves after a change to the master.
    fn changed(&mut self) {
        self.refresh();
        if let Some(master) = &self.master {
            if let Err(e) = saving::autosave(master, self.config.autosave_dir()) {
                warn!("autosave failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::filter::FilterOp;
    use pretty_assertions::assert_eq;

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new(SessionConfig::new(dir.path()));
        s.import_bytes("data.csv", b"A,B\n1,x\n2,y\n3,z\n".to_vec()).unwrap();
        (dir, s)
    }

    #[test]
    fn test_operations_without_table_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new(SessionConfig::new(dir.path()));
        s.set_filter(FilterPredicate::new("A", FilterOp::Equals, "1"));
        assert!(s.predicate().is_none());
        assert_eq!(s.delete_rows(&[0]), 0);
        assert_eq!(s.fillna(&FillStrategy::Mean), 0);
        assert_eq!(s.apply_edits(&[EditedRow::inserted()]), MergeReport::default());
        assert!(matches!(s.export_csv(), Err(DataflowError::NoTable)));
        assert!(matches!(s.build_report(), Err(DataflowError::NoTable)));
        let req = ChartRequest::new(ChartKind::Line, "A");
        assert!(matches!(s.build_chart(&req), Err(DataflowError::NoTable)));
    }

    #[test]
    fn test_import_autosaves() {
        let (dir, _s) = session();
        assert!(dir.path().join(saving::SNAPSHOT_FILE).exists());
    }

    #[test]
    fn test_filter_error_is_exposed_and_view_fails_open() {
        let (_dir, mut s) = session();
        s.set_filter(FilterPredicate::new("A", FilterOp::Greater, "abc"));
        assert!(s.filter_error().is_some());
        assert_eq!(s.view().len(), 3);
        s.clear_filter();
        assert!(s.filter_error().is_none());
    }

    #[test]
    fn test_filter_follows_renamed_column() {
        let (_dir, mut s) = session();
        s.set_filter(FilterPredicate::new("A", FilterOp::Greater, "1"));
        s.rename_columns([("A", "amount")]);
        assert_eq!(s.predicate().unwrap().column, "amount");
        assert_eq!(s.view().ids, vec![1, 2]);
    }

    #[test]
    fn test_deleting_filter_column_clears_filter() {
        let (_dir, mut s) = session();
        s.set_filter(FilterPredicate::new("A", FilterOp::Greater, "1"));
        assert_eq!(s.delete_columns(&["A"]), 1);
        assert!(s.predicate().is_none());
        assert_eq!(s.view().len(), 3);
    }

    #[test]
    fn test_rejected_chart_is_not_registered() {
        let (_dir, mut s) = session();
        let req = ChartRequest::new(ChartKind::Histogram, "B");
        assert!(matches!(s.build_chart(&req), Err(DataflowError::Validation(_))));
        assert!(s.charts().is_empty());
        assert!(!s.config().export_dir.exists());
    }

    #[test]
    fn test_export_writes_the_filtered_view() {
        let (_dir, mut s) = session();
        s.set_filter(FilterPredicate::new("A", FilterOp::Greater, "1"));
        assert_eq!(s.export_csv().unwrap(), b"A,B\n2,y\n3,z\n".to_vec());

        let xlsx = s.export_xlsx().unwrap();
        let table = crate::loader::load_table_from_bytes("out.xlsx", xlsx).unwrap();
        assert_eq!(table, s.view().table);
        assert_eq!(s.master().unwrap().len(), 3);
    }

    #[test]
    fn test_empty_view_keeps_numeric_column() {
        let (_dir, mut s) = session();
        s.set_filter(FilterPredicate::new("A", FilterOp::Greater, "100"));
        assert!(s.view().is_empty());
        let path = s.build_chart(&ChartRequest::new(ChartKind::Histogram, "A")).unwrap();
        assert!(path.exists());
        assert!(matches!(
            crate::stats::describe_view_column(s.view(), "A"),
            Some(crate::stats::ColumnStats::Numeric { .. })
        ));
    }

    #[test]
    fn test_charts_are_registered_once_per_kind_and_aggregation() {
        let (_dir, mut s) = session();
        let plain_report = std::fs::read(s.build_report().unwrap()).unwrap().len();

        let bar = ChartRequest::new(ChartKind::Bar, "A")
            .x("B")
            .aggregate(Aggregation::Sum, None);
        let first = s.build_chart(&bar).unwrap();
        let second = s.build_chart(&bar).unwrap();
        assert_eq!(first, second);
        assert_eq!(s.charts(), vec![first.clone()]);
        assert!(first.ends_with("chart_bar_sum.png"));
        assert!(first.exists());

        let hist = s.build_chart(&ChartRequest::new(ChartKind::Histogram, "A")).unwrap();
        assert!(hist.ends_with("chart_histogram_none.png"));
        assert_eq!(s.charts(), vec![first, hist]);

        let report = std::fs::read(s.build_report().unwrap()).unwrap();
        assert!(report.starts_with(b"%PDF"));
        assert!(report.len() > plain_report);
    }

    #[test]
    fn test_clear_drops_table_and_autosave() {
        let (dir, mut s) = session();
        s.clear();
        assert!(!s.has_table());
        assert!(s.view().is_empty());
        assert!(!dir.path().join(saving::SNAPSHOT_FILE).exists());
    }

    #[test]
    fn test_resume_reloads_autosave() {
        let (dir, mut s) = session();
        s.apply_edits(&[EditedRow::existing(0).with("B", "edited")]);
        let resumed = Session::resume(SessionConfig::new(dir.path()));
        assert_eq!(
            resumed.master().unwrap().value(0, "B"),
            Some(&CellValue::Text("edited".into()))
        );
        assert_eq!(resumed.view().len(), 3);
    }
}
