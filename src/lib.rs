/*!
# DataFlow

Interactive spreadsheet editing: import a CSV or Excel file, filter it, edit
cells through the filtered view, clean rows and columns, look at statistics
and charts, and export the result as CSV, XLSX or a PDF report.

## Architecture

Everything revolves around a per-user [`Session`](session::Session):

```text
Table Store (master + original)
      │
      ▼
Filter Evaluator ──► View ──► Edit Reconciler ──► back into the master
                       │
                       ├──► Chart Builder  (PNG per kind/aggregation)
                       └──► Report Builder (PDF with stats, preview, charts)
```

### Core
- **Table Store**: row-major [`Table`](table::Table) of typed
  [`CellValue`](cell::CellValue)s. A row's identifier is its position.
- **Filter Evaluator**: one `(column, operator, value)` predicate turned into
  the list of matching row identifiers. Evaluation fails open: an unusable
  predicate shows every row and reports why.
- **Edit Reconciler**: writes edited view rows back by identifier and
  appends rows that have none. Rows missing from the edit are never deleted.
- **Cleaning**: delete columns or rows, fill missing values, rename columns.

### Outputs
- **Chart Builder**: optional group-by aggregation and top-N, rendered with
  `plotters`.
- **Report Builder**: A4 PDF rendered with `printpdf`.
- **Export**: CSV via `csv`, XLSX via `rust_xlsxwriter`.

### Persistence
- Every import and mutation autosaves the master as a gzip-compressed
  bincode snapshot, falling back to CSV.

## Front ends

- `dataflow-cli`: interactive prompt over a local session.
- `dataflow-web` (feature `web`): axum JSON API, one session per cookie.

## Modules

- **cell**: cell values, column kinds, parsing helpers
- **table**: the table store
- **filter**: predicates, views and fail-open evaluation
- **reconcile**: merging edited rows into the master
- **cleaning**: column/row deletion, missing-value filling, renaming
- **stats**: summary and per-column statistics
- **graph**: chart preparation and rendering
- **report**: PDF report
- **loader** / **downloader**: import and export
- **saving**: autosave and restore
- **config**: bind address and session directories
- **session**: the session object tying it all together
- **app**: HTTP routes (feature `web`)
*/

pub mod cell;
pub mod cleaning;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filter;
pub mod graph;
pub mod loader;
pub mod reconcile;
pub mod report;
pub mod saving;
pub mod session;
pub mod stats;
pub mod table;

#[cfg(feature = "web")]
pub mod app;

pub use cell::{CellValue, ColumnKind};
pub use cleaning::{FillStrategy, RenameReport};
pub use config::{Config, SessionConfig};
pub use error::{DataflowError, Result};
pub use filter::{FilterError, FilterOp, FilterOutcome, FilterPredicate, View, apply_filter};
pub use graph::{Aggregation, ChartKind, ChartRequest};
pub use reconcile::{EditedRow, MergeReport, merge};
pub use session::Session;
pub use table::{RowId, Table};
