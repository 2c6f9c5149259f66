use thiserror::Error;

/// Errors surfaced to callers of the session API.
///
/// Most user-input problems never reach this type: filters, cleaning and
/// edit reconciliation degrade to a no-op and log instead. What remains here
/// are the failures a user has to act on (wrong file type, a histogram over
/// text) and genuine I/O or encoding failures.
#[derive(Debug, Error)]
pub enum DataflowError {
    #[error("unsupported file format: {0} (expected .csv or .xlsx)")]
    UnsupportedFormat(String),

    #[error("input file is empty")]
    EmptyInput,

    #[error("no table loaded")]
    NoTable,

    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    #[error("{0}")]
    Validation(String),

    #[error("chart rendering failed: {0}")]
    Chart(String),

    #[error("report rendering failed: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read spreadsheet: {0}")]
    Xlsx(#[from] calamine::Error),

    #[error("failed to write spreadsheet: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, DataflowError>;
