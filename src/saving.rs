//! Crash-safe autosave of the master table.
//!
//! The primary format is a column-major snapshot, bincode encoded and gzip
//! compressed. Writes go to a temporary file in the same directory and are
//! renamed into place, so a reader never sees a half-written snapshot. If
//! the snapshot cannot be written the table is saved as CSV instead.

use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::cell::CellValue;
use crate::downloader::to_csv;
use crate::error::Result;
use crate::loader::from_csv_bytes;
use crate::table::Table;

pub const SNAPSHOT_FILE: &str = "autosave.bin.gz";
pub const CSV_FALLBACK_FILE: &str = "autosave.csv";

/// On-disk layout: one vector of cells per column.
#[derive(Serialize, Deserialize)]
struct ColumnarSnapshot {
    columns: Vec<String>,
    data: Vec<Vec<CellValue>>,
}

impl ColumnarSnapshot {
    fn from_table(table: &Table) -> Self {
        ColumnarSnapshot {
            columns: table.columns().to_vec(),
            data: (0..table.width())
                .map(|i| table.column_values(i).cloned().collect())
                .collect(),
        }
    }

    fn into_table(self) -> Table {
        let height = self.data.iter().map(Vec::len).max().unwrap_or(0);
        let mut data: Vec<_> = self.data.into_iter().map(Vec::into_iter).collect();
        let rows = (0..height)
            .map(|_| {
                data.iter_mut()
                    .map(|col| col.next().unwrap_or(CellValue::Missing))
                    .collect()
            })
            .collect();
        Table::from_rows(self.columns, rows)
    }
}

/// Runs `write` against a sibling temporary file, then renames it onto `path`.
fn write_atomic(path: &Path, write: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn save_snapshot(table: &Table, path: &Path) -> Result<()> {
    write_atomic(path, |file| {
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, &ColumnarSnapshot::from_table(table))?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?;
        Ok(())
    })
}

pub fn load_snapshot(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);
    let snapshot: ColumnarSnapshot = deserialize_from(&mut reader)?;
    Ok(snapshot.into_table())
}

fn save_csv(table: &Table, path: &Path) -> Result<()> {
    let bytes = to_csv(table)?;
    write_atomic(path, |file| Ok(file.write_all(&bytes)?))
}

/// Saves `table` into `dir` and returns the file written.
///
/// Tries the snapshot first and falls back to CSV. Whichever format wins,
/// the other one's file is removed so a later restore cannot pick up stale
/// data.
pub fn autosave(table: &Table, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let snapshot = dir.join(SNAPSHOT_FILE);
    let fallback = dir.join(CSV_FALLBACK_FILE);

    let (written, stale) = match save_snapshot(table, &snapshot) {
        Ok(()) => (snapshot, fallback),
        Err(e) => {
            warn!("snapshot autosave failed ({}), falling back to CSV", e);
            save_csv(table, &fallback)?;
            (fallback, snapshot)
        }
    };

    if stale.exists() {
        if let Err(e) = fs::remove_file(&stale) {
            warn!("could not remove stale autosave {}: {}", stale.display(), e);
        }
    }
    debug!("autosaved {} rows to {}", table.len(), written.display());
    Ok(written)
}

/// Loads the most recent autosave in `dir`, snapshot first, then CSV.
/// Returns `None` when there is nothing readable.
pub fn try_restore(dir: &Path) -> Option<Table> {
    let snapshot = dir.join(SNAPSHOT_FILE);
    if snapshot.exists() {
        match load_snapshot(&snapshot) {
            Ok(table) => return Some(table),
            Err(e) => warn!("unreadable snapshot {}: {}", snapshot.display(), e),
        }
    }

    let fallback = dir.join(CSV_FALLBACK_FILE);
    if fallback.exists() {
        let read = || -> Result<Table> { from_csv_bytes(&fs::read(&fallback)?) };
        match read() {
            Ok(table) => return Some(table),
            Err(e) => warn!("unreadable autosave {}: {}", fallback.display(), e),
        }
    }
    None
}

/// Removes both autosave files, if present.
pub fn clear_autosave(dir: &Path) -> Result<()> {
    for name in [SNAPSHOT_FILE, CSV_FALLBACK_FILE] {
        let path = dir.join(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
