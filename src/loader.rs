use crate::cell::{CellValue, parse_bool, parse_number};
use crate::error::{DataflowError, Result};
use crate::table::Table;
use log::debug;
use std::io::Cursor;
use std::path::Path;

/// Delimiters tried when sniffing a delimited text file, in preference order.
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Lines looked at when sniffing.
const SNIFF_LINES: usize = 20;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Supported import formats, chosen by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    /// Detects the format from a file name's extension (case-insensitive).
    ///
    /// # Errors
    /// * `UnsupportedFormat` for any extension other than csv, xlsx or xls
    pub fn from_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(FileFormat::Csv),
            Some("xlsx") | Some("xls") => Ok(FileFormat::Excel),
            Some(ext) => Err(DataflowError::UnsupportedFormat(format!(".{}", ext))),
            None => Err(DataflowError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Loads a table from a `.csv`, `.xlsx` or `.xls` file.
///
/// # Examples
/// ```no_run
/// use dataflow::loader::load_table;
///
/// match load_table("data.csv") {
///     Ok(table) => println!("loaded {} rows", table.len()),
///     Err(e) => eprintln!("error loading file: {}", e),
/// }
/// ```
pub fn load_table(path: impl AsRef<Path>) -> Result<Table> {
    let path = path.as_ref();
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    FileFormat::from_name(name)?;
    let bytes = std::fs::read(path)?;
    load_table_from_bytes(name, bytes)
}

/// Loads a table from uploaded bytes; `file_name` picks the format.
pub fn load_table_from_bytes(file_name: &str, bytes: Vec<u8>) -> Result<Table> {
    let table = match FileFormat::from_name(file_name)? {
        FileFormat::Csv => from_csv_bytes(&bytes)?,
        FileFormat::Excel => from_excel_bytes(bytes)?,
    };
    debug!(
        "loaded {}: {} rows x {} columns",
        file_name,
        table.len(),
        table.width()
    );
    Ok(table)
}

/// Parses delimited UTF-8 text with a header row. The delimiter is sniffed.
pub fn from_csv_bytes(bytes: &[u8]) -> Result<Table> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DataflowError::EmptyInput);
    }

    let delimiter = sniff_delimiter(bytes);
    debug!("sniffed delimiter {:?}", delimiter as char);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(build_table(header, rows))
}

/// Picks the candidate delimiter that splits the first lines into the same
/// number of fields (more than one) on every line. Falls back to a comma.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let sample: Vec<&[u8]> = bytes
        .split(|&b| b == b'\n')
        .filter(|line| !line.iter().all(|b| b.is_ascii_whitespace()))
        .take(SNIFF_LINES)
        .collect();
    let sample = sample.join(&b'\n');

    let mut best: Option<(u8, usize)> = None;
    for &delimiter in &CANDIDATE_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(sample.as_slice());

        let mut counts = reader.records().map(|r| r.map(|r| r.len()).unwrap_or(0));
        let Some(first) = counts.next() else { continue };
        if first > 1 && counts.all(|n| n == first) && best.is_none_or(|(_, n)| first > n) {
            best = Some((delimiter, first));
        }
    }
    best.map(|(d, _)| d).unwrap_or(b',')
}

/// Reads the first worksheet of an Excel workbook; its first row is the header.
pub fn from_excel_bytes(bytes: Vec<u8>) -> Result<Table> {
    use calamine::{Data, Reader, open_workbook_auto_from_rs};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(DataflowError::EmptyInput)?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows = range.rows().map(|row| {
        row.iter()
            .map(|cell| match cell {
                Data::Empty | Data::Error(_) => String::new(),
                Data::String(s) => s.clone(),
                Data::Float(f) => f.to_string(),
                Data::Int(i) => i.to_string(),
                Data::Bool(b) => b.to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>()
    });

    let header: Vec<String> = rows
        .next()
        .ok_or(DataflowError::EmptyInput)?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    Ok(build_table(header, rows.collect()))
}

/// Builds a typed table from raw text fields, inferring one kind per column:
/// numeric when every non-empty field is a finite number, boolean when every
/// non-empty field is `true`/`false`, text otherwise.
pub fn build_table(header: Vec<String>, raw: Vec<Vec<String>>) -> Table {
    let width = header.len();
    let mut columns: Vec<Vec<CellValue>> = (0..width)
        .map(|c| {
            let fields = raw.iter().map(|row| row.get(c).map(String::as_str).unwrap_or(""));
            infer_column(fields)
        })
        .collect();

    let rows = (0..raw.len())
        .map(|r| {
            columns
                .iter_mut()
                .map(|col| std::mem::replace(&mut col[r], CellValue::Missing))
                .collect()
        })
        .collect();

    Table::from_rows(header, rows)
}

fn infer_column<'a>(fields: impl Iterator<Item = &'a str> + Clone) -> Vec<CellValue> {
    let present = || fields.clone().map(str::trim).filter(|f| !f.is_empty());
    let numeric = present().all(|f| parse_number(f).is_some());
    let boolean = !numeric && present().all(|f| parse_bool(f).is_some());

    fields
        .map(|raw| {
            let field = raw.trim();
            if field.is_empty() {
                CellValue::Missing
            } else if numeric {
                parse_number(field).map(CellValue::Number).unwrap_or(CellValue::Missing)
            } else if boolean {
                parse_bool(field).map(CellValue::Bool).unwrap_or(CellValue::Missing)
            } else {
                CellValue::Text(raw.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ColumnKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_name("a.CSV").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_name("b.xlsx").unwrap(), FileFormat::Excel);
        assert!(matches!(
            FileFormat::from_name("c.json"),
            Err(DataflowError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            FileFormat::from_name("noext"),
            Err(DataflowError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter(b"a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter(b"a\tb\n1\t2\n"), b'\t');
        assert_eq!(sniff_delimiter(b"a|b\n1|2\n"), b'|');
        assert_eq!(sniff_delimiter(b"a,b\n1,2\n"), b',');
        // a semicolon inside a comma file must not win
        assert_eq!(sniff_delimiter(b"name,note\nx,\"a;b\"\ny,c\n"), b',');
        assert_eq!(sniff_delimiter(b"single\n1\n"), b',');
    }

    #[test]
    fn test_csv_with_bom_and_inference() {
        let data = "\u{FEFF}id;name;active;score\n1;ann;true;2.5\n2;bob;FALSE;\n3;;true;4\n";
        let t = from_csv_bytes(data.as_bytes()).unwrap();
        assert_eq!(t.columns(), &["id", "name", "active", "score"]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.column_kinds(), vec![
            ColumnKind::Numeric,
            ColumnKind::Text,
            ColumnKind::Boolean,
            ColumnKind::Numeric,
        ]);
        assert_eq!(t.value(1, "active"), Some(&CellValue::Bool(false)));
        assert_eq!(t.value(1, "score"), Some(&CellValue::Missing));
        assert_eq!(t.value(2, "name"), Some(&CellValue::Missing));
    }

    #[test]
    fn test_mixed_column_stays_text() {
        let t = from_csv_bytes(b"v\n1\nx\n").unwrap();
        assert_eq!(t.value(0, "v"), Some(&CellValue::Text("1".into())));
        assert_eq!(t.kind_of("v"), Some(ColumnKind::Text));
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let t = from_csv_bytes(b"a,b,c\n1,2\n3,4,5,6\n").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.value(0, "c"), Some(&CellValue::Missing));
        assert_eq!(t.value(1, "c"), Some(&CellValue::Number(5.0)));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(from_csv_bytes(b""), Err(DataflowError::EmptyInput)));
        assert!(matches!(from_csv_bytes(b"\xEF\xBB\xBF \n"), Err(DataflowError::EmptyInput)));
    }

    #[test]
    fn test_unsupported_bytes_are_rejected_before_parsing() {
        let err = load_table_from_bytes("notes.txt", b"a,b\n1,2\n".to_vec()).unwrap_err();
        assert!(matches!(err, DataflowError::UnsupportedFormat(_)));
    }
}
