use crate::cell::CellValue;
use crate::error::{DataflowError, Result};
use crate::table::Table;

/// Convert a table to delimited UTF-8 text
///
/// The first record is the header. There is no index column, and missing
/// values are written as empty fields. Quoting of commas, quotes and
/// newlines is left to the `csv` writer.
///
/// # Examples
/// ```
/// use dataflow::table::Table;
/// use dataflow::downloader::to_csv;
///
/// let table = Table::from_rows(vec!["A".into()], vec![vec![1.into()], vec!["x,y".into()]]);
/// let bytes = to_csv(&table).unwrap();
/// assert_eq!(String::from_utf8(bytes).unwrap(), "A\n1\n\"x,y\"\n");
/// ```
pub fn to_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()).into())
}

/// Worksheet size limits of the XLSX format, header row included.
pub const XLSX_MAX_COLUMNS: usize = 16_384;
pub const XLSX_MAX_ROWS: usize = 1_048_576;

/// Convert a table to an XLSX workbook
///
/// Produces a single sheet named "Sheet1" with a header row and no index
/// column. Numbers and booleans keep their cell types; missing values are
/// left blank.
///
/// # Returns
/// * The workbook file content
///
/// # Errors
/// * `Validation` if the table does not fit in one worksheet
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet};

    if table.width() > XLSX_MAX_COLUMNS || table.len() >= XLSX_MAX_ROWS {
        return Err(DataflowError::Validation(format!(
            "{} rows x {} columns do not fit in a worksheet (max {} x {})",
            table.len(),
            table.width(),
            XLSX_MAX_ROWS - 1,
            XLSX_MAX_COLUMNS
        )));
    }

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Sheet1")?;

    let bold = Format::new().set_bold();
    for (c, name) in (0u16..).zip(table.columns()) {
        worksheet.write_string_with_format(0, c, name, &bold)?;
    }

    for (r, row) in (1u32..).zip(table.rows()) {
        for (c, value) in (0u16..).zip(row) {
            match value {
                CellValue::Number(v) => {
                    worksheet.write_number(r, c, *v)?;
                }
                CellValue::Bool(v) => {
                    worksheet.write_boolean(r, c, *v)?;
                }
                CellValue::Text(v) => {
                    worksheet.write_string(r, c, v)?;
                }
                CellValue::Missing => {}
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{from_csv_bytes, from_excel_bytes};
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        Table::from_rows(
            vec!["n".into(), "s".into(), "b".into()],
            vec![
                vec![1.5.into(), "say \"hi\"".into(), true.into()],
                vec![CellValue::Missing, "line\nbreak".into(), false.into()],
                vec![3.into(), CellValue::Missing, CellValue::Missing],
            ],
        )
    }

    #[test]
    fn test_csv_layout() {
        let text = String::from_utf8(to_csv(&table()).unwrap()).unwrap();
        assert_eq!(
            text,
            "n,s,b\n1.5,\"say \"\"hi\"\"\",true\n,\"line\nbreak\",false\n3,,\n"
        );
    }

    #[test]
    fn test_csv_reimports_to_same_table() {
        let t = table();
        assert_eq!(from_csv_bytes(&to_csv(&t).unwrap()).unwrap(), t);
    }

    #[test]
    fn test_xlsx_rejects_too_many_columns() {
        let columns = (0..=XLSX_MAX_COLUMNS).map(|i| format!("c{}", i)).collect();
        let wide = Table::from_rows(columns, Vec::new());
        assert!(matches!(to_xlsx(&wide), Err(DataflowError::Validation(_))));

        let columns = (0..XLSX_MAX_COLUMNS).map(|i| format!("c{}", i)).collect();
        let widest = Table::from_rows(columns, vec![vec![1.into()]]);
        assert!(to_xlsx(&widest).unwrap().starts_with(b"PK"));
    }

    #[test]
    fn test_xlsx_keeps_cell_types() {
        let t = table();
        let bytes = to_xlsx(&t).unwrap();
        assert!(bytes.starts_with(b"PK"));
        assert_eq!(from_excel_bytes(bytes).unwrap(), t);
    }
}
