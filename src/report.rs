//! PDF report of the current view: summary, per-column statistics, a
//! preview of the first rows and any charts built so far.

use crate::error::{DataflowError, Result};
use crate::filter::View;
use crate::stats::{self, ColumnStats};
use chrono::Local;
use log::{debug, warn};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Number of view rows shown in the preview table.
pub const PREVIEW_ROWS: usize = 30;

pub const REPORT_FILE_NAME: &str = "dataflow_report.pdf";

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 15.0;
const PRINTABLE_W: f32 = PAGE_W - 2.0 * MARGIN;
const PREVIEW_MAX_COLUMNS: usize = 8;

/// Points to millimetres, used for line heights.
const PT: f32 = 0.3528;

fn pdf_err(e: impl std::fmt::Display) -> DataflowError {
    DataflowError::Report(e.to_string())
}

/// Top-down text cursor over a growing document.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(PageWriter {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_H - MARGIN,
            pages: 1,
        })
    }

    fn new_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_H - MARGIN;
        self.pages += 1;
    }

    /// Starts a new page unless `height` millimetres still fit.
    fn reserve(&mut self, height: f32) {
        if self.y - height < MARGIN {
            self.new_page();
        }
    }

    fn text(&mut self, text: &str, size: f32, bold: bool) {
        let height = size * PT * 1.4;
        self.reserve(height);
        self.y -= height;
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(MARGIN), Mm(self.y), font);
    }

    /// One row of fixed-width cells.
    fn cells(&mut self, cells: &[String], size: f32, bold: bool) {
        let height = size * PT * 1.5;
        self.reserve(height);
        self.y -= height;
        let width = PRINTABLE_W / cells.len().max(1) as f32;
        // Helvetica averages a little over half an em per glyph
        let max_chars = ((width / (size * PT * 0.55)) as usize).max(3);
        let font = if bold { &self.bold } else { &self.regular };
        for (i, cell) in cells.iter().enumerate() {
            let x = MARGIN + i as f32 * width;
            self.layer
                .use_text(truncate(cell, max_chars), size, Mm(x), Mm(self.y), font);
        }
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    /// Places a PNG scaled to the printable width, moving to a new page
    /// when it does not fit under the cursor.
    fn image(&mut self, path: &Path) -> Result<()> {
        let decoded = image::open(path).map_err(pdf_err)?;
        let (w_px, h_px) = (decoded.width() as f32, decoded.height() as f32);
        if w_px == 0.0 || h_px == 0.0 {
            return Ok(());
        }
        let dpi = w_px * 25.4 / PRINTABLE_W;
        let height = (h_px * 25.4 / dpi).min(PAGE_H - 2.0 * MARGIN);

        self.reserve(height);
        self.y -= height;
        Image::from_dynamic_image(&decoded).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(MARGIN)),
                translate_y: Some(Mm(self.y)),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
        self.gap(6.0);
        Ok(())
    }

    fn save(self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.doc.save(&mut out).map_err(pdf_err)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars.saturating_sub(2)).collect();
    short.push_str("..");
    short
}

fn fmt_stat(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{:.4}", v).trim_end_matches('0').trim_end_matches('.').to_string(),
        None => "-".to_string(),
    }
}

fn stats_line(column: &ColumnStats) -> String {
    match column {
        ColumnStats::Numeric {
            name,
            mean,
            median,
            min,
            max,
            unique,
            ..
        } => format!(
            "{}: mean {}, median {}, min {}, max {}, {} unique",
            name,
            fmt_stat(*mean),
            fmt_stat(*median),
            fmt_stat(*min),
            fmt_stat(*max),
            unique
        ),
        ColumnStats::Categorical {
            name,
            unique,
            most_frequent,
        } => format!(
            "{}: {} unique, most frequent: {}",
            name,
            unique,
            most_frequent.as_deref().unwrap_or("-")
        ),
    }
}

/// Writes `<outdir>/dataflow_report.pdf` for the view and returns its path.
///
/// Charts are embedded in the order given; paths that no longer exist are
/// skipped with a warning.
pub fn build_report(view: &View, charts: &[PathBuf], outdir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(outdir)?;
    let path = outdir.join(REPORT_FILE_NAME);
    write_report(view, charts, &path)?;
    log::info!("report written to {}", path.display());
    Ok(path)
}

pub fn write_report(view: &View, charts: &[PathBuf], path: &Path) -> Result<()> {
    let table = &view.table;
    let mut w = PageWriter::new("DataFlow report")?;

    w.text("DataFlow report", 20.0, true);
    w.text(
        &format!("Generated {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        9.0,
        false,
    );
    w.gap(4.0);

    let summary = stats::summarize(table);
    w.text("Summary", 14.0, true);
    w.text(
        &format!(
            "{} rows, {} columns, {} missing values",
            summary.rows, summary.columns, summary.missing
        ),
        10.0,
        false,
    );
    w.gap(4.0);

    w.text("Column statistics", 14.0, true);
    for column in stats::describe_view(view) {
        w.text(&stats_line(&column), 9.0, false);
    }
    w.gap(4.0);

    w.text("Preview", 14.0, true);
    if view.is_empty() {
        w.text("No rows match the current view.", 10.0, false);
    } else {
        let shown = table.width().min(PREVIEW_MAX_COLUMNS);
        let mut header = vec!["row".to_string()];
        header.extend(table.columns().iter().take(shown).cloned());
        w.cells(&header, 8.0, true);

        for (id, row) in view.ids.iter().zip(table.rows()).take(PREVIEW_ROWS) {
            let mut cells = vec![id.to_string()];
            cells.extend(row.iter().take(shown).map(|v| v.to_string()));
            w.cells(&cells, 7.0, false);
        }
        if view.len() > PREVIEW_ROWS {
            w.text(&format!("... {} more rows", view.len() - PREVIEW_ROWS), 8.0, false);
        }
        if table.width() > shown {
            w.text(&format!("... {} more columns", table.width() - shown), 8.0, false);
        }
    }

    let existing: Vec<&PathBuf> = charts
        .iter()
        .filter(|p| {
            let found = p.exists();
            if !found {
                warn!("chart {} no longer exists, left out of the report", p.display());
            }
            found
        })
        .collect();

    if !existing.is_empty() {
        w.new_page();
        w.text("Charts", 14.0, true);
        w.gap(2.0);
        for chart in existing {
            w.image(chart)?;
        }
    }

    debug!("report laid out on {} pages", w.pages);
    w.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::table::Table;

    fn view(rows: usize) -> View {
        let t = Table::from_rows(
            vec!["id".into(), "name".into()],
            (0..rows)
                .map(|i| vec![CellValue::from(i as f64), format!("name {}", i).into()])
                .collect(),
        );
        View::of(&t, (0..t.len()).collect())
    }

    fn is_pdf(path: &Path) -> bool {
        fs::read(path).map(|b| b.starts_with(b"%PDF")).unwrap_or(false)
    }

    #[test]
    fn test_report_without_charts() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_report(&view(80), &[], dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), REPORT_FILE_NAME);
        assert!(is_pdf(&path));
    }

    #[test]
    fn test_report_for_empty_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_report(&view(0), &[], dir.path()).unwrap();
        assert!(is_pdf(&path));
    }

    #[test]
    fn test_missing_chart_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("chart_line_none.png");
        let path = build_report(&view(3), &[gone], dir.path()).unwrap();
        assert!(is_pdf(&path));
    }

    #[test]
    fn test_chart_images_are_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("chart_bar_sum.png");
        image::RgbImage::from_pixel(70, 50, image::Rgb([0, 0, 255]))
            .save(&png)
            .unwrap();

        let without = build_report(&view(3), &[], &dir.path().join("a")).unwrap();
        let with = build_report(&view(3), &[png], &dir.path().join("b")).unwrap();
        assert!(fs::metadata(&with).unwrap().len() > fs::metadata(&without).unwrap().len());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long cell value", 8), "a long..");
    }
}
