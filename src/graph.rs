use crate::cell::{CellValue, ColumnKind, ValueKey, compare_values, format_number};
use crate::error::{DataflowError, Result};
use crate::filter::View;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Number of equal-width bins used for histograms.
pub const HISTOGRAM_BINS: usize = 20;

/// Chart height in pixels.
pub const CHART_HEIGHT: u32 = 500;

const MIN_WIDTH: u32 = 700;
const MAX_WIDTH: u32 = 1400;
const PX_PER_CATEGORY: u32 = 40;

/// Available chart types.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Values connected by lines, in x order for numeric x, row order otherwise
    Line,

    /// One bar per category or per aggregated group
    Bar,

    /// Individual points; non-numeric x is mapped to category codes
    Scatter,

    /// Distribution of a numeric column over [`HISTOGRAM_BINS`] bins
    Histogram,
}

/// Reduction applied to the y values of each x group.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    None,
    Sum,
    Mean,
    Count,
    Max,
    Min,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Scatter => "scatter",
            ChartKind::Histogram => "histogram",
        }
    }

    /// Whether the kind honours an aggregation at all.
    pub fn aggregates(self) -> bool {
        matches!(self, ChartKind::Line | ChartKind::Bar)
    }
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartKind::Line),
            "bar" => Ok(ChartKind::Bar),
            "scatter" => Ok(ChartKind::Scatter),
            "histogram" | "hist" => Ok(ChartKind::Histogram),
            other => Err(format!("unknown chart kind: {}", other)),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Aggregation::None),
            "sum" => Ok(Aggregation::Sum),
            "mean" | "avg" => Ok(Aggregation::Mean),
            "count" => Ok(Aggregation::Count),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            other => Err(format!("unknown aggregation: {}", other)),
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to draw one chart from a view.
///
/// `x_column: None` plots against the master row identifier of each row.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ChartRequest {
    #[serde(default)]
    pub x_column: Option<String>,
    pub y_column: String,
    pub kind: ChartKind,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl ChartRequest {
    pub fn new(kind: ChartKind, y_column: impl Into<String>) -> Self {
        ChartRequest {
            x_column: None,
            y_column: y_column.into(),
            kind,
            aggregation: Aggregation::None,
            top_n: None,
        }
    }

    pub fn x(mut self, column: impl Into<String>) -> Self {
        self.x_column = Some(column.into());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation, top_n: Option<usize>) -> Self {
        self.aggregation = aggregation;
        self.top_n = top_n;
        self
    }

    /// The aggregation actually applied; scatter and histogram ignore it.
    pub fn effective_aggregation(&self) -> Aggregation {
        if self.kind.aggregates() {
            self.aggregation
        } else {
            Aggregation::None
        }
    }

    pub fn file_name(&self) -> String {
        chart_file_name(self.kind, self.effective_aggregation())
    }
}

/// Artifact name for a chart; one file per `(kind, aggregation)` pair.
pub fn chart_file_name(kind: ChartKind, aggregation: Aggregation) -> String {
    format!("chart_{}_{}.png", kind.as_str(), aggregation.as_str())
}

/// Data ready to be drawn, computed from a view before anything is rendered.
#[derive(Clone, Debug, PartialEq)]
pub enum PlotData {
    /// Numeric `(x, y)` pairs.
    Points(Vec<(f64, f64)>),

    /// Points placed on category positions `0..labels.len()`.
    Categories {
        labels: Vec<String>,
        points: Vec<(usize, f64)>,
    },

    /// Raw numeric samples for a histogram.
    Samples(Vec<f64>),
}

impl PlotData {
    pub fn category_count(&self) -> usize {
        match self {
            PlotData::Categories { labels, .. } => labels.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PlotData::Points(p) => p.is_empty(),
            PlotData::Categories { points, .. } => points.is_empty(),
            PlotData::Samples(s) => s.is_empty(),
        }
    }
}

/// Chart width in pixels for a given number of categories.
pub fn chart_width(categories: usize) -> u32 {
    let wanted = u32::try_from(categories).unwrap_or(u32::MAX).saturating_mul(PX_PER_CATEGORY);
    wanted.clamp(MIN_WIDTH, MAX_WIDTH)
}

/// Validates a request against a view and extracts the values to plot.
///
/// # Errors
/// * `UnknownColumn` if `x_column` or `y_column` is not in the view
/// * `Validation` if a histogram is asked for over a non-numeric column
pub fn prepare(view: &View, request: &ChartRequest) -> Result<PlotData> {
    let table = &view.table;
    let y_index = table
        .column_index(&request.y_column)
        .ok_or_else(|| DataflowError::UnknownColumn(request.y_column.clone()))?;
    let x_index = match &request.x_column {
        Some(x) => Some(table.column_index(x).ok_or_else(|| DataflowError::UnknownColumn(x.clone()))?),
        None => None,
    };

    if request.kind == ChartKind::Histogram {
        if view.kind(y_index) != ColumnKind::Numeric {
            return Err(DataflowError::Validation(format!(
                "histogram requires a numeric column, `{}` is not numeric",
                request.y_column
            )));
        }
        let samples = table.column_values(y_index).filter_map(CellValue::as_number).collect();
        return Ok(PlotData::Samples(samples));
    }

    // (x, y) per view row; the row identifier stands in for a missing x column
    let pairs: Vec<(CellValue, &CellValue)> = view
        .ids
        .iter()
        .zip(table.rows())
        .map(|(&id, row)| {
            let x = match x_index {
                Some(i) => row[i].clone(),
                None => CellValue::Number(id as f64),
            };
            (x, &row[y_index])
        })
        .filter(|(x, _)| !x.is_missing())
        .collect();

    let x_numeric = match x_index {
        Some(i) => view.kind(i) == ColumnKind::Numeric,
        None => true,
    };

    let aggregation = request.effective_aggregation();
    if aggregation != Aggregation::None {
        let groups = aggregate(&pairs, aggregation, request.top_n);
        if request.kind == ChartKind::Line && x_numeric && request.top_n.is_none() {
            let points = groups
                .into_iter()
                .filter_map(|(key, value)| key.as_number().map(|x| (x, value)))
                .collect();
            return Ok(PlotData::Points(points));
        }
        let (labels, points) = groups
            .into_iter()
            .enumerate()
            .map(|(i, (key, value))| (key.to_string(), (i, value)))
            .unzip();
        return Ok(PlotData::Categories { labels, points });
    }

    let numeric_pairs = pairs.iter().filter_map(|(x, y)| y.as_number().map(|y| (x, y)));

    match request.kind {
        ChartKind::Line | ChartKind::Scatter if x_numeric => Ok(PlotData::Points(
            numeric_pairs.filter_map(|(x, y)| x.as_number().map(|x| (x, y))).collect(),
        )),
        ChartKind::Scatter => {
            let mut codes: HashMap<ValueKey, usize> = HashMap::new();
            let mut labels = Vec::new();
            let mut points = Vec::new();
            for (x, y) in numeric_pairs {
                let Some(key) = x.key() else { continue };
                let code = *codes.entry(key).or_insert_with(|| {
                    labels.push(x.to_string());
                    labels.len() - 1
                });
                points.push((code, y));
            }
            Ok(PlotData::Categories { labels, points })
        }
        _ => {
            let (labels, points) = numeric_pairs
                .enumerate()
                .map(|(i, (x, y))| (x.to_string(), (i, y)))
                .unzip();
            Ok(PlotData::Categories { labels, points })
        }
    }
}

/// Groups `(x, y)` pairs by x and reduces each group.
///
/// Groups come back ordered by key (numbers, then booleans, then text), or by
/// reduced value descending when `top_n` is set.
fn aggregate(
    pairs: &[(CellValue, &CellValue)],
    aggregation: Aggregation,
    top_n: Option<usize>,
) -> Vec<(CellValue, f64)> {
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    let mut groups: Vec<(CellValue, usize, Vec<f64>)> = Vec::new();

    for (x, y) in pairs {
        let Some(key) = x.key() else { continue };
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((x.clone(), 0, Vec::new()));
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.1 += 1;
        if let Some(v) = y.as_number() {
            group.2.push(v);
        }
    }

    groups.sort_by(|a, b| compare_values(&a.0, &b.0));

    let mut reduced: Vec<(CellValue, f64)> = groups
        .into_iter()
        .filter_map(|(key, rows, values)| {
            let value = match aggregation {
                Aggregation::Count => Some(rows as f64),
                Aggregation::Sum => Some(values.iter().sum()),
                Aggregation::Mean => crate::stats::mean(&values),
                Aggregation::Max => values.iter().copied().reduce(f64::max),
                Aggregation::Min => values.iter().copied().reduce(f64::min),
                Aggregation::None => None,
            };
            value.map(|v| (key, v))
        })
        .collect();

    if let Some(n) = top_n {
        reduced.sort_by(|a, b| b.1.total_cmp(&a.1));
        reduced.truncate(n);
    }
    reduced
}

/// Splits samples into `bins` equal-width bins between their min and max.
///
/// # Returns
/// * `(start, end, count)` per bin; empty when there are no samples
pub fn histogram_bins(samples: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let (Some(min), Some(max)) = (
        samples.iter().copied().reduce(f64::min),
        samples.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };
    let bins = bins.max(1);
    let (lo, hi) = if max > min { (min, max) } else { (min - 0.5, max + 0.5) };
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for &s in samples {
        let slot = (((s - lo) / width) as usize).min(bins - 1);
        counts[slot] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| (lo + i as f64 * width, lo + (i + 1) as f64 * width, c))
        .collect()
}

/// Renders a chart of the view to `<outdir>/chart_<kind>_<aggregation>.png`,
/// overwriting any previous chart with the same key.
///
/// Validation happens before anything touches the file system, so a
/// rejected request never leaves a file behind.
///
/// # Returns
/// * The path of the written PNG
pub fn build_chart(view: &View, request: &ChartRequest, outdir: &Path) -> Result<PathBuf> {
    let data = prepare(view, request)?;
    fs::create_dir_all(outdir)?;
    let path = outdir.join(request.file_name());

    let width = chart_width(data.category_count());
    render(&data, request, &path, width).map_err(|e| DataflowError::Chart(e.to_string()))?;

    log::info!("chart written to {}", path.display());
    Ok(path)
}

fn title(request: &ChartRequest) -> String {
    let x = request.x_column.as_deref().unwrap_or("row");
    match (request.kind, request.effective_aggregation()) {
        (ChartKind::Histogram, _) => format!("Histogram of {}", request.y_column),
        (_, Aggregation::None) => format!("{} by {}", request.y_column, x),
        (_, agg) => format!("{}({}) by {}", agg, request.y_column, x),
    }
}

/// Value range padded so that flat or empty data still gets a drawable axis.
fn padded(lo: f64, hi: f64) -> std::ops::Range<f64> {
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    if hi > lo {
        let pad = (hi - lo) * 0.05;
        lo - pad..hi + pad
    } else {
        lo - 1.0..hi + 1.0
    }
}

fn y_range(values: impl Iterator<Item = f64> + Clone) -> std::ops::Range<f64> {
    let lo = values.clone().fold(0.0, f64::min);
    let hi = values.fold(f64::NEG_INFINITY, f64::max);
    padded(lo, if hi.is_finite() { hi } else { 1.0 })
}

fn render(
    data: &PlotData,
    request: &ChartRequest,
    path: &Path,
    width: u32,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (width, CHART_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let caption = title(request);
    let x_desc = match request.kind {
        ChartKind::Histogram => request.y_column.clone(),
        _ => request.x_column.clone().unwrap_or_else(|| "row".to_string()),
    };
    let y_desc = match (request.kind, request.effective_aggregation()) {
        (ChartKind::Histogram, _) => "count".to_string(),
        (_, Aggregation::Count) => "count".to_string(),
        _ => request.y_column.clone(),
    };

    match data {
        PlotData::Points(points) => {
            let x_range = padded(
                points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
                points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
            );
            let mut chart = ChartBuilder::on(&root)
                .caption(&caption, ("sans-serif", 30).into_font())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_range, y_range(points.iter().map(|p| p.1)))?;

            chart.configure_mesh().x_desc(&x_desc).y_desc(&y_desc).draw()?;

            if request.kind == ChartKind::Line {
                chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
            } else {
                chart.draw_series(points.iter().map(|&p| Circle::new(p, 4, GREEN.filled())))?;
            }
        }
        PlotData::Categories { labels, points } => {
            let n = labels.len().max(1) as f64;
            let formatter = |x: &f64| -> String {
                let i = x.round();
                if (x - i).abs() > 1e-6 || i < 0.0 {
                    return String::new();
                }
                labels.get(i as usize).cloned().unwrap_or_default()
            };
            let mut chart = ChartBuilder::on(&root)
                .caption(&caption, ("sans-serif", 30).into_font())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(-0.5..n - 0.5, y_range(points.iter().map(|p| p.1)))?;

            chart
                .configure_mesh()
                .x_desc(&x_desc)
                .y_desc(&y_desc)
                .x_labels(labels.len().clamp(1, 50))
                .x_label_formatter(&formatter)
                .disable_x_mesh()
                .draw()?;

            let at = |&(i, y): &(usize, f64)| (i as f64, y);
            match request.kind {
                ChartKind::Bar => {
                    chart.draw_series(points.iter().map(|&(i, y)| {
                        Rectangle::new([(i as f64 - 0.4, 0.0), (i as f64 + 0.4, y)], BLUE.filled())
                    }))?;
                }
                ChartKind::Line => {
                    chart.draw_series(LineSeries::new(points.iter().map(at), &BLUE))?;
                    chart.draw_series(points.iter().map(|p| Circle::new(at(p), 3, BLUE.filled())))?;
                }
                _ => {
                    chart.draw_series(points.iter().map(|p| Circle::new(at(p), 4, GREEN.filled())))?;
                }
            }
        }
        PlotData::Samples(samples) => {
            let bins = histogram_bins(samples, HISTOGRAM_BINS);
            let x_range = match (bins.first(), bins.last()) {
                (Some(first), Some(last)) => first.0..last.1,
                _ => 0.0..1.0,
            };
            let top = bins.iter().map(|b| b.2).max().unwrap_or(0).max(1) as f64;
            let mut chart = ChartBuilder::on(&root)
                .caption(&caption, ("sans-serif", 30).into_font())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_range, 0.0..top * 1.05)?;

            chart
                .configure_mesh()
                .x_desc(&x_desc)
                .y_desc(&y_desc)
                .x_label_formatter(&|x: &f64| format_number((x * 100.0).round() / 100.0))
                .draw()?;

            chart.draw_series(bins.iter().map(|&(start, end, count)| {
                Rectangle::new([(start, 0.0), (end, count as f64)], BLUE.mix(0.7).filled())
            }))?;
        }
    }

    root.present()?;
    Ok(())
}
