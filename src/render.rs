/// Rendering of keograms, pair diagnostics and residual animations
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;

use chrono::NaiveDateTime;
use ndarray_stats::QuantileExt;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::error::{TecError, TecResult};
use crate::grid::{self, Grid, Method};
use crate::io;
use crate::keogram::Keogram;
use crate::tec::Sample;
use crate::tools;

pub const FIGURE_SIZE: u32 = 800;
pub const PAIR_FIGURE_SIZE: (u32, u32) = (1000, 600);
pub const DEFAULT_FRAME_DELAY_MS: u32 = 80;
pub const DEFAULT_VIDEO_DELAY_MS: u32 = 100;
pub const DEFAULT_BUCKET_SECONDS: i64 = 300;
pub const DEFAULT_RESOLUTION: f64 = 0.5;
pub const DEFAULT_LATS: (f64, f64) = (59., 71.);
pub const DEFAULT_LONS: (f64, f64) = (19., 32.);
pub const DEFAULT_ENCODER: &str = "ffmpeg";

const TITLE_HEIGHT: i32 = 60;
const TITLE_FONT_SIZE: i32 = 20;
const CHART_MARGIN: i32 = 15;
const X_LABEL_AREA: i32 = 45;
const Y_LABEL_AREA: i32 = 60;
/// Share of the figure width left of the colour bar, in percent
const PLOT_WIDTH_PERCENT: i32 = 82;
const POINT_SIZE: i32 = 3;
const CONTINUOUS_BANDS: usize = 64;

/// Evenly spaced samples of the plasma colour map
const PLASMA: [[f64; 3]; 9] = [
    [13., 8., 135.],
    [75., 3., 161.],
    [125., 3., 168.],
    [168., 34., 150.],
    [203., 70., 121.],
    [229., 107., 93.],
    [248., 148., 65.],
    [253., 195., 40.],
    [240., 249., 33.],
];

/// Evenly spaced samples of the viridis colour map
const VIRIDIS: [[f64; 3]; 9] = [
    [68., 1., 84.],
    [71., 44., 122.],
    [59., 81., 139.],
    [44., 113., 142.],
    [33., 144., 141.],
    [39., 173., 129.],
    [92., 200., 99.],
    [170., 220., 50.],
    [253., 231., 37.],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMap {
    Plasma,
    Viridis,
}

impl ColorMap {
    /// Look up the colour at a position between 0 and 1
    pub fn at(&self, position: f64) -> RGBColor {
        let stops = match self {
            ColorMap::Plasma => &PLASMA,
            ColorMap::Viridis => &VIRIDIS,
        };
        let pos = position.clamp(0., 1.) * (stops.len() - 1) as f64;
        let i = (pos.floor() as usize).min(stops.len() - 2);

        let rgb = tools::interpolate_values(i as f64, &stops[i], (i + 1) as f64, &stops[i + 1], pos);

        RGBColor(rgb[0].round() as u8, rgb[1].round() as u8, rgb[2].round() as u8)
    }
}

pub fn plasma(position: f64) -> RGBColor {
    ColorMap::Plasma.at(position)
}

/// Mapping of values to colours
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub vmin: f64,
    pub vmax: f64,
    /// Spacing of the colour bar boundaries. `None` for a smooth colour bar.
    pub step: Option<f64>,
    /// Whether the colour bar marks values beyond the limits
    pub extend: bool,
    pub cmap: ColorMap,
}

impl ColorScale {
    /// The scale of residual animations: plasma from -2 to 2, boundaries every 0.5, extended at both ends
    pub fn residual() -> Self {
        ColorScale { vmin: -2., vmax: 2., step: Some(0.5), extend: true, cmap: ColorMap::Plasma }
    }

    /// The scale of the rolling-mean heatmap: viridis from -4 to 4
    pub fn heatmap() -> Self {
        ColorScale { vmin: -4., vmax: 4., step: None, extend: false, cmap: ColorMap::Viridis }
    }

    pub fn continuous(vmin: f64, vmax: f64) -> Self {
        ColorScale { vmin, vmax, step: None, extend: false, cmap: ColorMap::Plasma }
    }

    /// Position of a value on the colour map, clamped to the ends. `None` for missing values.
    pub fn position(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        if self.vmax <= self.vmin {
            return Some(0.5);
        }
        Some(((value - self.vmin) / (self.vmax - self.vmin)).clamp(0., 1.))
    }

    pub fn color(&self, value: f64) -> Option<RGBColor> {
        self.position(value).map(|p| self.cmap.at(p))
    }

    /// Value limits of the colour bar
    fn limits(&self) -> (f64, f64) {
        match self.vmax > self.vmin {
            true => (self.vmin, self.vmax),
            false => (self.vmin - 0.5, self.vmin + 0.5),
        }
    }

    /// The colour bar as (lower, upper, colour) bands.
    ///
    /// With a step, every band between two boundaries gets the colour of its midpoint.
    pub fn bands(&self) -> Vec<(f64, f64, RGBColor)> {
        let (lo, hi) = self.limits();
        let boundaries = match self.step {
            Some(step) if step > 0. && self.vmax > self.vmin => {
                let n = ((hi - lo) / step).round().max(1.) as usize;
                (0..=n).map(|i| lo + (hi - lo) * i as f64 / n as f64).collect::<Vec<f64>>()
            }
            _ => (0..=CONTINUOUS_BANDS).map(|i| lo + (hi - lo) * i as f64 / CONTINUOUS_BANDS as f64).collect(),
        };
        boundaries
            .windows(2)
            .map(|w| {
                let color = self.color((w[0] + w[1]) / 2.).unwrap_or_else(|| self.cmap.at(0.5));
                (w[0], w[1], color)
            })
            .collect()
    }
}

type Chart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Axes, labels and colour scale of a figure with a colour bar on the right
#[derive(Debug, Clone)]
struct Figure<'a> {
    x_range: (f64, f64),
    y_range: (f64, f64),
    x_desc: &'a str,
    y_desc: &'a str,
    /// Keep one unit equally long on both axes
    equal_aspect: bool,
    /// Label x values as clock times, counted in seconds from this time
    time_reference: Option<NaiveDateTime>,
    scale: ColorScale,
    colorbar_desc: &'a str,
}

impl<'a> Figure<'a> {
    fn map(lons: (f64, f64), lats: (f64, f64), scale: ColorScale) -> Self {
        Figure {
            x_range: lons,
            y_range: lats,
            x_desc: "Longitude",
            y_desc: "Latitude",
            equal_aspect: true,
            time_reference: None,
            scale,
            colorbar_desc: "VTEC",
        }
    }

    fn validate(&self) -> TecResult<()> {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        if [x0, x1, y0, y1].iter().any(|v| !v.is_finite()) || x1 <= x0 || y1 <= y0 {
            return Err(TecError::InvalidParameter(format!(
                "Invalid figure extent: x {:?}, y {:?}",
                self.x_range, self.y_range
            )));
        }
        Ok(())
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_range.0 && x <= self.x_range.1 && y >= self.y_range.0 && y <= self.y_range.1
    }
}

fn time_label(reference: &NaiveDateTime, seconds: f64) -> String {
    tools::add_seconds(reference, seconds).format("%H:%M").to_string()
}

/// Shrink the area so that the plotting area keeps an equal aspect ratio
fn fit_aspect<DB: DrawingBackend>(area: DrawingArea<DB, Shift>, figure: &Figure) -> DrawingArea<DB, Shift> {
    let (width, height) = area.dim_in_pixel();
    let avail_w = width as f64 - (Y_LABEL_AREA + 2 * CHART_MARGIN) as f64;
    let avail_h = height as f64 - (X_LABEL_AREA + 2 * CHART_MARGIN) as f64;
    let span_x = figure.x_range.1 - figure.x_range.0;
    let span_y = figure.y_range.1 - figure.y_range.0;
    if avail_w <= 1. || avail_h <= 1. || !(span_x > 0.) || !(span_y > 0.) {
        return area;
    }

    let scale = (avail_w / span_x).min(avail_h / span_y);
    let pad_x = ((avail_w - span_x * scale) / 2.).floor() as i32;
    let pad_y = ((avail_h - span_y * scale) / 2.).floor() as i32;
    area.margin(pad_y, pad_y, pad_x, pad_x)
}

/// Split a figure into its title, plot and colour bar areas
fn split_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &Figure,
) -> (DrawingArea<DB, Shift>, DrawingArea<DB, Shift>, DrawingArea<DB, Shift>) {
    let (width, _) = root.dim_in_pixel();
    let (title, body) = root.split_vertically(TITLE_HEIGHT);
    let (plot, bar) = body.split_horizontally(width as i32 * PLOT_WIDTH_PERCENT / 100);
    let plot = match figure.equal_aspect {
        true => fit_aspect(plot, figure),
        false => plot,
    };
    (title, plot, bar)
}

fn build_chart<'a, DB: DrawingBackend>(area: &'a DrawingArea<DB, Shift>, figure: &Figure) -> TecResult<Chart<'a, DB>> {
    let chart = ChartBuilder::on(area)
        .margin(CHART_MARGIN)
        .x_label_area_size(X_LABEL_AREA)
        .y_label_area_size(Y_LABEL_AREA)
        .build_cartesian_2d(figure.x_range.0..figure.x_range.1, figure.y_range.0..figure.y_range.1)?;
    Ok(chart)
}

/// Draw the parts of a figure that stay the same between frames: axes and the colour bar
fn draw_axes<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, figure: &Figure) -> TecResult<()> {
    let (_, plot, bar) = split_figure(root, figure);
    let mut chart = build_chart(&plot, figure)?;

    let reference = figure.time_reference;
    let x_formatter = |x: &f64| match &reference {
        Some(reference) => time_label(reference, *x),
        None => format!("{:.1}", x),
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(figure.x_desc)
        .y_desc(figure.y_desc)
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&|y| format!("{:.1}", y))
        .draw()?;

    draw_colorbar(&bar, &figure.scale, figure.colorbar_desc)
}

fn draw_colorbar<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, scale: &ColorScale, desc: &str) -> TecResult<()> {
    let (lo, hi) = scale.limits();
    let extension = match scale.extend {
        true => (hi - lo) / 10.,
        false => 0.,
    };

    let mut chart = ChartBuilder::on(area)
        .margin(CHART_MARGIN)
        .x_label_area_size(X_LABEL_AREA)
        .y_label_area_size(Y_LABEL_AREA)
        .build_cartesian_2d(0_f64..1_f64, (lo - extension)..(hi + extension))?;

    let n_labels = match scale.step {
        Some(step) if step > 0. => ((hi - lo) / step).round() as usize + 1,
        _ => 10,
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc(desc)
        .y_labels(n_labels)
        .y_label_formatter(&|v| format!("{:.1}", v))
        .draw()?;

    chart.draw_series(scale.bands().into_iter().map(|(lower, upper, color)| {
        Rectangle::new([(0., lower), (1., upper)], color.filled())
    }))?;
    if scale.extend {
        chart.draw_series([
            Polygon::new(vec![(0., lo), (1., lo), (0.5, lo - extension)], scale.cmap.at(0.).filled()),
            Polygon::new(vec![(0., hi), (1., hi), (0.5, hi + extension)], scale.cmap.at(1.).filled()),
        ])?;
    }
    Ok(())
}

/// Draw a title centred at the top of the area. Lines are split on newlines.
fn draw_title<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, title: &str) -> TecResult<()> {
    area.fill(&WHITE)?;
    let style = TextStyle::from(("sans-serif", TITLE_FONT_SIZE).into_font());
    let (width, _) = area.dim_in_pixel();

    for (i, line) in title.lines().enumerate() {
        let (text_width, _) = area.estimate_text_size(line, &style)?;
        let x = ((width as i32 - text_width as i32) / 2).max(0);
        area.draw_text(line, &style, (x, 6 + i as i32 * (TITLE_FONT_SIZE + 6)))?;
    }
    Ok(())
}

/// Data drawn on top of the axes
enum Layer<'a> {
    Points { xs: &'a [f64], ys: &'a [f64], values: &'a [f64] },
    Cells(&'a Grid),
}

/// Draw the parts of a figure that change between frames: the title and the data
fn draw_frame<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, figure: &Figure, title: &str, layer: &Layer) -> TecResult<()> {
    let (title_area, plot, _) = split_figure(root, figure);
    draw_title(&title_area, title)?;

    let mut chart = build_chart(&plot, figure)?;
    chart.plotting_area().fill(&WHITE)?;
    let scale = &figure.scale;

    match layer {
        Layer::Points { xs, ys, values } => {
            let points = xs
                .iter()
                .zip(ys.iter())
                .zip(values.iter())
                .filter(|((x, y), _)| figure.contains(**x, **y))
                .filter_map(|((x, y), v)| scale.color(*v).map(|c| Circle::new((*x, *y), POINT_SIZE, c.filled())))
                .collect::<Vec<Circle<(f64, f64), i32>>>();
            chart.draw_series(points)?;
        }
        Layer::Cells(grid) => {
            let (x0, x1) = figure.x_range;
            let (y0, y1) = figure.y_range;
            let mut cells = Vec::new();
            for ((row, col), value) in grid.values.indexed_iter() {
                let color = match scale.color(*value) {
                    Some(c) => c,
                    None => continue,
                };
                let left = grid.x_edges[col].max(x0);
                let right = grid.x_edges[col + 1].min(x1);
                let bottom = grid.y_edges[row].max(y0);
                let top = grid.y_edges[row + 1].min(y1);
                if left < right && bottom < top {
                    cells.push(Rectangle::new([(left, bottom), (right, top)], color.filled()));
                }
            }
            chart.draw_series(cells)?;
        }
    }
    Ok(())
}

/// Render a keogram with an autoscaled colour map.
///
/// With `impute`, missing cells are replaced by the mean of their time column first.
pub fn render_keogram(keogram: &Keogram, filepath: &Path, impute: bool) -> TecResult<()> {
    let mut grid = keogram.grid.clone();
    if impute {
        grid::impute_column_mean(&mut grid.values);
    }
    if grid.n_filled() == 0 {
        return Err(TecError::InvalidParameter("The keogram has no values to render".into()));
    }

    let n_x = grid.x_edges.len() - 1;
    let n_y = grid.y_edges.len() - 1;
    let figure = Figure {
        x_range: (grid.x_edges[0], grid.x_edges[n_x]),
        y_range: (grid.y_edges[0], grid.y_edges[n_y]),
        x_desc: "Datetime",
        y_desc: "Latitude",
        equal_aspect: false,
        time_reference: Some(keogram.reference),
        scale: ColorScale::continuous(*grid.values.min_skipnan(), *grid.values.max_skipnan()),
        colorbar_desc: "VTEC",
    };
    figure.validate()?;

    let root = BitMapBackend::new(filepath, (FIGURE_SIZE, FIGURE_SIZE)).into_drawing_area();
    root.fill(&WHITE)?;
    draw_axes(&root, &figure)?;
    draw_frame(&root, &figure, &keogram.title(), &Layer::Cells(&grid))?;
    root.present()?;
    Ok(())
}

/// Outcome of plotting a directory of keogram CSVs
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
}

fn plot_keogram_file(filepath: &Path, og_dir: &Path, imp_dir: &Path) -> TecResult<()> {
    let keogram = io::read_keogram_csv(filepath)?;
    let date = keogram.date.format("%Y-%m-%d").to_string();

    render_keogram(&keogram, &og_dir.join(format!("{date}og.png")), false)?;
    render_keogram(&keogram, &imp_dir.join(format!("{date}imp.png")), true)
}

/// Render every keogram CSV in a directory, as is into `og/` and imputed into `imp/`.
///
/// Files that fail are logged and skipped.
pub fn plot_keogram_dir(keogram_dir: &Path, output_dir: &Path) -> TecResult<BatchSummary> {
    let og_dir = output_dir.join("og");
    let imp_dir = output_dir.join("imp");
    std::fs::create_dir_all(&og_dir)?;
    std::fs::create_dir_all(&imp_dir)?;

    let mut filepaths = std::fs::read_dir(keogram_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect::<Vec<PathBuf>>();
    filepaths.sort();

    let mut summary = BatchSummary::default();
    for filepath in filepaths {
        match plot_keogram_file(&filepath, &og_dir, &imp_dir) {
            Ok(_) => summary.processed.push(filepath),
            Err(e) => {
                log::warn!("Error with {:?}: {}. Skipping", filepath, e);
                summary.skipped.push((filepath, e.to_string()));
            }
        }
    }
    Ok(summary)
}

/// One series of a pair diagnostic plot
struct Series {
    points: Vec<(f64, f64)>,
    color: RGBAColor,
    line: bool,
    label: Option<String>,
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = extent(values);
    if lo > hi {
        return (0., 1.);
    }
    let pad = match hi > lo {
        true => (hi - lo) * 0.05,
        false => 1.,
    };
    (lo - pad, hi + pad)
}

fn plot_series(filepath: &Path, title: &str, y_desc: &str, reference: &NaiveDateTime, series: &[Series]) -> TecResult<()> {
    let (x0, x1) = padded_range(series.iter().flat_map(|s| s.points.iter().map(|p| p.0)));
    let (y0, y1) = padded_range(series.iter().flat_map(|s| s.points.iter().map(|p| p.1)));

    let root = BitMapBackend::new(filepath, PAIR_FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24).into_font())
        .margin(CHART_MARGIN)
        .x_label_area_size(X_LABEL_AREA)
        .y_label_area_size(Y_LABEL_AREA)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    chart
        .configure_mesh()
        .x_desc("Datetime")
        .y_desc(y_desc)
        .x_label_formatter(&|x| time_label(reference, *x))
        .draw()?;

    let mut labelled = false;
    for s in series {
        let color = s.color;
        let annotation = match s.line {
            true => chart.draw_series(LineSeries::new(s.points.iter().copied(), color.stroke_width(2)))?,
            false => chart.draw_series(s.points.iter().map(|p| Circle::new(*p, POINT_SIZE, color.filled())))?,
        };
        if let Some(label) = &s.label {
            annotation
                .label(label.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3)));
            labelled = true;
        }
    }
    if labelled {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Plot the arcs, the smoothing and the residuals of one receiver-satellite pair.
///
/// Writes `{stem}_{pair}_arcs.png`, `{stem}_{pair}_smoothed.png` and `{stem}_{pair}_anomalies.png`.
pub fn plot_pair(samples: &[Sample], pair_id: &str, output_dir: &Path, stem: &str) -> TecResult<Vec<PathBuf>> {
    let mut arcs: BTreeMap<u32, Vec<&Sample>> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.pair_id == pair_id) {
        arcs.entry(sample.curve_id).or_default().push(sample);
    }
    let reference = arcs
        .values()
        .flat_map(|arc| arc.iter().map(|s| s.obs.datetime))
        .min()
        .ok_or_else(|| TecError::InvalidParameter(format!("No samples of receiver-satellite pair '{pair_id}'")))?;
    for arc in arcs.values_mut() {
        arc.sort_by_key(|s| s.obs.datetime);
    }

    let x = |s: &Sample| tools::seconds_between(&reference, &s.obs.datetime);
    let max_curve = arcs.keys().last().copied().unwrap_or(0).max(1) as f64;
    let label_arcs = arcs.len() <= 10;

    let arc_series = arcs
        .iter()
        .map(|(curve_id, arc)| Series {
            points: arc.iter().map(|s| (x(s), s.vtec)).collect(),
            color: plasma(*curve_id as f64 / max_curve).to_rgba(),
            line: false,
            label: label_arcs.then(|| format!("Arc {curve_id}")),
        })
        .collect::<Vec<Series>>();

    let mut smoothed_series = Vec::new();
    let mut anomaly_series = Vec::new();
    for (i, arc) in arcs.values().enumerate() {
        smoothed_series.push(Series {
            points: arc.iter().map(|s| (x(s), s.vtec)).collect(),
            color: BLUE.mix(0.7),
            line: true,
            label: (i == 0).then(|| "VTEC".to_string()),
        });
        smoothed_series.push(Series {
            points: arc.iter().map(|s| (x(s), s.filtered)).collect(),
            color: RED.to_rgba(),
            line: true,
            label: (i == 0).then(|| "Filtered".to_string()),
        });
        anomaly_series.push(Series {
            points: arc.iter().map(|s| (x(s), s.blrmvd)).collect(),
            color: BLACK.to_rgba(),
            line: true,
            label: None,
        });
    }

    let date = reference.format("%Y-%m-%d");
    let figures = [
        ("arcs", format!("Arcs of receiver-satellite pair {pair_id}, {date}"), "VTEC", arc_series),
        ("smoothed", format!("Smoothed VTEC of receiver-satellite pair {pair_id}, {date}"), "Value", smoothed_series),
        (
            "anomalies",
            format!("Baseline removed VTEC of receiver-satellite pair {pair_id}, {date}"),
            "VTEC",
            anomaly_series,
        ),
    ];

    let mut filepaths = Vec::with_capacity(figures.len());
    for (suffix, title, y_desc, series) in figures {
        let filepath = output_dir.join(format!("{stem}_{pair_id}_{suffix}.png"));
        plot_series(&filepath, &title, y_desc, &reference, &series)?;
        filepaths.push(filepath);
    }
    Ok(filepaths)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationKind {
    /// Scatter of the pierce points
    Points,
    /// Binned mean over the configured bounding box
    Histogram,
    /// Scattered interpolation onto a node grid over the data extent
    Grid,
    /// One cell per distinct coordinate, encoded as MP4
    Heatmap,
}

impl FromStr for AnimationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pp" | "points" => Ok(AnimationKind::Points),
            "histo" | "histogram" => Ok(AnimationKind::Histogram),
            "grid" | "griddata" => Ok(AnimationKind::Grid),
            "heatmap" => Ok(AnimationKind::Heatmap),
            other => Err(format!(
                "Unknown animation: '{other}'. Choose from 'pp', 'histo', 'grid', 'heatmap' or 'all'"
            )),
        }
    }
}

impl AnimationKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnimationKind::Points => "pp",
            AnimationKind::Histogram => "histo",
            AnimationKind::Grid => "grid",
            AnimationKind::Heatmap => "heatmap",
        }
    }

    /// Parse a comma separated list of animations, or "all" for the three GIF animations
    pub fn parse_list(text: &str) -> Result<Vec<Self>, String> {
        if text.trim().eq_ignore_ascii_case("all") {
            return Ok(vec![AnimationKind::Points, AnimationKind::Histogram, AnimationKind::Grid]);
        }
        let mut kinds = Vec::new();
        for part in text.split(',') {
            let kind = part.parse::<AnimationKind>()?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AnimationKind::Heatmap => "mp4",
            _ => "gif",
        }
    }

    pub fn file_name(&self, stem: &str, bucketed: bool) -> String {
        match bucketed {
            true => format!("{}_{}.{}", self.name(), stem, self.extension()),
            false => format!("{}_{}_blip.{}", self.name(), stem, self.extension()),
        }
    }

    fn title(&self, time: &NaiveDateTime, params: &AnimationParams) -> String {
        let time = tools::format_datetime(time);
        let res = params.resolution;
        match self {
            AnimationKind::Points => format!("Baseline removed VTEC at {time}"),
            AnimationKind::Histogram => format!("Baseline removed VTEC at {time} with resolution {res}"),
            AnimationKind::Grid => format!(
                "Baseline removed binned vtec at {time}\nwith resolution {res} and {} method",
                params.method
            ),
            AnimationKind::Heatmap => format!("Baseline removed TEC Heatmap at {time}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationParams {
    pub lats: (f64, f64),
    pub lons: (f64, f64),
    /// Cell size in degrees
    pub resolution: f64,
    pub method: Method,
    /// Frame length. `None` makes every distinct timestamp a frame.
    pub bucket_seconds: Option<i64>,
    pub delay_ms: u32,
    /// Frame interval of MP4 animations
    pub video_delay_ms: u32,
    pub size: u32,
    /// Program that encodes MP4 animations from raw RGB frames
    pub encoder: PathBuf,
}

impl Default for AnimationParams {
    fn default() -> Self {
        AnimationParams {
            lats: DEFAULT_LATS,
            lons: DEFAULT_LONS,
            resolution: DEFAULT_RESOLUTION,
            method: Method::Linear,
            bucket_seconds: Some(DEFAULT_BUCKET_SECONDS),
            delay_ms: DEFAULT_FRAME_DELAY_MS,
            video_delay_ms: DEFAULT_VIDEO_DELAY_MS,
            size: FIGURE_SIZE,
            encoder: PathBuf::from(DEFAULT_ENCODER),
        }
    }
}

/// Group samples into frames by their (floored) timestamps, in time order
pub fn frames(samples: &[Sample], bucket_seconds: Option<i64>) -> Vec<(NaiveDateTime, Vec<&Sample>)> {
    let mut frames: BTreeMap<NaiveDateTime, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        let time = match bucket_seconds {
            Some(bucket) => tools::floor_datetime(&sample.obs.datetime, bucket),
            None => sample.obs.datetime,
        };
        frames.entry(time).or_default().push(sample);
    }
    frames.into_iter().collect()
}

/// Range of a coordinate over all samples
fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Smallest spacing between distinct coordinates, or `fallback` if there is none
fn cell_size(values: impl Iterator<Item = f64>, fallback: f64) -> f64 {
    let mut values = values.filter(|v| v.is_finite()).collect::<Vec<f64>>();
    values.sort_by(f64::total_cmp);
    values
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 1e-9)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))))
        .unwrap_or(fallback)
}

/// How the samples of one frame become cells
enum Gridding {
    Scatter,
    Bins { x_edges: Vec<f64>, y_edges: Vec<f64> },
    Nodes { x_nodes: Vec<f64>, y_nodes: Vec<f64>, method: Method },
}

impl Gridding {
    fn new(kind: AnimationKind, samples: &[Sample], params: &AnimationParams) -> TecResult<Self> {
        let res = params.resolution;
        Ok(match kind {
            AnimationKind::Points => Gridding::Scatter,
            AnimationKind::Histogram => Gridding::Bins {
                x_edges: tools::arange(params.lons.0, params.lons.1 + res, res)?,
                y_edges: tools::arange(params.lats.0, params.lats.1 + res, res)?,
            },
            AnimationKind::Grid => {
                let (lon_lo, lon_hi) = extent(samples.iter().map(|s| s.obs.glon));
                let (lat_lo, lat_hi) = extent(samples.iter().map(|s| s.obs.gdlat));
                Gridding::Nodes {
                    x_nodes: tools::arange(lon_lo, lon_hi + res, res)?,
                    y_nodes: tools::arange(lat_lo, lat_hi + res, res)?,
                    method: params.method,
                }
            }
            AnimationKind::Heatmap => {
                let (lon_lo, lon_hi) = extent(samples.iter().map(|s| s.obs.glon));
                let (lat_lo, lat_hi) = extent(samples.iter().map(|s| s.obs.gdlat));
                let dx = cell_size(samples.iter().map(|s| s.obs.glon), res);
                let dy = cell_size(samples.iter().map(|s| s.obs.gdlat), res);
                Gridding::Bins {
                    x_edges: tools::arange(lon_lo - dx / 2., lon_hi + dx, dx)?,
                    y_edges: tools::arange(lat_lo - dy / 2., lat_hi + dy, dy)?,
                }
            }
        })
    }

    fn grid(&self, xs: &[f64], ys: &[f64], values: &[f64]) -> TecResult<Option<Grid>> {
        Ok(match self {
            Gridding::Scatter => None,
            Gridding::Bins { x_edges, y_edges } => Some(grid::binned_mean(xs, ys, values, x_edges, y_edges)?),
            Gridding::Nodes { x_nodes, y_nodes, method } => {
                Some(grid::griddata(xs, ys, values, x_nodes, y_nodes, *method)?)
            }
        })
    }

    /// Extent of the cells, used as the map extent of the heatmap
    fn bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        match self {
            Gridding::Bins { x_edges, y_edges } => Some((
                (*x_edges.first()?, *x_edges.last()?),
                (*y_edges.first()?, *y_edges.last()?),
            )),
            _ => None,
        }
    }
}

/// Draw the title and data of one frame
fn draw_animation_frame<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &Figure,
    title: &str,
    gridding: &Gridding,
    samples: &[&Sample],
) -> TecResult<()> {
    let xs = samples.iter().map(|s| s.obs.glon).collect::<Vec<f64>>();
    let ys = samples.iter().map(|s| s.obs.gdlat).collect::<Vec<f64>>();
    let values = samples.iter().map(|s| s.blrmvd).collect::<Vec<f64>>();

    match gridding.grid(&xs, &ys, &values)? {
        Some(grid) => draw_frame(root, figure, title, &Layer::Cells(&grid)),
        None => draw_frame(root, figure, title, &Layer::Points { xs: &xs, ys: &ys, values: &values }),
    }
}

/// Render an animation of the residuals, as a GIF or (for the heatmap) an MP4.
///
/// The axes and colour bar are drawn once; every frame only redraws the title and data.
///
/// # Returns
/// The amount of frames.
pub fn animate(samples: &[Sample], kind: AnimationKind, params: &AnimationParams, filepath: &Path) -> TecResult<usize> {
    let frames = frames(samples, params.bucket_seconds);
    if frames.is_empty() {
        return Err(TecError::InvalidParameter(format!("No samples to animate in {:?}", filepath)));
    }
    let gridding = Gridding::new(kind, samples, params)?;

    let figure = match (kind, gridding.bounds()) {
        (AnimationKind::Heatmap, Some((lons, lats))) => Figure::map(lons, lats, ColorScale::heatmap()),
        _ => Figure::map(params.lons, params.lats, ColorScale::residual()),
    };
    figure.validate()?;

    match kind {
        AnimationKind::Heatmap => {
            if let Err(e) = write_video(&frames, kind, params, &figure, &gridding, filepath) {
                if filepath.is_file() {
                    std::fs::remove_file(filepath)?;
                }
                return Err(e);
            }
        }
        _ => write_gif(&frames, kind, params, &figure, &gridding, filepath)?,
    }
    log::debug!("Wrote {} frames to {:?}", frames.len(), filepath);

    Ok(frames.len())
}

fn write_gif(
    frames: &[(NaiveDateTime, Vec<&Sample>)],
    kind: AnimationKind,
    params: &AnimationParams,
    figure: &Figure,
    gridding: &Gridding,
    filepath: &Path,
) -> TecResult<()> {
    let root = BitMapBackend::gif(filepath, (params.size, params.size), params.delay_ms)
        .map_err(|e| TecError::Plot(e.to_string()))?
        .into_drawing_area();
    root.fill(&WHITE)?;
    draw_axes(&root, figure)?;

    for (time, frame_samples) in frames {
        draw_animation_frame(&root, figure, &kind.title(time, params), gridding, frame_samples)?;
        root.present()?;
    }
    Ok(())
}

fn write_video(
    frames: &[(NaiveDateTime, Vec<&Sample>)],
    kind: AnimationKind,
    params: &AnimationParams,
    figure: &Figure,
    gridding: &Gridding,
    filepath: &Path,
) -> TecResult<()> {
    // yuv420p needs even dimensions
    let size = (params.size + params.size % 2, params.size + params.size % 2);
    let mut base = vec![0_u8; size.0 as usize * size.1 as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut base, size).into_drawing_area();
        root.fill(&WHITE)?;
        draw_axes(&root, figure)?;
        root.present()?;
    }

    let fps = 1000. / params.video_delay_ms.max(1) as f64;
    let mut encoder = VideoEncoder::spawn(&params.encoder, filepath, size, fps)?;
    let mut buffer = base.clone();
    for (time, frame_samples) in frames {
        buffer.copy_from_slice(&base);
        {
            let root = BitMapBackend::with_buffer(&mut buffer, size).into_drawing_area();
            draw_animation_frame(&root, figure, &kind.title(time, params), gridding, frame_samples)?;
            root.present()?;
        }
        encoder.write_frame(&buffer)?;
    }
    encoder.finish()
}

/// An external encoder that turns raw RGB frames on its standard input into an MP4
pub struct VideoEncoder {
    child: Child,
    program: PathBuf,
}

impl VideoEncoder {
    pub fn spawn(program: &Path, filepath: &Path, size: (u32, u32), fps: f64) -> TecResult<Self> {
        let child = Command::new(program)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pixel_format", "rgb24", "-video_size"])
            .arg(format!("{}x{}", size.0, size.1))
            .arg("-framerate")
            .arg(format!("{fps}"))
            .args(["-i", "-", "-pix_fmt", "yuv420p"])
            .arg(filepath)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TecError::Encoder(format!("Could not start {:?}: {}", program, e)))?;

        Ok(VideoEncoder { child, program: program.to_path_buf() })
    }

    pub fn write_frame(&mut self, rgb: &[u8]) -> TecResult<()> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| TecError::Encoder(format!("The input of {:?} is closed", self.program)))?;
        stdin
            .write_all(rgb)
            .map_err(|e| TecError::Encoder(format!("Could not pass a frame to {:?}: {}", self.program, e)))
    }

    /// Close the input and wait for the encoder to finish the file
    pub fn finish(mut self) -> TecResult<()> {
        drop(self.child.stdin.take());
        let output = self.child.wait_with_output()?;
        if !output.status.success() {
            return Err(TecError::Encoder(format!(
                "{:?} failed ({}): {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::AnimationDecoder;
    use ndarray::array;
    use plotters::prelude::*;

    use super::{AnimationKind, AnimationParams, ColorMap, ColorScale, Figure, Layer};
    use crate::error::TecError;
    use crate::grid::{Grid, Method};
    use crate::io;
    use crate::keogram::tests::{sample, samples};
    use crate::keogram::{Keogram, KeogramParams};
    use crate::tec::Sample;

    fn animation_samples() -> Vec<Sample> {
        vec![
            sample(0, 60., 20., 1.),
            sample(0, 61., 21., -1.),
            sample(0, 62., 20.5, 0.5),
            sample(120, 60.5, 22., 2.5),
            sample(600, 63., 25., -3.),
            sample(600, 64., 26., 0.),
            sample(600, 63.5, 27., 1.),
        ]
    }

    fn pixel(buffer: &[u8], width: u32, (x, y): (i32, i32)) -> RGBColor {
        let i = (y as usize * width as usize + x as usize) * 3;
        RGBColor(buffer[i], buffer[i + 1], buffer[i + 2])
    }

    fn gif_delays(path: &Path) -> Vec<f64> {
        let decoder = image::codecs::gif::GifDecoder::new(std::fs::File::open(path).unwrap()).unwrap();
        decoder
            .into_frames()
            .collect_frames()
            .unwrap()
            .iter()
            .map(|f| {
                let (numer, denom) = f.delay().numer_denom_ms();
                numer as f64 / denom as f64
            })
            .collect()
    }

    #[test]
    fn test_color_maps() {
        assert_eq!(super::plasma(0.), RGBColor(13, 8, 135));
        assert_eq!(super::plasma(1.), RGBColor(240, 249, 33));
        assert_eq!(super::plasma(2.), super::plasma(1.));
        assert_eq!(super::plasma(0.0625), RGBColor(44, 6, 148));
        assert_eq!(ColorMap::Viridis.at(0.), RGBColor(68, 1, 84));
        assert_eq!(ColorMap::Viridis.at(1.), RGBColor(253, 231, 37));
    }

    #[test]
    fn test_color_scale() {
        let scale = ColorScale::residual();

        assert_eq!(scale.position(-2.), Some(0.));
        assert_eq!(scale.position(2.), Some(1.));
        // Values beyond the limits take the end colours
        assert_eq!(scale.position(-5.), Some(0.));
        assert_eq!(scale.position(7.), Some(1.));
        // Data colours are continuous, only the colour bar is banded
        assert_eq!(scale.position(0.1), Some(0.525));
        assert_eq!(scale.position(-1.9), Some(0.025));
        assert_eq!(scale.position(f64::NAN), None);

        let bands = scale.bands();
        assert_eq!(bands.len(), 8);
        assert_eq!((bands[0].0, bands[0].1), (-2., -1.5));
        assert_eq!(bands[0].2, super::plasma(0.0625));
        assert_eq!(bands[7].1, 2.);

        let continuous = ColorScale::continuous(0., 10.);
        assert_eq!(continuous.position(2.5), Some(0.25));
        assert_eq!(continuous.bands().len(), super::CONTINUOUS_BANDS);
        assert_eq!(ColorScale::continuous(1., 1.).position(1.), Some(0.5));
        assert_eq!(ColorScale::continuous(1., 1.).bands().len(), super::CONTINUOUS_BANDS);

        let heatmap = ColorScale::heatmap();
        assert_eq!(heatmap.color(0.), Some(ColorMap::Viridis.at(0.5)));
        assert_eq!(heatmap.color(-10.), Some(ColorMap::Viridis.at(0.)));
    }

    #[test]
    fn map_keeps_equal_aspect() {
        let figure = Figure::map((19., 32.), (59., 71.), ColorScale::residual());
        let mut buffer = vec![0_u8; 800 * 800 * 3];
        let root = BitMapBackend::with_buffer(&mut buffer, (800, 800)).into_drawing_area();

        let (_, plot, _) = super::split_figure(&root, &figure);
        let chart = super::build_chart(&plot, &figure).unwrap();
        let (x0, y0) = chart.backend_coord(&(19., 59.));
        let (x1, y1) = chart.backend_coord(&(32., 71.));
        let per_degree_x = (x1 - x0) as f64 / 13.;
        let per_degree_y = (y0 - y1) as f64 / 12.;

        assert!((per_degree_x - per_degree_y).abs() < 1., "{per_degree_x} != {per_degree_y}");
        assert!(x0 >= 0 && x1 <= 800 && y1 >= super::TITLE_HEIGHT && y0 <= 800);

        let flat = Figure::map((1., 1.), (0., 1.), ColorScale::residual());
        assert!(flat.validate().is_err());
    }

    #[test]
    fn cells_are_drawn_with_continuous_colours() {
        let figure = Figure::map((0., 4.), (0., 4.), ColorScale::residual());
        let grid = Grid::from_nodes(vec![1., 3.], vec![1., 3.], array![[2., f64::NAN], [-2., 0.1]]).unwrap();
        let mut buffer = vec![0_u8; 400 * 400 * 3];

        let coords = {
            let root = BitMapBackend::with_buffer(&mut buffer, (400, 400)).into_drawing_area();
            root.fill(&WHITE).unwrap();
            super::draw_axes(&root, &figure).unwrap();
            super::draw_frame(&root, &figure, "Cells", &Layer::Cells(&grid)).unwrap();
            root.present().unwrap();

            let (_, plot, _) = super::split_figure(&root, &figure);
            let chart = super::build_chart(&plot, &figure).unwrap();
            [(1., 1.), (3., 1.), (1., 3.), (3., 3.)].map(|c| chart.backend_coord(&c))
        };

        assert_eq!(pixel(&buffer, 400, coords[0]), super::plasma(1.));
        assert_eq!(pixel(&buffer, 400, coords[1]), WHITE);
        assert_eq!(pixel(&buffer, 400, coords[2]), super::plasma(0.));
        assert_eq!(pixel(&buffer, 400, coords[3]), super::plasma(0.525));
    }

    #[test]
    fn frames_carry_a_title() {
        let figure = Figure::map((0., 4.), (0., 4.), ColorScale::residual());
        let mut buffer = vec![0_u8; 400 * 400 * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (400, 400)).into_drawing_area();
            root.fill(&WHITE).unwrap();
            let points = Layer::Points { xs: &[1.], ys: &[1.], values: &[0.] };
            super::draw_frame(&root, &figure, "Baseline removed VTEC at 2023-01-20 10:00:00", &points).unwrap();
            root.present().unwrap();
        }

        let title_rows = &buffer[..400 * super::TITLE_HEIGHT as usize * 3];
        assert!(title_rows.iter().any(|v| *v < 128));
    }

    #[test]
    fn test_frames() {
        let samples = animation_samples();

        let bucketed = super::frames(&samples, Some(300));
        assert_eq!(bucketed.iter().map(|(_, s)| s.len()).collect::<Vec<usize>>(), vec![4, 3]);

        let blip = super::frames(&samples, None);
        assert_eq!(blip.iter().map(|(_, s)| s.len()).collect::<Vec<usize>>(), vec![3, 1, 3]);
        assert!(blip.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_cell_size() {
        assert_eq!(super::cell_size([25., 26., 25., 27.5].into_iter(), 0.5), 1.);
        assert_eq!(super::cell_size([25., 25.].into_iter(), 0.5), 0.5);
    }

    #[test]
    fn test_animation_kind() {
        assert_eq!("pp".parse::<AnimationKind>(), Ok(AnimationKind::Points));
        assert_eq!("heatmap".parse::<AnimationKind>(), Ok(AnimationKind::Heatmap));
        assert_eq!(
            AnimationKind::parse_list("all").unwrap(),
            vec![AnimationKind::Points, AnimationKind::Histogram, AnimationKind::Grid]
        );
        assert_eq!(
            AnimationKind::parse_list("grid, pp,grid").unwrap(),
            vec![AnimationKind::Grid, AnimationKind::Points]
        );
        assert!(AnimationKind::parse_list("pp,mp4").is_err());
        assert_eq!(AnimationKind::Histogram.file_name("day", true), "histo_day.gif");
        assert_eq!(AnimationKind::Histogram.file_name("day", false), "histo_day_blip.gif");
        assert_eq!(AnimationKind::Heatmap.file_name("day", true), "heatmap_day.mp4");

        let params = AnimationParams::default();
        let time = crate::tec::tests::start_time();
        assert_eq!(AnimationKind::Points.title(&time, &params), "Baseline removed VTEC at 2023-01-20 10:00:00");
        assert_eq!(
            AnimationKind::Grid.title(&time, &params),
            "Baseline removed binned vtec at 2023-01-20 10:00:00\nwith resolution 0.5 and linear method"
        );
    }

    #[test]
    fn test_animate() {
        let tempdir = tempfile::tempdir().unwrap();
        let samples = animation_samples();
        let params = AnimationParams { size: 200, ..Default::default() };

        for kind in [AnimationKind::Points, AnimationKind::Histogram, AnimationKind::Grid] {
            let path = tempdir.path().join(kind.file_name("test", true));
            let n_frames = super::animate(&samples, kind, &params, &path).unwrap();

            assert_eq!(n_frames, 2);
            assert_eq!(gif_delays(&path), vec![80., 80.]);
        }

        let nearest = AnimationParams { size: 200, method: Method::Nearest, bucket_seconds: None, ..Default::default() };
        let path = tempdir.path().join("nearest.gif");
        assert_eq!(super::animate(&samples, AnimationKind::Grid, &nearest, &path).unwrap(), 3);
        assert_eq!(gif_delays(&path).len(), 3);

        assert!(super::animate(&[], AnimationKind::Points, &params, &path).is_err());
    }

    #[test]
    fn heatmap_needs_an_encoder() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("heatmap_test.mp4");
        let params = AnimationParams {
            size: 200,
            encoder: tempdir.path().join("no-such-encoder"),
            ..Default::default()
        };

        let result = super::animate(&animation_samples(), AnimationKind::Heatmap, &params, &path);

        assert!(matches!(result, Err(TecError::Encoder(_))));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_encoder_leaves_no_video() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("heatmap_test.mp4");
        std::fs::write(&path, b"stale").unwrap();
        let params = AnimationParams { size: 200, encoder: "false".into(), ..Default::default() };

        let result = super::animate(&animation_samples(), AnimationKind::Heatmap, &params, &path);

        assert!(matches!(result, Err(TecError::Encoder(_))));
        assert!(!path.exists());
    }

    #[test]
    fn heatmap_is_encoded_as_mp4() {
        let available = std::process::Command::new(super::DEFAULT_ENCODER)
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !available {
            return;
        }
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("heatmap_test.mp4");
        let params = AnimationParams { size: 199, ..Default::default() };

        let n_frames = super::animate(&animation_samples(), AnimationKind::Heatmap, &params, &path).unwrap();

        assert_eq!(n_frames, 2);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }

    #[test]
    fn test_render_keogram() {
        let tempdir = tempfile::tempdir().unwrap();
        let keogram = Keogram::compute(&samples(), &KeogramParams::default()).unwrap();
        let path = tempdir.path().join("keogram.png");

        super::render_keogram(&keogram, &path, false).unwrap();
        super::render_keogram(&keogram, &tempdir.path().join("keogram_imp.png"), true).unwrap();

        assert_eq!(image::image_dimensions(&path).unwrap(), (super::FIGURE_SIZE, super::FIGURE_SIZE));
    }

    #[test]
    fn test_plot_pair() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut pair = Vec::new();
        for i in 0..20 {
            let mut s = sample(i * 60 + if i >= 10 { 3600 } else { 0 }, 61., 25.5, (i as f64 / 3.).sin());
            s.curve_id = if i >= 10 { 1 } else { 0 };
            s.vtec = 10. + i as f64 / 10.;
            s.filtered = s.vtec - s.blrmvd;
            pair.push(s);
        }

        let written = super::plot_pair(&pair, "GPSabcd01", tempdir.path(), "day").unwrap();

        let names = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<String>>();
        assert_eq!(names, vec!["day_GPSabcd01_arcs.png", "day_GPSabcd01_smoothed.png", "day_GPSabcd01_anomalies.png"]);
        for path in &written {
            assert_eq!(image::image_dimensions(path).unwrap(), super::PAIR_FIGURE_SIZE);
        }

        let missing = super::plot_pair(&pair, "GPSzzzz99", tempdir.path(), "day");
        assert!(matches!(missing, Err(TecError::InvalidParameter(_))));
    }

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn batch_skips_malformed_files() {
        let tempdir = tempfile::tempdir().unwrap();
        let keogram_dir = tempdir.path().join("keog");
        std::fs::create_dir_all(&keogram_dir).unwrap();

        let keogram = Keogram::compute(&samples(), &KeogramParams::default()).unwrap();
        io::write_keogram_csv(&keogram, &keogram_dir.join(keogram.file_name())).unwrap();
        write(
            &keogram_dir,
            "keogram20230121long25.csv",
            "time_seconds,gdlat,blrmvd,datetime\n\
             150.0,60.5,1.0,2023-01-21 00:00:00\n\
             150.0,61.5,,2023-01-21 00:00:00\n\
             450.0,60.5,-1.0,2023-01-21 00:05:00\n\
             450.0,61.5,0.5,2023-01-21 00:05:00\n",
        );
        write(&keogram_dir, "broken.csv", "hello,world\n1,2\n");
        write(&keogram_dir, "notes.txt", "not a keogram");

        let summary = super::plot_keogram_dir(&keogram_dir, tempdir.path()).unwrap();

        assert_eq!(summary.processed.len(), 2);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].0.ends_with("broken.csv"));

        for name in ["og/2023-01-20og.png", "og/2023-01-21og.png", "imp/2023-01-20imp.png", "imp/2023-01-21imp.png"] {
            assert!(tempdir.path().join(name).is_file(), "{name} is missing");
        }
    }
}
