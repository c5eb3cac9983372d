//! Metric charts.
//!
//! Charting happens in two steps. [`ChartSpec::build`] turns the tracked history into a plain
//! description of what to draw (titles, series, extrema), which is deterministic and cheap to
//! compare. [`ChartRenderer::render`] rasterizes a spec with `plotters`, one panel per metric
//! stacked vertically in a single image.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::metrics::{
    Extremum, ExtremumPolicy, LEARNING_RATE_KEY, TrackedMetrics, VALIDATION_PREFIX,
    validation_name,
};
use plotters::coord::Shift;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use plotters::style::register_font;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const FONT_FAMILY: &str = "sans-serif";
const TITLE_FONT_SIZE: i32 = 18;
const LABEL_FONT_SIZE: i32 = 14;
const PIXELS_PER_INCH: f64 = 100.0;
const STAR_RADIUS: i32 = 9;

const TRAIN_COLOR: RGBColor = RGBColor(31, 119, 180);
const VALIDATION_COLOR: RGBColor = RGBColor(214, 39, 40);
const LEARNING_RATE_COLOR: RGBColor = RGBColor(44, 160, 44);

/// Path of the font currently registered under `FONT_FAMILY`.
static FONT_REGISTERED: Mutex<Option<PathBuf>> = Mutex::new(None);

/// One curve on a panel.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSpec {
    pub name: String,
    pub values: Vec<f64>,
    pub extremum: Option<Extremum>,
}

impl SeriesSpec {
    fn from_values(name: &str, values: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
            extremum: Extremum::find(values, ExtremumPolicy::for_metric(name)),
        }
    }

    /// `"loss - min: 0.12345;"`
    pub fn title(&self) -> String {
        let policy = ExtremumPolicy::for_metric(&self.name);
        match self.extremum {
            Some(ext) => format!("{} - {}: {:.5};", self.name, policy.label(), ext.value),
            None => format!("{} - {}: n/a;", self.name, policy.label()),
        }
    }
}

/// One metric's subplot: the training curve, its validation counterpart and the learning rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSpec {
    pub metric: String,
    pub title: Vec<String>,
    pub train: SeriesSpec,
    pub validation: Option<SeriesSpec>,
    pub learning_rate: Option<Vec<f64>>,
}

/// Everything needed to draw a chart, independent of any backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub epochs: Vec<usize>,
    pub panels: Vec<PanelSpec>,
}

impl ChartSpec {
    /// Describe one panel per metric in `metric_names`, or per tracked base metric when the
    /// model declared none.
    ///
    /// A declared metric missing from the history, or with fewer values than recorded epochs,
    /// is an error, and so is ending up with no panel at all (only `val_*` or `lr` keys). Validation and learning-rate curves are optional: when absent or
    /// misaligned they are left out of the panel.
    pub fn build(tracked: &TrackedMetrics, metric_names: &[String]) -> Result<Self, RenderError> {
        if tracked.is_empty() {
            return Err(RenderError::EmptyHistory);
        }
        let epochs = tracked.epochs().to_vec();

        let names: Vec<String> = if metric_names.is_empty() {
            tracked.base_metric_names()
        } else {
            metric_names
                .iter()
                .filter(|name| !name.starts_with(VALIDATION_PREFIX) && *name != LEARNING_RATE_KEY)
                .cloned()
                .collect()
        };

        let learning_rate = aligned_series(tracked, LEARNING_RATE_KEY, epochs.len());

        let mut panels = Vec::with_capacity(names.len());
        for name in names {
            let values = tracked
                .series(&name)
                .ok_or_else(|| RenderError::MissingMetric { name: name.clone() })?;
            if values.len() != epochs.len() {
                return Err(RenderError::LengthMismatch {
                    name,
                    epochs: epochs.len(),
                    values: values.len(),
                });
            }

            let train = SeriesSpec::from_values(&name, values);
            let val_name = validation_name(&name);
            let validation = aligned_series(tracked, &val_name, epochs.len())
                .map(|values| SeriesSpec::from_values(&val_name, &values));

            let mut title = vec![train.title()];
            if let Some(val) = &validation {
                title.push(val.title());
            }

            panels.push(PanelSpec {
                metric: name,
                title,
                train,
                validation,
                learning_rate: learning_rate.clone(),
            });
        }

        if panels.is_empty() {
            return Err(RenderError::NoMetrics);
        }
        Ok(Self { epochs, panels })
    }
}

/// The series for `name` if it has exactly one value per epoch.
fn aligned_series(tracked: &TrackedMetrics, name: &str, epochs: usize) -> Option<Vec<f64>> {
    let values = tracked.series(name)?;
    if values.len() != epochs {
        tracing::warn!(
            metric = name,
            values = values.len(),
            epochs,
            "Series does not cover every epoch, leaving it out of the chart"
        );
        return None;
    }
    Some(values.to_vec())
}

/// Rasterizes chart specs to image files.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    figsize: (f64, f64),
    font_path: PathBuf,
}

impl ChartRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            figsize: config.figsize,
            font_path: config.font_path.clone(),
        }
    }

    /// Pixel dimensions of the image for `panels` stacked panels.
    pub fn image_size(&self, panels: usize) -> (u32, u32) {
        let (width, height) = self.figsize;
        let width = (width * PIXELS_PER_INCH).round().max(1.0) as u32;
        let panel_height = (height * PIXELS_PER_INCH).round().max(1.0) as u32;
        (width, panel_height * panels.max(1) as u32)
    }

    /// Write `spec` to `path`, replacing any existing file. The format follows the extension.
    pub fn render(&self, spec: &ChartSpec, path: &Path) -> Result<(), RenderError> {
        if spec.epochs.is_empty() {
            return Err(RenderError::EmptyHistory);
        }
        if spec.panels.is_empty() {
            return Err(RenderError::NoMetrics);
        }
        ensure_font(&self.font_path)?;

        let size = self.image_size(spec.panels.len());
        let root = BitMapBackend::new(path, size).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let areas = root.split_evenly((spec.panels.len(), 1));
        for (area, panel) in areas.iter().zip(&spec.panels) {
            draw_panel(area, &spec.epochs, panel)?;
        }

        root.present().map_err(draw_err)?;
        tracing::debug!(path = %path.display(), panels = spec.panels.len(), "Rendered chart");
        Ok(())
    }
}

/// Build the spec for `tracked` and render it in one go.
pub fn render_metrics(
    renderer: &ChartRenderer,
    tracked: &TrackedMetrics,
    metric_names: &[String],
    path: &Path,
) -> Result<ChartSpec, RenderError> {
    let spec = ChartSpec::build(tracked, metric_names)?;
    renderer.render(&spec, path)?;
    Ok(spec)
}

/// Register the TrueType font at `path` unless it is already the active one.
///
/// Plotters keeps fonts in a process-wide table, so switching paths replaces the font for
/// every renderer. Each distinct load stays allocated for the rest of the process.
fn ensure_font(path: &Path) -> Result<(), RenderError> {
    let mut current = FONT_REGISTERED
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if current.as_deref() == Some(path) {
        return Ok(());
    }
    let bytes = std::fs::read(path).map_err(|e| RenderError::FontLoad {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    register_font(FONT_FAMILY, FontStyle::Normal, bytes).map_err(|_| RenderError::FontLoad {
        path: path.to_path_buf(),
        message: "not a valid TrueType font".into(),
    })?;
    tracing::debug!(path = %path.display(), "Registered chart font");
    *current = Some(path.to_path_buf());
    Ok(())
}

fn draw_err<E: std::fmt::Display>(err: E) -> RenderError {
    RenderError::Backend {
        message: err.to_string(),
    }
}

type MetricChart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    epochs: &[usize],
    panel: &PanelSpec,
) -> Result<(), RenderError> {
    let mut plot_area = area.clone();
    for line in &panel.title {
        plot_area = plot_area
            .titled(line, (FONT_FAMILY, TITLE_FONT_SIZE))
            .map_err(draw_err)?;
    }

    let first = epochs.first().copied().unwrap_or(0) as f64;
    let last = epochs.last().copied().unwrap_or(0) as f64;
    let (x0, x1) = padded_range(first, last, 0.0);

    let mut visible = panel.train.values.clone();
    if let Some(val) = &panel.validation {
        visible.extend_from_slice(&val.values);
    }
    let (y0, y1) = value_range(&visible);

    let mut chart = ChartBuilder::on(&plot_area)
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(60)
        .right_y_label_area_size(if panel.learning_rate.is_some() { 60 } else { 0 })
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(draw_err)?;

    chart
        .configure_mesh()
        .x_desc("epochs")
        .x_label_formatter(&|x: &f64| format!("{x:.0}"))
        .label_style((FONT_FAMILY, LABEL_FONT_SIZE))
        .axis_desc_style((FONT_FAMILY, LABEL_FONT_SIZE))
        .draw()
        .map_err(draw_err)?;

    draw_series(&mut chart, epochs, &panel.train, TRAIN_COLOR)?;
    if let Some(val) = &panel.validation {
        draw_series(&mut chart, epochs, val, VALIDATION_COLOR)?;
    }

    match &panel.learning_rate {
        Some(lr) => {
            let (l0, l1) = value_range(lr);
            let mut dual = chart.set_secondary_coord(x0..x1, l0..l1);
            dual.configure_secondary_axes()
                .y_desc(LEARNING_RATE_KEY)
                .label_style((FONT_FAMILY, LABEL_FONT_SIZE))
                .axis_desc_style(
                    (FONT_FAMILY, LABEL_FONT_SIZE)
                        .into_font()
                        .color(&LEARNING_RATE_COLOR),
                )
                .draw()
                .map_err(draw_err)?;
            dual.draw_secondary_series(LineSeries::new(
                finite_points(epochs, lr),
                LEARNING_RATE_COLOR.stroke_width(1),
            ))
            .map_err(draw_err)?;
            draw_legend(&mut *dual)
        }
        None => draw_legend(&mut chart),
    }
}

fn draw_series<'a, DB: DrawingBackend + 'a>(
    chart: &mut MetricChart<'a, DB>,
    epochs: &[usize],
    series: &SeriesSpec,
    color: RGBColor,
) -> Result<(), RenderError> {
    chart
        .draw_series(
            LineSeries::new(finite_points(epochs, &series.values), color.stroke_width(2))
                .point_size(3),
        )
        .map_err(draw_err)?
        .label(series.name.as_str())
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

    let Some(ext) = series.extremum else {
        return Ok(());
    };
    let Some(&epoch) = epochs.get(ext.index) else {
        return Ok(());
    };
    chart
        .draw_series(std::iter::once(
            EmptyElement::at((epoch as f64, ext.value))
                + Polygon::new(star_points((0, 0), STAR_RADIUS), color.filled()),
        ))
        .map_err(draw_err)?
        .label(format!("{} {}", series.name, ext.policy.label()))
        .legend(move |(x, y)| Polygon::new(star_points((x + 10, y), 6), color.filled()));
    Ok(())
}

fn draw_legend<'a, DB: DrawingBackend + 'a>(chart: &mut MetricChart<'a, DB>) -> Result<(), RenderError> {
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font((FONT_FAMILY, LABEL_FONT_SIZE))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(draw_err)
}

fn finite_points(epochs: &[usize], values: &[f64]) -> Vec<(f64, f64)> {
    epochs
        .iter()
        .zip(values)
        .filter(|(_, value)| value.is_finite())
        .map(|(&epoch, &value)| (epoch as f64, value))
        .collect()
}

/// Five-pointed star around `center`, in pixel offsets.
fn star_points(center: (i32, i32), radius: i32) -> Vec<(i32, i32)> {
    let outer = radius as f64;
    let inner = outer * 0.45;
    (0..10)
        .map(|i| {
            let r = if i % 2 == 0 { outer } else { inner };
            let angle = -std::f64::consts::FRAC_PI_2 + i as f64 * std::f64::consts::PI / 5.0;
            (
                center.0 + (r * angle.cos()).round() as i32,
                center.1 + (r * angle.sin()).round() as i32,
            )
        })
        .collect()
}

fn value_range(values: &[f64]) -> (f64, f64) {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo > hi {
        return (0.0, 1.0);
    }
    padded_range(lo, hi, 0.05)
}

/// Widen `[lo, hi]` by `pad` of its span, or by a fixed margin when the span is zero.
fn padded_range(lo: f64, hi: f64, pad: f64) -> (f64, f64) {
    let span = hi - lo;
    if span <= f64::EPSILON {
        let margin = if lo.abs() > f64::EPSILON { lo.abs() * 0.1 } else { 1.0 };
        return (lo - margin, hi + margin);
    }
    (lo - span * pad, hi + span * pad)
}
