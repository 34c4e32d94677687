use std::path::Path;

use plotters::chart::LabelAreaPosition;
use plotters::coord::Shift;
use plotters::prelude::*;

use super::density::DensityGrid;
use super::style::{KielPlotOptions, PlotStyle};
use super::PlotError;
use crate::color::ColorScale;

/// Colour strips in the colorbar.
const COLORBAR_STEPS: usize = 256;
/// Scatter marker radius in points.
const MARKER_RADIUS_PT: f64 = 2.5;
/// Upper bound on density raster cells along each axis.
const MAX_RASTER_CELLS: usize = 4096;

fn drawing<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

/// Finite data range with a small margin; `(0, 1)` when nothing is finite.
pub fn axis_range(values: &[f64]) -> (f64, f64) {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if lo > hi {
        return (0.0, 1.0);
    }
    if hi - lo < f64::EPSILON * hi.abs().max(1.0) {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = (hi - lo) * 0.02;
    (lo - pad, hi + pad)
}

/// Compact tick text: `4000`, `2.5`, `-0.25`.
pub fn tick_label(v: f64) -> String {
    let v = if v.abs() < 1e-9 { 0.0 } else { v };
    let s = format!("{v:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn check(
    x: &[f64],
    y: &[f64],
    c: &[f64],
    opts: &KielPlotOptions,
    style: &PlotStyle,
) -> Result<(), PlotError> {
    if x.len() != y.len() || x.len() != c.len() {
        return Err(PlotError::LengthMismatch {
            x: x.len(),
            y: y.len(),
            c: c.len(),
        });
    }
    if opts.vmax <= opts.vmin || opts.vmin.is_nan() || opts.vmax.is_nan() {
        return Err(PlotError::InvalidOption(format!(
            "vmin ({}) must be below vmax ({})",
            opts.vmin, opts.vmax
        )));
    }
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !(positive(opts.figsize.0) && positive(opts.figsize.1) && positive(opts.dpi)) {
        return Err(PlotError::InvalidOption(
            "figsize and dpi must be positive".to_string(),
        ));
    }
    if !positive(style.dpi) {
        return Err(PlotError::InvalidOption(format!(
            "figure dpi must be positive (got {})",
            style.dpi
        )));
    }
    Ok(())
}

/// Render a Kiel diagram of `x` (Teff) against `y` (log g), coloured by `c`.
///
/// Both axes are inverted. In density mode every raster cell is coloured by
/// the mean `c` of the points falling in it; with `opts.scatter` each point
/// is drawn individually. The output format follows the extension of `out`
/// (`.png`, `.jpg`, `.bmp` or `.svg`).
pub fn render_kiel(
    x: &[f64],
    y: &[f64],
    c: &[f64],
    opts: &KielPlotOptions,
    style: &PlotStyle,
    out: &Path,
) -> Result<(), PlotError> {
    check(x, y, c, opts, style)?;

    let ext = out
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let size = style.pixels(opts.figsize);
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "bmp" => {
            let root = BitMapBackend::new(out, size).into_drawing_area();
            draw_figure(&root, x, y, c, opts, style)?;
            root.present().map_err(drawing)?;
        }
        "svg" => {
            let root = SVGBackend::new(out, size).into_drawing_area();
            draw_figure(&root, x, y, c, opts, style)?;
            root.present().map_err(drawing)?;
        }
        other => return Err(PlotError::UnsupportedFormat(other.to_string())),
    }

    log::info!(
        "Rendered {} points ({}) to {}",
        x.len(),
        if opts.scatter { "scatter" } else { "density" },
        out.display()
    );
    Ok(())
}

/// Raster cells spanning `pixels` at `dpi` cells per inch, clamped to
/// `1..=MAX_RASTER_CELLS`.
fn raster_cells(pixels: u32, dpi: f64, figure_dpi: f64) -> usize {
    let cells = (pixels as f64 * dpi / figure_dpi).round();
    if cells.is_finite() {
        (cells as usize).clamp(1, MAX_RASTER_CELLS)
    } else {
        MAX_RASTER_CELLS
    }
}

fn draw_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    x: &[f64],
    y: &[f64],
    c: &[f64],
    opts: &KielPlotOptions,
    style: &PlotStyle,
) -> Result<(), PlotError> {
    let face = style.face_color;
    root.fill(&RGBColor((face >> 16) as u8, (face >> 8) as u8, face as u8))
        .map_err(drawing)?;

    let family = style.font_family.as_str();
    let title_px = style.px(style.title_size);
    let label_px = style.px(style.label_size);
    let tick_px = style.px(style.tick_label_size);
    let margin = style.px(8.0) as i32;
    let label_area = (tick_px * 2.0 + label_px * 1.5) as i32;
    let tick_len = style.px(3.5) as i32;
    let line_width = style.px(0.8).round().max(1.0) as u32;

    let (width, _) = root.dim_in_pixel();
    let bar_width = (width as f64 * 0.17) as i32;
    let (main, bar) = root.split_horizontally(width as i32 - bar_width);

    // Axes are inverted by plotting negated coordinates and negating labels.
    let (x_lo, x_hi) = axis_range(x);
    let (y_lo, y_hi) = axis_range(y);

    let mut chart = ChartBuilder::on(&main)
        .caption(&opts.title, (family, title_px))
        .margin(margin)
        .x_label_area_size(label_area)
        .y_label_area_size(label_area)
        .build_cartesian_2d(-x_hi..-x_lo, -y_hi..-y_lo)
        .map_err(drawing)?;

    let x_fmt = |v: &f64| tick_label(-*v);
    let y_fmt = |v: &f64| tick_label(-*v);
    let mut mesh = chart.configure_mesh();
    mesh.disable_mesh()
        .x_desc(&opts.xlabel)
        .y_desc(&opts.ylabel)
        .axis_desc_style((family, label_px))
        .label_style((family, tick_px))
        .axis_style(BLACK.stroke_width(line_width))
        .x_label_formatter(&x_fmt)
        .y_label_formatter(&y_fmt);
    if style.ticks_inward {
        mesh.set_tick_mark_size(LabelAreaPosition::Bottom, -tick_len)
            .set_tick_mark_size(LabelAreaPosition::Left, -tick_len);
    }
    mesh.draw().map_err(drawing)?;

    let scale = ColorScale::new(opts.cmap, opts.vmin, opts.vmax);
    let fill = |v: f64| {
        let rgb = scale.color_for(v);
        RGBColor(rgb.red, rgb.green, rgb.blue).filled()
    };

    if opts.scatter {
        let radius = style.px(MARKER_RADIUS_PT).round().max(1.0) as i32;
        chart
            .draw_series(
                x.iter()
                    .zip(y)
                    .zip(c)
                    .filter(|((xi, yi), ci)| xi.is_finite() && yi.is_finite() && !ci.is_nan())
                    .map(|((&xi, &yi), &ci)| Circle::new((-xi, -yi), radius, fill(ci))),
            )
            .map_err(drawing)?;
    } else {
        let (pw, ph) = chart.plotting_area().dim_in_pixel();
        let nx = raster_cells(pw, opts.dpi, style.dpi);
        let ny = raster_cells(ph, opts.dpi, style.dpi);
        let grid = DensityGrid::build(x, y, c, (x_lo, x_hi), (y_lo, y_hi), nx, ny);
        chart
            .draw_series(grid.occupied().map(|(ix, iy, mean)| {
                let ((x0, y0), (x1, y1)) = grid.cell_bounds(ix, iy);
                Rectangle::new([(-x0, -y0), (-x1, -y1)], fill(mean))
            }))
            .map_err(drawing)?;
    }

    if style.frame {
        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(-x_hi, -y_hi), (-x_lo, -y_lo)],
                BLACK.stroke_width(line_width),
            )))
            .map_err(drawing)?;
    }

    // Colorbar, vertically aligned with the plotting area.
    let mut cbar = ChartBuilder::on(&bar)
        .margin_top(margin + (title_px * 1.6) as i32)
        .margin_bottom(margin + label_area)
        .margin_left(margin)
        .margin_right(margin)
        .right_y_label_area_size(label_area)
        .build_cartesian_2d(0.0..1.0, opts.vmin..opts.vmax)
        .map_err(drawing)?;
    cbar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc(&opts.colorbar_label)
        .axis_desc_style((family, label_px))
        .label_style((family, tick_px))
        .y_label_formatter(&|v: &f64| tick_label(*v))
        .draw()
        .map_err(drawing)?;

    let span = opts.vmax - opts.vmin;
    cbar.draw_series((0..COLORBAR_STEPS).map(|k| {
        let v0 = opts.vmin + span * k as f64 / COLORBAR_STEPS as f64;
        let v1 = opts.vmin + span * (k + 1) as f64 / COLORBAR_STEPS as f64;
        Rectangle::new([(0.0, v0), (1.0, v1)], fill((v0 + v1) / 2.0))
    }))
    .map_err(drawing)?;
    cbar.draw_series(std::iter::once(Rectangle::new(
        [(0.0, opts.vmin), (1.0, opts.vmax)],
        BLACK.stroke_width(line_width),
    )))
    .map_err(drawing)?;

    Ok(())
}
