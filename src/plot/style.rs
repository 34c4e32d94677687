use serde::{Deserialize, Serialize};

use crate::color::Colormap;

/// AASTeX (AJ) single column width in inches.
pub const COLUMN_WIDTH: f64 = 242.26653 / 72.27;
/// AASTeX (AJ) full text width in inches.
pub const TEXT_WIDTH: f64 = 513.11743 / 72.27;

pub const SMALL_SIZE: f64 = 9.0;
pub const NORMAL_SIZE: f64 = 10.0;
pub const BIG_SIZE: f64 = 12.0;

/// Publication formatting shared by every figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotStyle {
    pub font_family: String,
    /// Point sizes.
    pub title_size: f64,
    pub label_size: f64,
    pub tick_label_size: f64,
    /// Tick marks point into the plotting area.
    pub ticks_inward: bool,
    /// Close the axes box on the top and right.
    pub frame: bool,
    /// Figure background as `0xRRGGBB`.
    pub face_color: u32,
    /// Output resolution of bitmap figures.
    pub dpi: f64,
}

impl Default for PlotStyle {
    fn default() -> Self {
        PlotStyle {
            font_family: "Nimbus Roman No9 L".to_string(),
            title_size: NORMAL_SIZE,
            label_size: NORMAL_SIZE,
            tick_label_size: SMALL_SIZE,
            ticks_inward: true,
            frame: true,
            face_color: 0xffffff,
            dpi: 300.0,
        }
    }
}

impl PlotStyle {
    /// Points → pixels at the figure resolution.
    pub fn px(&self, points: f64) -> f64 {
        points * self.dpi / 72.0
    }

    /// Figure size in pixels for a size in inches.
    pub fn pixels(&self, figsize: (f64, f64)) -> (u32, u32) {
        (
            (figsize.0 * self.dpi).round().max(1.0) as u32,
            (figsize.1 * self.dpi).round().max(1.0) as u32,
        )
    }
}

/// Options of a Kiel diagram (Teff vs. log g, colored by a third quantity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KielPlotOptions {
    /// Figure size in inches.
    pub figsize: (f64, f64),
    pub vmin: f64,
    pub vmax: f64,
    pub cmap: Colormap,
    /// Resolution of the density raster, in cells per inch.
    pub dpi: f64,
    pub xlabel: String,
    pub ylabel: String,
    pub title: String,
    pub colorbar_label: String,
    /// Draw individual points instead of a density raster.
    pub scatter: bool,
}

impl Default for KielPlotOptions {
    fn default() -> Self {
        KielPlotOptions {
            figsize: (TEXT_WIDTH * 0.8, TEXT_WIDTH * 0.8),
            vmin: -2.0,
            vmax: 0.5,
            cmap: Colormap::Viridis,
            dpi: 120.0,
            xlabel: "Effective Temperature (Teff) [K]".to_string(),
            ylabel: "Surface Gravity (log(g))".to_string(),
            title: "Kiel Diagram of APOGEE DR17 Stars".to_string(),
            colorbar_label: "[Fe/H]".to_string(),
            scatter: false,
        }
    }
}
