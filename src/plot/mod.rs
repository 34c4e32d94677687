//! Kiel diagram rendering with `plotters`.

pub mod density;
pub mod kiel;
pub mod style;

use thiserror::Error;

pub use kiel::render_kiel;
pub use style::{KielPlotOptions, PlotStyle};

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("x, y and color must have equal lengths (got {x}, {y}, {c})")]
    LengthMismatch { x: usize, y: usize, c: usize },

    #[error("invalid plot option: {0}")]
    InvalidOption(String),

    #[error("unsupported output format '.{0}' (use .png, .jpg, .bmp or .svg)")]
    UnsupportedFormat(String),

    #[error("drawing failed: {0}")]
    Drawing(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
