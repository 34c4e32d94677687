use std::fmt;
use std::str::FromStr;

use palette::{LinSrgb, Mix, Srgb};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Colormaps
// ---------------------------------------------------------------------------

/// Sequential colormaps, sampled at ten evenly spaced stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Viridis,
    Plasma,
    Magma,
    Inferno,
    Cividis,
    Gray,
}

const VIRIDIS: [u32; 10] = [
    0x440154, 0x482878, 0x3e4989, 0x31688e, 0x26828e, 0x1f9e89, 0x35b779, 0x6ece58, 0xb5de2b,
    0xfde725,
];
const PLASMA: [u32; 10] = [
    0x0d0887, 0x46039f, 0x7201a8, 0x9c179e, 0xbd3786, 0xd8576b, 0xed7953, 0xfb9f3a, 0xfdca26,
    0xf0f921,
];
const MAGMA: [u32; 10] = [
    0x000004, 0x180f3d, 0x440f76, 0x721f81, 0x9e2f7f, 0xcd4071, 0xf1605d, 0xfd9668, 0xfeca8d,
    0xfcfdbf,
];
const INFERNO: [u32; 10] = [
    0x000004, 0x1b0c41, 0x4a0c6b, 0x781c6d, 0xa52c60, 0xcf4446, 0xed6925, 0xfb9b06, 0xf7d13d,
    0xfcffa4,
];
const CIVIDIS: [u32; 10] = [
    0x00224e, 0x123570, 0x3b496c, 0x575d6d, 0x707173, 0x8a8779, 0xa69d75, 0xc4b56c, 0xe4cf5b,
    0xfee838,
];
const GRAY: [u32; 2] = [0x000000, 0xffffff];

impl Colormap {
    pub const ALL: [Colormap; 6] = [
        Colormap::Viridis,
        Colormap::Plasma,
        Colormap::Magma,
        Colormap::Inferno,
        Colormap::Cividis,
        Colormap::Gray,
    ];

    fn stops(self) -> &'static [u32] {
        match self {
            Colormap::Viridis => &VIRIDIS,
            Colormap::Plasma => &PLASMA,
            Colormap::Magma => &MAGMA,
            Colormap::Inferno => &INFERNO,
            Colormap::Cividis => &CIVIDIS,
            Colormap::Gray => &GRAY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Viridis => "viridis",
            Colormap::Plasma => "plasma",
            Colormap::Magma => "magma",
            Colormap::Inferno => "inferno",
            Colormap::Cividis => "cividis",
            Colormap::Gray => "gray",
        }
    }

    /// Colour at position `t` in `[0, 1]` (clamped), interpolated in linear RGB.
    pub fn at(self, t: f64) -> Srgb<u8> {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let pos = t * (stops.len() - 1) as f64;
        let lo = (pos.floor() as usize).min(stops.len() - 2);
        let frac = (pos - lo as f64) as f32;

        let a = linear(stops[lo]);
        let b = linear(stops[lo + 1]);
        Srgb::<f32>::from_linear(a.mix(b, frac)).into_format()
    }
}

/// `0xRRGGBB` → linear RGB.
fn linear(hex: u32) -> LinSrgb {
    let rgb = Srgb::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8);
    rgb.into_format::<f32>().into_linear()
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Colormap::ALL
            .into_iter()
            .find(|c| c.name() == lower || (lower == "grey" && *c == Colormap::Gray))
            .ok_or_else(|| format!("unknown colormap '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Value normalisation: data value → colour
// ---------------------------------------------------------------------------

/// Maps data values onto a colormap over `[vmin, vmax]`, clipping outside.
#[derive(Debug, Clone, Copy)]
pub struct ColorScale {
    pub cmap: Colormap,
    pub vmin: f64,
    pub vmax: f64,
}

impl ColorScale {
    pub fn new(cmap: Colormap, vmin: f64, vmax: f64) -> Self {
        ColorScale { cmap, vmin, vmax }
    }

    /// Position of `value` in `[0, 1]`.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.vmax - self.vmin;
        if span.abs() < f64::EPSILON {
            return 0.5;
        }
        ((value - self.vmin) / span).clamp(0.0, 1.0)
    }

    pub fn color_for(&self, value: f64) -> Srgb<u8> {
        self.cmap.at(self.normalize(value))
    }
}
