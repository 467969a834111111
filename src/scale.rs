use crate::colours::rgb_from_u32 as to_rgb;
use crate::ir::Rgb;

/// A named continuous colour scale, interpolated linearly between stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColourScale {
    pub name: &'static str,
    colours: &'static [u32],
    /// Stop positions in [0, 1]; evenly spaced when `None`
    positions: Option<&'static [f64]>,
}

pub const DEFAULT_SCALE: &str = "jet";

// Sorted by name so `names()` lists them the way the picker shows them
const SCALES: &[ColourScale] = &[
    ColourScale {
        name: "blues",
        colours: &[0xF7FBFF, 0xDEEBF7, 0xC6DBEF, 0x9ECAE1, 0x6BAED6, 0x4292C6, 0x2171B5, 0x08519C, 0x08306B],
        positions: None,
    },
    ColourScale {
        name: "cividis",
        colours: &[0x00224E, 0x123570, 0x3B496C, 0x575D6D, 0x707173, 0x8A8678, 0xA59C74, 0xC3B369, 0xE1CC55, 0xFEE838],
        positions: None,
    },
    ColourScale {
        name: "greens",
        colours: &[0xF7FCF5, 0xE5F5E0, 0xC7E9C0, 0xA1D99B, 0x74C476, 0x41AB5D, 0x238B45, 0x006D2C, 0x00441B],
        positions: None,
    },
    ColourScale {
        name: "greys",
        colours: &[0xFFFFFF, 0x000000],
        positions: None,
    },
    ColourScale {
        name: "hot",
        colours: &[0x000000, 0xE60000, 0xFFD200, 0xFFFFFF],
        positions: Some(&[0.0, 0.3, 0.6, 1.0]),
    },
    ColourScale {
        name: "inferno",
        colours: &[0x000004, 0x1B0C41, 0x4A0C6B, 0x781C6D, 0xA52C60, 0xCF4446, 0xED6925, 0xFB9B06, 0xF7D13D, 0xFCFFA4],
        positions: None,
    },
    ColourScale {
        name: "jet",
        colours: &[0x000083, 0x003CAA, 0x05FFFF, 0xFFFF00, 0xFA0000, 0x800000],
        positions: Some(&[0.0, 0.125, 0.375, 0.625, 0.875, 1.0]),
    },
    ColourScale {
        name: "magma",
        colours: &[0x000004, 0x180F3D, 0x440F76, 0x721F81, 0x9E2F7F, 0xCD4071, 0xF1605D, 0xFD9668, 0xFECA8D, 0xFCFDBF],
        positions: None,
    },
    ColourScale {
        name: "plasma",
        colours: &[0x0D0887, 0x46039F, 0x7201A8, 0x9C179E, 0xBD3786, 0xD8576B, 0xED7953, 0xFB9F3A, 0xFDCA26, 0xF0F921],
        positions: None,
    },
    ColourScale {
        name: "rdbu",
        colours: &[
            0x67001F, 0xB2182B, 0xD6604D, 0xF4A582, 0xFDDBC7, 0xF7F7F7, 0xD1E5F0, 0x92C5DE, 0x4393C3, 0x2166AC, 0x053061,
        ],
        positions: None,
    },
    ColourScale {
        name: "reds",
        colours: &[0xFFF5F0, 0xFEE0D2, 0xFCBBA1, 0xFC9272, 0xFB6A4A, 0xEF3B2C, 0xCB181D, 0xA50F15, 0x67000D],
        positions: None,
    },
    ColourScale {
        name: "viridis",
        colours: &[0x440154, 0x482878, 0x3E4989, 0x31688E, 0x26828E, 0x1F9E89, 0x35B779, 0x6DCD59, 0xB4DE2C, 0xFDE725],
        positions: None,
    },
    ColourScale {
        name: "ylorrd",
        colours: &[0xFFFFCC, 0xFFEDA0, 0xFED976, 0xFEB24C, 0xFD8D3C, 0xFC4E2A, 0xE31A1C, 0xBD0026, 0x800026],
        positions: None,
    },
];

impl ColourScale {
    pub fn by_name(name: &str) -> Option<ColourScale> {
        let name = name.trim();
        SCALES.iter().find(|s| s.name.eq_ignore_ascii_case(name)).copied()
    }

    pub fn names() -> Vec<&'static str> {
        SCALES.iter().map(|s| s.name).collect()
    }

    fn position(&self, i: usize) -> f64 {
        match self.positions {
            Some(p) => p[i],
            None => i as f64 / (self.colours.len() - 1) as f64,
        }
    }

    /// Colour at `t`, clamped to [0, 1]
    pub fn colour_at(&self, t: f64) -> Rgb {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let last = self.colours.len() - 1;
        for i in 0..last {
            let (lo, hi) = (self.position(i), self.position(i + 1));
            if t <= hi {
                let frac = if hi > lo { (t - lo) / (hi - lo) } else { 0.0 };
                return mix(to_rgb(self.colours[i]), to_rgb(self.colours[i + 1]), frac);
            }
        }
        to_rgb(self.colours[last])
    }
}

fn mix(a: Rgb, b: Rgb, frac: f64) -> Rgb {
    let lerp = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
    Rgb(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// Min/max of the finite values, for normalising onto a colour scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<ValueRange> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values.into_iter().filter(|v| v.is_finite()) {
            if v < min { min = v; }
            if v > max { max = v; }
        }
        (min <= max).then_some(ValueRange { min, max })
    }

    pub fn normalize(&self, value: f64) -> f64 {
        if self.max == self.min {
            0.5
        } else {
            (value - self.min) / (self.max - self.min)
        }
    }
}

/// Axis range with 5% padding; a single point gets +/- 1
pub fn pad_range(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        (min - 1.0, max + 1.0)
    } else {
        let padding = (max - min) * 0.05;
        (min - padding, max + padding)
    }
}
