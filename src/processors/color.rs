//! Color scales and hex color handling for point coloring.

use std::fmt;

use thiserror::Error;

use crate::config::ScaleName;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("Invalid hex color: {0:?}")]
    InvalidHex(String),
}

/// An sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse `#rgb` or `#rrggbb` (the `#` is optional).
    pub fn from_hex(text: &str) -> Result<Self, ColorError> {
        let digits = text.trim().trim_start_matches('#');
        let invalid = || ColorError::InvalidHex(text.to_string());
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match digits.len() {
            3 => {
                let expand = |i: usize| channel(&digits[i..i + 1].repeat(2));
                Ok(Rgb(expand(0)?, expand(1)?, expand(2)?))
            }
            6 => Ok(Rgb(
                channel(&digits[0..2])?,
                channel(&digits[2..4])?,
                channel(&digits[4..6])?,
            )),
            _ => Err(invalid()),
        }
    }

    /// Lowercase `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

const DARKMINT: &[Rgb] = &[
    Rgb(210, 251, 212),
    Rgb(165, 219, 194),
    Rgb(123, 188, 176),
    Rgb(85, 156, 158),
    Rgb(58, 124, 137),
    Rgb(35, 93, 114),
    Rgb(18, 63, 90),
];

const VIRIDIS: &[Rgb] = &[
    Rgb(68, 1, 84),
    Rgb(72, 40, 120),
    Rgb(62, 73, 137),
    Rgb(49, 104, 142),
    Rgb(38, 130, 142),
    Rgb(31, 158, 137),
    Rgb(53, 183, 121),
    Rgb(110, 206, 88),
    Rgb(181, 222, 43),
    Rgb(253, 231, 37),
];

const PLASMA: &[Rgb] = &[
    Rgb(13, 8, 135),
    Rgb(70, 3, 159),
    Rgb(114, 1, 168),
    Rgb(156, 23, 158),
    Rgb(189, 55, 134),
    Rgb(216, 87, 107),
    Rgb(237, 121, 83),
    Rgb(251, 159, 58),
    Rgb(253, 202, 38),
    Rgb(240, 249, 33),
];

const YLORRD: &[Rgb] = &[
    Rgb(255, 255, 204),
    Rgb(255, 237, 160),
    Rgb(254, 217, 118),
    Rgb(254, 178, 76),
    Rgb(253, 141, 60),
    Rgb(252, 78, 42),
    Rgb(227, 26, 28),
    Rgb(189, 0, 38),
    Rgb(128, 0, 38),
];

const BLUES: &[Rgb] = &[
    Rgb(247, 251, 255),
    Rgb(222, 235, 247),
    Rgb(198, 219, 239),
    Rgb(158, 202, 225),
    Rgb(107, 174, 214),
    Rgb(66, 146, 198),
    Rgb(33, 113, 181),
    Rgb(8, 81, 156),
    Rgb(8, 48, 107),
];

/// A sequential scale of evenly spaced color stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub name: ScaleName,
    stops: &'static [Rgb],
}

impl ColorScale {
    pub fn named(name: ScaleName) -> Self {
        let stops = match name {
            ScaleName::Darkmint => DARKMINT,
            ScaleName::Viridis => VIRIDIS,
            ScaleName::Plasma => PLASMA,
            ScaleName::Ylorrd => YLORRD,
            ScaleName::Blues => BLUES,
        };
        Self { name, stops }
    }

    pub fn stops(&self) -> &[Rgb] {
        self.stops
    }

    /// Color at position `t` in [0, 1]; values outside are clamped.
    pub fn sample(&self, t: f64) -> Rgb {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let segments = self.stops.len() - 1;
        let scaled = t * segments as f64;
        let i = (scaled.floor() as usize).min(segments - 1);
        self.stops[i].lerp(self.stops[i + 1], scaled - i as f64)
    }

    /// Color of `value` within `[min, max]`.
    pub fn color_for(&self, value: f64, min: f64, max: f64) -> Rgb {
        self.sample(scale_position(value, min, max))
    }
}

/// Position of `value` in `[min, max]` as a fraction; a degenerate range maps
/// every value to the middle of the scale.
pub fn scale_position(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span.abs() < f64::EPSILON {
        0.5
    } else {
        ((value - min) / span).clamp(0.0, 1.0)
    }
}
