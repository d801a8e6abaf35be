//! Color values and colorspace-correct pixel sampling.
//!
//! Every color that leaves this crate is expressed in sRGB. Frames may be
//! captured in another working space (Display P3 on wide-gamut panels,
//! linear light from some compositors); `sample_center` converts explicitly
//! so the same physical pixel always reports the same value.

use crate::capture::CroppedRegion;
use serde::{Deserialize, Serialize};

/// An sRGB color with straight (non-premultiplied) alpha, components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self::new(
            rgba[0] as f64 / 255.0,
            rgba[1] as f64 / 255.0,
            rgba[2] as f64 / 255.0,
            rgba[3] as f64 / 255.0,
        )
    }

    /// Quantize to 8 bits per channel, rounding half away from zero.
    pub fn to_rgba8(&self) -> [u8; 4] {
        [
            quantize(self.red),
            quantize(self.green),
            quantize(self.blue),
            quantize(self.alpha),
        ]
    }

    /// HSB brightness, i.e. the largest color component.
    pub fn brightness(&self) -> f64 {
        self.red.max(self.green).max(self.blue)
    }

    pub fn is_opaque(&self) -> bool {
        quantize(self.alpha) == u8::MAX
    }

    /// Uppercase hex: `RRGGBB` when fully opaque, `RRGGBBAA` otherwise.
    pub fn to_hex(&self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        if a == u8::MAX {
            format!("{:02X}{:02X}{:02X}", r, g, b)
        } else {
            format!("{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

fn quantize(component: f64) -> u8 {
    (component.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Working colorspace of captured pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    #[default]
    Srgb,
    DisplayP3,
    LinearSrgb,
}

/// Linear Display P3 → linear sRGB (both D65).
const P3_TO_SRGB: [[f64; 3]; 3] = [
    [1.224_940_176_280_561, -0.224_940_176_280_561, 0.0],
    [-0.042_056_954_709_688, 1.042_056_954_709_688, 0.0],
    [-0.019_637_554_590_334, -0.078_636_045_550_632, 1.098_273_600_140_966],
];

impl ColorSpace {
    /// Convert encoded RGB components from this space into encoded sRGB.
    pub fn to_srgb(self, rgb: [f64; 3]) -> [f64; 3] {
        match self {
            ColorSpace::Srgb => rgb,
            ColorSpace::LinearSrgb => rgb.map(|c| srgb_encode(c.clamp(0.0, 1.0))),
            ColorSpace::DisplayP3 => {
                // P3 shares the sRGB transfer curve.
                let linear = rgb.map(srgb_decode);
                let mut out = [0.0; 3];
                for (row, value) in P3_TO_SRGB.iter().zip(out.iter_mut()) {
                    let mixed = row[0] * linear[0] + row[1] * linear[1] + row[2] * linear[2];
                    *value = srgb_encode(mixed.clamp(0.0, 1.0));
                }
                out
            }
        }
    }

    /// Build an sRGB `Color` from an 8-bit pixel stored in this space.
    pub fn color_from_rgba8(self, rgba: [u8; 4]) -> Color {
        let raw = Color::from_rgba8(rgba);
        let [red, green, blue] = self.to_srgb([raw.red, raw.green, raw.blue]);
        Color::new(red, green, blue, raw.alpha)
    }
}

fn srgb_decode(c: f64) -> f64 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn srgb_encode(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// Sample the pixel at the geometric center of `region`.
///
/// The center is `(width / 2, height / 2)` with integer truncation, which for
/// the even-sided crops produced by `extract_region` is the pixel just below
/// and right of the exact midpoint. Returns `None` for an absent or empty region.
pub fn sample_center(region: Option<&CroppedRegion>) -> Option<Color> {
    let region = region?;
    let image = region.image();
    if image.width() == 0 || image.height() == 0 {
        return None;
    }

    let pixel = image.get_pixel(image.width() / 2, image.height() / 2);
    Some(region.color_space().color_from_rgba8(pixel.0))
}
