//! Frames, displays and screen geometry.
//!
//! Screen coordinates are global points with a bottom-left origin, y growing
//! upwards; captured bitmaps are top-left origin pixels. `region.rs` owns the
//! mapping between the two.

use crate::color::ColorSpace;
use crate::config::Quality;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    pub fn mid_x(&self) -> f64 {
        self.origin.x + self.size.width / 2.0
    }

    pub fn mid_y(&self) -> f64 {
        self.origin.y + self.size.height / 2.0
    }

    /// Shrink by `dx` on the left and right and `dy` on the top and bottom.
    pub fn inset(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(
            self.origin.x + dx,
            self.origin.y + dy,
            (self.size.width - 2.0 * dx).max(0.0),
            (self.size.height - 2.0 * dy).max(0.0),
        )
    }
}

/// Identifier of a physical display as reported by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayId(pub u32);

/// Identifier of an on-screen surface (window) excluded from capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u32);

/// Snapshot of one display's placement in screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayDescriptor {
    pub id: DisplayId,
    /// Bounds in global screen points, bottom-left origin.
    pub frame: Rect,
    /// Captured pixels per screen point.
    pub scale_factor: f64,
}

impl DisplayDescriptor {
    /// Whether `point` lies on this display.
    ///
    /// x is half-open `[min, max)` and y is half-open `(min, max]`, so an
    /// edge shared by two displays belongs to exactly one of them.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.frame.min_x()
            && point.x < self.frame.max_x()
            && point.y > self.frame.min_y()
            && point.y <= self.frame.max_y()
    }

    pub fn with_scale(self, scale_factor: f64) -> Self {
        Self {
            scale_factor,
            ..self
        }
    }
}

/// The display under `point`, if any.
pub fn display_at(displays: &[DisplayDescriptor], point: Point) -> Option<&DisplayDescriptor> {
    displays.iter().find(|d| d.contains(point))
}

/// Pixel dimensions a stream should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Display point size scaled by the quality multiplier, truncated.
    pub fn for_display(display: &DisplayDescriptor, quality: Quality) -> Self {
        let multiplier = quality.multiplier();
        Self {
            width: (display.frame.size.width * multiplier) as u32,
            height: (display.frame.size.height * multiplier) as u32,
        }
    }
}

/// Byte layout of raw frame buffers handed over by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// An immutable full-resolution capture of one display.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
    display: DisplayDescriptor,
    color_space: ColorSpace,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, display: DisplayDescriptor, color_space: ColorSpace) -> Self {
        Self {
            image,
            display,
            color_space,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from a tightly packed raw buffer.
    pub fn from_raw(
        width: u32,
        height: u32,
        format: PixelFormat,
        mut data: Vec<u8>,
        display: DisplayDescriptor,
        color_space: ColorSpace,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension);
        }

        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        if format == PixelFormat::Bgra8 {
            for pixel in data.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }

        let image = RgbaImage::from_raw(width, height, data).ok_or(FrameError::BufferSize {
            expected,
            actual: 0,
        })?;
        Ok(Self::new(image, display, color_space))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The display as enumerated when capture was configured.
    pub fn display(&self) -> &DisplayDescriptor {
        &self.display
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Captured pixels per screen point, measured from the bitmap itself.
    pub fn pixels_per_point(&self) -> f64 {
        if self.display.frame.size.width > 0.0 {
            self.image.width() as f64 / self.display.frame.size.width
        } else {
            self.display.scale_factor
        }
    }

    /// Geometry to crop this frame with: the capturing display's placement
    /// and the scale the bitmap was actually delivered at.
    pub fn capture_geometry(&self) -> DisplayDescriptor {
        self.display.with_scale(self.pixels_per_point())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame has zero width or height")]
    ZeroDimension,

    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}
