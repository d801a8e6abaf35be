//! Loupe overlay — view model, aperture geometry and a software renderer.
//!
//! Geometry is in loupe points with a top-left origin. `render_loupe`
//! draws in this order: clip to the loupe shape, magnified image, tiling
//! pattern, aperture stroke, outer boundary stroke.

use crate::capture::{CroppedRegion, DisplayId, Point, Rect};
use crate::color::{sample_center, Color};
use crate::config::{LoupeShape, SamplerConfig};
use crate::zoom::ZoomLevel;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

pub const OUTER_STROKE_WIDTH: f64 = 4.0;
/// Pattern replicas per axis.
pub const PATTERN_INSTANCES: usize = 50;
const PATTERN_BORDER_WIDTH: f64 = 0.5;
const PATTERN_ALPHA: f64 = 0.15;

/// Stroke color picked for contrast against the sampled pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApertureColor {
    Black,
    White,
}

impl ApertureColor {
    pub fn for_sample(color: Option<&Color>) -> Self {
        match color {
            Some(c) if c.brightness() > 0.8 => ApertureColor::Black,
            _ => ApertureColor::White,
        }
    }

    pub fn color(self) -> Color {
        match self {
            ApertureColor::Black => Color::BLACK,
            ApertureColor::White => Color::WHITE,
        }
    }
}

/// One rendered loupe state: the crop and everything derived from it.
///
/// `color` always comes from `region`, so what is shown and what is
/// reported cannot drift apart.
#[derive(Debug, Clone)]
pub struct LoupeView {
    pub region: CroppedRegion,
    pub color: Option<Color>,
    pub zoom: ZoomLevel,
    pub display: DisplayId,
    pub pointer: Point,
    pub aperture: ApertureColor,
    pub description: Option<String>,
}

impl LoupeView {
    pub fn new(
        region: CroppedRegion,
        zoom: ZoomLevel,
        display: DisplayId,
        pointer: Point,
        config: &SamplerConfig,
    ) -> Self {
        let color = sample_center(Some(&region));
        Self {
            aperture: ApertureColor::for_sample(color.as_ref()),
            description: color.as_ref().and_then(|c| config.describe(c)),
            region,
            color,
            zoom,
            display,
            pointer,
        }
    }
}

/// Whether `p` lies inside `shape` drawn in `bounds`.
pub fn shape_contains(shape: LoupeShape, bounds: &Rect, corner_radius: f64, p: Point) -> bool {
    let inside_box = p.x >= bounds.min_x()
        && p.x <= bounds.max_x()
        && p.y >= bounds.min_y()
        && p.y <= bounds.max_y();

    match shape {
        LoupeShape::Rect => inside_box,
        LoupeShape::RoundedRect => {
            if !inside_box {
                return false;
            }
            let r = corner_radius
                .min(bounds.size.width / 2.0)
                .min(bounds.size.height / 2.0)
                .max(0.0);
            let cx = p.x.clamp(bounds.min_x() + r, bounds.max_x() - r);
            let cy = p.y.clamp(bounds.min_y() + r, bounds.max_y() - r);
            (p.x - cx).powi(2) + (p.y - cy).powi(2) <= r * r
        }
        LoupeShape::Circle => {
            let rx = bounds.size.width / 2.0;
            let ry = bounds.size.height / 2.0;
            if rx <= 0.0 || ry <= 0.0 {
                return false;
            }
            let dx = (p.x - bounds.mid_x()) / rx;
            let dy = (p.y - bounds.mid_y()) / ry;
            dx * dx + dy * dy <= 1.0
        }
    }
}

/// Resolved overlay geometry for one zoom level and viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlan {
    pub bounds: Rect,
    pub shape: LoupeShape,
    pub corner_radius: f64,
    /// Aperture square after the inset, stroked on its edge.
    pub aperture: Rect,
    pub aperture_line_width: f64,
    pub stroke_color: Color,
    pub pattern_origin: Point,
    pub pattern_size: f64,
    pub pattern_displacement: f64,
    pub outer_stroke_width: f64,
}

/// Offset from the viewport midpoint to the middle of the sampled cell
/// along one axis. The crop is stretched over the viewport, so the sampled
/// pixel `n / 2` sits half a cell past the midpoint when `n` is even.
fn sampled_cell_offset(viewport: f64, pixels: u32) -> f64 {
    if pixels == 0 || pixels % 2 != 0 {
        return 0.0;
    }
    viewport / pixels as f64 / 2.0
}

impl OverlayPlan {
    /// `crop_width` x `crop_height` are the pixel dimensions of the crop as
    /// delivered, after any clipping at the frame edge. The aperture is
    /// centered on the cell of the sampled pixel.
    pub fn new(
        zoom: ZoomLevel,
        viewport: f64,
        shape: LoupeShape,
        aperture_color: ApertureColor,
        crop_width: u32,
        crop_height: u32,
    ) -> Self {
        let bounds = Rect::new(0.0, 0.0, viewport, viewport);

        let side = zoom.aperture_size();
        let center = Point::new(
            bounds.mid_x() + sampled_cell_offset(viewport, crop_width),
            bounds.mid_y() + sampled_cell_offset(viewport, crop_height),
        );
        let inset = zoom.inset_amount();
        let aperture = Rect::new(center.x - side / 2.0, center.y - side / 2.0, side, side).inset(inset, inset);

        let pattern_size = zoom.square_pattern_size();
        let half_span = pattern_size * (PATTERN_INSTANCES / 2) as f64;

        Self {
            bounds,
            shape,
            corner_radius: viewport / 8.0,
            aperture,
            aperture_line_width: zoom.aperture_line_width(),
            stroke_color: aperture_color.color(),
            pattern_origin: Point::new(bounds.mid_x() - half_span, bounds.mid_y() - half_span),
            pattern_size,
            pattern_displacement: zoom.square_pattern_displacement(),
            outer_stroke_width: OUTER_STROKE_WIDTH,
        }
    }

    pub fn for_view(view: &LoupeView, config: &SamplerConfig) -> Self {
        OverlayPlan::new(
            view.zoom,
            config.viewport_side(),
            config.loupe_shape,
            view.aperture,
            view.region.image().width(),
            view.region.image().height(),
        )
    }

    /// Every square of the tiling pattern.
    ///
    /// The inner replication steps by `(size, displacement)`, the outer one
    /// by `(displacement, size)`.
    pub fn pattern_cells(&self) -> impl Iterator<Item = Rect> + '_ {
        let n = PATTERN_INSTANCES;
        (0..n).flat_map(move |outer| {
            (0..n).map(move |inner| {
                let (i, j) = (inner as f64, outer as f64);
                Rect::new(
                    self.pattern_origin.x + i * self.pattern_size + j * self.pattern_displacement,
                    self.pattern_origin.y + i * self.pattern_displacement + j * self.pattern_size,
                    self.pattern_size,
                    self.pattern_size,
                )
            })
        })
    }

    pub fn clip_contains(&self, p: Point) -> bool {
        shape_contains(self.shape, &self.bounds, self.corner_radius, p)
    }
}

struct Canvas {
    image: RgbaImage,
    scale: f64,
    mask: Vec<bool>,
}

impl Canvas {
    fn new(plan: &OverlayPlan, scale: f64, side: u32) -> Self {
        let mut mask = Vec::with_capacity(side as usize * side as usize);
        for py in 0..side {
            for px in 0..side {
                mask.push(plan.clip_contains(Self::center_of(px, py, scale)));
            }
        }
        Self {
            image: RgbaImage::new(side, side),
            scale,
            mask,
        }
    }

    fn center_of(px: u32, py: u32, scale: f64) -> Point {
        Point::new((px as f64 + 0.5) / scale, (py as f64 + 0.5) / scale)
    }

    fn visible(&self, px: u32, py: u32) -> bool {
        self.mask
            .get(py as usize * self.image.width() as usize + px as usize)
            .copied()
            .unwrap_or(false)
    }

    fn blend(&mut self, px: u32, py: u32, color: &Color, coverage: f64) {
        if !self.visible(px, py) {
            return;
        }
        let a = (color.alpha * coverage).clamp(0.0, 1.0);
        if a <= 0.0 {
            return;
        }
        let src = color.to_rgba8();
        let dst = self.image.get_pixel(px, py).0;
        let dst_a = dst[3] as f64 / 255.0;
        let out_a = a + dst_a * (1.0 - a);

        let mut out = [0u8; 4];
        for c in 0..3 {
            let value = if out_a > 0.0 {
                (src[c] as f64 * a + dst[c] as f64 * dst_a * (1.0 - a)) / out_a
            } else {
                0.0
            };
            out[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        out[3] = (out_a * 255.0).round() as u8;
        self.image.put_pixel(px, py, Rgba(out));
    }

    /// Fill `rect` (points) with per-pixel area coverage.
    fn fill_rect(&mut self, rect: Rect, color: &Color) {
        let s = self.scale;
        let (x0, y0) = (rect.min_x() * s, rect.min_y() * s);
        let (x1, y1) = (rect.max_x() * s, rect.max_y() * s);
        let (w, h) = (self.image.width() as f64, self.image.height() as f64);
        if x1 <= 0.0 || y1 <= 0.0 || x0 >= w || y0 >= h {
            return;
        }

        let px_start = x0.floor().max(0.0) as u32;
        let py_start = y0.floor().max(0.0) as u32;
        let px_end = x1.ceil().min(w) as u32;
        let py_end = y1.ceil().min(h) as u32;

        for py in py_start..py_end {
            let cover_y = (y1.min(py as f64 + 1.0) - y0.max(py as f64)).max(0.0);
            for px in px_start..px_end {
                let cover_x = (x1.min(px as f64 + 1.0) - x0.max(px as f64)).max(0.0);
                self.blend(px, py, color, cover_x * cover_y);
            }
        }
    }

    /// Stroke centered on the edge of `rect`.
    fn stroke_rect(&mut self, rect: Rect, width: f64, color: &Color) {
        let half = width / 2.0;
        let (x, y) = (rect.min_x(), rect.min_y());
        let (w, h) = (rect.size.width, rect.size.height);
        self.fill_rect(Rect::new(x - half, y - half, w + width, width), color);
        self.fill_rect(Rect::new(x - half, y + h - half, w + width, width), color);
        self.fill_rect(Rect::new(x - half, y + half, width, (h - width).max(0.0)), color);
        self.fill_rect(Rect::new(x + w - half, y + half, width, (h - width).max(0.0)), color);
    }
}

/// Crop pixel shown at loupe point `p` when a `width` x `height` crop fills
/// the viewport.
fn source_pixel(plan: &OverlayPlan, width: u32, height: u32, p: Point) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let cell_x = plan.bounds.size.width / width as f64;
    let cell_y = plan.bounds.size.height / height as f64;
    let sx = ((p.x - plan.bounds.min_x()) / cell_x).floor();
    let sy = ((p.y - plan.bounds.min_y()) / cell_y).floor();
    if sx < 0.0 || sy < 0.0 || sx >= width as f64 || sy >= height as f64 {
        return None;
    }
    Some((sx as u32, sy as u32))
}

/// Rasterize `view` with `plan` at `scale` pixels per point.
pub fn render_loupe(view: &LoupeView, plan: &OverlayPlan, scale: f64) -> Result<RgbaImage, RenderError> {
    let side = (plan.bounds.size.width * scale).round();
    if side.is_nan() || side < 1.0 {
        return Err(RenderError::ZeroDimension);
    }
    let side = side as u32;
    let mut canvas = Canvas::new(plan, scale, side);

    // Nearest-neighbour magnification. A crop clipped at the frame edge is
    // stretched over the whole viewport so its center pixel stays under the
    // aperture.
    let source = view.region.image();
    let space = view.region.color_space();
    for py in 0..side {
        for px in 0..side {
            if !canvas.visible(px, py) {
                continue;
            }
            let p = Canvas::center_of(px, py, scale);
            if let Some((sx, sy)) = source_pixel(plan, source.width(), source.height(), p) {
                let color = space.color_from_rgba8(source.get_pixel(sx, sy).0);
                canvas.image.put_pixel(px, py, Rgba(color.to_rgba8()));
            }
        }
    }

    let pattern_color = Color::new(0.0, 0.0, 0.0, PATTERN_ALPHA);
    let visible = plan.bounds.inset(-plan.pattern_size, -plan.pattern_size);
    for cell in plan.pattern_cells() {
        let outside = cell.max_x() < visible.min_x()
            || cell.min_x() > visible.max_x()
            || cell.max_y() < visible.min_y()
            || cell.min_y() > visible.max_y();
        if !outside {
            canvas.stroke_rect(cell, PATTERN_BORDER_WIDTH, &pattern_color);
        }
    }

    canvas.stroke_rect(plan.aperture, plan.aperture_line_width, &plan.stroke_color);

    // Half of a path-centered stroke falls outside the clip.
    let visible_width = plan.outer_stroke_width / 2.0;
    let inner = plan.bounds.inset(visible_width, visible_width);
    let inner_radius = (plan.corner_radius - visible_width).max(0.0);
    for py in 0..side {
        for px in 0..side {
            let p = Canvas::center_of(px, py, scale);
            if canvas.visible(px, py) && !shape_contains(plan.shape, &inner, inner_radius, p) {
                canvas.blend(px, py, &plan.stroke_color, 1.0);
            }
        }
    }

    Ok(canvas.image)
}

/// PNG-encode a rendered loupe for hosts that draw it out of process.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, RenderError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RenderError::ZeroDimension);
    }

    let mut png_bytes: Vec<u8> = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| RenderError::EncodingFailed(e.to_string()))?;

    Ok(png_bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Loupe has zero width or height")]
    ZeroDimension,

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}
