//! Pure region cropping logic — functional core.
//!
//! This module has zero infrastructure dependencies.
//! It takes a frame and the pointer in, returns the square to magnify out.

use super::frame::{DisplayDescriptor, Frame, Point};
use crate::color::ColorSpace;
use crate::config::Quality;
use crate::zoom::ZoomLevel;
use image::RgbaImage;

/// The square sub-bitmap shown in the loupe. Recomputed on every event.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    image: RgbaImage,
    color_space: ColorSpace,
    window: CropWindow,
}

impl CroppedRegion {
    pub fn new(image: RgbaImage, color_space: ColorSpace, window: CropWindow) -> Self {
        Self {
            image,
            color_space,
            window,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Requested window in frame pixels, before clipping.
    pub fn window(&self) -> CropWindow {
        self.window
    }

    /// True when the requested square hung over a frame edge.
    pub fn is_clipped(&self) -> bool {
        self.image.width() != self.window.side || self.image.height() != self.window.side
    }
}

/// Square crop request in frame pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: i64,
    pub y: i64,
    pub side: u32,
}

impl CropWindow {
    /// Square of `side` pixels centered on `center`.
    pub fn centered(center: (f64, f64), side: u32) -> Self {
        let half = side as f64 / 2.0;
        Self {
            x: (center.0 - half).floor() as i64,
            y: (center.1 - half).floor() as i64,
            side,
        }
    }

    /// Intersection with a `width` x `height` bitmap as `(x, y, w, h)`,
    /// or `None` when nothing overlaps.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.side as i64).min(width as i64);
        let y1 = (self.y + self.side as i64).min(height as i64);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Upper bound on the captured square's side, in frame pixels. Even.
pub const MAX_CAPTURE_SIDE: u32 = 8192;

/// Side of the captured square, in frame pixels.
///
/// `round(round(viewport / pixel_zoom) * multiplier)`, bumped to the next
/// even number so the aperture sits symmetrically around the pointer.
/// Held to `[0, MAX_CAPTURE_SIDE]`.
pub fn capture_side_length(viewport: f64, zoom: ZoomLevel, quality: Quality) -> u32 {
    let points = (viewport / zoom.pixel_zoom(quality)).round();
    let side = (points * quality.multiplier()).round();
    if side.is_nan() || side <= 0.0 {
        return 0;
    }
    let mut side = side.min(MAX_CAPTURE_SIDE as f64) as u32;
    if side % 2 != 0 {
        side += 1;
    }
    side
}

/// Map a global screen point onto a display's captured bitmap.
///
/// Translate into display-local points, flip y (bottom-left screen origin
/// to top-left bitmap origin), then scale to captured pixels.
pub fn capture_point(pointer: Point, display: &DisplayDescriptor) -> (f64, f64) {
    let local_x = pointer.x - display.frame.origin.x;
    let local_y = pointer.y - display.frame.origin.y;
    (
        local_x * display.scale_factor,
        (display.frame.size.height - local_y) * display.scale_factor,
    )
}

/// Crop `frame` around `pointer` for the loupe.
///
/// A window hanging partly off the frame is clipped to it; one entirely
/// off the frame, or a missing frame, yields `None`.
pub fn extract_region(
    frame: Option<&Frame>,
    pointer: Point,
    display: &DisplayDescriptor,
    zoom: ZoomLevel,
    viewport: f64,
    quality: Quality,
) -> Option<CroppedRegion> {
    let frame = frame?;

    let side = capture_side_length(viewport, zoom, quality);
    if side == 0 {
        return None;
    }

    let window = CropWindow::centered(capture_point(pointer, display), side);
    let (x, y, width, height) = window.clip(frame.width(), frame.height())?;

    let cropped = image::imageops::crop_imm(frame.image(), x, y, width, height).to_image();
    Some(CroppedRegion::new(cropped, frame.color_space(), window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{DisplayId, Rect};
    use image::Rgba;

    fn display(x: f64, y: f64, w: f64, h: f64, scale: f64) -> DisplayDescriptor {
        DisplayDescriptor {
            id: DisplayId(1),
            frame: Rect::new(x, y, w, h),
            scale_factor: scale,
        }
    }

    fn frame_for(display: DisplayDescriptor) -> Frame {
        let w = (display.frame.size.width * display.scale_factor) as u32;
        let h = (display.frame.size.height * display.scale_factor) as u32;
        let image = RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255]));
        Frame::new(image, display, ColorSpace::Srgb)
    }

    #[test]
    fn side_length_is_always_even() {
        let qualities = [Quality::Low, Quality::Nominal, Quality::Good, Quality::Great];
        for viewport in (1..=400).map(|v| v as f64 * 0.75) {
            for zoom in ZoomLevel::ALL {
                for quality in qualities {
                    let side = capture_side_length(viewport, zoom, quality);
                    assert_eq!(side % 2, 0, "viewport {} zoom {} quality {:?}", viewport, zoom, quality);
                }
            }
        }
    }

    #[test]
    fn side_length_double_rounds() {
        // 128 / 11 = 11.6 -> 12 points -> 12 px.
        assert_eq!(capture_side_length(128.0, ZoomLevel::M, Quality::Nominal), 12);
        // 128 / 16.5 = 7.76 -> 8 points -> 12 px.
        assert_eq!(capture_side_length(128.0, ZoomLevel::M, Quality::Good), 12);
        // 160 / 11 = 14.55 -> 15 points -> 15 px -> bumped to 16.
        assert_eq!(capture_side_length(160.0, ZoomLevel::M, Quality::Nominal), 16);
    }

    #[test]
    fn side_length_is_bounded() {
        assert_eq!(capture_side_length(1e11, ZoomLevel::Xs, Quality::Low), MAX_CAPTURE_SIDE);
        assert_eq!(capture_side_length(f64::INFINITY, ZoomLevel::Xs, Quality::Great), MAX_CAPTURE_SIDE);
        assert_eq!(capture_side_length(f64::NAN, ZoomLevel::M, Quality::Good), 0);
        assert_eq!(capture_side_length(-50.0, ZoomLevel::M, Quality::Good), 0);
    }

    #[test]
    fn centered_crop_on_unit_display() {
        let d = display(0.0, 0.0, 200.0, 200.0, 1.0);
        let frame = frame_for(d);
        let region = extract_region(Some(&frame), Point::new(100.0, 100.0), &d, ZoomLevel::M, 128.0, Quality::Nominal)
            .unwrap();

        let window = region.window();
        assert_eq!(window.side % 2, 0);
        let cx = window.x as f64 + window.side as f64 / 2.0;
        let cy = window.y as f64 + window.side as f64 / 2.0;
        assert!((cx - 100.0).abs() <= 1.0 && (cy - 100.0).abs() <= 1.0);
        assert!(!region.is_clipped());
    }

    #[test]
    fn y_axis_is_flipped() {
        let d = display(0.0, 0.0, 200.0, 100.0, 1.0);
        // Near the top of the screen means near row 0 of the bitmap.
        let (x, y) = capture_point(Point::new(10.0, 95.0), &d);
        assert_eq!((x, y), (10.0, 5.0));
    }

    #[test]
    fn secondary_display_offset_and_scale() {
        let d = display(1440.0, -300.0, 100.0, 100.0, 2.0);
        let (x, y) = capture_point(Point::new(1490.0, -250.0), &d);
        assert_eq!((x, y), (100.0, 100.0));
    }

    #[test]
    fn edge_crop_is_clipped_not_dropped() {
        let d = display(0.0, 0.0, 200.0, 200.0, 1.0);
        let frame = frame_for(d);
        let region = extract_region(Some(&frame), Point::new(1.0, 199.0), &d, ZoomLevel::Xs, 160.0, Quality::Nominal)
            .unwrap();
        assert!(region.is_clipped());
        assert!(region.image().width() < region.window().side);
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let d = display(0.0, 0.0, 200.0, 200.0, 1.0);
        let frame = frame_for(d);
        let far = Point::new(900.0, 900.0);
        assert!(extract_region(Some(&frame), far, &d, ZoomLevel::M, 128.0, Quality::Nominal).is_none());
    }

    #[test]
    fn missing_frame_is_none() {
        let d = display(0.0, 0.0, 200.0, 200.0, 1.0);
        assert!(extract_region(None, Point::new(100.0, 100.0), &d, ZoomLevel::M, 128.0, Quality::Nominal).is_none());
    }

    #[test]
    fn center_pixel_is_under_pointer() {
        let d = display(0.0, 0.0, 200.0, 200.0, 1.0);
        let frame = frame_for(d);
        // Pointer at screen (37.5, 120.5) -> bitmap (37.5, 79.5).
        let region = extract_region(Some(&frame), Point::new(37.5, 120.5), &d, ZoomLevel::M, 128.0, Quality::Nominal)
            .unwrap();
        let center = region.image().get_pixel(region.image().width() / 2, region.image().height() / 2);
        assert_eq!((center.0[0], center.0[1]), (37, 79));
    }
}
