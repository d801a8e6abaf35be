//! Frame source built on the `xcap` crate.
//!
//! This is the infrastructure layer — it talks to the OS. xcap has no
//! push-style stream, so a worker thread grabs the target monitor on a timer
//! and rescales each grab to the requested resolution before delivering it.

use super::frame::{DisplayDescriptor, DisplayId, Frame, Point, Rect};
use super::stream::{CaptureError, FrameSink, FrameSource, StreamConfig};
use crate::color::ColorSpace;
use image::imageops::{self, FilterType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use xcap::Monitor;

/// Consecutive failed grabs tolerated before the stream is failed.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Monitor placement as xcap reports it: top-left origin, y growing down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorGeometry {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub scale_factor: f32,
    pub is_primary: bool,
}

/// Convert top-left monitor placements into bottom-left screen space,
/// anchored on the primary monitor's height.
pub fn to_screen_space(monitors: &[MonitorGeometry]) -> Vec<DisplayDescriptor> {
    let primary_height = monitors
        .iter()
        .find(|m| m.is_primary)
        .or_else(|| monitors.first())
        .map(|m| m.height as f64)
        .unwrap_or(0.0);

    monitors
        .iter()
        .map(|m| DisplayDescriptor {
            id: DisplayId(m.id),
            frame: Rect::new(
                m.x as f64,
                primary_height - (m.y as f64 + m.height as f64),
                m.width as f64,
                m.height as f64,
            ),
            scale_factor: m.scale_factor as f64,
        })
        .collect()
}

/// Height of the display anchored at the screen-space origin.
pub fn primary_height(displays: &[DisplayDescriptor]) -> Option<f64> {
    displays
        .iter()
        .find(|d| d.frame.origin.x == 0.0 && d.frame.origin.y == 0.0)
        .map(|d| d.frame.size.height)
}

/// Map a top-left-origin desktop position (as pointer APIs report it) to
/// bottom-left screen space.
pub fn top_left_to_screen(x: f64, y: f64, primary_height: f64) -> Point {
    Point::new(x, primary_height - y)
}

fn monitor_geometry(monitor: &Monitor, index: usize) -> MonitorGeometry {
    MonitorGeometry {
        id: monitor.id().unwrap_or(index as u32),
        x: monitor.x().unwrap_or(0),
        y: monitor.y().unwrap_or(0),
        width: monitor.width().unwrap_or(0),
        height: monitor.height().unwrap_or(0),
        scale_factor: monitor.scale_factor().unwrap_or(1.0),
        is_primary: monitor.is_primary().unwrap_or(false),
    }
}

fn find_monitor(id: DisplayId) -> Result<Monitor, CaptureError> {
    let monitors = Monitor::all().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?;

    monitors
        .into_iter()
        .enumerate()
        .find(|(index, m)| monitor_geometry(m, *index).id == id.0)
        .map(|(_, m)| m)
        .ok_or(CaptureError::DisplayNotFound(id))
}

fn grab(monitor: &Monitor, config: &StreamConfig, color_space: ColorSpace) -> Result<Frame, CaptureError> {
    let image = monitor
        .capture_image()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

    let (width, height) = (config.resolution.width, config.resolution.height);
    let image = if image.width() == width && image.height() == height {
        image
    } else {
        // Nearest keeps every sampled value a real screen pixel.
        imageops::resize(&image, width.max(1), height.max(1), FilterType::Nearest)
    };

    Ok(Frame::new(image, config.display, color_space))
}

fn warn_unsupported_exclusions(config: &StreamConfig) {
    if !config.excluded_surfaces.is_empty() {
        log::warn!(
            "[CAPTURE] xcap cannot exclude surfaces; {} exclusion(s) ignored",
            config.excluded_surfaces.len()
        );
    }
}

struct Worker {
    should_stop: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

/// Timer-driven `FrameSource` over xcap monitors.
pub struct XcapSource {
    frame_interval: Duration,
    color_space: ColorSpace,
    config: Arc<Mutex<Option<StreamConfig>>>,
    worker: Option<Worker>,
}

impl XcapSource {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            color_space: ColorSpace::Srgb,
            config: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Working space of the bitmaps the platform hands back.
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    fn spawn_worker(&self, sink: FrameSink) -> Worker {
        let should_stop = Arc::new(AtomicBool::new(false));
        let should_stop_clone = Arc::clone(&should_stop);
        let shared = Arc::clone(&self.config);
        let interval = self.frame_interval;
        let color_space = self.color_space;

        let handle = std::thread::spawn(move || {
            let mut monitor: Option<(DisplayId, Monitor)> = None;
            let mut failures = 0u32;

            loop {
                if should_stop_clone.load(Ordering::SeqCst) || sink.is_closed() {
                    break;
                }
                let tick = Instant::now();

                // One snapshot per grab: target and resolution always agree.
                let config = match shared.lock().unwrap_or_else(PoisonError::into_inner).clone() {
                    Some(config) => config,
                    None => break,
                };

                if monitor.as_ref().map(|(id, _)| *id) != Some(config.display.id) {
                    monitor = match find_monitor(config.display.id) {
                        Ok(m) => Some((config.display.id, m)),
                        Err(e) => {
                            sink.fail(e);
                            break;
                        }
                    };
                }

                let result = match monitor.as_ref() {
                    Some((_, m)) => grab(m, &config, color_space),
                    None => Err(CaptureError::DisplayNotFound(config.display.id)),
                };

                match result {
                    Ok(frame) => {
                        failures = 0;
                        log::trace!("[CAPTURE] Grabbed {}x{} in {}ms", frame.width(), frame.height(), tick.elapsed().as_millis());
                        if !sink.deliver(frame) {
                            break;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        log::warn!("[CAPTURE] Grab failed ({}/{}): {}", failures, MAX_CONSECUTIVE_FAILURES, e);
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            sink.fail(e);
                            break;
                        }
                    }
                }

                std::thread::sleep(interval.saturating_sub(tick.elapsed()));
            }

            log::debug!("[CAPTURE] xcap worker exited");
        });

        Worker {
            should_stop,
            _handle: handle,
        }
    }
}

impl FrameSource for XcapSource {
    fn displays(&self) -> Result<Vec<DisplayDescriptor>, CaptureError> {
        let monitors = Monitor::all().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?;
        if monitors.is_empty() {
            return Err(CaptureError::NoDisplays);
        }

        let geometry: Vec<MonitorGeometry> = monitors
            .iter()
            .enumerate()
            .map(|(index, m)| monitor_geometry(m, index))
            .collect();
        Ok(to_screen_space(&geometry))
    }

    // Monitor lookup is left to the worker; a target that has gone away
    // fails the stream from there.
    fn start(&mut self, config: &StreamConfig, sink: FrameSink) -> Result<(), CaptureError> {
        self.stop();
        warn_unsupported_exclusions(config);

        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        self.worker = Some(self.spawn_worker(sink));
        Ok(())
    }

    fn update(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
        warn_unsupported_exclusions(config);

        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.should_stop.store(true, Ordering::SeqCst);
        }
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for XcapSource {
    fn drop(&mut self) {
        self.stop();
    }
}
