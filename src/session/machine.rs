//! Sampling session state machine — pure core.
//!
//! No channels, no tasks: events and frames go in, `Effect`s come out. The
//! driver applies the effects. Every view is built from one frame, with that
//! frame's own capture geometry and the zoom in force, and the reported
//! color is read from the same crop.

use super::SampleError;
use crate::capture::{display_at, extract_region, DisplayDescriptor, Frame, Point, StreamConfig};
use crate::color::Color;
use crate::config::SamplerConfig;
use crate::overlay::LoupeView;
use crate::zoom::ZoomLevel;

/// Input delivered by the host's event source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Absolute pointer position in screen points, bottom-left origin.
    PointerMoved(Point),
    /// Pinch magnification, positive to zoom in.
    Magnify(f64),
    /// Scroll delta-Y, negative to zoom in.
    Scroll(f64),
    Click,
    Escape,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Report the color under the pointer.
    Hover(Color),
    /// Replace the displayed loupe; `None` shows an empty loupe.
    View(Option<LoupeView>),
    /// Point the capture stream at another display.
    Retarget(StreamConfig),
    /// Deliver the selection and tear the session down.
    Finish(Option<Color>),
}

#[derive(Debug, Clone)]
pub struct LiveState {
    /// Display under the pointer; capture is (being) retargeted to it.
    pub display: DisplayDescriptor,
    pub pointer: Point,
    pub zoom: ZoomLevel,
    /// Latest frame, possibly still from the previous display.
    pub frame: Frame,
    pub view: Option<LoupeView>,
    hover_pending: bool,
}

impl LiveState {
    pub fn color(&self) -> Option<Color> {
        self.view.as_ref().and_then(|v| v.color)
    }

    /// True while the newest frame belongs to a display the pointer left.
    pub fn retarget_pending(&self) -> bool {
        self.frame.display().id != self.display.id
    }
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Idle,
    Capturing {
        display: DisplayDescriptor,
        pointer: Point,
        zoom: ZoomLevel,
    },
    Live(Box<LiveState>),
    Terminated,
}

pub struct SamplingSession {
    config: SamplerConfig,
    displays: Vec<DisplayDescriptor>,
    state: SessionState,
}

impl SamplingSession {
    pub fn new(config: SamplerConfig, displays: Vec<DisplayDescriptor>) -> Self {
        Self {
            config,
            displays,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated)
    }

    /// Idle → Capturing on the display under `pointer`. Returns the stream
    /// configuration to start capture with.
    pub fn begin(&mut self, pointer: Point) -> Result<StreamConfig, SampleError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(SampleError::NotIdle);
        }

        let display = *display_at(&self.displays, pointer).ok_or(SampleError::NoDisplayAtPointer {
            x: pointer.x,
            y: pointer.y,
        })?;
        let zoom = self.config.zoom.default_level();

        log::info!(
            "[SESSION] Capturing display {:?} at zoom {} ({} displays)",
            display.id,
            zoom,
            self.displays.len()
        );

        self.state = SessionState::Capturing {
            display,
            pointer,
            zoom,
        };
        Ok(self.stream_config(&display))
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Vec<Effect> {
        match std::mem::replace(&mut self.state, SessionState::Terminated) {
            SessionState::Capturing {
                display,
                pointer,
                zoom,
            } => {
                log::info!("[SESSION] First frame {}x{}, loupe live", frame.width(), frame.height());
                let mut live = LiveState {
                    display,
                    pointer,
                    zoom,
                    frame,
                    view: None,
                    hover_pending: true,
                };
                let effects = self.refresh(&mut live);
                self.state = SessionState::Live(Box::new(live));
                effects
            }
            SessionState::Live(mut live) => {
                live.frame = frame;
                let effects = self.refresh(&mut live);
                self.state = SessionState::Live(live);
                effects
            }
            other => {
                self.state = other;
                Vec::new()
            }
        }
    }

    pub fn handle_input(&mut self, event: InputEvent) -> Vec<Effect> {
        match event {
            InputEvent::Click => {
                let selection = match &self.state {
                    SessionState::Live(live) => live.color(),
                    _ => None,
                };
                self.finish(selection, "selection")
            }
            InputEvent::Escape => self.finish(None, "cancelled"),
            InputEvent::PointerMoved(pointer) => self.pointer_moved(pointer),
            InputEvent::Magnify(_) | InputEvent::Scroll(_) => self.zoom_gesture(event),
        }
    }

    /// Capture ended with an error: same outcome as a cancel.
    pub fn handle_stream_failure(&mut self, reason: &str) -> Vec<Effect> {
        if self.is_active() {
            log::warn!("[SESSION] Capture stream failed: {}", reason);
        }
        self.finish(None, "stream failure")
    }

    pub fn cancel(&mut self) -> Vec<Effect> {
        self.finish(None, "cancelled")
    }

    fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Capturing { .. } | SessionState::Live(_))
    }

    fn finish(&mut self, selection: Option<Color>, reason: &str) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        self.state = SessionState::Terminated;
        log::info!(
            "[SESSION] Terminated ({}): {}",
            reason,
            selection.map(|c| c.to_hex()).unwrap_or_else(|| "no color".to_string())
        );
        vec![Effect::Finish(selection)]
    }

    fn pointer_moved(&mut self, pointer: Point) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        let Some(display) = display_at(&self.displays, pointer).copied() else {
            log::debug!("[SESSION] Pointer ({}, {}) is off every display", pointer.x, pointer.y);
            return Vec::new();
        };

        let mut effects = Vec::new();
        match &mut self.state {
            SessionState::Capturing {
                display: target,
                pointer: current,
                ..
            } => {
                *current = pointer;
                if target.id != display.id {
                    *target = display;
                    effects.push(Effect::Retarget(StreamConfig::for_display(
                        &display,
                        self.config.quality,
                        &self.config.excluded_surfaces,
                    )));
                }
            }
            SessionState::Live(live) => {
                if live.display.id != display.id {
                    log::info!("[SESSION] Pointer crossed to display {:?}", display.id);
                    live.display = display;
                    effects.push(Effect::Retarget(StreamConfig::for_display(
                        &display,
                        self.config.quality,
                        &self.config.excluded_surfaces,
                    )));
                }
                live.pointer = pointer;
                effects.extend(resample(&self.config, live));
            }
            SessionState::Idle | SessionState::Terminated => {}
        }
        effects
    }

    fn zoom_gesture(&mut self, event: InputEvent) -> Vec<Effect> {
        let SessionState::Live(live) = &mut self.state else {
            return Vec::new();
        };

        let gestures = self.config.gestures;
        let allowed = &self.config.zoom;
        let step = match event {
            InputEvent::Magnify(m) if m > gestures.pinch => live.zoom.next(allowed),
            InputEvent::Magnify(m) if m < -gestures.pinch => live.zoom.previous(allowed),
            InputEvent::Scroll(dy) if dy < -gestures.scroll => live.zoom.next(allowed),
            InputEvent::Scroll(dy) if dy > gestures.scroll => live.zoom.previous(allowed),
            _ => None,
        };

        match step {
            Some(zoom) if zoom != live.zoom => {
                log::debug!("[SESSION] Zoom {} -> {}", live.zoom, zoom);
                live.zoom = zoom;
                resample(&self.config, live)
            }
            _ => Vec::new(),
        }
    }

    /// Frame-driven recompute. Hover fires only when a pointer event is
    /// still waiting for its first valid sample.
    fn refresh(&self, live: &mut LiveState) -> Vec<Effect> {
        if live.retarget_pending() {
            return Vec::new();
        }
        live.view = compose(&self.config, &live.frame, live.pointer, live.zoom);

        let mut effects = vec![Effect::View(live.view.clone())];
        if live.hover_pending {
            if let Some(color) = live.color() {
                live.hover_pending = false;
                effects.push(Effect::Hover(color));
            }
        }
        effects
    }

    fn stream_config(&self, display: &DisplayDescriptor) -> StreamConfig {
        StreamConfig::for_display(display, self.config.quality, &self.config.excluded_surfaces)
    }
}

/// Pointer- or zoom-driven recompute. While a retarget is pending the last
/// view stays up untouched.
fn resample(config: &SamplerConfig, live: &mut LiveState) -> Vec<Effect> {
    if live.retarget_pending() {
        live.hover_pending = true;
        return Vec::new();
    }
    live.view = compose(config, &live.frame, live.pointer, live.zoom);

    let mut effects = vec![Effect::View(live.view.clone())];
    match live.color() {
        Some(color) => {
            live.hover_pending = false;
            effects.push(Effect::Hover(color));
        }
        None => live.hover_pending = true,
    }
    effects
}

fn compose(config: &SamplerConfig, frame: &Frame, pointer: Point, zoom: ZoomLevel) -> Option<LoupeView> {
    let geometry = frame.capture_geometry();
    let region = extract_region(
        Some(frame),
        pointer,
        &geometry,
        zoom,
        config.viewport_side(),
        config.quality,
    )?;
    Some(LoupeView::new(region, zoom, geometry.id, pointer, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DisplayId, Rect, Resolution};
    use crate::color::ColorSpace;
    use crate::config::Quality;
    use crate::zoom::ZoomSet;
    use image::{Rgba, RgbaImage};

    fn left() -> DisplayDescriptor {
        DisplayDescriptor {
            id: DisplayId(1),
            frame: Rect::new(0.0, 0.0, 200.0, 200.0),
            scale_factor: 1.0,
        }
    }

    fn right() -> DisplayDescriptor {
        DisplayDescriptor {
            id: DisplayId(2),
            frame: Rect::new(200.0, 0.0, 200.0, 200.0),
            scale_factor: 2.0,
        }
    }

    fn config() -> SamplerConfig {
        SamplerConfig {
            quality: Quality::Nominal,
            ..SamplerConfig::default()
        }
    }

    fn session() -> SamplingSession {
        SamplingSession::new(config(), vec![left(), right()])
    }

    /// Pixel (x, y) encodes its own coordinates; blue tags the display.
    fn frame_for(display: DisplayDescriptor) -> Frame {
        let tag = display.id.0 as u8 * 100;
        let image = RgbaImage::from_fn(200, 200, |x, y| Rgba([x as u8, y as u8, tag, 255]));
        Frame::new(image, display, ColorSpace::Srgb)
    }

    fn hovers(effects: &[Effect]) -> Vec<Color> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Hover(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    fn view(effects: &[Effect]) -> Option<&LoupeView> {
        effects.iter().find_map(|e| match e {
            Effect::View(v) => v.as_ref(),
            _ => None,
        })
    }

    fn live_session() -> SamplingSession {
        let mut session = session();
        session.begin(Point::new(100.0, 100.0)).unwrap();
        session.handle_frame(frame_for(left()));
        session
    }

    #[test]
    fn begin_targets_display_under_pointer() {
        let mut session = session();
        let config = session.begin(Point::new(250.0, 50.0)).unwrap();
        assert_eq!(config.display.id, DisplayId(2));
        assert_eq!(config.resolution, Resolution { width: 200, height: 200 });
        assert!(!config.shows_cursor);
        assert!(matches!(session.state(), SessionState::Capturing { zoom: ZoomLevel::M, .. }));
        assert!(matches!(session.begin(Point::new(10.0, 10.0)), Err(SampleError::NotIdle)));
    }

    #[test]
    fn begin_off_screen_is_capture_unavailable() {
        let mut session = session();
        let result = session.begin(Point::new(-50.0, 10.0));
        assert!(matches!(result, Err(SampleError::NoDisplayAtPointer { .. })));
        assert!(matches!(session.state(), SessionState::Idle));
    }

    #[test]
    fn idle_ignores_everything() {
        let mut session = session();
        assert!(session.handle_input(InputEvent::Click).is_empty());
        assert!(session.handle_input(InputEvent::PointerMoved(Point::new(5.0, 5.0))).is_empty());
        assert!(session.handle_frame(frame_for(left())).is_empty());
        assert!(matches!(session.state(), SessionState::Idle));
    }

    #[test]
    fn first_frame_populates_loupe() {
        let mut session = session();
        session.begin(Point::new(100.0, 100.0)).unwrap();
        let effects = session.handle_frame(frame_for(left()));

        let view = view(&effects).unwrap();
        assert_eq!(view.display, DisplayId(1));
        assert_eq!(hovers(&effects), vec![view.color.unwrap()]);
        assert!(matches!(session.state(), SessionState::Live(_)));
    }

    #[test]
    fn hover_and_view_share_one_crop() {
        let mut session = live_session();
        let effects = session.handle_input(InputEvent::PointerMoved(Point::new(30.0, 150.5)));

        let view = view(&effects).unwrap();
        let hover = hovers(&effects)[0];
        assert_eq!(Some(hover), view.color);
        // Screen y 150.5 is bitmap row 49.
        assert_eq!(hover.to_rgba8(), [30, 49, 100, 255]);
    }

    #[test]
    fn click_selects_last_hovered_color() {
        let mut session = live_session();
        let effects = session.handle_input(InputEvent::PointerMoved(Point::new(12.0, 40.0)));
        let hover = hovers(&effects)[0];

        let effects = session.handle_input(InputEvent::Click);
        assert!(matches!(effects.as_slice(), [Effect::Finish(Some(c))] if *c == hover));
        assert!(session.is_terminated());
    }

    #[test]
    fn click_before_first_frame_selects_nothing() {
        let mut session = session();
        session.begin(Point::new(100.0, 100.0)).unwrap();
        let effects = session.handle_input(InputEvent::Click);
        assert!(matches!(effects.as_slice(), [Effect::Finish(None)]));
    }

    #[test]
    fn escape_is_terminal() {
        let mut session = live_session();
        let effects = session.handle_input(InputEvent::Escape);
        assert!(matches!(effects.as_slice(), [Effect::Finish(None)]));

        assert!(session.handle_frame(frame_for(left())).is_empty());
        assert!(session.handle_input(InputEvent::PointerMoved(Point::new(1.0, 1.0))).is_empty());
        assert!(session.handle_input(InputEvent::Click).is_empty());
        assert!(session.cancel().is_empty());
    }

    #[test]
    fn stream_failure_cancels() {
        let mut session = live_session();
        let effects = session.handle_stream_failure("source went away");
        assert!(matches!(effects.as_slice(), [Effect::Finish(None)]));
        assert!(session.is_terminated());
    }

    #[test]
    fn zoom_respects_deadbands_and_extremes() {
        let mut session = live_session();

        assert!(session.handle_input(InputEvent::Magnify(0.005)).is_empty());
        assert!(session.handle_input(InputEvent::Scroll(0.9)).is_empty());

        let effects = session.handle_input(InputEvent::Magnify(0.2));
        assert_eq!(view(&effects).unwrap().zoom, ZoomLevel::L);

        let effects = session.handle_input(InputEvent::Scroll(3.0));
        assert_eq!(view(&effects).unwrap().zoom, ZoomLevel::M);

        for _ in 0..10 {
            session.handle_input(InputEvent::Scroll(-3.0));
        }
        assert!(matches!(session.state(), SessionState::Live(live) if live.zoom == ZoomLevel::Xxl));
        assert!(session.handle_input(InputEvent::Magnify(1.0)).is_empty());
    }

    #[test]
    fn single_zoom_level_never_changes() {
        let mut config = config();
        config.zoom = ZoomSet::fixed(ZoomLevel::S);
        let mut session = SamplingSession::new(config, vec![left()]);
        session.begin(Point::new(100.0, 100.0)).unwrap();
        session.handle_frame(frame_for(left()));

        assert!(session.handle_input(InputEvent::Magnify(5.0)).is_empty());
        assert!(session.handle_input(InputEvent::Scroll(-5.0)).is_empty());
    }

    #[test]
    fn gestures_before_first_frame_are_ignored() {
        let mut session = session();
        session.begin(Point::new(100.0, 100.0)).unwrap();
        assert!(session.handle_input(InputEvent::Magnify(1.0)).is_empty());
        session.handle_frame(frame_for(left()));
        assert!(matches!(session.state(), SessionState::Live(live) if live.zoom == ZoomLevel::M));
    }

    #[test]
    fn display_switch_keeps_pairs_consistent() {
        let mut session = live_session();

        // Crossing: retarget, no view built against the old frame.
        let effects = session.handle_input(InputEvent::PointerMoved(Point::new(250.0, 100.0)));
        assert!(matches!(effects.as_slice(), [Effect::Retarget(c)] if c.display.id == DisplayId(2)));

        // A late frame from the old display changes nothing on screen.
        assert!(session.handle_frame(frame_for(left())).is_empty());
        assert!(matches!(session.state(), SessionState::Live(live) if live.retarget_pending()));

        // First frame of the new display: view and hover from that frame.
        let effects = session.handle_frame(frame_for(right()));
        let view = view(&effects).unwrap();
        assert_eq!(view.display, DisplayId(2));
        let hover = hovers(&effects)[0];
        assert_eq!(Some(hover), view.color);
        assert_eq!(hover.to_rgba8()[2], 200);
    }

    #[test]
    fn pointer_off_all_displays_is_ignored() {
        let mut session = live_session();
        assert!(session.handle_input(InputEvent::PointerMoved(Point::new(-10.0, -10.0))).is_empty());
        assert!(matches!(session.state(), SessionState::Live(live) if live.pointer == Point::new(100.0, 100.0)));
    }

    #[test]
    fn retarget_while_capturing() {
        let mut session = session();
        session.begin(Point::new(100.0, 100.0)).unwrap();
        let effects = session.handle_input(InputEvent::PointerMoved(Point::new(300.0, 20.0)));
        assert!(matches!(effects.as_slice(), [Effect::Retarget(c)] if c.display.id == DisplayId(2)));
        assert!(matches!(session.state(), SessionState::Capturing { display, .. } if display.id == DisplayId(2)));
    }
}
