//! Color Loupe — on-screen color sampling.
//!
//! This crate wires together:
//! - Screen capture domain (capture/): frames, displays, the frame stream, cropping
//! - Zoom ladder (zoom.rs) and colorspace-correct sampling (color.rs)
//! - Loupe overlay geometry and rendering (overlay.rs)
//! - The sampling session state machine and its async driver (session/)

pub mod capture;
pub mod color;
pub mod config;
pub mod overlay;
pub mod session;
pub mod zoom;

pub use capture::{CaptureError, DisplayDescriptor, DisplayId, Frame, FrameSource, Point, SurfaceId, XcapSource};
pub use color::{sample_center, Color, ColorSpace};
pub use config::{ColorFormatter, ConfigError, GestureThresholds, LoupeShape, LoupeSize, Quality, SamplerConfig};
pub use overlay::{encode_png, render_loupe, LoupeView, OverlayPlan, RenderError};
pub use session::{sample, InputEvent, InputSender, SampleError, Sampler, Selection};
pub use zoom::{ZoomLevel, ZoomSet};
