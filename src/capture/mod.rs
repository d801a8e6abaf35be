//! Screen capture domain — public API.
//!
//! This module owns frames, display geometry, the frame stream and region
//! cropping. External code should only use the items exported here.

mod frame;
mod region;
mod screenshot;
mod stream;

pub use frame::{
    display_at, DisplayDescriptor, DisplayId, Frame, FrameError, PixelFormat, Point, Rect,
    Resolution, Size, SurfaceId,
};
pub use region::{
    capture_point, capture_side_length, extract_region, CropWindow, CroppedRegion, MAX_CAPTURE_SIDE,
};
pub use screenshot::{primary_height, to_screen_space, top_left_to_screen, MonitorGeometry, XcapSource};
pub use stream::{
    CaptureError, CaptureStream, FrameSink, FrameSource, FrameStatus, FrameStream, StreamConfig,
    StreamStats,
};
