//! rollcall-hw — Camera capture for the attendance tool.
//!
//! V4L2 access via the `v4l` crate, plus the [`FrameSource`] trait so the
//! flows can be driven by a fake camera in tests.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::Frame;
