//! facequest-hw — Hardware abstraction for camera capture and the
//! micro:bit uplink.
//!
//! Provides V4L2-based camera access producing RGB frames for the
//! pipeline, and a line-oriented serial uplink that relays result codes
//! to an external micro:bit.

pub mod camera;
pub mod convert;
pub mod uplink;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use uplink::{Uplink, UplinkError};
