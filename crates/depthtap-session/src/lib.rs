//! depthtap Session - Device contexts over pluggable sensor drivers
//!
//! This crate provides:
//! - The driver contract (`SensorDriver`, `FrameSource`)
//! - A simulated driver for rigs without hardware
//! - A playback driver replaying depth recordings
//! - `Context`, the device session: open by 1-based index, resolve nodes,
//!   start generation, wait for frame sets, read maps
//! - The cooperative center pixel probe loop

pub mod context;
pub mod driver;
pub mod playback;
pub mod probe;
pub mod simulated;

pub use context::{device_count, list_devices, Context, FrameInfo, NodeHandle};
pub use driver::{DeviceDescriptor, FrameSet, FrameSource, NodeFrame, SensorDriver};
pub use playback::PlaybackDriver;
pub use probe::{CenterProbe, CenterSample, ProbeOptions, ProbeSummary, StopReason};
pub use simulated::{ScenePattern, SimulatedDriver};
