//! depthtap Core - Types, sensor configuration and recordings
//!
//! This crate provides the foundational types for depthtap:
//! - Processing node capability tags and node specifications
//! - Immutable per-frame depth, image and user label maps
//! - Sensor XML configuration (`SamplesConfig.xml`) parsing and serialization
//! - The binary depth recording format
//! - The shared error taxonomy

pub mod config;
pub mod error;
pub mod map;
pub mod node;
pub mod recording;

pub use config::{ConfigError, RecordingSource, SensorConfig};
pub use error::{Result, SensorError};
pub use map::{DepthMap, ImageMap, LabelMap};
pub use node::{MapOutputMode, NodeSpec, NodeType};
pub use recording::{
    RecordedFrame, RecordingError, RecordingHeader, RecordingReader, RecordingWriter,
};
