//! Error taxonomy shared by every depthtap crate

use thiserror::Error;

use crate::config::ConfigError;
use crate::node::NodeType;
use crate::recording::RecordingError;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("No depth devices are attached")]
    NoDevices,
    #[error("Device number {requested} is out of range (1..={available} attached)")]
    DeviceIndexOutOfRange { requested: usize, available: usize },
    #[error("Configuration does not declare a {0} node")]
    NodeNotFound(NodeType),
    #[error("Configuration declares more than one {0} node")]
    DuplicateNode(NodeType),
    #[error("Driver '{driver}' cannot produce {node} frames")]
    UnsupportedNode { driver: String, node: NodeType },
    #[error("Node '{name}' is a {actual} node, expected {expected}")]
    WrongNodeType {
        name: String,
        expected: NodeType,
        actual: NodeType,
    },
    #[error("Frame generation has not been started")]
    NotGenerating,
    #[error("Node '{0}' has not produced a frame yet")]
    NoFrameYet(String),
    #[error("Frame generation failed with status {status}: {message}")]
    Generation { status: u32, message: String },
    #[error("Frame {frame_id} delivered an empty depth map")]
    EmptyFrame { frame_id: u64 },
    #[error("Frame source reached the end of its stream")]
    EndOfStream,
    #[error("Context has been shut down")]
    ContextClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SensorError {
    /// Failures that concern a single generation cycle. The next wait may
    /// succeed, so a frame loop may skip them instead of aborting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SensorError::Generation { .. } | SensorError::EmptyFrame { .. }
        )
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_per_frame_failures_are_transient() {
        let failure = SensorError::Generation {
            status: 65536,
            message: "dropped frame".to_string(),
        };
        assert!(failure.is_transient());
        assert!(SensorError::EmptyFrame { frame_id: 4 }.is_transient());
        assert!(!SensorError::EndOfStream.is_transient());
        assert!(!SensorError::NodeNotFound(NodeType::Depth).is_transient());
    }

    #[test]
    fn index_error_names_both_bounds() {
        let err = SensorError::DeviceIndexOutOfRange {
            requested: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Device number 3 is out of range (1..=2 attached)"
        );
    }
}
