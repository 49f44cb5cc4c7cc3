//! Processing node capability tags and node specifications

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability tag of a processing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Per-pixel distance in millimeters
    Depth,
    /// Color camera
    Image,
    /// Raw infrared camera
    #[serde(rename = "IR")]
    Ir,
    /// Per-pixel user labels
    User,
}

impl NodeType {
    pub const ALL: [NodeType; 4] = [NodeType::Depth, NodeType::Image, NodeType::Ir, NodeType::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Depth => "Depth",
            NodeType::Image => "Image",
            NodeType::Ir => "IR",
            NodeType::User => "User",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown node type '{}'", s))
    }
}

/// Resolution and frame rate of a map-producing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOutputMode {
    pub x_res: u32,
    pub y_res: u32,
    pub fps: u32,
}

impl Default for MapOutputMode {
    fn default() -> Self {
        Self {
            x_res: 640,
            y_res: 480,
            fps: 30,
        }
    }
}

/// A node as declared by the sensor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub node_type: NodeType,
    pub name: String,
    pub output: MapOutputMode,
    pub mirror: bool,
}

impl NodeSpec {
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            output: MapOutputMode::default(),
            mirror: false,
        }
    }

    pub fn with_output(mut self, output: MapOutputMode) -> Self {
        self.output = output;
        self
    }
}
