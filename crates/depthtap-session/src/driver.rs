//! The sensor driver contract
//!
//! A driver enumerates attached devices and opens a frame source for one of
//! them. The frame source owns the device while it is open and produces
//! synchronized frame sets for the nodes it was opened with.

use depthtap_core::{DepthMap, ImageMap, LabelMap, NodeSpec, NodeType, Result};
use serde::Serialize;

/// A physically attached (or simulated) depth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// 1-based position in enumeration order
    pub index: usize,
    pub name: String,
    pub serial: Option<String>,
    pub vendor: String,
}

impl DeviceDescriptor {
    /// `[1] Kinect (A00364911500036A)` style line used by device listings
    pub fn listing_line(&self) -> String {
        match &self.serial {
            Some(serial) => format!("[{}] {} ({})", self.index, self.name, serial),
            None => format!("[{}] {}", self.index, self.name),
        }
    }
}

/// Pixel data produced by one node in one generation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFrame {
    Depth(DepthMap),
    Image(ImageMap),
    Labels(LabelMap),
}

impl NodeFrame {
    /// Short label for logs. IR nodes deliver `Image` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeFrame::Depth(_) => "depth",
            NodeFrame::Image(_) => "image",
            NodeFrame::Labels(_) => "labels",
        }
    }
}

/// One synchronized generation across every node of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet {
    /// Monotonic frame counter, starting at 1
    pub frame_id: u64,
    /// Device timestamp in microseconds
    pub timestamp_us: u64,
    /// Frames keyed by the node that produced them
    pub frames: Vec<(NodeType, NodeFrame)>,
}

impl FrameSet {
    pub fn frame_for(&self, node_type: NodeType) -> Option<&NodeFrame> {
        self.frames
            .iter()
            .find(|(t, _)| *t == node_type)
            .map(|(_, f)| f)
    }
}

/// Device enumeration and opening
pub trait SensorDriver: Send + Sync {
    /// Short driver name for logs and error messages
    fn name(&self) -> &str;

    /// Enumerate attached devices, in a stable order
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a device and create the requested nodes on it
    fn open_device(
        &self,
        device: &DeviceDescriptor,
        nodes: &[NodeSpec],
    ) -> Result<Box<dyn FrameSource>>;
}

/// An open device producing frame sets
pub trait FrameSource: Send {
    /// Begin continuous frame generation
    fn start(&mut self) -> Result<()>;

    /// Stop frame generation. Stopping an idle source is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Block until the next frame set is available.
    ///
    /// `anchor` names the node whose new frame the caller waits on; `None`
    /// waits for all nodes.
    fn wait_frame_set(&mut self, anchor: Option<NodeType>) -> Result<FrameSet>;

    /// Return a frame set only if one is already available
    fn poll_frame_set(&mut self) -> Result<Option<FrameSet>>;

    /// Release the device. The source is unusable afterwards.
    fn shutdown(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_line_includes_serial_when_known() {
        let mut device = DeviceDescriptor {
            index: 2,
            name: "Kinect".to_string(),
            serial: Some("A00364911500036A".to_string()),
            vendor: "Microsoft".to_string(),
        };
        assert_eq!(device.listing_line(), "[2] Kinect (A00364911500036A)");
        device.serial = None;
        assert_eq!(device.listing_line(), "[2] Kinect");
    }

    #[test]
    fn frame_set_lookup_by_node() {
        let set = FrameSet {
            frame_id: 1,
            timestamp_us: 0,
            frames: vec![(NodeType::Depth, NodeFrame::Depth(DepthMap::filled(2, 2, 10)))],
        };
        assert_eq!(set.frame_for(NodeType::Depth).map(NodeFrame::kind), Some("depth"));
        assert!(set.frame_for(NodeType::Image).is_none());
    }

    #[test]
    fn trait_objects_are_send() {
        fn assert_send<T: Send + ?Sized>() {}
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send::<Box<dyn FrameSource>>();
        assert_send_sync::<Box<dyn SensorDriver>>();
    }
}
