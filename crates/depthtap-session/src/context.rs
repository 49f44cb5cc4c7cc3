//! Device context: one opened device and the processing nodes created on it

use std::collections::HashMap;
use std::fmt;

use depthtap_core::{
    DepthMap, ImageMap, LabelMap, NodeSpec, NodeType, Result, SensorConfig, SensorError,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::driver::{DeviceDescriptor, FrameSet, FrameSource, NodeFrame, SensorDriver};

/// Number of devices the driver currently sees
pub fn device_count(driver: &dyn SensorDriver) -> Result<usize> {
    Ok(driver.enumerate_devices()?.len())
}

/// Attached devices with their identification strings
pub fn list_devices(driver: &dyn SensorDriver) -> Result<Vec<DeviceDescriptor>> {
    let devices = driver.enumerate_devices()?;
    debug!(driver = driver.name(), count = devices.len(), "Enumerated devices");
    Ok(devices)
}

/// Handle to a processing node of a context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    id: u32,
    node_type: NodeType,
    name: String,
}

impl NodeHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.node_type)
    }
}

/// Identity of the frame set a wait published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub frame_id: u64,
    pub timestamp_us: u64,
}

/// An opened device context.
///
/// Owns the device for its whole lifetime: dropping the context stops
/// generation and releases the device, as does [`Context::shutdown`].
pub struct Context {
    driver: String,
    device: DeviceDescriptor,
    nodes: Vec<NodeHandle>,
    source: Option<Box<dyn FrameSource>>,
    generating: bool,
    current: HashMap<NodeType, NodeFrame>,
    last_frame: Option<FrameInfo>,
}

impl Context {
    /// Open the `device_index`-th (1-based) device with the nodes declared by
    /// `config`. The index is validated before the device is acquired.
    pub fn open(driver: &dyn SensorDriver, config: &SensorConfig, device_index: usize) -> Result<Self> {
        let specs = config.node_specs()?;
        Self::open_with_nodes(driver, &specs, device_index)
    }

    /// Open a device with an explicit node list
    pub fn open_with_nodes(
        driver: &dyn SensorDriver,
        specs: &[NodeSpec],
        device_index: usize,
    ) -> Result<Self> {
        for (i, spec) in specs.iter().enumerate() {
            if specs[..i].iter().any(|s| s.node_type == spec.node_type) {
                return Err(SensorError::DuplicateNode(spec.node_type));
            }
        }

        let devices = driver.enumerate_devices()?;
        if devices.is_empty() {
            return Err(SensorError::NoDevices);
        }
        if device_index == 0 || device_index > devices.len() {
            return Err(SensorError::DeviceIndexOutOfRange {
                requested: device_index,
                available: devices.len(),
            });
        }
        let device = devices[device_index - 1].clone();

        let source = driver.open_device(&device, specs)?;
        let nodes = specs
            .iter()
            .zip(1u32..)
            .map(|(spec, id)| NodeHandle {
                id,
                node_type: spec.node_type,
                name: spec.name.clone(),
            })
            .collect::<Vec<_>>();

        let node_names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        info!(
            driver = driver.name(),
            device = %device.name,
            index = device_index,
            nodes = %node_names.join(","),
            "Context opened"
        );

        Ok(Self {
            driver: driver.name().to_string(),
            device,
            nodes,
            source: Some(source),
            generating: false,
            current: HashMap::new(),
            last_frame: None,
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn driver_name(&self) -> &str {
        &self.driver
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    /// Frame set published by the most recent successful wait
    pub fn last_frame(&self) -> Option<FrameInfo> {
        self.last_frame
    }

    /// The node of the given capability declared by the configuration
    pub fn find_node(&self, node_type: NodeType) -> Result<NodeHandle> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.node_type == node_type)
            .cloned()
            .ok_or(SensorError::NodeNotFound(node_type))?;
        debug!(node = %node, "Resolved node");
        Ok(node)
    }

    pub fn start_generating_all(&mut self) -> Result<()> {
        self.source_mut()?.start()?;
        if !self.generating {
            info!(device = %self.device.name, "Generation started");
        }
        self.generating = true;
        Ok(())
    }

    pub fn stop_generating_all(&mut self) -> Result<()> {
        self.source_mut()?.stop()?;
        if self.generating {
            info!(device = %self.device.name, "Generation stopped");
        }
        self.generating = false;
        Ok(())
    }

    /// Block until `node` has a new frame, then publish the whole frame set
    pub fn wait_one_update_all(&mut self, node: &NodeHandle) -> Result<FrameInfo> {
        self.check_owned(node)?;
        self.wait(Some(node.node_type))
    }

    /// Block until every node has a new frame
    pub fn wait_and_update_all(&mut self) -> Result<FrameInfo> {
        self.wait(None)
    }

    /// Block until any node has a new frame. Sources generate all nodes
    /// together, so this publishes the same frame set as
    /// [`Context::wait_and_update_all`].
    pub fn wait_any_update_all(&mut self) -> Result<FrameInfo> {
        self.wait(None)
    }

    /// Publish a new frame set only if one is already available
    pub fn wait_none_update_all(&mut self) -> Result<Option<FrameInfo>> {
        self.ensure_generating()?;
        match self.source_mut()?.poll_frame_set()? {
            Some(set) => Ok(Some(self.publish(set))),
            None => Ok(None),
        }
    }

    /// Most recent depth map of `node`. Repeated calls without a wait in
    /// between return the same map.
    pub fn depth_map(&self, node: &NodeHandle) -> Result<&DepthMap> {
        match self.current_frame(node, NodeType::Depth)? {
            NodeFrame::Depth(map) => Ok(map),
            _ => Err(self.wrong_type(node, NodeType::Depth)),
        }
    }

    /// Most recent image of an Image or IR node
    pub fn image_map(&self, node: &NodeHandle) -> Result<&ImageMap> {
        let expected = match node.node_type {
            NodeType::Ir => NodeType::Ir,
            _ => NodeType::Image,
        };
        match self.current_frame(node, expected)? {
            NodeFrame::Image(map) => Ok(map),
            _ => Err(self.wrong_type(node, expected)),
        }
    }

    /// Most recent user label map of a User node
    pub fn label_map(&self, node: &NodeHandle) -> Result<&LabelMap> {
        match self.current_frame(node, NodeType::User)? {
            NodeFrame::Labels(map) => Ok(map),
            _ => Err(self.wrong_type(node, NodeType::User)),
        }
    }

    /// Stop generation and release the device
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    fn wait(&mut self, anchor: Option<NodeType>) -> Result<FrameInfo> {
        self.ensure_generating()?;
        let set = self.source_mut()?.wait_frame_set(anchor)?;
        Ok(self.publish(set))
    }

    /// Replace every node's current frame with the new set
    fn publish(&mut self, set: FrameSet) -> FrameInfo {
        let info = FrameInfo {
            frame_id: set.frame_id,
            timestamp_us: set.timestamp_us,
        };
        let kinds: Vec<&str> = set.frames.iter().map(|(_, frame)| frame.kind()).collect();
        trace!(
            frame_id = info.frame_id,
            timestamp_us = info.timestamp_us,
            frames = %kinds.join(","),
            "Frame set published"
        );
        self.current = set.frames.into_iter().collect();
        self.last_frame = Some(info);
        info
    }

    fn current_frame(&self, node: &NodeHandle, expected: NodeType) -> Result<&NodeFrame> {
        self.check_owned(node)?;
        if node.node_type != expected {
            return Err(self.wrong_type(node, expected));
        }
        self.current
            .get(&node.node_type)
            .ok_or_else(|| SensorError::NoFrameYet(node.name.clone()))
    }

    fn check_owned(&self, node: &NodeHandle) -> Result<()> {
        if self.nodes.contains(node) {
            Ok(())
        } else {
            Err(SensorError::NodeNotFound(node.node_type))
        }
    }

    fn wrong_type(&self, node: &NodeHandle, expected: NodeType) -> SensorError {
        SensorError::WrongNodeType {
            name: node.name.clone(),
            expected,
            actual: node.node_type,
        }
    }

    fn ensure_generating(&self) -> Result<()> {
        if self.source.is_none() {
            return Err(SensorError::ContextClosed);
        }
        if !self.generating {
            return Err(SensorError::NotGenerating);
        }
        Ok(())
    }

    fn source_mut(&mut self) -> Result<&mut Box<dyn FrameSource>> {
        self.source.as_mut().ok_or(SensorError::ContextClosed)
    }

    fn release(&mut self) -> Result<()> {
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };
        self.generating = false;
        self.current.clear();
        let stopped = source.stop();
        let closed = source.shutdown();
        info!(device = %self.device.name, "Context shut down");
        stopped.and(closed)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(device = %self.device.name, error = %e, "Failed to release device");
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("driver", &self.driver)
            .field("device", &self.device)
            .field("nodes", &self.nodes)
            .field("generating", &self.generating)
            .field("last_frame", &self.last_frame)
            .finish()
    }
}
