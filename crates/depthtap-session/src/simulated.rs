//! Simulated depth sensor rig
//!
//! Stands in for attached hardware: a configurable set of virtual devices that
//! render a synthetic scene at the configured resolution and frame rate.
//! Generation failures can be injected at chosen frame numbers, and the number
//! of open / generating sources is observable so callers can check that
//! devices are released.

use std::f64::consts::PI;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use depthtap_core::{DepthMap, ImageMap, LabelMap, NodeSpec, NodeType, Result, SensorError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::driver::{DeviceDescriptor, FrameSet, FrameSource, NodeFrame, SensorDriver};

/// Status reported for injected generation failures
pub const SIMULATED_FAILURE_STATUS: u32 = 0x0001_0003;

/// Depth added behind the sphere for the wall
const WALL_OFFSET_MM: u16 = 800;
/// How far the sphere surface bulges toward the sensor
const SPHERE_DEPTH_MM: f64 = 400.0;
/// Ramp slope in millimeters per pixel
const RAMP_MM_PER_PIXEL: i64 = 4;
/// Range mapped onto the color scale of simulated image frames
const COLOR_NEAR_MM: f64 = 500.0;
const COLOR_FAR_MM: f64 = 4500.0;

/// Synthetic scene rendered by simulated devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenePattern {
    /// Flat wall at the base distance
    Wall,
    /// Plane tilted left to right, passing the base distance at the center
    Ramp,
    /// Sphere centered in view, nearest point at the base distance, wall behind
    #[default]
    Sphere,
}

impl FromStr for ScenePattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wall" => Ok(Self::Wall),
            "ramp" => Ok(Self::Ramp),
            "sphere" => Ok(Self::Sphere),
            _ => Err(format!("unknown scene pattern '{}'", s)),
        }
    }
}

#[derive(Debug, Clone)]
struct SimDevice {
    name: String,
    serial: String,
}

#[derive(Debug, Default)]
struct RigState {
    open_sources: usize,
    generating_sources: usize,
    frames_generated: u64,
}

/// Simulated driver, configured with a builder
#[derive(Clone)]
pub struct SimulatedDriver {
    devices: Vec<SimDevice>,
    frame_interval: Duration,
    pattern: ScenePattern,
    base_depth_mm: u16,
    fail_on_frames: Vec<u64>,
    frame_limit: Option<u64>,
    state: Arc<Mutex<RigState>>,
}

impl SimulatedDriver {
    /// Create a rig with no devices attached
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            frame_interval: Duration::ZERO,
            pattern: ScenePattern::default(),
            base_depth_mm: 1500,
            fail_on_frames: Vec::new(),
            frame_limit: None,
            state: Arc::new(Mutex::new(RigState::default())),
        }
    }

    /// Attach a device
    pub fn with_device(mut self, name: &str, serial: &str) -> Self {
        self.devices.push(SimDevice {
            name: name.to_string(),
            serial: serial.to_string(),
        });
        self
    }

    /// Attach N devices with generated names and serials
    pub fn with_devices(self, count: usize) -> Self {
        let mut result = self;
        for _ in 0..count {
            let n = result.devices.len() + 1;
            result = result.with_device(&format!("Simulated Kinect {}", n), &format!("SIM{:04}", n));
        }
        result
    }

    /// Sleep this long between frames. Zero produces frames immediately.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_pattern(mut self, pattern: ScenePattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Distance of the scene center
    pub fn with_base_depth(mut self, millimeters: u16) -> Self {
        self.base_depth_mm = millimeters;
        self
    }

    /// Fail the wait for the given 1-based frame number
    pub fn with_failure_on_frame(mut self, frame: u64) -> Self {
        self.fail_on_frames.push(frame);
        self
    }

    /// End the stream after this many frames
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Sources currently open (not yet shut down)
    pub fn open_sources(&self) -> usize {
        self.state().open_sources
    }

    /// Sources currently generating frames
    pub fn generating_sources(&self) -> usize {
        self.state().generating_sources
    }

    /// Frames produced across all sources, failed cycles included
    pub fn frames_generated(&self) -> u64 {
        self.state().frames_generated
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        lock(&self.state)
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for SimulatedDriver {
    fn name(&self) -> &str {
        "simulated"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceDescriptor {
                index: i + 1,
                name: d.name.clone(),
                serial: Some(d.serial.clone()),
                vendor: "depthtap".to_string(),
            })
            .collect())
    }

    fn open_device(
        &self,
        device: &DeviceDescriptor,
        nodes: &[NodeSpec],
    ) -> Result<Box<dyn FrameSource>> {
        if device.index == 0 || device.index > self.devices.len() {
            return Err(SensorError::DeviceIndexOutOfRange {
                requested: device.index,
                available: self.devices.len(),
            });
        }

        lock(&self.state).open_sources += 1;
        info!(
            device = %device.name,
            serial = device.serial.as_deref().unwrap_or("-"),
            nodes = nodes.len(),
            "Opened simulated device"
        );

        Ok(Box::new(SimulatedSource {
            device: device.name.clone(),
            nodes: nodes.to_vec(),
            pattern: self.pattern,
            base_depth_mm: self.base_depth_mm,
            frame_interval: self.frame_interval,
            fail_on_frames: self.fail_on_frames.clone(),
            frame_limit: self.frame_limit,
            state: Arc::clone(&self.state),
            generating: false,
            closed: false,
            next_frame_id: 1,
            next_deadline: None,
        }))
    }
}

struct SimulatedSource {
    device: String,
    nodes: Vec<NodeSpec>,
    pattern: ScenePattern,
    base_depth_mm: u16,
    frame_interval: Duration,
    fail_on_frames: Vec<u64>,
    frame_limit: Option<u64>,
    state: Arc<Mutex<RigState>>,
    generating: bool,
    closed: bool,
    next_frame_id: u64,
    next_deadline: Option<Instant>,
}

impl SimulatedSource {
    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(SensorError::ContextClosed);
        }
        if !self.generating {
            return Err(SensorError::NotGenerating);
        }
        Ok(())
    }

    fn frame_period_us(&self) -> u64 {
        let fps = self
            .nodes
            .first()
            .map(|n| n.output.fps)
            .filter(|&fps| fps > 0)
            .unwrap_or(30);
        1_000_000 / fps as u64
    }

    /// Render the next cycle, consuming a frame number whether or not it fails
    fn generate(&mut self) -> Result<FrameSet> {
        let frame_id = self.next_frame_id;
        if let Some(limit) = self.frame_limit {
            if frame_id > limit {
                return Err(SensorError::EndOfStream);
            }
        }
        self.next_frame_id += 1;
        lock(&self.state).frames_generated += 1;

        if self.fail_on_frames.contains(&frame_id) {
            debug!(device = %self.device, frame_id, "Injected generation failure");
            return Err(SensorError::Generation {
                status: SIMULATED_FAILURE_STATUS,
                message: format!("simulated failure on frame {}", frame_id),
            });
        }

        let frames = self
            .nodes
            .iter()
            .map(|spec| (spec.node_type, self.render(spec)))
            .collect();

        trace!(device = %self.device, frame_id, "Generated frame set");
        Ok(FrameSet {
            frame_id,
            timestamp_us: (frame_id - 1) * self.frame_period_us(),
            frames,
        })
    }

    fn render(&self, spec: &NodeSpec) -> NodeFrame {
        let depth = render_depth(spec, self.pattern, self.base_depth_mm);
        match spec.node_type {
            NodeType::Depth => NodeFrame::Depth(depth),
            NodeType::Image => NodeFrame::Image(colorize(&depth)),
            NodeType::Ir => NodeFrame::Image(intensity(&depth)),
            NodeType::User => NodeFrame::Labels(segment(&depth, self.base_depth_mm)),
        }
    }

    fn sleep_until_deadline(&mut self) {
        if self.frame_interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + self.frame_interval);
    }

    fn check_anchor(&self, anchor: Option<NodeType>) -> Result<()> {
        match anchor {
            Some(node_type) if !self.nodes.iter().any(|n| n.node_type == node_type) => {
                Err(SensorError::NodeNotFound(node_type))
            }
            _ => Ok(()),
        }
    }
}

impl FrameSource for SimulatedSource {
    fn start(&mut self) -> Result<()> {
        if self.closed {
            return Err(SensorError::ContextClosed);
        }
        if !self.generating {
            self.generating = true;
            self.next_deadline = None;
            lock(&self.state).generating_sources += 1;
            debug!(device = %self.device, "Simulated generation started");
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.generating {
            self.generating = false;
            lock(&self.state).generating_sources -= 1;
            debug!(device = %self.device, "Simulated generation stopped");
        }
        Ok(())
    }

    fn wait_frame_set(&mut self, anchor: Option<NodeType>) -> Result<FrameSet> {
        self.ensure_usable()?;
        self.check_anchor(anchor)?;
        self.sleep_until_deadline();
        self.generate()
    }

    fn poll_frame_set(&mut self) -> Result<Option<FrameSet>> {
        self.ensure_usable()?;
        let ready = match self.next_deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        };
        if !ready {
            return Ok(None);
        }
        if !self.frame_interval.is_zero() {
            self.next_deadline = Some(Instant::now() + self.frame_interval);
        }
        self.generate().map(Some)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.stop()?;
        self.closed = true;
        lock(&self.state).open_sources -= 1;
        info!(device = %self.device, "Simulated device released");
        Ok(())
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn lock(state: &Mutex<RigState>) -> MutexGuard<'_, RigState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn render_depth(spec: &NodeSpec, pattern: ScenePattern, base: u16) -> DepthMap {
    let width = spec.output.x_res as usize;
    let height = spec.output.y_res as usize;
    let (cx, cy) = ((width / 2) as f64, (height / 2) as f64);
    let radius = (width.min(height) / 4).max(1) as f64;

    DepthMap::from_fn(width, height, |col, y| {
        let x = if spec.mirror { width - 1 - col } else { col };
        match pattern {
            ScenePattern::Wall => base,
            ScenePattern::Ramp => {
                let offset = (x as i64 - cx as i64) * RAMP_MM_PER_PIXEL;
                (base as i64 + offset).clamp(0, u16::MAX as i64) as u16
            }
            ScenePattern::Sphere => {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                let r2 = radius * radius;
                if d2 <= r2 {
                    let bulge = SPHERE_DEPTH_MM * (1.0 - d2 / r2).sqrt();
                    (base as f64 + SPHERE_DEPTH_MM - bulge).round() as u16
                } else {
                    base.saturating_add(WALL_OFFSET_MM)
                }
            }
        }
    })
}

fn color_scale(millimeters: u16) -> f64 {
    ((millimeters as f64 - COLOR_NEAR_MM) / (COLOR_FAR_MM - COLOR_NEAR_MM)).clamp(0.0, 1.0)
}

/// Near is red, far is blue
fn colorize(depth: &DepthMap) -> ImageMap {
    ImageMap::from_fn(depth.width(), depth.height(), |x, y| {
        let t = color_scale(depth.sample_at(x, y).unwrap_or(0));
        [
            (255.0 * (1.0 - t)) as u8,
            (255.0 * (t * PI).sin()) as u8,
            (255.0 * t) as u8,
        ]
    })
}

/// Gray levels, brighter when closer
fn intensity(depth: &DepthMap) -> ImageMap {
    ImageMap::from_fn(depth.width(), depth.height(), |x, y| {
        let level = (255.0 * (1.0 - color_scale(depth.sample_at(x, y).unwrap_or(0)))) as u8;
        [level, level, level]
    })
}

/// Everything in front of the wall belongs to user 1
fn segment(depth: &DepthMap, base: u16) -> LabelMap {
    let wall = base.saturating_add(WALL_OFFSET_MM);
    LabelMap::from_fn(depth.width(), depth.height(), |x, y| {
        let d = depth.sample_at(x, y).unwrap_or(0);
        u16::from(d != 0 && d < wall)
    })
}
