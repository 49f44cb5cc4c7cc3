//! Recording playback driver
//!
//! Exposes a depth recording as a single attached device. Only depth nodes can
//! be opened on it; frames are replayed in file order.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use depthtap_core::{
    NodeSpec, NodeType, RecordedFrame, RecordingHeader, RecordingReader, Result, SensorError,
};
use tracing::{debug, info, warn};

use crate::driver::{DeviceDescriptor, FrameSet, FrameSource, NodeFrame, SensorDriver};

/// Driver replaying a depth recording file
#[derive(Debug, Clone)]
pub struct PlaybackDriver {
    path: PathBuf,
    repeat: bool,
    realtime: bool,
}

impl PlaybackDriver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repeat: false,
            realtime: false,
        }
    }

    /// Rewind at the end instead of reporting end of stream
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Pace frames by their recorded timestamps
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SensorDriver for PlaybackDriver {
    fn name(&self) -> &str {
        "playback"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let reader = RecordingReader::open(&self.path)?;
        let header = reader.header();
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());

        Ok(vec![DeviceDescriptor {
            index: 1,
            name: format!(
                "Recording {} ({}x{}@{})",
                file_name, header.width, header.height, header.fps
            ),
            serial: None,
            vendor: "recording".to_string(),
        }])
    }

    fn open_device(
        &self,
        device: &DeviceDescriptor,
        nodes: &[NodeSpec],
    ) -> Result<Box<dyn FrameSource>> {
        if device.index != 1 {
            return Err(SensorError::DeviceIndexOutOfRange {
                requested: device.index,
                available: 1,
            });
        }
        if let Some(spec) = nodes.iter().find(|n| n.node_type != NodeType::Depth) {
            return Err(SensorError::UnsupportedNode {
                driver: self.name().to_string(),
                node: spec.node_type,
            });
        }

        let reader = RecordingReader::open(&self.path)?;
        let header = reader.header();
        for spec in nodes {
            if spec.output.x_res != header.width as u32 || spec.output.y_res != header.height as u32 {
                warn!(
                    node = %spec.name,
                    configured = %format!("{}x{}", spec.output.x_res, spec.output.y_res),
                    recorded = %format!("{}x{}", header.width, header.height),
                    "Recording resolution overrides the configured output mode"
                );
            }
        }

        info!(path = %self.path.display(), repeat = self.repeat, "Opened recording");
        Ok(Box::new(PlaybackSource {
            path: self.path.clone(),
            reader: Some(reader),
            header,
            has_depth_node: !nodes.is_empty(),
            repeat: self.repeat,
            realtime: self.realtime,
            generating: false,
            next_frame_id: 1,
            first_recorded_us: None,
            loop_offset_us: 0,
            last_timestamp_us: 0,
            pending: None,
            pacing: None,
        }))
    }
}

struct PlaybackSource {
    path: PathBuf,
    reader: Option<RecordingReader<BufReader<File>>>,
    header: RecordingHeader,
    has_depth_node: bool,
    repeat: bool,
    realtime: bool,
    generating: bool,
    next_frame_id: u64,
    /// Timestamp of the first frame in the file; stream time starts there
    first_recorded_us: Option<u64>,
    /// Added to rebased timestamps so they keep increasing across rewinds
    loop_offset_us: u64,
    last_timestamp_us: u64,
    /// Next frame, read ahead with its stream timestamp
    pending: Option<RecordedFrame>,
    /// Wall clock and stream time of the first paced frame
    pacing: Option<(Instant, u64)>,
}

impl PlaybackSource {
    fn frame_period_us(&self) -> u64 {
        1_000_000 / u64::from(self.header.fps.max(1))
    }

    fn ensure_generating(&self) -> Result<()> {
        if self.reader.is_none() {
            return Err(SensorError::ContextClosed);
        }
        if !self.generating {
            return Err(SensorError::NotGenerating);
        }
        Ok(())
    }

    fn next_recorded(&mut self) -> Result<RecordedFrame> {
        let reader = self.reader.as_mut().ok_or(SensorError::ContextClosed)?;
        if let Some(frame) = reader.next_frame()? {
            return Ok(frame);
        }
        if !self.repeat {
            return Err(SensorError::EndOfStream);
        }

        debug!(path = %self.path.display(), "Rewinding recording");
        let mut reader = RecordingReader::open(&self.path)?;
        let first = reader.next_frame()?.ok_or(SensorError::EndOfStream)?;
        self.reader = Some(reader);
        self.loop_offset_us = self.last_timestamp_us + self.frame_period_us();
        Ok(first)
    }

    /// Stream timestamp of the next frame, reading it ahead if needed
    fn peek(&mut self) -> Result<u64> {
        if let Some(frame) = &self.pending {
            return Ok(frame.timestamp_us);
        }
        let recorded = self.next_recorded()?;
        let first = *self.first_recorded_us.get_or_insert(recorded.timestamp_us);
        let timestamp_us = recorded.timestamp_us.saturating_sub(first) + self.loop_offset_us;
        self.last_timestamp_us = timestamp_us;
        self.pending = Some(RecordedFrame {
            timestamp_us,
            depth: recorded.depth,
        });
        Ok(timestamp_us)
    }

    /// Wall clock time a frame is due, when pacing in real time
    fn due(&mut self, timestamp_us: u64) -> Option<Instant> {
        if !self.realtime {
            return None;
        }
        let (started, first_ts) = *self.pacing.get_or_insert((Instant::now(), timestamp_us));
        Some(started + Duration::from_micros(timestamp_us.saturating_sub(first_ts)))
    }

    fn take_set(&mut self) -> Result<FrameSet> {
        let recorded = self.pending.take().ok_or(SensorError::EndOfStream)?;
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let frames = if self.has_depth_node {
            vec![(NodeType::Depth, NodeFrame::Depth(recorded.depth))]
        } else {
            Vec::new()
        };
        Ok(FrameSet {
            frame_id,
            timestamp_us: recorded.timestamp_us,
            frames,
        })
    }
}

impl FrameSource for PlaybackSource {
    fn start(&mut self) -> Result<()> {
        if self.reader.is_none() {
            return Err(SensorError::ContextClosed);
        }
        self.generating = true;
        self.pacing = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.generating = false;
        Ok(())
    }

    fn wait_frame_set(&mut self, anchor: Option<NodeType>) -> Result<FrameSet> {
        if let Some(node_type) = anchor {
            if node_type != NodeType::Depth || !self.has_depth_node {
                return Err(SensorError::NodeNotFound(node_type));
            }
        }
        self.ensure_generating()?;
        let timestamp_us = self.peek()?;
        if let Some(due) = self.due(timestamp_us) {
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.take_set()
    }

    fn poll_frame_set(&mut self) -> Result<Option<FrameSet>> {
        self.ensure_generating()?;
        let timestamp_us = self.peek()?;
        if self.due(timestamp_us).is_some_and(|due| due > Instant::now()) {
            return Ok(None);
        }
        self.take_set().map(Some)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.generating = false;
        self.pending = None;
        if self.reader.take().is_some() {
            info!(path = %self.path.display(), "Closed recording");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthtap_core::{DepthMap, MapOutputMode, RecordingWriter};

    fn write_recording(path: &Path, centers: &[u16]) {
        let frames: Vec<(u64, u16)> = centers
            .iter()
            .enumerate()
            .map(|(i, &mm)| (i as u64 * 100_000, mm))
            .collect();
        write_timed_recording(path, 10, &frames);
    }

    fn write_timed_recording(path: &Path, fps: u16, frames: &[(u64, u16)]) {
        let header = RecordingHeader {
            width: 4,
            height: 2,
            fps,
        };
        let mut writer = RecordingWriter::create(path, header).unwrap();
        for &(timestamp_us, mm) in frames {
            writer
                .write_frame(timestamp_us, &DepthMap::filled(4, 2, mm))
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn depth_node() -> NodeSpec {
        NodeSpec::new(NodeType::Depth, "Depth1").with_output(MapOutputMode {
            x_res: 4,
            y_res: 2,
            fps: 10,
        })
    }

    fn center(set: &FrameSet) -> Option<u16> {
        match set.frame_for(NodeType::Depth) {
            Some(NodeFrame::Depth(map)) => map.center_sample(),
            _ => None,
        }
    }

    #[test]
    fn replays_frames_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk.dtrec");
        write_recording(&path, &[1000, 1100]);

        let driver = PlaybackDriver::new(&path);
        let devices = driver.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].name.contains("desk.dtrec"));

        let mut source = driver.open_device(&devices[0], &[depth_node()]).unwrap();
        source.start().unwrap();
        let first = source.wait_frame_set(Some(NodeType::Depth)).unwrap();
        assert_eq!((first.frame_id, center(&first)), (1, Some(1000)));
        let second = source.wait_frame_set(None).unwrap();
        assert_eq!((second.timestamp_us, center(&second)), (100_000, Some(1100)));
        assert!(matches!(
            source.wait_frame_set(None),
            Err(SensorError::EndOfStream)
        ));
    }

    #[test]
    fn repeat_rewinds_with_increasing_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.dtrec");
        write_recording(&path, &[900, 950]);

        let driver = PlaybackDriver::new(&path).with_repeat(true);
        let device = driver.enumerate_devices().unwrap().remove(0);
        let mut source = driver.open_device(&device, &[depth_node()]).unwrap();
        source.start().unwrap();

        let stamps: Vec<(u64, Option<u16>)> = (0..4)
            .map(|_| {
                let set = source.wait_frame_set(None).unwrap();
                (set.timestamp_us, center(&set))
            })
            .collect();
        assert_eq!(
            stamps,
            vec![
                (0, Some(900)),
                (100_000, Some(950)),
                (200_000, Some(900)),
                (300_000, Some(950)),
            ]
        );
    }

    #[test]
    fn rejects_non_depth_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth-only.dtrec");
        write_recording(&path, &[1000]);

        let driver = PlaybackDriver::new(&path);
        let device = driver.enumerate_devices().unwrap().remove(0);
        let result = driver.open_device(&device, &[depth_node(), NodeSpec::new(NodeType::Image, "Image1")]);
        assert!(matches!(
            result,
            Err(SensorError::UnsupportedNode {
                node: NodeType::Image,
                ..
            })
        ));
    }

    #[test]
    fn missing_file_fails_enumeration() {
        let driver = PlaybackDriver::new("/nonexistent/capture.dtrec");
        assert!(matches!(
            driver.enumerate_devices(),
            Err(SensorError::Recording(_))
        ));
    }

    #[test]
    fn loop_timestamps_start_from_the_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late-start.dtrec");
        write_timed_recording(&path, 30, &[(33_333, 900), (66_666, 950)]);

        let driver = PlaybackDriver::new(&path).with_repeat(true);
        let device = driver.enumerate_devices().unwrap().remove(0);
        let mut source = driver.open_device(&device, &[depth_node()]).unwrap();
        source.start().unwrap();

        let stamps: Vec<u64> = (0..4)
            .map(|_| source.wait_frame_set(None).unwrap().timestamp_us)
            .collect();
        assert_eq!(stamps, vec![0, 33_333, 66_666, 99_999]);
    }

    #[test]
    fn realtime_poll_does_not_wait_for_the_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.dtrec");
        write_timed_recording(&path, 1, &[(0, 1000), (2_000_000, 1100)]);

        let driver = PlaybackDriver::new(&path).with_realtime(true);
        let device = driver.enumerate_devices().unwrap().remove(0);
        let mut source = driver.open_device(&device, &[depth_node()]).unwrap();
        source.start().unwrap();

        let started = Instant::now();
        let first = source.poll_frame_set().unwrap().unwrap();
        assert_eq!(first.frame_id, 1);
        assert!(source.poll_frame_set().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
