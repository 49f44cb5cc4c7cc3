//! The blocking probe job run on the tokio blocking pool

use anyhow::{Context as _, Result};
use depthtap_core::{
    DepthMap, NodeSpec, NodeType, RecordingHeader, RecordingWriter, SensorError,
};
use depthtap_session::{CenterProbe, CenterSample, Context, ProbeOptions, ProbeSummary, SensorDriver};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// How each sample is written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Sentence,
    JsonLines,
}

pub struct ProbeJob {
    pub driver: Box<dyn SensorDriver>,
    pub nodes: Vec<NodeSpec>,
    pub device_index: usize,
    pub options: ProbeOptions,
    pub format: OutputFormat,
    pub record: Option<PathBuf>,
    pub stop: Arc<AtomicBool>,
}

impl ProbeJob {
    /// Open the device, run the center probe until it stops, then release
    /// the device. `out` receives one line per frame.
    pub fn run<W: Write>(self, out: &mut W) -> Result<ProbeSummary> {
        let mut ctx = Context::open_with_nodes(self.driver.as_ref(), &self.nodes, self.device_index)
            .map_err(|e| explain_open_error(e, self.device_index))?;

        let node_names: Vec<&str> = ctx.nodes().iter().map(|n| n.name()).collect();
        info!(
            driver = ctx.driver_name(),
            device = %ctx.device().name,
            nodes = %node_names.join(","),
            "Device opened"
        );

        let depth = ctx
            .find_node(NodeType::Depth)
            .context("The sensor configuration declares no Depth node")?;
        info!(node = %depth, "Depth node resolved");
        for node_type in [NodeType::Image, NodeType::User] {
            match ctx.find_node(node_type) {
                Ok(node) => info!(node = %node, "Node resolved"),
                Err(e) => warn!(error = %e, "Continuing without node"),
            }
        }

        ctx.start_generating_all()
            .context("Failed to start generating")?;

        let fps = self
            .nodes
            .iter()
            .find(|n| n.node_type == NodeType::Depth)
            .map(|n| n.output.fps)
            .unwrap_or(30);
        let mut recorder = self.record.map(|path| FrameRecorder::new(path, fps));

        let summary = CenterProbe::new(self.options).run(&mut ctx, &depth, &self.stop, |sample, map| {
            write_sample(&mut *out, self.format, sample)?;
            if let Some(recorder) = recorder.as_mut() {
                recorder.write(sample, map)?;
            }
            Ok(())
        });

        let summary = match summary {
            Ok(summary) => summary,
            Err(SensorError::Generation { status, message }) => {
                anyhow::bail!(
                    "Frame generation kept failing (status {:#x}): {}",
                    status,
                    message
                )
            }
            Err(e) => return Err(e).context("Probe loop failed"),
        };

        if let Some(recorder) = recorder {
            recorder.finish()?;
        }
        ctx.shutdown().context("Failed to release the device")?;
        Ok(summary)
    }
}

/// Refuse to record over the recording being played back
pub fn check_record_target(record: &Path, playback: &Path) -> Result<()> {
    if let (Ok(record), Ok(playback)) = (fs::canonicalize(record), fs::canonicalize(playback)) {
        if record == playback {
            anyhow::bail!(
                "Cannot record to {} while playing it back",
                record.display()
            );
        }
    }
    Ok(())
}

fn explain_open_error(error: SensorError, device_index: usize) -> anyhow::Error {
    match error {
        SensorError::NoDevices => anyhow::anyhow!("No depth devices are attached"),
        SensorError::DeviceIndexOutOfRange { requested, available } => anyhow::anyhow!(
            "Device number {} is out of range: {} device(s) attached, numbering starts at 1",
            requested,
            available
        ),
        e => anyhow::Error::new(e).context(format!("Failed to open device {}", device_index)),
    }
}

fn write_sample<W: Write>(
    out: &mut W,
    format: OutputFormat,
    sample: &CenterSample,
) -> depthtap_core::Result<()> {
    match format {
        OutputFormat::Sentence => writeln!(out, "{}", sample.message())?,
        OutputFormat::JsonLines => {
            let line = serde_json::to_string(sample).map_err(std::io::Error::from)?;
            writeln!(out, "{}", line)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Writes probed depth frames to a recording, creating the file on the first
/// frame so the header matches the delivered resolution
struct FrameRecorder {
    path: PathBuf,
    fps: u16,
    writer: Option<RecordingWriter<BufWriter<File>>>,
    /// Device timestamp of the first recorded frame
    first_timestamp_us: u64,
}

impl FrameRecorder {
    fn new(path: PathBuf, fps: u32) -> Self {
        Self {
            path,
            fps: u16::try_from(fps).unwrap_or(u16::MAX),
            writer: None,
            first_timestamp_us: 0,
        }
    }

    fn write(&mut self, sample: &CenterSample, map: &DepthMap) -> depthtap_core::Result<()> {
        if self.writer.is_none() {
            let header = RecordingHeader::for_map(map, self.fps)?;
            info!(
                path = %self.path.display(),
                width = header.width,
                height = header.height,
                "Recording frames"
            );
            self.writer = Some(RecordingWriter::create(&self.path, header)?);
            self.first_timestamp_us = sample.timestamp_us;
        }
        if let Some(writer) = self.writer.as_mut() {
            let timestamp_us = sample.timestamp_us.saturating_sub(self.first_timestamp_us);
            writer.write_frame(timestamp_us, map)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if let Some(writer) = self.writer {
            let frames = writer.frames_written();
            writer
                .finish()
                .with_context(|| format!("Failed to finish recording {}", self.path.display()))?;
            info!(path = %self.path.display(), frames, "Recording saved");
        }
        Ok(())
    }
}
