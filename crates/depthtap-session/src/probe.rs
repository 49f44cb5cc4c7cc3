//! Center pixel probe: reports the distance at the middle of every depth frame

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use depthtap_core::{DepthMap, Result, SensorError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::{Context, FrameInfo, NodeHandle};

/// Loop limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOptions {
    /// Stop after this many reported frames
    pub frame_budget: Option<u64>,
    /// Abort once this many waits in a row have failed; 0 never aborts
    pub max_consecutive_failures: u32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            frame_budget: None,
            max_consecutive_failures: 5,
        }
    }
}

/// Distance reading at the center of one depth frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CenterSample {
    pub frame_id: u64,
    pub timestamp_us: u64,
    pub captured_at: DateTime<Utc>,
    pub x: usize,
    pub y: usize,
    pub millimeters: u16,
}

impl CenterSample {
    /// Sample the midpoint of `map`
    pub fn from_map(frame_id: u64, timestamp_us: u64, map: &DepthMap) -> Option<Self> {
        let (x, y) = map.midpoint();
        let millimeters = map.sample_at(x, y)?;
        Some(Self {
            frame_id,
            timestamp_us,
            captured_at: Utc::now(),
            x,
            y,
            millimeters,
        })
    }

    pub fn message(&self) -> String {
        format!("The middle pixel is {} millimeters away.", self.millimeters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The frame budget was used up
    FrameBudget,
    /// The stop flag was raised
    Cancelled,
    /// The frame source has no more frames
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub frames: u64,
    pub failures: u64,
    pub stopped_by: StopReason,
}

/// Cooperative frame loop over a started context
pub struct CenterProbe {
    options: ProbeOptions,
}

impl CenterProbe {
    pub fn new(options: ProbeOptions) -> Self {
        Self { options }
    }

    /// Wait for frames on `depth` and hand each center sample to `sink` until
    /// the budget is used, `stop` is raised, or the stream ends.
    ///
    /// Every wait result is inspected: a transient generation failure is
    /// logged and counted, and the loop aborts with that error once the
    /// consecutive-failure limit is reached. Other errors abort at once.
    pub fn run<F>(
        &self,
        ctx: &mut Context,
        depth: &NodeHandle,
        stop: &AtomicBool,
        mut sink: F,
    ) -> Result<ProbeSummary>
    where
        F: FnMut(&CenterSample, &DepthMap) -> Result<()>,
    {
        let mut frames = 0u64;
        let mut failures = 0u64;
        let mut consecutive = 0u32;

        let stopped_by = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Cancelled;
            }
            if self.options.frame_budget.is_some_and(|budget| frames >= budget) {
                break StopReason::FrameBudget;
            }

            let outcome = match ctx.wait_one_update_all(depth) {
                Ok(info) => sample_center(ctx, depth, info),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((sample, map)) => {
                    consecutive = 0;
                    debug!(
                        frame_id = sample.frame_id,
                        x = sample.x,
                        y = sample.y,
                        millimeters = sample.millimeters,
                        "Center sample"
                    );
                    sink(&sample, map)?;
                    frames += 1;
                }
                Err(SensorError::EndOfStream) => break StopReason::EndOfStream,
                Err(e) if e.is_transient() => {
                    failures += 1;
                    consecutive += 1;
                    warn!(error = %e, consecutive, "Frame wait failed");
                    let limit = self.options.max_consecutive_failures;
                    if limit > 0 && consecutive >= limit {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        info!(frames, failures, stopped_by = ?stopped_by, "Probe finished");
        Ok(ProbeSummary {
            frames,
            failures,
            stopped_by,
        })
    }
}

fn sample_center<'c>(
    ctx: &'c Context,
    depth: &NodeHandle,
    info: FrameInfo,
) -> Result<(CenterSample, &'c DepthMap)> {
    let map = ctx.depth_map(depth)?;
    let sample = CenterSample::from_map(info.frame_id, info.timestamp_us, map).ok_or(
        SensorError::EmptyFrame {
            frame_id: info.frame_id,
        },
    )?;
    Ok((sample, map))
}
