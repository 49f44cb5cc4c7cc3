//! Tool settings loading

use anyhow::Result;
use depthtap_session::{ProbeOptions, ScenePattern, SimulatedDriver};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Abort after this many failed waits in a row (0 = never)
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// Frames to report before exiting (0 = unbounded)
    #[serde(default)]
    pub frames: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_failures(),
            frames: 0,
        }
    }
}

fn default_max_failures() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSettings {
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub pattern: ScenePattern,
    #[serde(default = "default_base_depth")]
    pub base_depth_mm: u16,
    /// Frame numbers whose wait fails, for exercising error paths
    #[serde(default)]
    pub fail_on_frames: Vec<u64>,
    #[serde(default = "default_devices", rename = "device")]
    pub devices: Vec<SimulatedDeviceSettings>,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval(),
            pattern: ScenePattern::default(),
            base_depth_mm: default_base_depth(),
            fail_on_frames: Vec::new(),
            devices: default_devices(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceSettings {
    pub name: String,
    pub serial: String,
}

fn default_frame_interval() -> u64 {
    33 // ~30 fps
}

fn default_base_depth() -> u16 {
    1500
}

fn default_devices() -> Vec<SimulatedDeviceSettings> {
    vec![SimulatedDeviceSettings {
        name: "Kinect Simulator".to_string(),
        serial: "SIM0001".to_string(),
    }]
}

impl Settings {
    /// Loop limits, with a command line frame budget taking precedence
    pub fn probe_options(&self, frames_override: Option<u64>) -> ProbeOptions {
        let frames = frames_override.unwrap_or(self.probe.frames);
        ProbeOptions {
            frame_budget: (frames > 0).then_some(frames),
            max_consecutive_failures: self.probe.max_consecutive_failures,
        }
    }

    pub fn simulated_driver(&self) -> SimulatedDriver {
        let sim = &self.simulator;
        let mut driver = SimulatedDriver::new()
            .with_frame_interval(Duration::from_millis(sim.frame_interval_ms))
            .with_pattern(sim.pattern)
            .with_base_depth(sim.base_depth_mm);
        for device in &sim.devices {
            driver = driver.with_device(&device.name, &device.serial);
        }
        for &frame in &sim.fail_on_frames {
            driver = driver.with_failure_on_frame(frame);
        }
        driver
    }
}

/// Load settings from file, falling back to defaults when it does not exist
pub fn load_settings(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    } else {
        info!(
            path = %path.display(),
            "Settings file not found, using defaults"
        );
        Ok(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthtap_session::SensorDriver;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.probe.max_consecutive_failures, 5);
        assert_eq!(settings.probe.frames, 0);
        assert_eq!(settings.simulator.frame_interval_ms, 33);
        assert_eq!(settings.simulator.pattern, ScenePattern::Sphere);
        assert_eq!(settings.simulator.devices.len(), 1);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depthtap.toml");
        std::fs::write(
            &path,
            r#"
[probe]
frames = 10

[simulator]
pattern = "ramp"

[[simulator.device]]
name = "Bench A"
serial = "A1"

[[simulator.device]]
name = "Bench B"
serial = "B2"
"#,
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.probe.frames, 10);
        assert_eq!(settings.probe.max_consecutive_failures, 5);
        assert_eq!(settings.simulator.pattern, ScenePattern::Ramp);
        assert_eq!(settings.simulator.base_depth_mm, 1500);

        let devices = settings.simulated_driver().enumerate_devices().unwrap();
        let lines: Vec<String> = devices.iter().map(|d| d.listing_line()).collect();
        assert_eq!(lines, vec!["[1] Bench A (A1)", "[2] Bench B (B2)"]);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[simulator]\npattern = \"cube\"\n").unwrap();
        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn test_probe_options() {
        let mut settings = Settings::default();
        assert_eq!(settings.probe_options(None).frame_budget, None);
        assert_eq!(settings.probe_options(Some(3)).frame_budget, Some(3));

        settings.probe.frames = 7;
        settings.probe.max_consecutive_failures = 0;
        let options = settings.probe_options(None);
        assert_eq!(options.frame_budget, Some(7));
        assert_eq!(options.max_consecutive_failures, 0);
        assert_eq!(settings.probe_options(Some(0)).frame_budget, None);
    }
}
