//! depthtap - Main entry point
//!
//! Opens a depth device from an XML sensor configuration and prints the
//! distance of the center pixel for every frame until interrupted.

mod choose;
mod job;
mod settings;

use anyhow::{Context as _, Result};
use clap::Parser;
use depthtap_core::{NodeSpec, NodeType, SensorConfig};
use depthtap_session::{list_devices, PlaybackDriver, SensorDriver};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use job::{OutputFormat, ProbeJob};
use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "depthtap")]
#[command(about = "Print the distance of the center pixel of every depth frame")]
#[command(version)]
struct Args {
    /// Device number (1-based, in enumeration order)
    #[arg(value_name = "DEVICE_NUMBER", default_value_t = 1)]
    device: usize,

    /// Path to the sensor XML configuration
    #[arg(short, long, default_value = "SamplesConfig.xml")]
    config: PathBuf,

    /// Path to the tool settings file
    #[arg(short, long, default_value = "depthtap.toml")]
    settings: PathBuf,

    /// Log level (trace, debug, info, warn, error). Defaults to the
    /// configuration's LogLevel, or info.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// List attached devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List attached devices and ask which one to open
    #[arg(long, conflicts_with = "device")]
    choose: bool,

    /// Print each sample as a JSON line
    #[arg(long)]
    json: bool,

    /// Also write every depth frame to this recording file
    #[arg(long, value_name = "PATH")]
    record: Option<PathBuf>,

    /// Write a sample sensor configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_config {
        init_logging(resolve_level(args.log_level.as_deref(), None))?;
        SensorConfig::sample()
            .to_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Wrote sample sensor configuration");
        return Ok(());
    }

    let config = SensorConfig::from_file(&args.config).with_context(|| {
        format!(
            "Failed to load sensor configuration {}",
            args.config.display()
        )
    })?;

    init_logging(resolve_level(args.log_level.as_deref(), config.log_level()))?;
    info!("depthtap v{}", env!("CARGO_PKG_VERSION"));

    let settings = settings::load_settings(&args.settings)
        .with_context(|| format!("Failed to load settings from {}", args.settings.display()))?;

    let config_dir = config_dir(&args.config);
    if let (Some(record), Some(playback)) = (&args.record, config.recording_path(config_dir)) {
        job::check_record_target(record, &playback)?;
    }

    let (driver, nodes) = select_driver(&config, config_dir, &settings)?;

    if args.list_devices {
        let devices = list_devices(driver.as_ref()).context("Failed to enumerate devices")?;
        if devices.is_empty() {
            println!("No devices attached");
        }
        for device in devices {
            println!("{}", device.listing_line());
        }
        return Ok(());
    }

    let device_index = if args.choose {
        let devices = list_devices(driver.as_ref()).context("Failed to enumerate devices")?;
        choose::choose_device(&devices, &mut std::io::stdin().lock(), &mut std::io::stderr())?
    } else {
        args.device
    };

    let options = settings.probe_options(args.frames);
    info!(
        device = device_index,
        driver = driver.name(),
        frames = ?options.frame_budget,
        max_failures = options.max_consecutive_failures,
        "Starting probe"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping after the current frame");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let job = ProbeJob {
        driver,
        nodes,
        device_index,
        options,
        format: if args.json {
            OutputFormat::JsonLines
        } else {
            OutputFormat::Sentence
        },
        record: args.record,
        stop,
    };

    let summary = tokio::task::spawn_blocking(move || job.run(&mut std::io::stdout().lock()))
        .await
        .context("Probe task panicked")??;

    info!(
        frames = summary.frames,
        failures = summary.failures,
        stopped_by = ?summary.stopped_by,
        "Done"
    );

    Ok(())
}

/// Logs go to stderr, stdout carries the samples
fn init_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// `--log-level` wins; otherwise the XML `<LogLevel value>` (0 verbose,
/// 1 info, 2 warnings, 3 errors) applies
fn resolve_level(flag: Option<&str>, xml_level: Option<u8>) -> Level {
    match flag.map(str::to_lowercase).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        Some(_) => Level::INFO,
        None => match xml_level {
            Some(0) => Level::TRACE,
            Some(1) | None => Level::INFO,
            Some(2) => Level::WARN,
            Some(_) => Level::ERROR,
        },
    }
}

/// Playback when the configuration names a recording, the simulated rig
/// otherwise. Recordings only carry depth, so other nodes are skipped.
fn select_driver(
    config: &SensorConfig,
    config_dir: &Path,
    settings: &Settings,
) -> Result<(Box<dyn SensorDriver>, Vec<NodeSpec>)> {
    let mut nodes = config.node_specs()?;

    let Some(path) = config.recording_path(config_dir) else {
        return Ok((Box::new(settings.simulated_driver()), nodes));
    };

    let repeat = config.recording().is_some_and(|r| r.repeat);
    let driver = PlaybackDriver::new(path)
        .with_repeat(repeat)
        .with_realtime(true);
    info!(path = %driver.path().display(), repeat, "Playing back recording");

    nodes.retain(|node| {
        let keep = node.node_type == NodeType::Depth;
        if !keep {
            warn!(node = %node.name, "Recordings carry depth only, skipping node");
        }
        keep
    });
    Ok((Box::new(driver), nodes))
}

/// Directory relative recording paths are resolved against
fn config_dir(config: &Path) -> &Path {
    config.parent().unwrap_or_else(|| Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthtap_core::{DepthMap, RecordingHeader, RecordingWriter};

    const STOCK_NODES: &str = r#"
        <Node type="Depth" name="Depth1">
            <Configuration>
                <MapOutputMode xRes="4" yRes="2" FPS="30"/>
            </Configuration>
        </Node>
        <Node type="Image" name="Image1"/>
        <Node type="User"/>"#;

    #[test]
    fn test_recording_selects_playback_with_depth_only() {
        let dir = tempfile::tempdir().unwrap();
        let header = RecordingHeader {
            width: 4,
            height: 2,
            fps: 30,
        };
        let mut writer = RecordingWriter::create(&dir.path().join("capture.dtrec"), header).unwrap();
        writer.write_frame(0, &DepthMap::filled(4, 2, 1200)).unwrap();
        writer.finish().unwrap();

        let xml = format!(
            r#"<OpenNI><ProductionNodes><Recording file="capture.dtrec" loop="true"/>{}</ProductionNodes></OpenNI>"#,
            STOCK_NODES
        );
        let config = SensorConfig::from_xml(&xml).unwrap();
        let (driver, nodes) = select_driver(&config, dir.path(), &Settings::default()).unwrap();

        assert_eq!(driver.name(), "playback");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_type, NodeType::Depth);
        let devices = driver.enumerate_devices().unwrap();
        assert!(devices[0].name.contains("capture.dtrec"));
    }

    #[test]
    fn test_no_recording_selects_simulated_rig() {
        let xml = format!("<OpenNI><ProductionNodes>{}</ProductionNodes></OpenNI>", STOCK_NODES);
        let config = SensorConfig::from_xml(&xml).unwrap();
        let (driver, nodes) = select_driver(&config, Path::new("."), &Settings::default()).unwrap();

        assert_eq!(driver.name(), "simulated");
        assert_eq!(nodes.len(), 3);
        let devices = driver.enumerate_devices().unwrap();
        assert_eq!(devices[0].listing_line(), "[1] Kinect Simulator (SIM0001)");
    }

    #[test]
    fn test_flag_overrides_xml_log_level() {
        assert_eq!(resolve_level(Some("DEBUG"), Some(3)), Level::DEBUG);
        assert_eq!(resolve_level(Some("bogus"), Some(3)), Level::INFO);
    }

    #[test]
    fn test_xml_log_level_applies_without_flag() {
        assert_eq!(resolve_level(None, Some(0)), Level::TRACE);
        assert_eq!(resolve_level(None, Some(1)), Level::INFO);
        assert_eq!(resolve_level(None, Some(2)), Level::WARN);
        assert_eq!(resolve_level(None, Some(3)), Level::ERROR);
        assert_eq!(resolve_level(None, None), Level::INFO);

        let config = SensorConfig::sample();
        assert_eq!(resolve_level(None, config.log_level()), Level::ERROR);
    }

    #[test]
    fn test_config_dir_of_bare_file_name() {
        assert_eq!(config_dir(Path::new("SamplesConfig.xml")), Path::new(""));
        assert_eq!(config_dir(Path::new("/etc/depthtap/SamplesConfig.xml")), Path::new("/etc/depthtap"));
    }
}
