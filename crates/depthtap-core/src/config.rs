//! Sensor XML configuration parsing and serialization
//!
//! The configuration declares which processing nodes a context creates and
//! how they are set up. It follows the layout of the classic
//! `SamplesConfig.xml` files shipped with depth sensor SDKs:
//!
//! ```xml
//! <OpenNI>
//!   <Log writeToConsole="false" writeToFile="false">
//!     <LogLevel value="3"/>
//!   </Log>
//!   <ProductionNodes>
//!     <Node type="Depth" name="Depth1">
//!       <Configuration>
//!         <MapOutputMode xRes="640" yRes="480" FPS="30"/>
//!         <Mirror on="true"/>
//!       </Configuration>
//!     </Node>
//!   </ProductionNodes>
//! </OpenNI>
//! ```
//!
//! Elements this crate does not use (licenses, log masks, dumps) are ignored.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::node::{MapOutputMode, NodeSpec, NodeType};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse sensor configuration: {0}")]
    ParseError(String),
    #[error("Failed to serialize sensor configuration: {0}")]
    SerializeError(String),
    #[error("Failed to read sensor configuration {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid sensor configuration: {0}")]
    ValidationError(String),
}

/// `<Log>` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(rename = "@writeToConsole", default)]
    pub write_to_console: bool,
    #[serde(rename = "@writeToFile", default)]
    pub write_to_file: bool,
    #[serde(rename = "LogLevel", default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLevel {
    /// 0 = verbose ... 3 = errors only
    #[serde(rename = "@value")]
    pub value: u8,
}

/// `<Recording file=".."/>`: play frames from a file instead of a live device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSource {
    #[serde(rename = "@file")]
    pub file: String,
    #[serde(rename = "@loop", default)]
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MapOutputModeElement {
    #[serde(rename = "@xRes")]
    pub x_res: u32,
    #[serde(rename = "@yRes")]
    pub y_res: u32,
    #[serde(rename = "@FPS")]
    pub fps: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Toggle {
    #[serde(rename = "@on")]
    pub on: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfiguration {
    #[serde(rename = "MapOutputMode", default, skip_serializing_if = "Option::is_none")]
    pub map_output_mode: Option<MapOutputModeElement>,
    #[serde(rename = "Mirror", default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Toggle>,
}

/// `<Node>` element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeElement {
    #[serde(rename = "@type")]
    pub node_type: String,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Configuration", default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<NodeConfiguration>,
}

/// `<ProductionNodes>` block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionNodes {
    #[serde(rename = "Recording", default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingSource>,
    #[serde(rename = "Node", default)]
    pub node: Vec<NodeElement>,
}

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "OpenNI")]
pub struct SensorConfig {
    #[serde(rename = "Log", default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogSection>,
    #[serde(rename = "ProductionNodes", default, skip_serializing_if = "Option::is_none")]
    pub production_nodes: Option<ProductionNodes>,
}

impl SensorConfig {
    /// Configuration declaring Depth, Image and User nodes at VGA / 30 fps
    pub fn sample() -> Self {
        let vga = Some(MapOutputModeElement {
            x_res: 640,
            y_res: 480,
            fps: 30,
        });
        Self {
            log: Some(LogSection {
                write_to_console: false,
                write_to_file: false,
                level: Some(LogLevel { value: 3 }),
            }),
            production_nodes: Some(ProductionNodes {
                recording: None,
                node: vec![
                    NodeElement {
                        node_type: "Depth".to_string(),
                        name: Some("Depth1".to_string()),
                        configuration: Some(NodeConfiguration {
                            map_output_mode: vga,
                            mirror: Some(Toggle { on: true }),
                        }),
                    },
                    NodeElement {
                        node_type: "Image".to_string(),
                        name: Some("Image1".to_string()),
                        configuration: Some(NodeConfiguration {
                            map_output_mode: vga,
                            mirror: Some(Toggle { on: true }),
                        }),
                    },
                    NodeElement {
                        node_type: "User".to_string(),
                        name: None,
                        configuration: None,
                    },
                ],
            }),
        }
    }

    /// Parse and validate configuration from an XML string
    pub fn from_xml(xml: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig =
            from_str(xml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_xml(&content)
    }

    /// Serialize to XML string
    pub fn to_xml(&self) -> Result<String, ConfigError> {
        let xml = to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        Ok(format!("<?xml version='1.0'?>\n{}", xml))
    }

    /// Write to file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let xml = self.to_xml()?;
        std::fs::write(path, xml).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check node types, duplicate capabilities and duplicate names
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nodes = self.production_nodes.as_ref().ok_or_else(|| {
            ConfigError::ValidationError("missing <ProductionNodes> block".to_string())
        })?;

        let mut seen_types = HashSet::new();
        let mut seen_names = HashSet::new();
        for element in &nodes.node {
            let node_type = parse_node_type(&element.node_type)?;
            if !seen_types.insert(node_type) {
                return Err(ConfigError::ValidationError(format!(
                    "{} node declared more than once",
                    node_type
                )));
            }
            let name = node_name(element, node_type);
            if !seen_names.insert(name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "node name '{}' is not unique",
                    name
                )));
            }
            if let Some(mode) = element.configuration.as_ref().and_then(|c| c.map_output_mode) {
                if mode.x_res == 0 || mode.y_res == 0 || mode.fps == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "node '{}' has an empty output mode {}x{}@{}",
                        name, mode.x_res, mode.y_res, mode.fps
                    )));
                }
            }
        }

        if let Some(recording) = &nodes.recording {
            if recording.file.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "<Recording> has an empty file attribute".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// All declared nodes, in document order
    pub fn node_specs(&self) -> Result<Vec<NodeSpec>, ConfigError> {
        let Some(nodes) = &self.production_nodes else {
            return Ok(Vec::new());
        };
        nodes
            .node
            .iter()
            .map(|element| {
                let node_type = parse_node_type(&element.node_type)?;
                let configuration = element.configuration.clone().unwrap_or_default();
                let output = configuration
                    .map_output_mode
                    .map(|m| MapOutputMode {
                        x_res: m.x_res,
                        y_res: m.y_res,
                        fps: m.fps,
                    })
                    .unwrap_or_default();
                Ok(NodeSpec {
                    node_type,
                    name: node_name(element, node_type),
                    output,
                    mirror: configuration.mirror.map(|t| t.on).unwrap_or(false),
                })
            })
            .collect()
    }

    /// Recording source, if the configuration plays back a file
    pub fn recording(&self) -> Option<&RecordingSource> {
        self.production_nodes
            .as_ref()
            .and_then(|n| n.recording.as_ref())
    }

    /// Recording path resolved relative to the directory holding the config
    pub fn recording_path(&self, config_dir: &Path) -> Option<PathBuf> {
        self.recording().map(|r| {
            let file = Path::new(&r.file);
            if file.is_absolute() {
                file.to_path_buf()
            } else {
                config_dir.join(file)
            }
        })
    }

    pub fn log_level(&self) -> Option<u8> {
        self.log.as_ref().and_then(|l| l.level.as_ref()).map(|l| l.value)
    }
}

fn parse_node_type(raw: &str) -> Result<NodeType, ConfigError> {
    raw.parse().map_err(ConfigError::ValidationError)
}

/// Unnamed nodes get `<Type>1`, like the SDK's auto-naming
fn node_name(element: &NodeElement, node_type: NodeType) -> String {
    element
        .name
        .clone()
        .unwrap_or_else(|| format!("{}1", node_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES_CONFIG: &str = r#"<?xml version="1.0"?>
<OpenNI>
    <Licenses>
        <License vendor="Vendor" key="0KOIk2JeIBYClPWVnMoRKn5cdY4="/>
    </Licenses>
    <Log writeToConsole="false" writeToFile="false">
        <LogLevel value="3"/>
        <Masks>
            <Mask name="ALL" on="true"/>
        </Masks>
        <Dumps>
        </Dumps>
    </Log>
    <ProductionNodes>
        <Node type="Depth" name="Depth1">
            <Configuration>
                <MapOutputMode xRes="320" yRes="240" FPS="30"/>
                <Mirror on="true"/>
            </Configuration>
        </Node>
        <Node type="Image" name="Image1" stopOnError="false">
            <Configuration>
                <MapOutputMode xRes="640" yRes="480" FPS="30"/>
                <Mirror on="false"/>
            </Configuration>
        </Node>
        <Node type="User"/>
    </ProductionNodes>
</OpenNI>"#;

    #[test]
    fn test_parse_samples_config() {
        let config = SensorConfig::from_xml(SAMPLES_CONFIG).unwrap();
        assert_eq!(config.log_level(), Some(3));
        assert!(config.recording().is_none());

        let specs = config.node_specs().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].node_type, NodeType::Depth);
        assert_eq!(specs[0].name, "Depth1");
        assert_eq!(specs[0].output.x_res, 320);
        assert_eq!(specs[0].output.y_res, 240);
        assert!(specs[0].mirror);
        assert_eq!(specs[1].node_type, NodeType::Image);
        assert!(!specs[1].mirror);
        assert_eq!(specs[2].node_type, NodeType::User);
        assert_eq!(specs[2].name, "User1");
        assert_eq!(specs[2].output, MapOutputMode::default());
    }

    #[test]
    fn test_duplicate_capability_rejected() {
        let xml = r#"<OpenNI><ProductionNodes>
            <Node type="Depth" name="A"/>
            <Node type="Depth" name="B"/>
        </ProductionNodes></OpenNI>"#;
        let err = SensorConfig::from_xml(xml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("Depth node declared more than once"));
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let xml = r#"<OpenNI><ProductionNodes>
            <Node type="Gesture"/>
        </ProductionNodes></OpenNI>"#;
        assert!(matches!(
            SensorConfig::from_xml(xml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_production_nodes_rejected() {
        let xml = r#"<OpenNI><Log writeToConsole="true"/></OpenNI>"#;
        assert!(matches!(
            SensorConfig::from_xml(xml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_recording_path_resolves_against_config_dir() {
        let xml = r#"<OpenNI><ProductionNodes>
            <Recording file="captures/desk.dtrec" loop="true"/>
            <Node type="Depth"/>
        </ProductionNodes></OpenNI>"#;
        let config = SensorConfig::from_xml(xml).unwrap();
        let recording = config.recording().unwrap();
        assert!(recording.repeat);
        assert_eq!(
            config.recording_path(Path::new("/etc/depthtap")),
            Some(PathBuf::from("/etc/depthtap/captures/desk.dtrec"))
        );
    }

    #[test]
    fn test_sample_config_survives_file_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SamplesConfig.xml");
        SensorConfig::sample().to_file(&path).unwrap();

        let loaded = SensorConfig::from_file(&path).unwrap();
        let types: Vec<NodeType> = loaded
            .node_specs()
            .unwrap()
            .iter()
            .map(|s| s.node_type)
            .collect();
        assert_eq!(types, vec![NodeType::Depth, NodeType::Image, NodeType::User]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = SensorConfig::from_file(Path::new("/nonexistent/SamplesConfig.xml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/SamplesConfig.xml"));
    }
}
