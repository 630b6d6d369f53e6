//! Render configuration: the background reference, runtime pacing knobs, and
//! the ordered layer list the compositor draws.
//!
//! ```toml
//! version = 1
//!
//! [runtime]
//! fps = 60
//!
//! [background]
//! image = "wallpapers/dusk.jpg"
//! crop = { x = 0, y = 120, width = 1920, height = 1080 }
//!
//! [[layers]]
//! shader = "rain"
//! order = 1
//! opacity = 0.8
//! params = { u_speed = 1.5, u_tint = "#80a0ff" }
//! ```
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use catalog::ParamValue;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_fps")]
    pub fps: f32,
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub power: PowerPreference,
    /// How often the host re-reads the configuration file.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            vsync: default_vsync(),
            power: PowerPreference::default(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackgroundConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerConfig {
    #[serde(rename = "shader")]
    pub shader_id: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub depth: f32,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl LayerConfig {
    pub fn new(shader_id: impl Into<String>, order: u32) -> Self {
        Self {
            shader_id: shader_id.into(),
            order,
            enabled: default_enabled(),
            opacity: default_opacity(),
            depth: 0.0,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, id: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(id.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RenderConfig {
    pub version: u32,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundConfig>,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            version: 1,
            runtime: RuntimeSettings::default(),
            background: None,
            layers: Vec::new(),
        }
    }
}

fn default_fps() -> f32 {
    60.0
}

fn default_vsync() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must be non-negative"))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || !v.is_finite() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&humantime::format_duration(*value))
}

impl RenderConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RenderConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if !self.runtime.fps.is_finite() || self.runtime.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "runtime fps must be greater than zero (got {})",
                self.runtime.fps
            )));
        }

        if self.runtime.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "runtime poll_interval must be greater than zero".into(),
            ));
        }

        if let Some(background) = &self.background {
            if background.image.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "background image must not be empty".into(),
                ));
            }
            if let Some(crop) = background.crop {
                if crop.width == 0 || crop.height == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "background crop must have a non-zero size (got {}x{})",
                        crop.width, crop.height
                    )));
                }
            }
        }

        for (index, layer) in self.layers.iter().enumerate() {
            if layer.shader_id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "layer {index} must reference a shader"
                )));
            }
            if !(0.0..=1.0).contains(&layer.opacity) {
                return Err(ConfigError::Invalid(format!(
                    "layer {index} ({}) opacity must be within [0, 1] (got {})",
                    layer.shader_id, layer.opacity
                )));
            }
            if !(0.0..=1.0).contains(&layer.depth) {
                return Err(ConfigError::Invalid(format!(
                    "layer {index} ({}) depth must be within [0, 1] (got {})",
                    layer.shader_id, layer.depth
                )));
            }
        }

        Ok(())
    }

    pub fn enabled_count(&self) -> usize {
        self.layers.iter().filter(|layer| layer.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Rgba;

    const SAMPLE: &str = r##"
version = 1

[runtime]
fps = 30
vsync = false
power = "high"
poll_interval = "250ms"

[background]
image = "wallpapers/dusk.jpg"
crop = { x = 0, y = 120, width = 1920, height = 1080 }

[[layers]]
shader = "rain"
order = 1
opacity = 0.8
depth = 0.5
params = { u_speed = 1.5, u_drops = 200, u_tint = "#ff0000", u_wind = [0.25, -1.0], u_lightning = true }

[[layers]]
shader = "snow"
enabled = false
"##;

    #[test]
    fn parses_sample_config() {
        let config = RenderConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.runtime.fps, 30.0);
        assert!(!config.runtime.vsync);
        assert_eq!(config.runtime.power, PowerPreference::High);
        assert_eq!(config.runtime.poll_interval, Duration::from_millis(250));

        let background = config.background.as_ref().unwrap();
        assert_eq!(background.image, "wallpapers/dusk.jpg");
        assert_eq!(
            background.crop,
            Some(CropRect {
                x: 0,
                y: 120,
                width: 1920,
                height: 1080
            })
        );

        let rain = &config.layers[0];
        assert_eq!(rain.shader_id, "rain");
        assert_eq!(rain.order, 1);
        assert!(rain.enabled);
        assert_eq!(rain.params["u_speed"], ParamValue::Float(1.5));
        assert_eq!(rain.params["u_drops"], ParamValue::Int(200));
        assert_eq!(
            rain.params["u_tint"],
            ParamValue::Color(Rgba::new(1.0, 0.0, 0.0, 1.0))
        );
        assert_eq!(rain.params["u_wind"], ParamValue::Vec2([0.25, -1.0]));
        assert_eq!(rain.params["u_lightning"], ParamValue::Bool(true));

        let snow = &config.layers[1];
        assert!(!snow.enabled);
        assert_eq!(snow.order, 0);
        assert_eq!(snow.opacity, 1.0);
        assert_eq!(snow.depth, 0.0);
        assert_eq!(config.enabled_count(), 1);
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = RenderConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.runtime.fps, 60.0);
        assert!(config.layers.is_empty());
    }

    #[test]
    fn rejects_out_of_range_opacity() {
        let err = RenderConfig::from_toml_str(
            r#"
version = 1
[[layers]]
shader = "rain"
opacity = 1.5
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("opacity")));
    }

    #[test]
    fn rejects_blank_shader_and_bad_version() {
        let blank = RenderConfig::from_toml_str("version = 1\n[[layers]]\nshader = \" \"\n");
        assert!(matches!(blank, Err(ConfigError::Invalid(_))));

        let version = RenderConfig::from_toml_str("version = 2");
        assert!(matches!(version, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_negative_order_at_parse_time() {
        let err =
            RenderConfig::from_toml_str("version = 1\n[[layers]]\nshader = \"rain\"\norder = -1\n")
                .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_sized_crop() {
        let err = RenderConfig::from_toml_str(
            "version = 1\n[background]\nimage = \"a.png\"\ncrop = { x = 0, y = 0, width = 0, height = 10 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(RenderConfig::load(&path).unwrap().layers.len(), 2);

        let missing = RenderConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = RenderConfig::from_toml_str(SAMPLE).unwrap();
        let encoded = toml::to_string(&config).unwrap();
        assert_eq!(RenderConfig::from_toml_str(&encoded).unwrap(), config);
    }
}
