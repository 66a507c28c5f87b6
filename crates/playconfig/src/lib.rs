use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Width and height written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (width, height) = normalized
            .split_once('x')
            .ok_or_else(|| format!("invalid resolution '{raw}'; expected WIDTHxHEIGHT"))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|err| format!("invalid resolution '{raw}': {err}"))
        };
        Ok(Self::new(parse(width)?, parse(height)?))
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl Serialize for Resolution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayConfig {
    pub version: u32,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub shader: ShaderSection,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformOverride>,
    #[serde(default)]
    pub ping_pong: Vec<PingPongEntry>,
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub persist: PersistSection,
}

impl Default for PlayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            render: RenderSection::default(),
            shader: ShaderSection::default(),
            uniforms: BTreeMap::new(),
            ping_pong: Vec::new(),
            camera: CameraSection::default(),
            persist: PersistSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderSection {
    #[serde(default = "default_max_resolution")]
    pub max_resolution: Resolution,
    #[serde(default = "default_workgroup")]
    pub workgroup: [u32; 2],
    #[serde(default = "default_render_scale")]
    pub render_scale: u32,
    #[serde(default)]
    pub auto_refresh: bool,
    #[serde(default)]
    pub exposure: Option<f32>,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub window_size: Option<Resolution>,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            max_resolution: default_max_resolution(),
            workgroup: default_workgroup(),
            render_scale: default_render_scale(),
            auto_refresh: false,
            exposure: None,
            preset: default_preset(),
            window_size: None,
        }
    }
}

/// Shader files; anything left unset falls back to the preset's bundled source.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShaderSection {
    pub base: Option<PathBuf>,
    pub render: Option<PathBuf>,
    pub sdf: Option<PathBuf>,
}

/// A schema default override: a scalar or 2, 3, 4 or 16 components.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UniformOverride {
    Number(f64),
    Components(Vec<f64>),
}

impl UniformOverride {
    pub fn components(&self) -> Vec<f32> {
        match self {
            UniformOverride::Number(value) => vec![*value as f32],
            UniformOverride::Components(values) => values.iter().map(|v| *v as f32).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PingPongEntry {
    pub name: String,
    /// Size of each half.
    pub bytes: u64,
    /// Off for pairs the shader pipeline swaps on its own schedule.
    #[serde(default = "default_auto_swap")]
    pub auto_swap: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CameraSection {
    /// Fly speed in world units per second; unset keeps the saved one.
    #[serde(default)]
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistSection {
    #[serde(
        default = "default_autosave",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub autosave: Duration,
    #[serde(default = "default_keep_source")]
    pub keep_source: bool,
}

impl Default for PersistSection {
    fn default() -> Self {
        Self {
            autosave: default_autosave(),
            keep_source: default_keep_source(),
        }
    }
}

fn default_max_resolution() -> Resolution {
    Resolution::new(2560, 1440)
}

fn default_workgroup() -> [u32; 2] {
    [16, 16]
}

fn default_render_scale() -> u32 {
    1
}

fn default_preset() -> String {
    "raymarcher".to_string()
}

fn default_autosave() -> Duration {
    Duration::from_secs(5)
}

fn default_auto_swap() -> bool {
    true
}

fn default_keep_source() -> bool {
    true
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&humantime::format_duration(*duration))
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
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Shared by exposure (fed to `1 - exp(-c * exposure)`) and camera speed.
pub fn validate_positive(field: &str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{field} must be a finite number greater than zero, got {value}"
        )));
    }
    Ok(())
}

impl PlayConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: PlayConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Resolves a configured shader path relative to the config file.
    pub fn resolve_path(config_path: &Path, shader: &Path) -> PathBuf {
        if shader.is_absolute() {
            return shader.to_path_buf();
        }
        config_path
            .parent()
            .map(|dir| dir.join(shader))
            .unwrap_or_else(|| shader.to_path_buf())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        let render = &self.render;
        if render.max_resolution.width == 0 || render.max_resolution.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render.max_resolution must be non-zero, got {}",
                render.max_resolution
            )));
        }
        if let Some(size) = render.window_size {
            if size.width == 0 || size.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "render.window_size must be non-zero, got {size}"
                )));
            }
        }
        for axis in render.workgroup {
            if !(1..=256).contains(&axis) {
                return Err(ConfigError::Invalid(format!(
                    "render.workgroup entries must be within 1..=256, got {axis}"
                )));
            }
        }
        if let Some(exposure) = render.exposure {
            validate_positive("render.exposure", exposure)?;
        }
        if let Some(speed) = self.camera.speed {
            validate_positive("camera.speed", speed)?;
        }

        let mut seen = Vec::with_capacity(self.ping_pong.len());
        for pair in &self.ping_pong {
            if pair.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "ping_pong entries need a name".into(),
                ));
            }
            if pair.bytes == 0 {
                return Err(ConfigError::Invalid(format!(
                    "ping_pong '{}' must have a non-zero size",
                    pair.name
                )));
            }
            if seen.contains(&pair.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "ping_pong '{}' is declared twice",
                    pair.name
                )));
            }
            seen.push(pair.name.as_str());
        }

        for (name, value) in &self.uniforms {
            if let UniformOverride::Components(values) = value {
                if !matches!(values.len(), 2 | 3 | 4 | 16) {
                    return Err(ConfigError::Invalid(format!(
                        "uniform '{name}' has {} components; expected 2, 3, 4 or 16",
                        values.len()
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[render]
max_resolution = "1920x1080"
workgroup = [8, 8]
render_scale = 2
exposure = 1.5
preset = "fractal"
window_size = "1280x720"

[shader]
sdf = "shaders/bulb.wgsl"

[uniforms]
custom_a = 8
sun_direction = [0.3, 1.0, 0.2]

[[ping_pong]]
name = "positions"
bytes = 65536

[persist]
autosave = "30s"
keep_source = false
"#;

    #[test]
    fn parses_sample_config() {
        let config = PlayConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.render.max_resolution, Resolution::new(1920, 1080));
        assert_eq!(config.render.workgroup, [8, 8]);
        assert_eq!(config.render.preset, "fractal");
        assert_eq!(config.render.window_size, Some(Resolution::new(1280, 720)));
        assert_eq!(
            config.uniforms.get("sun_direction").map(UniformOverride::components),
            Some(vec![0.3, 1.0, 0.2])
        );
        assert_eq!(config.uniforms["custom_a"].components(), vec![8.0]);
        assert_eq!(config.ping_pong[0].bytes, 65536);
        assert!(config.ping_pong[0].auto_swap);
        assert_eq!(config.persist.autosave, Duration::from_secs(30));
        assert!(!config.persist.keep_source);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = PlayConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.render.max_resolution, Resolution::new(2560, 1440));
        assert_eq!(config.render.workgroup, [16, 16]);
        assert_eq!(config.render.render_scale, 1);
        assert_eq!(config.render.preset, "raymarcher");
        assert_eq!(config.persist.autosave, Duration::from_secs(5));
        assert!(config.persist.keep_source);
    }

    #[test]
    fn ping_pong_pairs_can_opt_out_of_frame_swaps() {
        let config = PlayConfig::from_toml_str(
            "version = 1\n[[ping_pong]]\nname = \"history\"\nbytes = 64\nauto_swap = false\n",
        )
        .unwrap();
        assert!(!config.ping_pong[0].auto_swap);
    }

    #[test]
    fn exposure_must_be_finite_and_positive() {
        assert!(validate_positive("--exposure", 0.8).is_ok());
        for bad in [0.0, -2.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                validate_positive("--exposure", bad),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn camera_speed_is_optional_and_validated() {
        let config = PlayConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.camera.speed, None);
        let config = PlayConfig::from_toml_str("version = 1\n[camera]\nspeed = 6.5\n").unwrap();
        assert_eq!(config.camera.speed, Some(6.5));
        let err = PlayConfig::from_toml_str("version = 1\n[camera]\nspeed = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("camera.speed"));
    }

    #[test]
    fn autosave_accepts_plain_seconds() {
        let config = PlayConfig::from_toml_str("version = 1\n[persist]\nautosave = 12\n").unwrap();
        assert_eq!(config.persist.autosave, Duration::from_secs(12));
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            "version = 2",
            "version = 1\n[render]\nmax_resolution = \"0x720\"",
            "version = 1\n[render]\nworkgroup = [0, 8]",
            "version = 1\n[render]\nworkgroup = [512, 8]",
            "version = 1\n[render]\nexposure = -1.0",
            "version = 1\n[[ping_pong]]\nname = \"\"\nbytes = 16",
            "version = 1\n[[ping_pong]]\nname = \"a\"\nbytes = 0",
            "version = 1\n[[ping_pong]]\nname = \"a\"\nbytes = 16\n[[ping_pong]]\nname = \"a\"\nbytes = 16",
            "version = 1\n[uniforms]\ncustom_a = [1.0, 2.0, 3.0, 4.0, 5.0]",
        ];
        for case in cases {
            let err = PlayConfig::from_toml_str(case).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{case}: {err}");
        }
    }

    #[test]
    fn malformed_resolution_is_a_parse_error() {
        let err =
            PlayConfig::from_toml_str("version = 1\n[render]\nmax_resolution = \"wide\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn shader_paths_resolve_next_to_the_config() {
        let resolved =
            PlayConfig::resolve_path(Path::new("/home/me/play/marchbox.toml"), Path::new("sdf.wgsl"));
        assert_eq!(resolved, PathBuf::from("/home/me/play/sdf.wgsl"));
        let absolute = PlayConfig::resolve_path(Path::new("marchbox.toml"), Path::new("/tmp/a.wgsl"));
        assert_eq!(absolute, PathBuf::from("/tmp/a.wgsl"));
    }
}
