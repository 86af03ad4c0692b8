use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

pub const CONFIG_PATH_VAR: &str = "TVSHIM_CONFIG";
pub const ENV_PREFIX: &str = "TVSHIM_";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ShimConfig {
    pub backend: BackendSection,
    pub video: VideoSection,
    pub audio: AudioSection,
    pub demux: DemuxSection,
    pub output: OutputSection,
    pub triggers: TriggerSection,
    pub logging: LoggingSection,
}

impl ShimConfig {
    /// Whether the alternate backend lives behind an indirection command.
    pub fn is_isolated(&self) -> bool {
        !self.backend.indirection.is_empty()
    }

    /// Applies `TVSHIM_<SECTION>_<FIELD>` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overrides { lookup: &lookup };

        env.string("BACKEND_LEGACY_EXECUTABLE", &mut self.backend.legacy_executable);
        env.string("BACKEND_EXECUTABLE", &mut self.backend.executable);
        env.list("BACKEND_INDIRECTION", &mut self.backend.indirection);
        env.list("BACKEND_HWACCEL_ARGS", &mut self.backend.hwaccel_args);

        env.string("VIDEO_DEINTERLACE_FILTER", &mut self.video.deinterlace_filter);
        env.string(
            "VIDEO_SCALE_FILTER_TEMPLATE",
            &mut self.video.scale_filter_template,
        );
        env.string("VIDEO_ENCODER", &mut self.video.encoder);
        env.string("VIDEO_PRESET_FLAG", &mut self.video.preset_flag);
        env.string("VIDEO_PRESET_VALUE", &mut self.video.preset_value);
        env.list("VIDEO_EXTRA_ARGS", &mut self.video.extra_args);
        env.parsed("VIDEO_MAXRATE_MULTIPLIER", &mut self.video.maxrate_multiplier)?;
        env.parsed("VIDEO_BUFSIZE_MULTIPLIER", &mut self.video.bufsize_multiplier)?;
        env.string("VIDEO_GOP_MAX", &mut self.video.gop_max);

        env.flag("AUDIO_REENCODE", &mut self.audio.reencode)?;
        env.string("AUDIO_CODEC", &mut self.audio.codec);
        env.parsed("AUDIO_MAPPING", &mut self.audio.mapping)?;

        env.string("DEMUX_PROBE_SIZE", &mut self.demux.probe_size);
        env.string("DEMUX_ANALYZE_DURATION", &mut self.demux.analyze_duration);

        env.string("OUTPUT_FORMAT", &mut self.output.format);

        env.string("TRIGGERS_CODEC", &mut self.triggers.codec);
        env.string("TRIGGERS_FORMAT", &mut self.triggers.format);

        env.flag("LOGGING_ENABLED", &mut self.logging.enabled)?;
        env.flag("LOGGING_HEX_DUMP", &mut self.logging.hex_dump)?;
        if let Some(value) = env.get("LOGGING_DESTINATION") {
            self.logging.destination = PathBuf::from(value);
        }
        env.string("LOGGING_FILTER", &mut self.logging.filter);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendSection {
    pub legacy_executable: String,
    pub executable: String,
    pub indirection: Vec<String>,
    pub hwaccel_args: Vec<String>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            legacy_executable: "ffmpeg.legacy".into(),
            executable: "/usr/lib/jellyfin-ffmpeg/ffmpeg".into(),
            indirection: vec!["docker".into(), "exec".into(), "transcoder".into()],
            hwaccel_args: [
                "-hwaccel",
                "vaapi",
                "-hwaccel_device",
                "/dev/dri/renderD128",
                "-hwaccel_output_format",
                "vaapi",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoSection {
    pub deinterlace_filter: String,
    pub scale_filter_template: String,
    pub encoder: String,
    pub preset_flag: String,
    pub preset_value: String,
    pub extra_args: Vec<String>,
    pub maxrate_multiplier: f64,
    pub bufsize_multiplier: f64,
    pub gop_max: String,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            deinterlace_filter: "deinterlace_vaapi".into(),
            scale_filter_template: "deinterlace_vaapi,scale_vaapi=w={width}:h={height}".into(),
            encoder: "h264_vaapi".into(),
            preset_flag: String::new(),
            preset_value: String::new(),
            extra_args: Vec::new(),
            maxrate_multiplier: 1.5,
            bufsize_multiplier: 2.0,
            gop_max: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioSection {
    pub reencode: bool,
    pub codec: String,
    pub mapping: AudioMapping,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            reencode: false,
            codec: "aac".into(),
            mapping: AudioMapping::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMapping {
    /// Leave stream selection to the backend.
    #[default]
    Default,
    /// First video stream plus every audio stream, if any.
    All,
}

impl FromStr for AudioMapping {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(AudioMapping::Default),
            "all" => Ok(AudioMapping::All),
            other => Err(format!("expected `default` or `all`, got `{other}`")),
        }
    }
}

impl fmt::Display for AudioMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioMapping::Default => write!(f, "default"),
            AudioMapping::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemuxSection {
    pub probe_size: String,
    pub analyze_duration: String,
}

impl Default for DemuxSection {
    fn default() -> Self {
        Self {
            probe_size: "5000000".into(),
            analyze_duration: "5000000".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSection {
    pub format: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: "mpegts".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerSection {
    pub codec: String,
    pub format: String,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            codec: "mpeg4".into(),
            format: "dvd".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub enabled: bool,
    pub hex_dump: bool,
    pub destination: PathBuf,
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            hex_dump: false,
            destination: PathBuf::from("/tmp/tvshim.log"),
            filter: "info".into(),
        }
    }
}

struct Overrides<'a, F> {
    lookup: &'a F,
}

impl<'a, F> Overrides<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn list(&self, key: &str, target: &mut Vec<String>) {
        if let Some(value) = self.get(key) {
            *target = value.split_whitespace().map(String::from).collect();
        }
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<()> {
        let Some(value) = self.get(key) else {
            return Ok(());
        };
        *target = match value.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" | "on" => true,
            "no" | "false" | "0" | "off" | "" => false,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    key: format!("{ENV_PREFIX}{key}"),
                    value,
                    reason: "expected yes/no".into(),
                })
            }
        };
        Ok(())
    }

    fn parsed<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.get(key) else {
            return Ok(());
        };
        *target = value
            .trim()
            .parse()
            .map_err(|err: T::Err| ConfigError::InvalidOverride {
                key: format!("{ENV_PREFIX}{key}"),
                value: value.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

/// Defaults, then the TOML file named by `TVSHIM_CONFIG` (if any), then the environment.
pub fn load_shim_config() -> Result<ShimConfig> {
    let file = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
    load_shim_config_with(file.as_deref(), |key| std::env::var(key).ok())
}

pub fn load_shim_config_with<F>(file: Option<&Path>, lookup: F) -> Result<ShimConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match file {
        Some(path) => load_toml(path)?,
        None => ShimConfig::default(),
    };
    config.apply_overrides(lookup)?;
    Ok(config)
}

pub fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/tvshim.toml");
        let config = load_shim_config_with(Some(&path), |_| None).expect("fixture should parse");
        assert_eq!(config.triggers.codec, "mpeg4");
        assert_eq!(config.video.gop_max, "60");
        assert_eq!(config.audio.mapping, AudioMapping::All);
        assert!(config.is_isolated());
        // sections absent from the fixture keep their defaults
        assert_eq!(config.demux.probe_size, "5000000");
    }

    #[test]
    fn environment_overrides_win_over_defaults() {
        let lookup = lookup_from(&[
            ("TVSHIM_VIDEO_MAXRATE_MULTIPLIER", "1.25"),
            ("TVSHIM_BACKEND_INDIRECTION", ""),
            ("TVSHIM_AUDIO_REENCODE", "yes"),
            ("TVSHIM_AUDIO_MAPPING", "ALL"),
            ("TVSHIM_VIDEO_EXTRA_ARGS", "-low_power  1 -rc_mode VBR"),
            ("TVSHIM_LOGGING_DESTINATION", "/var/log/shim.log"),
        ]);
        let config = load_shim_config_with(None, lookup).unwrap();
        assert_eq!(config.video.maxrate_multiplier, 1.25);
        assert!(!config.is_isolated());
        assert!(config.audio.reencode);
        assert_eq!(config.audio.mapping, AudioMapping::All);
        assert_eq!(
            config.video.extra_args,
            vec!["-low_power", "1", "-rc_mode", "VBR"]
        );
        assert_eq!(
            config.logging.destination,
            PathBuf::from("/var/log/shim.log")
        );
    }

    #[test]
    fn malformed_numeric_override_is_reported() {
        let lookup = lookup_from(&[("TVSHIM_VIDEO_BUFSIZE_MULTIPLIER", "lots")]);
        let err = load_shim_config_with(None, lookup).unwrap_err();
        match err {
            ConfigError::InvalidOverride { key, value, .. } => {
                assert_eq!(key, "TVSHIM_VIDEO_BUFSIZE_MULTIPLIER");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_flag_override_is_reported() {
        let lookup = lookup_from(&[("TVSHIM_LOGGING_ENABLED", "maybe")]);
        assert!(matches!(
            load_shim_config_with(None, lookup),
            Err(ConfigError::InvalidOverride { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_shim_config_with(Some(Path::new("/nonexistent/tvshim.toml")), |_| None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
