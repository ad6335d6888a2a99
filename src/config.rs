use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    core::Fraction,
    error::{ConfigError, Result},
};

/// Main configuration for reelkit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External ffmpeg executables
    pub ffmpeg: FfmpegConfig,

    /// Frame cache settings
    pub cache: CacheConfig,

    /// Rendering settings
    pub render: RenderConfig,

    /// Default encoder settings used by the CLI
    pub encode: EncodeConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `REELKIT_*` environment overrides
    pub fn apply_env(&mut self) {
        self.ffmpeg.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.ffmpeg.validate()?;
        self.render.validate()?;
        self.encode.validate()?;
        Ok(())
    }
}

/// Locations of the ffmpeg and ffprobe executables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// ffmpeg binary (name on PATH or absolute path)
    pub binary: String,

    /// ffprobe binary (name on PATH or absolute path)
    pub probe: String,

    /// Value passed to `-v` on every invocation
    pub log_level: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            probe: "ffprobe".to_string(),
            log_level: "error".to_string(),
        }
    }
}

impl FfmpegConfig {
    /// Defaults with the environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_from(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a variable lookup.
    ///
    /// `REELKIT_FFMPEG_DIR` points both binaries at an out-of-tree build;
    /// `REELKIT_FFMPEG` and `REELKIT_FFPROBE` then win over it individually.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("REELKIT_FFMPEG_DIR").filter(|d| !d.is_empty()) {
            let dir = PathBuf::from(dir);
            self.binary = dir.join("ffmpeg").display().to_string();
            self.probe = dir.join("ffprobe").display().to_string();
        }
        if let Some(binary) = lookup("REELKIT_FFMPEG").filter(|b| !b.is_empty()) {
            self.binary = binary;
        }
        if let Some(probe) = lookup("REELKIT_FFPROBE").filter(|p| !p.is_empty()) {
            self.probe = probe;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ffmpeg.binary".to_string(),
                value: self.binary.clone()
            }.into());
        }

        if self.probe.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ffmpeg.probe".to_string(),
                value: self.probe.clone()
            }.into());
        }

        Ok(())
    }
}

/// Frame cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget per cache, 0 = unlimited
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Worker threads for pixel work
    pub threads: usize,

    /// Use Lanczos instead of bilinear when scaling clips
    pub high_quality_scaling: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            high_quality_scaling: false,
        }
    }
}

impl RenderConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "render.threads".to_string(),
                value: self.threads.to_string()
            }.into());
        }

        Ok(())
    }
}

/// Encoder defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bit_rate: u64,
    pub audio_bit_rate: u64,
    pub fps: Fraction,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "libmp3lame".to_string(),
            video_bit_rate: 3_000_000,
            audio_bit_rate: 128_000,
            fps: Fraction::new(30000, 1000),
            width: 1280,
            height: 720,
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl EncodeConfig {
    fn validate(&self) -> Result<()> {
        if self.fps.num <= 0 || self.fps.den <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "encode.fps".to_string(),
                value: self.fps.to_string()
            }.into());
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "encode.size".to_string(),
                value: format!("{}x{}", self.width, self.height)
            }.into());
        }

        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "encode.sample_rate".to_string(),
                value: self.sample_rate.to_string()
            }.into());
        }

        if self.channels == 0 {
            return Err(ConfigError::InvalidValue {
                key: "encode.channels".to_string(),
                value: self.channels.to_string()
            }.into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("reelkit.toml");

        let mut original_config = Config::default();
        original_config.encode.fps = Fraction::new(24, 1);
        original_config.cache.max_bytes = 0;

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded_config.encode.fps, Fraction::new(24, 1));
        assert_eq!(loaded_config.cache.max_bytes, 0);
        assert_eq!(original_config.ffmpeg.binary, loaded_config.ffmpeg.binary);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[render]\nhigh_quality_scaling = true\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert!(config.render.high_quality_scaling);
        assert_eq!(config.encode.sample_rate, 44100);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, crate::error::ReelError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_invalid_encode_config() {
        let mut config = Config::default();
        config.encode.channels = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.encode.fps = Fraction::new(0, 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REELKIT_FFMPEG_DIR", "/opt/ffmpeg/bin"),
            ("REELKIT_FFPROBE", "/usr/local/bin/ffprobe"),
        ].into_iter().collect();

        let mut ffmpeg = FfmpegConfig::default();
        ffmpeg.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(ffmpeg.binary, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(ffmpeg.probe, "/usr/local/bin/ffprobe");
    }
}
