//! Daemon configuration: TOML file with `FACEQUEST_*` env overrides.
//!
//! The quality settings become the read-only snapshot each flow runs
//! under; the daemon re-validates after layering so a bad override fails
//! at startup instead of mid-flow.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use facequest_core::QualitySettings;

const DEFAULT_CONFIG_PATH: &str = "/etc/facequest/config.toml";
const DEFAULT_UPLINK_BAUD: u32 = 115200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database holding the single template slot.
    pub db_path: PathBuf,
    /// Template encryption key file (created on first use).
    pub key_path: PathBuf,
    /// Serial device of the micro:bit uplink, if attached.
    pub uplink_device: Option<String>,
    pub uplink_baud: u32,
    /// Frames discarded at startup for auto-gain/exposure settling.
    pub warmup_frames: usize,
    /// Pipeline quality settings.
    pub quality: QualitySettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: PathBuf::from("/usr/share/facequest/models"),
            db_path: data_dir.join("template.db"),
            key_path: data_dir.join("template.key"),
            uplink_device: None,
            uplink_baud: DEFAULT_UPLINK_BAUD,
            warmup_frames: 4,
            quality: QualitySettings::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facequest")
}

impl Config {
    /// Load from `FACEQUEST_CONFIG` (or the default path), apply env
    /// overrides, and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("FACEQUEST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides()?;
        config
            .quality
            .validate()
            .context("invalid quality settings")?;
        Ok(config)
    }

    /// Parse the file at `path`, or fall back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("FACEQUEST_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("FACEQUEST_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACEQUEST_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACEQUEST_KEY_PATH") {
            self.key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FACEQUEST_UPLINK_DEVICE") {
            self.uplink_device = (!v.is_empty()).then_some(v);
        }
        self.uplink_baud = env_u32("FACEQUEST_UPLINK_BAUD", self.uplink_baud);
        self.warmup_frames = env_usize("FACEQUEST_WARMUP_FRAMES", self.warmup_frames);

        if let Ok(v) = std::env::var("FACEQUEST_DETECTOR") {
            self.quality.detector = v.parse().context("FACEQUEST_DETECTOR")?;
        }
        // Metric before threshold: switching the metric resets the
        // threshold, so an explicit threshold override must land last.
        if let Ok(v) = std::env::var("FACEQUEST_METRIC") {
            let metric = v.parse().context("FACEQUEST_METRIC")?;
            self.quality.set_metric(metric);
        }
        if let Ok(v) = std::env::var("FACEQUEST_THRESHOLD") {
            let threshold: f32 = v.parse().context("FACEQUEST_THRESHOLD")?;
            self.quality
                .set_threshold(threshold)
                .context("FACEQUEST_THRESHOLD")?;
        }
        self.quality.verify_frames = env_usize("FACEQUEST_VERIFY_FRAMES", self.quality.verify_frames);
        self.quality.enroll_samples =
            env_usize("FACEQUEST_ENROLL_SAMPLES", self.quality.enroll_samples);
        self.quality.min_det_score = env_f32("FACEQUEST_MIN_DET_SCORE", self.quality.min_det_score);
        self.quality.min_face_px = env_f32("FACEQUEST_MIN_FACE_PX", self.quality.min_face_px);
        self.quality.min_blur_var = env_f32("FACEQUEST_MIN_BLUR_VAR", self.quality.min_blur_var);
        Ok(())
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facequest_core::Metric;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.quality.validate().is_ok());
        assert_eq!(config.uplink_baud, 115200);
        assert!(config.uplink_device.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            camera_device = "/dev/video2"
            uplink_device = "/dev/ttyACM0"

            [quality]
            metric = "cosine"
            threshold = 0.45
            verify_frames = 10
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.uplink_device.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.quality.metric, Metric::Cosine);
        assert_eq!(config.quality.verify_frames, 10);
        // Unspecified fields keep their defaults.
        assert_eq!(config.quality.enroll_samples, 18);
        assert!(config.quality.validate().is_ok());
    }

    #[test]
    fn mismatched_metric_threshold_fails_validation() {
        let raw = r#"
            [quality]
            metric = "cosine"
            threshold = 1.10
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.quality.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/facequest.toml")).unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
    }
}
