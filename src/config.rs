//! Runtime configuration.
//!
//! Search order for [`Config::load`]:
//! 1. `$ROADWATCH_CONFIG`
//! 2. `./roadwatch.toml`
//! 3. built-in defaults
//!
//! A file that is found must carry `[rules] overspeed_threshold_kmh` and must
//! validate. A broken file fails the load instead of falling back.

use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::detector::DetectionConfig;
use crate::error::ConfigError;
use crate::evidence::EvidenceConfig;
use crate::kinematics::KinematicsConfig;
use crate::rules::RuleConfig;
use crate::tracker::TrackerConfig;

pub const CONFIG_ENV: &str = "ROADWATCH_CONFIG";
pub const LOCAL_CONFIG: &str = "roadwatch.toml";

const SECTIONS: &[&str] = &["tracker", "kinematics", "rules", "detection", "evidence"];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub kinematics: KinematicsConfig,
    pub rules: RuleConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

impl Config {
    /// Loads from the first config file present. A file that exists but cannot
    /// be read, parsed or validated is an error; built-in defaults are used only
    /// when no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_first(explicit.as_deref(), Path::new(LOCAL_CONFIG))
    }

    fn load_first(explicit: Option<&Path>, local: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "loaded config from {}", CONFIG_ENV);
            return Ok(config);
        }

        if local.exists() {
            let config = Self::load_from_file(local)?;
            info!(path = %local.display(), "loaded config");
            return Ok(config);
        }

        info!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parses and validates TOML text. Parse errors carry an empty path.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        if let Ok(toml::Value::Table(table)) = contents.parse::<toml::Value>() {
            for key in table.keys().filter(|k| !SECTIONS.contains(&k.as_str())) {
                warn!(section = %key, "unknown config section ignored");
            }
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let t = &self.tracker;
        if !(t.max_distance_px.is_finite() && t.max_distance_px > 0.0) {
            errors.push(format!(
                "tracker.max_distance_px must be a positive number (got {})",
                t.max_distance_px
            ));
        }

        let k = &self.kinematics;
        if !(k.meters_per_pixel.is_finite() && k.meters_per_pixel > 0.0) {
            errors.push(format!(
                "kinematics.meters_per_pixel must be a positive number (got {})",
                k.meters_per_pixel
            ));
        }
        if !(k.smoothing > 0.0 && k.smoothing <= 1.0) {
            errors.push(format!(
                "kinematics.smoothing must be in (0, 1] (got {})",
                k.smoothing
            ));
        }

        let r = &self.rules;
        non_negative(r.overspeed_threshold_kmh, "rules.overspeed_threshold_kmh", &mut errors);
        non_negative(r.overspeed_noise_floor_kmh, "rules.overspeed_noise_floor_kmh", &mut errors);
        non_negative(
            r.signal_jump_distance_px as f64,
            "rules.signal_jump_distance_px",
            &mut errors,
        );
        non_negative(r.rider_proximity_px as f64, "rules.rider_proximity_px", &mut errors);

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            errors.push(format!(
                "detection.confidence_threshold must be in [0, 1] (got {})",
                d.confidence_threshold
            ));
        }
        if d.vehicle_classes.is_empty() {
            errors.push("detection.vehicle_classes must not be empty".to_string());
        }

        let e = &self.evidence;
        if !matches!(e.image_ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg") {
            errors.push(format!(
                "evidence.image_ext must be jpg or jpeg (got {})",
                e.image_ext
            ));
        }
        if !(e.blur_sigma.is_finite() && e.blur_sigma > 0.0) {
            errors.push(format!(
                "evidence.blur_sigma must be a positive number (got {})",
                e.blur_sigma
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
    if !(value.is_finite() && value >= 0.0) {
        errors.push(format!("{name} must be a non-negative number (got {value})"));
    }
}
