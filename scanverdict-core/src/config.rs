//! Pipeline Configuration - Shared Policy Knobs
//!
//! One `PipelineConfig` is handed to both the submitter and the receiver.
//! Every field has a default so a partial JSON file is always valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::hashing::compute_profile_digest;

pub const MIB: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default)]
    pub limits: SizeLimits,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub normalization: NormalizationProfile,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeLimits {
    #[serde(default = "default_submitter_max_bytes")]
    pub submitter_max_bytes: usize,
    #[serde(default = "default_receiver_max_bytes")]
    pub receiver_max_bytes: usize,
}

fn default_submitter_max_bytes() -> usize { 8 * MIB }
fn default_receiver_max_bytes() -> usize { 10 * MIB }

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            submitter_max_bytes: default_submitter_max_bytes(),
            receiver_max_bytes: default_receiver_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Block,
    Warn,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    #[serde(default = "default_step_threshold")]
    pub step_threshold: f32,
    #[serde(default = "default_density_threshold")]
    pub density_threshold: f64,
    #[serde(default = "default_min_side")]
    pub min_side: u32,
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Receiver re-runs the gate on transported bytes.
    #[serde(default = "default_true")]
    pub receiver_recheck: bool,
}

fn default_true() -> bool { true }
fn default_sample_size() -> u32 { 128 }
fn default_step_threshold() -> f32 { 20.0 }
fn default_density_threshold() -> f64 { 0.015 }
fn default_min_side() -> u32 { 16 }

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            step_threshold: default_step_threshold(),
            density_threshold: default_density_threshold(),
            min_side: default_min_side(),
            failure_mode: FailureMode::default(),
            receiver_recheck: default_true(),
        }
    }
}

/// Parameters both normalizer invocations must share.
///
/// Bump `version` whenever any other field or the step order changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationProfile {
    #[serde(default = "default_profile_version")]
    pub version: String,
    #[serde(default = "default_max_side")]
    pub max_side: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_profile_version() -> String { "1.0.0".to_string() }
fn default_max_side() -> u32 { 1024 }
fn default_jpeg_quality() -> u8 { 90 }

impl Default for NormalizationProfile {
    fn default() -> Self {
        Self {
            version: default_profile_version(),
            max_side: default_max_side(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl NormalizationProfile {
    /// Digest of the canonical JSON form, sent alongside transported images.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        compute_profile_digest(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
}

fn default_confidence_floor() -> f64 { 0.60 }
fn default_confidence_ceiling() -> f64 { 0.90 }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationConfig {
    #[serde(default = "default_uncertainty_threshold")]
    pub uncertainty_threshold: f64,
}

fn default_uncertainty_threshold() -> f64 { 0.55 }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { uncertainty_threshold: default_uncertainty_threshold() }
    }
}

impl PipelineConfig {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.submitter_max_bytes == 0 || self.limits.receiver_max_bytes == 0 {
            return Err(invalid("limits", "size ceilings must be non-zero"));
        }
        if self.validator.sample_size < 2 {
            return Err(invalid("validator.sampleSize", "must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.validator.density_threshold) {
            return Err(invalid("validator.densityThreshold", "must lie in [0, 1]"));
        }
        if self.normalization.max_side == 0 {
            return Err(invalid("normalization.maxSide", "must be non-zero"));
        }
        if !(1..=100).contains(&self.normalization.jpeg_quality) {
            return Err(invalid("normalization.jpegQuality", "must lie in [1, 100]"));
        }
        if semver::Version::parse(&self.normalization.version).is_err() {
            return Err(invalid("normalization.version", "must be a semantic version"));
        }
        let band = &self.classifier;
        if !(0.0..=1.0).contains(&band.confidence_floor)
            || !(0.0..=1.0).contains(&band.confidence_ceiling)
            || band.confidence_floor > band.confidence_ceiling
        {
            return Err(invalid("classifier", "confidence band must satisfy 0 <= floor <= ceiling <= 1"));
        }
        if !(0.0..=1.0).contains(&self.calibration.uncertainty_threshold) {
            return Err(invalid("calibration.uncertaintyThreshold", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid { field, message: message.to_string() }
}
