//! Perceptual Validator - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! Policy maps violations to accept/reject.
//!
//! The gate is cheap on purpose: it runs on a small luminance downsample so
//! obviously wrong uploads are turned away before normalization or transport.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FailureMode, ValidatorConfig};
use crate::decode::DecodedImage;

pub const LABEL_ACCEPTED: &str = "ultrasound_side";
pub const LABEL_REJECTED: &str = "not_ultrasound";

pub const DEFAULT_PASS_REASON: &str = "Valid ultrasound side-profile image.";
pub const DEFAULT_FAIL_REASON: &str = "This does not look like an ultrasound.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Gate verdict. `score` is the measured edge density.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    #[serde(rename = "ok")]
    pub accepted: bool,
    pub label: String,
    pub score: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ValidationViolation>,
}

impl ValidationOutcome {
    pub fn pass(score: f64, violations: Vec<ValidationViolation>) -> Self {
        Self {
            accepted: true,
            label: LABEL_ACCEPTED.to_string(),
            score,
            reason: DEFAULT_PASS_REASON.to_string(),
            violations,
        }
    }

    pub fn fail(score: f64, violations: Vec<ValidationViolation>) -> Self {
        let reason = violations
            .iter()
            .find(|v| v.severity == ViolationSeverity::Error)
            .map(|v| v.message.clone())
            .unwrap_or_else(|| DEFAULT_FAIL_REASON.to_string());
        Self {
            accepted: false,
            label: LABEL_REJECTED.to_string(),
            score,
            reason,
            violations,
        }
    }
}

/// Features the rules look at, extracted once per image.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualFeatures {
    pub width: u32,
    pub height: u32,
    pub edge_density: f64,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, features: &PerceptualFeatures, config: &ValidatorConfig) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct EdgeDensityRule;

impl ValidationRule for EdgeDensityRule {
    fn name(&self) -> &'static str { "edge_density" }

    fn validate(&self, features: &PerceptualFeatures, config: &ValidatorConfig) -> Vec<ValidationViolation> {
        if features.edge_density > config.density_threshold {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: DEFAULT_FAIL_REASON.to_string(),
            expected: Some(format!("edge density > {:.4}", config.density_threshold)),
            actual: Some(format!("{:.4}", features.edge_density)),
        }]
    }
}

pub struct MinimumResolutionRule;

impl ValidationRule for MinimumResolutionRule {
    fn name(&self) -> &'static str { "minimum_resolution" }

    fn validate(&self, features: &PerceptualFeatures, config: &ValidatorConfig) -> Vec<ValidationViolation> {
        let min = config.min_side;
        if features.width >= min && features.height >= min {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: "Image resolution is too low.".to_string(),
            expected: Some(format!("{}x{} minimum", min, min)),
            actual: Some(format!("{}x{}", features.width, features.height)),
        }]
    }
}

/// Runs the rules and applies the configured failure mode.
pub struct PerceptualValidator {
    rules: Vec<Box<dyn ValidationRule>>,
    config: ValidatorConfig,
}

impl PerceptualValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            rules: vec![
                Box::new(MinimumResolutionRule),
                Box::new(EdgeDensityRule),
            ],
            config,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn extract(&self, image: &DecodedImage) -> PerceptualFeatures {
        let luma = luminance_plane(image);
        let sample = self.config.sample_size;
        let small = area_downsample(&luma, image.width(), image.height(), sample, sample);
        PerceptualFeatures {
            width: image.width(),
            height: image.height(),
            edge_density: edge_density(&small, sample, sample, self.config.step_threshold),
        }
    }

    pub fn validate(&self, image: &DecodedImage) -> ValidationOutcome {
        let features = self.extract(image);

        let mut all_violations = vec![];
        for rule in &self.rules {
            all_violations.extend(rule.validate(&features, &self.config));
        }

        let has_errors = all_violations.iter()
            .any(|v| v.severity == ViolationSeverity::Error);

        debug!(
            edge_density = features.edge_density,
            violations = all_violations.len(),
            "Perceptual features extracted"
        );

        match self.config.failure_mode {
            FailureMode::Block if has_errors => {
                ValidationOutcome::fail(features.edge_density, all_violations)
            }
            FailureMode::Warn if has_errors => {
                warn!(violations = all_violations.len(), "Perceptual gate failed; passing in warn mode");
                ValidationOutcome::pass(features.edge_density, all_violations)
            }
            FailureMode::Log if has_errors => {
                for v in all_violations.iter().filter(|v| v.severity == ViolationSeverity::Error) {
                    info!(
                        rule = %v.rule,
                        expected = v.expected.as_deref().unwrap_or(""),
                        actual = v.actual.as_deref().unwrap_or(""),
                        "Perceptual rule failed; recorded only"
                    );
                }
                ValidationOutcome::pass(features.edge_density, all_violations)
            }
            FailureMode::Block | FailureMode::Warn | FailureMode::Log => {
                ValidationOutcome::pass(features.edge_density, all_violations)
            }
        }
    }
}

impl Default for PerceptualValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

/// Rec. 601 luma on the 0-255 scale.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn luminance_plane(image: &DecodedImage) -> Vec<f32> {
    image.pixels.pixels().map(|p| luminance(p[0], p[1], p[2])).collect()
}

/// Box-average resample. Each target cell averages every source pixel whose
/// index falls in its footprint; upsampling degenerates to nearest-neighbor.
pub fn area_downsample(src: &[f32], width: u32, height: u32, out_w: u32, out_h: u32) -> Vec<f32> {
    let (w, h) = (width as usize, height as usize);
    let (ow, oh) = (out_w as usize, out_h as usize);
    let mut out = vec![0.0f32; ow * oh];
    if w == 0 || h == 0 || ow == 0 || oh == 0 {
        return out;
    }

    let span = |i: usize, src_len: usize, dst_len: usize| {
        let start = i * src_len / dst_len;
        let end = ((i + 1) * src_len / dst_len).max(start + 1).min(src_len);
        (start, end)
    };

    for ty in 0..oh {
        let (y0, y1) = span(ty, h, oh);
        for tx in 0..ow {
            let (x0, x1) = span(tx, w, ow);
            let mut sum = 0.0f64;
            for y in y0..y1 {
                let row = &src[y * w..(y + 1) * w];
                sum += row[x0..x1].iter().map(|&v| v as f64).sum::<f64>();
            }
            let count = ((y1 - y0) * (x1 - x0)) as f64;
            out[ty * ow + tx] = (sum / count) as f32;
        }
    }
    out
}

/// Fraction of positions with a right and a below neighbor where either
/// step exceeds `threshold`.
pub fn edge_density(luma: &[f32], width: u32, height: u32, threshold: f32) -> f64 {
    let (w, h) = (width as usize, height as usize);
    if w < 2 || h < 2 {
        return 0.0;
    }

    let mut edges = 0usize;
    for y in 0..h - 1 {
        for x in 0..w - 1 {
            let here = luma[y * w + x];
            let right = luma[y * w + x + 1];
            let below = luma[(y + 1) * w + x];
            if (here - right).abs() > threshold || (here - below).abs() > threshold {
                edges += 1;
            }
        }
    }
    edges as f64 / ((w - 1) * (h - 1)) as f64
}
