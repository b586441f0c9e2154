//! Deterministic Verdict Synthesizer
//!
//! `Classifier` is the seam a real model plugs into. The shipped
//! `DigestClassifier` reads two digest bytes, so the same canonical image
//! always lands on the same answer, on any machine, after any restart.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ClassifierConfig;
use crate::hashing::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Boy,
    Girl,
    Uncertain,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Boy => "boy",
            Label::Girl => "girl",
            Label::Uncertain => "uncertain",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output before calibration policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawVerdict {
    pub label: Label,
    pub confidence: f64,
}

/// Total and pure: every fingerprint maps to exactly one result.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn classify(&self, fingerprint: &Fingerprint) -> RawVerdict;
}

/// Byte 0 parity picks the label; byte 1 picks a point in the confidence band.
#[derive(Debug, Clone)]
pub struct DigestClassifier {
    floor: f64,
    ceiling: f64,
}

impl DigestClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            floor: config.confidence_floor,
            ceiling: config.confidence_ceiling,
        }
    }
}

impl Default for DigestClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier for DigestClassifier {
    fn name(&self) -> &'static str { "digest" }

    fn classify(&self, fingerprint: &Fingerprint) -> RawVerdict {
        let digest = fingerprint.as_bytes();
        let label = if digest[0] % 2 == 0 { Label::Boy } else { Label::Girl };
        let span = self.ceiling - self.floor;
        let confidence = self.floor + (digest[1] as f64 / 255.0) * span;
        RawVerdict {
            label,
            confidence: round_to_hundredths(confidence).clamp(0.0, 1.0),
        }
    }
}

fn round_to_hundredths(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
