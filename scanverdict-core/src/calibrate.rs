//! Confidence Calibrator - policy over classifier output.

use serde::{Deserialize, Serialize};

use crate::classify::{Label, RawVerdict};
use crate::config::CalibrationConfig;

/// Final answer handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Calibrator {
    uncertainty_threshold: f64,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self { uncertainty_threshold: config.uncertainty_threshold }
    }

    /// Strictly below the threshold demotes to `Uncertain`; the number is kept
    /// for display either way.
    pub fn calibrate(&self, raw: RawVerdict) -> Verdict {
        let label = if raw.confidence < self.uncertainty_threshold {
            Label::Uncertain
        } else {
            raw.label
        };
        Verdict { label, confidence: raw.confidence }
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(&CalibrationConfig::default())
    }
}
