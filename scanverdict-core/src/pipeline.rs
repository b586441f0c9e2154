//! Verdict Pipeline - Authoritative Entry Point
//!
//! CRITICAL: only the receiver-side canonical image is fingerprinted.
//! Whatever the submitter did before transport is advisory.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::calibrate::{Calibrator, Verdict};
use crate::classify::{Classifier, DigestClassifier, RawVerdict};
use crate::config::{PipelineConfig, MIB};
use crate::decode::{decode, DecodeError};
use crate::hashing::Fingerprint;
use crate::media::RawImage;
use crate::normalize::{CanonicalImage, CanonicalNormalizer, NormalizationError};
use crate::validation::{PerceptualValidator, ValidationOutcome};
use crate::ENGINE_VERSION;

pub const DECODE_FAILURE_MESSAGE: &str = "Please upload a valid JPG or PNG image.";
pub const INTERNAL_FAILURE_MESSAGE: &str = "Failed to process image";
pub const UPLOAD_GUIDANCE: &str = "Please upload a clear grayscale ultrasound side profile.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image too large: {size} bytes exceeds {ceiling} byte limit")]
    Size { size: usize, ceiling: usize },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Validation failed: {reason}")]
    Validation { reason: String, score: f64 },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Normalization profile mismatch: {0}")]
    ProfileDrift(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Submission cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<NormalizationError> for PipelineError {
    fn from(err: NormalizationError) -> Self {
        match err {
            NormalizationError::Undecodable(e) => PipelineError::Decode(e),
            NormalizationError::Encode(msg) => PipelineError::Internal(msg),
        }
    }
}

/// Coarse classes the presentation layer branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationRejection,
    SizeRejection,
    DecodeError,
    TransportError,
    InternalError,
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Size { .. } => ErrorKind::SizeRejection,
            PipelineError::Validation { .. } => ErrorKind::ValidationRejection,
            PipelineError::UnsupportedMediaType(_) | PipelineError::Decode(_) => ErrorKind::DecodeError,
            PipelineError::Transport(_) => ErrorKind::TransportError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::ProfileDrift(_)
            | PipelineError::Internal(_)
            | PipelineError::SerializationError(_) => ErrorKind::InternalError,
        }
    }

    /// Status the receiver answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Size { .. } => 413,
            PipelineError::UnsupportedMediaType(_) => 415,
            PipelineError::Validation { .. } => 422,
            PipelineError::Decode(_) => 400,
            PipelineError::ProfileDrift(_) => 409,
            PipelineError::Transport(_) => 502,
            PipelineError::Cancelled => 499,
            PipelineError::Internal(_) | PipelineError::SerializationError(_) => 500,
        }
    }

    /// Message safe to show an end user. Internal detail never leaks here.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Size { ceiling, .. } => {
                format!("Image too large. Max file size is {}MB.", ceiling / MIB)
            }
            PipelineError::UnsupportedMediaType(_) => "Only JPG/PNG are supported.".to_string(),
            PipelineError::Validation { reason, .. } => reason.clone(),
            PipelineError::Decode(_) => DECODE_FAILURE_MESSAGE.to_string(),
            PipelineError::ProfileDrift(_) => "Normalization profile mismatch".to_string(),
            PipelineError::Transport(_) => "Network error. Please try again.".to_string(),
            PipelineError::Cancelled => "Upload cancelled.".to_string(),
            PipelineError::Internal(_) | PipelineError::SerializationError(_) => {
                INTERNAL_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

/// Per-submission state machine. `Rejected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Decoded,
    Rejected,
    Validated,
    Normalized,
    Fingerprinted,
    Classified,
    Calibrated,
    Delivered,
}

/// A failed submission and the last stage it reached.
#[derive(Debug, Error)]
#[error("{error} (stage: {stage:?})")]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    fn at(stage: PipelineStage, error: impl Into<PipelineError>) -> Self {
        Self { stage, error: error.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSummary {
    pub width: u32,
    pub height: u32,
    pub encoded_bytes: usize,
    pub profile_version: String,
}

impl From<&CanonicalImage> for CanonicalSummary {
    fn from(c: &CanonicalImage) -> Self {
        Self {
            width: c.width(),
            height: c.height(),
            encoded_bytes: c.encoded_len(),
            profile_version: c.profile_version.clone(),
        }
    }
}

/// Everything the receiver knows about one delivered verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictReport {
    pub submission_id: String,
    pub processed_at: DateTime<Utc>,
    pub engine_version: String,
    pub classifier: String,
    pub fingerprint: Fingerprint,
    pub canonical: CanonicalSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    pub raw: RawVerdict,
    pub verdict: Verdict,
    pub stages: Vec<PipelineStage>,
}

struct Completed {
    canonical: CanonicalImage,
    fingerprint: Fingerprint,
    validation: Option<ValidationOutcome>,
    raw_verdict: RawVerdict,
    verdict: Verdict,
    stages: Vec<PipelineStage>,
}

/// The receiver's pipeline. Stateless across submissions; share freely.
pub struct VerdictPipeline {
    config: PipelineConfig,
    validator: PerceptualValidator,
    normalizer: CanonicalNormalizer,
    classifier: Box<dyn Classifier>,
    calibrator: Calibrator,
}

impl VerdictPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            validator: PerceptualValidator::new(config.validator.clone()),
            normalizer: CanonicalNormalizer::new(config.normalization.clone()),
            classifier: Box::new(DigestClassifier::new(&config.classifier)),
            calibrator: Calibrator::new(&config.calibration),
            config,
        }
    }

    /// Swap in a different classifier; nothing else changes.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &CanonicalNormalizer {
        &self.normalizer
    }

    /// Run only the perceptual gate against raw bytes.
    pub fn validate_image(&self, raw: &RawImage) -> Result<ValidationOutcome, PipelineError> {
        if let Err((size, ceiling)) = raw.check_size(self.config.limits.receiver_max_bytes) {
            return Err(PipelineError::Size { size, ceiling });
        }
        let decoded = decode(raw)?;
        Ok(self.validator.validate(&decoded))
    }

    /// Process one submission end to end.
    ///
    /// The size gate runs before any decode attempt. No retries.
    pub fn process(&self, raw: RawImage) -> Result<VerdictReport, PipelineFailure> {
        let submission_id = Uuid::new_v4().to_string();
        let span = info_span!("submission", id = %submission_id);
        let _enter = span.enter();

        let result = self.run_stages(&raw);
        drop(raw);

        match result {
            Ok(done) => {
                info!(
                    label = %done.verdict.label,
                    confidence = done.verdict.confidence,
                    fingerprint = %done.fingerprint,
                    "Verdict delivered"
                );
                Ok(VerdictReport {
                    submission_id,
                    processed_at: Utc::now(),
                    engine_version: ENGINE_VERSION.to_string(),
                    classifier: self.classifier.name().to_string(),
                    fingerprint: done.fingerprint,
                    canonical: CanonicalSummary::from(&done.canonical),
                    validation: done.validation,
                    raw: done.raw_verdict,
                    verdict: done.verdict,
                    stages: done.stages,
                })
            }
            Err(failure) => {
                match failure.error.kind() {
                    ErrorKind::InternalError => {
                        error!(stage = ?failure.stage, error = %failure.error, "Submission failed")
                    }
                    _ => warn!(stage = ?failure.stage, error = %failure.error, "Submission rejected"),
                }
                Err(failure)
            }
        }
    }

    fn run_stages(&self, raw: &RawImage) -> Result<Completed, PipelineFailure> {
        use PipelineStage::*;
        let mut stages = vec![Received];

        if let Err((size, ceiling)) = raw.check_size(self.config.limits.receiver_max_bytes) {
            return Err(PipelineFailure::at(Received, PipelineError::Size { size, ceiling }));
        }

        let decoded = decode(raw).map_err(|e| PipelineFailure::at(Received, e))?;
        stages.push(Decoded);

        let validation = if self.config.validator.receiver_recheck {
            let outcome = self.validator.validate(&decoded);
            if !outcome.accepted {
                return Err(PipelineFailure::at(
                    Rejected,
                    PipelineError::Validation { reason: outcome.reason, score: outcome.score },
                ));
            }
            Some(outcome)
        } else {
            None
        };
        stages.push(Validated);

        let canonical = self
            .normalizer
            .normalize_source(raw.bytes(), &decoded)
            .map_err(|e| PipelineFailure::at(Validated, e))?;
        drop(decoded);
        stages.push(Normalized);

        let fingerprint = Fingerprint::of(&canonical.bytes);
        stages.push(Fingerprinted);
        debug!(fingerprint = %fingerprint, "Canonical image fingerprinted");

        let raw_verdict = self.classifier.classify(&fingerprint);
        stages.push(Classified);

        let verdict = self.calibrator.calibrate(raw_verdict);
        stages.push(Calibrated);
        stages.push(Delivered);

        Ok(Completed { canonical, fingerprint, validation, raw_verdict, verdict, stages })
    }
}

impl Default for VerdictPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Label;
    use crate::media::MediaType;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(img: RgbImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn checkerboard_png() -> Vec<u8> {
        png(ImageBuffer::from_fn(320, 240, |x, y| {
            if (x / 20 + y / 20) % 2 == 0 { Rgb([230, 230, 230]) } else { Rgb([20, 20, 20]) }
        }))
    }

    struct AlwaysGirl;

    impl Classifier for AlwaysGirl {
        fn name(&self) -> &'static str { "always-girl" }
        fn classify(&self, _fingerprint: &Fingerprint) -> RawVerdict {
            RawVerdict { label: Label::Girl, confidence: 0.5 }
        }
    }

    #[test]
    fn test_stages_advance_linearly() {
        let report = VerdictPipeline::default()
            .process(RawImage::new(checkerboard_png(), Some(MediaType::Png)))
            .unwrap();
        use PipelineStage::*;
        assert_eq!(
            report.stages,
            vec![Received, Decoded, Validated, Normalized, Fingerprinted, Classified, Calibrated, Delivered]
        );
        assert_eq!(report.classifier, "digest");
        assert!(report.validation.unwrap().accepted);
    }

    #[test]
    fn test_blank_upload_is_rejected_terminally() {
        let blank = png(ImageBuffer::from_pixel(200, 200, Rgb([90, 90, 90])));
        let failure = VerdictPipeline::default()
            .process(RawImage::new(blank, Some(MediaType::Png)))
            .unwrap_err();
        assert_eq!(failure.stage, PipelineStage::Rejected);
        assert_eq!(failure.error.kind(), ErrorKind::ValidationRejection);
        assert_eq!(failure.error.status_code(), 422);
    }

    #[test]
    fn test_recheck_can_be_disabled() {
        let mut config = PipelineConfig::default();
        config.validator.receiver_recheck = false;
        let blank = png(ImageBuffer::from_pixel(200, 200, Rgb([90, 90, 90])));
        let report = VerdictPipeline::new(config)
            .process(RawImage::new(blank, None))
            .unwrap();
        assert!(report.validation.is_none());
    }

    #[test]
    fn test_classifier_is_swappable() {
        let pipeline = VerdictPipeline::default().with_classifier(Box::new(AlwaysGirl));
        let report = pipeline.process(RawImage::new(checkerboard_png(), None)).unwrap();
        assert_eq!(report.classifier, "always-girl");
        assert_eq!(report.raw.label, Label::Girl);
        // 0.5 sits below the default 0.55 threshold
        assert_eq!(report.verdict.label, Label::Uncertain);
        assert_eq!(report.verdict.confidence, 0.5);
    }

    #[test]
    fn test_garbage_fails_before_decoded() {
        let failure = VerdictPipeline::default()
            .process(RawImage::new(vec![0xAB; 50], Some(MediaType::Jpeg)))
            .unwrap_err();
        assert_eq!(failure.stage, PipelineStage::Received);
        assert_eq!(failure.error.kind(), ErrorKind::DecodeError);
        assert_eq!(failure.error.user_message(), DECODE_FAILURE_MESSAGE);
    }

    #[test]
    fn test_size_error_message_names_ceiling() {
        let err = PipelineError::Size { size: 11 * MIB, ceiling: 10 * MIB };
        assert_eq!(err.user_message(), "Image too large. Max file size is 10MB.");
        assert_eq!(err.status_code(), 413);
    }

    #[test]
    fn test_internal_message_does_not_leak_detail() {
        let err = PipelineError::Internal("encoder exploded at 0xdeadbeef".into());
        assert_eq!(err.user_message(), INTERNAL_FAILURE_MESSAGE);
    }
}
