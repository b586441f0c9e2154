//! Submitter - the uploading side.
//!
//! Gates type and size, decodes, runs the advisory perceptual check, then
//! normalizes so fewer bytes cross the wire. Nothing here is trusted by the
//! receiver; it only saves the user a round trip on obviously bad uploads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calibrate::Verdict;
use crate::config::{PipelineConfig, MIB};
use crate::decode::decode;
use crate::media::{MediaType, RawImage, UploadFile};
use crate::hashing::Fingerprint;
use crate::normalize::{CanonicalImage, CanonicalNormalizer};
use crate::pipeline::{ErrorKind, PipelineError, UPLOAD_GUIDANCE};
use crate::transport::{ProfileStamp, SubmissionRequest, SubmissionResponse, Transport};
use crate::validation::PerceptualValidator;

/// Shared flag the caller flips to abandon an in-flight submission.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a submission produced no verdict, in words a user can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{reason}")]
pub struct Rejection {
    pub kind: ErrorKind,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }

    /// Map a receiver status back to an error class.
    pub fn from_status(status: u16, message: String) -> Self {
        let kind = match status {
            413 => ErrorKind::SizeRejection,
            422 => ErrorKind::ValidationRejection,
            400 | 415 => ErrorKind::DecodeError,
            502..=504 => ErrorKind::TransportError,
            _ => ErrorKind::InternalError,
        };
        let reason = match kind {
            ErrorKind::SizeRejection | ErrorKind::ValidationRejection => with_guidance(&message),
            _ => message,
        };
        Self { kind, reason }
    }
}

impl From<&PipelineError> for Rejection {
    fn from(error: &PipelineError) -> Self {
        let message = error.user_message();
        let reason = match error {
            PipelineError::Size { .. }
            | PipelineError::UnsupportedMediaType(_)
            | PipelineError::Validation { .. } => with_guidance(&message),
            _ => message,
        };
        Self { kind: error.kind(), reason }
    }
}

fn with_guidance(message: &str) -> String {
    format!("{} {}", message, UPLOAD_GUIDANCE)
}

/// Canonical form of an upload as it will cross the wire.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub canonical: CanonicalImage,
}

pub struct Submitter {
    config: PipelineConfig,
    validator: PerceptualValidator,
    normalizer: CanonicalNormalizer,
    profile: ProfileStamp,
    transport: Box<dyn Transport>,
}

impl Submitter {
    pub fn new(config: PipelineConfig, transport: Box<dyn Transport>) -> Result<Self, serde_json::Error> {
        let profile = ProfileStamp::for_profile(&config.normalization)?;
        Ok(Self {
            validator: PerceptualValidator::new(config.validator.clone()),
            normalizer: CanonicalNormalizer::new(config.normalization.clone()),
            profile,
            transport,
            config,
        })
    }

    pub fn submit(&self, file: UploadFile, cancel: &CancelToken) -> Result<Verdict, Rejection> {
        match self.run(file, cancel) {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(rejection)) => {
                warn!(kind = ?rejection.kind, reason = %rejection.reason, "Receiver refused upload");
                Err(rejection)
            }
            Err(e) => {
                let rejection = Rejection::from(&e);
                warn!(kind = ?rejection.kind, error = %e, "Upload not submitted");
                Err(rejection)
            }
        }
    }

    /// Gate, validate and normalize without sending anything.
    ///
    /// Canonical bytes pass through the receiver unchanged, so the returned
    /// fingerprint is the one the receiver will classify.
    pub fn prepare(&self, file: UploadFile, cancel: &CancelToken) -> Result<PreparedUpload, Rejection> {
        self.prepare_stages(file, cancel).map_err(|e| {
            let rejection = Rejection::from(&e);
            warn!(kind = ?rejection.kind, error = %e, "Upload not prepared");
            rejection
        })
    }

    fn prepare_stages(&self, file: UploadFile, cancel: &CancelToken) -> Result<PreparedUpload, PipelineError> {
        checkpoint(cancel)?;

        let media: MediaType = file
            .media_type
            .parse()
            .map_err(|_| PipelineError::UnsupportedMediaType(file.media_type.clone()))?;

        let ceiling = self.config.limits.submitter_max_bytes;
        if file.bytes.len() > ceiling {
            return Err(PipelineError::Size { size: file.bytes.len(), ceiling });
        }

        let raw = RawImage::new(file.bytes, Some(media));
        let decoded = decode(&raw)?;
        checkpoint(cancel)?;

        let outcome = self.validator.validate(&decoded);
        if !outcome.accepted {
            return Err(PipelineError::Validation { reason: outcome.reason, score: outcome.score });
        }
        checkpoint(cancel)?;

        let canonical = self.normalizer.normalize_source(raw.bytes(), &decoded)?;
        drop(decoded);
        drop(raw);
        checkpoint(cancel)?;

        Ok(PreparedUpload {
            name: file.name,
            fingerprint: Fingerprint::of(&canonical.bytes),
            canonical,
        })
    }

    /// Outer error: the submission never got a usable answer.
    /// Inner error: the receiver answered with a refusal.
    fn run(&self, file: UploadFile, cancel: &CancelToken) -> Result<Result<Verdict, Rejection>, PipelineError> {
        let prepared = self.prepare_stages(file, cancel)?;

        debug!(
            name = %prepared.name,
            bytes = prepared.canonical.encoded_len(),
            fingerprint = %prepared.fingerprint,
            "Sending pre-normalized upload"
        );
        let request = SubmissionRequest::new(&prepared.canonical.bytes, MediaType::Jpeg, Some(self.profile.clone()));
        drop(prepared);
        let response = self
            .transport
            .send(&request)
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        checkpoint(cancel)?;

        Ok(match response.body {
            SubmissionResponse::Verdict(verdict) if response.is_success() => {
                info!(label = %verdict.label, confidence = verdict.confidence, "Verdict received");
                Ok(verdict)
            }
            SubmissionResponse::Verdict(_) => Err(Rejection::from_status(
                response.status,
                format!("Upload failed ({}).", response.status),
            )),
            SubmissionResponse::Error { error } => Err(Rejection::from_status(response.status, error)),
        })
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Human-readable ceiling, as shown next to the file picker.
pub fn max_upload_label(config: &PipelineConfig) -> String {
    format!("{}MB", config.limits.submitter_max_bytes / MIB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportResponse};
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        calls: Arc<AtomicUsize>,
        response: TransportResponse,
    }

    impl Transport for CountingTransport {
        fn send(&self, _request: &SubmissionRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct DownTransport;

    impl Transport for DownTransport {
        fn send(&self, _request: &SubmissionRequest) -> Result<TransportResponse, TransportError> {
            Err(TransportError::Connection("connection refused".into()))
        }
    }

    fn checker_png() -> Vec<u8> {
        use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
        let img = ImageBuffer::from_fn(160, 160, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 { Rgb([240u8, 240, 240]) } else { Rgb([10u8, 10, 10]) }
        });
        let mut cursor = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn counting(response: TransportResponse) -> (Submitter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport { calls: Arc::clone(&calls), response };
        (Submitter::new(PipelineConfig::default(), Box::new(transport)).unwrap(), calls)
    }

    fn ok_response() -> TransportResponse {
        TransportResponse::ok(Verdict { label: crate::classify::Label::Boy, confidence: 0.7 })
    }

    #[test]
    fn test_unsupported_type_never_reaches_transport() {
        let (submitter, calls) = counting(ok_response());
        let file = UploadFile::new("scan.gif", "image/gif", checker_png());
        let rejection = submitter.submit(file, &CancelToken::new()).unwrap_err();
        assert_eq!(rejection.kind, ErrorKind::DecodeError);
        assert!(rejection.reason.starts_with("Only JPG/PNG are supported."));
        assert!(rejection.reason.ends_with(UPLOAD_GUIDANCE));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blank_image_short_circuits_before_transport() {
        use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
        let mut cursor = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(100, 100, Rgb([200u8, 200, 200])))
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();
        let (submitter, calls) = counting(ok_response());
        let file = UploadFile::new("blank.png", "image/png", cursor.into_inner());
        let rejection = submitter.submit(file, &CancelToken::new()).unwrap_err();
        assert_eq!(rejection.kind, ErrorKind::ValidationRejection);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_token_stops_submission() {
        let (submitter, calls) = counting(ok_response());
        let cancel = CancelToken::new();
        cancel.cancel();
        let file = UploadFile::new("scan.png", "image/png", checker_png());
        let rejection = submitter.submit(file, &cancel).unwrap_err();
        assert_eq!(rejection.kind, ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_network_failure_message() {
        let submitter = Submitter::new(PipelineConfig::default(), Box::new(DownTransport)).unwrap();
        let file = UploadFile::new("scan.png", "image/png", checker_png());
        let rejection = submitter.submit(file, &CancelToken::new()).unwrap_err();
        assert_eq!(rejection.kind, ErrorKind::TransportError);
        assert_eq!(rejection.reason, "Network error. Please try again.");
    }

    #[test]
    fn test_receiver_refusal_maps_by_status() {
        let (submitter, calls) = counting(TransportResponse::error(413, "Image too large"));
        let file = UploadFile::new("scan.png", "image/png", checker_png());
        let rejection = submitter.submit(file, &CancelToken::new()).unwrap_err();
        assert_eq!(rejection.kind, ErrorKind::SizeRejection);
        assert!(rejection.reason.starts_with("Image too large"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_passes_verdict_through() {
        let (submitter, _) = counting(ok_response());
        let file = UploadFile::new("scan.png", "image/png", checker_png());
        let verdict = submitter.submit(file, &CancelToken::new()).unwrap();
        assert_eq!(verdict.confidence, 0.7);
    }

    #[test]
    fn test_max_upload_label() {
        assert_eq!(max_upload_label(&PipelineConfig::default()), "8MB");
    }
}
