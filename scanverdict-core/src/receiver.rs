//! Receiver - authoritative side of the transport boundary.
//!
//! Decoding, resizing and hashing are CPU-bound, so `handle` moves them onto
//! tokio's blocking pool and the accepting task stays free for new requests.

use std::sync::Arc;

use tracing::{error, warn};

use crate::media::{check_payload_size, MediaType, RawImage};
use crate::pipeline::{PipelineError, VerdictPipeline, INTERNAL_FAILURE_MESSAGE};
use crate::transport::{
    ProfileStamp, SubmissionRequest, Transport, TransportError, TransportResponse,
};

pub struct Receiver {
    pipeline: VerdictPipeline,
    profile: ProfileStamp,
}

impl Receiver {
    pub fn new(pipeline: VerdictPipeline) -> Result<Self, serde_json::Error> {
        let profile = ProfileStamp::for_profile(&pipeline.config().normalization)?;
        Ok(Self { pipeline, profile })
    }

    pub fn profile(&self) -> &ProfileStamp {
        &self.profile
    }

    /// Handle one request off the async executor.
    pub async fn handle(self: Arc<Self>, request: SubmissionRequest) -> TransportResponse {
        let receiver = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || receiver.handle_request(&request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Receiver worker panicked or was cancelled");
                TransportResponse::error(500, INTERNAL_FAILURE_MESSAGE)
            }
        }
    }

    /// Handle a raw JSON body, as an HTTP adapter would hand it over.
    pub fn handle_json(&self, body: &[u8]) -> TransportResponse {
        match serde_json::from_slice::<SubmissionRequest>(body) {
            Ok(request) => self.handle_request(&request),
            Err(e) => {
                warn!(error = %e, "Unparseable submission body");
                TransportResponse::error(400, "Missing image")
            }
        }
    }

    pub fn handle_request(&self, request: &SubmissionRequest) -> TransportResponse {
        match self.accept(request) {
            Ok(raw) => match self.pipeline.process(raw) {
                Ok(report) => TransportResponse::ok(report.verdict),
                Err(failure) => error_response(&failure.error),
            },
            Err(response) => response,
        }
    }

    /// Everything that can be refused before the pipeline runs.
    fn accept(&self, request: &SubmissionRequest) -> Result<RawImage, TransportResponse> {
        let ceiling = self.pipeline.config().limits.receiver_max_bytes;
        if let Some(hint) = request.decoded_len_hint() {
            if hint > ceiling.saturating_add(2) {
                warn!(size = hint, ceiling, "Encoded payload over receiver ceiling");
                return Err(error_response(&PipelineError::Size { size: hint, ceiling }));
            }
        }

        let bytes = match request.image_bytes() {
            None => return Err(TransportResponse::error(400, "Missing image")),
            Some(Err(e)) => {
                warn!(error = %e, "Image payload is not valid base64");
                return Err(TransportResponse::error(400, "Invalid image encoding"));
            }
            Some(Ok(bytes)) => bytes,
        };

        if let Err((size, ceiling)) = check_payload_size(bytes.len(), ceiling) {
            warn!(size, ceiling, "Payload over receiver ceiling");
            return Err(error_response(&PipelineError::Size { size, ceiling }));
        }

        if let Some(stamp) = &request.profile {
            self.check_profile(stamp).map_err(|e| error_response(&e))?;
        }

        let declared = match request.media_type.as_deref() {
            None => None,
            Some(s) => Some(
                s.parse::<MediaType>()
                    .map_err(|e| error_response(&PipelineError::UnsupportedMediaType(e.0)))?,
            ),
        };

        Ok(RawImage::new(bytes, declared))
    }

    /// Submitter and receiver must normalize with identical parameters, or the
    /// fingerprint diverges from what the user previewed.
    fn check_profile(&self, stamp: &ProfileStamp) -> Result<(), PipelineError> {
        if stamp.digest == self.profile.digest {
            return Ok(());
        }
        let detail = match (
            semver::Version::parse(&stamp.version),
            semver::Version::parse(&self.profile.version),
        ) {
            (Ok(theirs), Ok(ours)) if theirs == ours => format!(
                "profile {} parameters differ from receiver (digest {} vs {})",
                theirs, stamp.digest, self.profile.digest
            ),
            (Ok(theirs), Ok(ours)) => format!("submitter profile {} but receiver runs {}", theirs, ours),
            _ => format!("unparseable submitter profile version {:?}", stamp.version),
        };
        warn!(%detail, "Normalization profile drift");
        Err(PipelineError::ProfileDrift(detail))
    }
}

fn error_response(error: &PipelineError) -> TransportResponse {
    TransportResponse::error(error.status_code(), error.user_message())
}

/// In-process transport: serializes the request exactly as it would cross
/// the wire and hands it to a receiver.
pub struct LocalTransport {
    receiver: Arc<Receiver>,
}

impl LocalTransport {
    pub fn new(receiver: Arc<Receiver>) -> Self {
        Self { receiver }
    }
}

impl Transport for LocalTransport {
    fn send(&self, request: &SubmissionRequest) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_vec(request).map_err(|e| TransportError::Connection(e.to_string()))?;
        let response = self.receiver.handle_json(&body);
        let encoded = response
            .to_json()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        TransportResponse::from_json(response.status, encoded.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizationProfile, PipelineConfig};
    use crate::transport::SubmissionResponse;
    use base64::Engine;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn receiver() -> Receiver {
        Receiver::new(VerdictPipeline::default()).unwrap()
    }

    fn striped_png() -> Vec<u8> {
        let img = ImageBuffer::from_fn(200, 150, |x, _| {
            if (x / 10) % 2 == 0 { Rgb([250u8, 250, 250]) } else { Rgb([5u8, 5, 5]) }
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn error_text(response: &TransportResponse) -> &str {
        match &response.body {
            SubmissionResponse::Error { error } => error,
            other => panic!("expected error body, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_image_is_400() {
        let response = receiver().handle_json(b"{}");
        assert_eq!(response.status, 400);
        assert_eq!(error_text(&response), "Missing image");
    }

    #[test]
    fn test_bare_base64_accepted() {
        let request = SubmissionRequest {
            image: Some(base64::engine::general_purpose::STANDARD.encode(striped_png())),
            ..Default::default()
        };
        let response = receiver().handle_request(&request);
        assert_eq!(response.status, 200, "{response:?}");
        assert!(matches!(response.body, SubmissionResponse::Verdict(_)));
    }

    #[test]
    fn test_oversized_payload_is_413() {
        let mut config = PipelineConfig::default();
        config.limits.receiver_max_bytes = 64;
        let receiver = Receiver::new(VerdictPipeline::new(config)).unwrap();
        let request = SubmissionRequest::new(&striped_png(), MediaType::Png, None);
        let response = receiver.handle_request(&request);
        assert_eq!(response.status, 413);
        assert!(error_text(&response).starts_with("Image too large"));
    }

    #[test]
    fn test_oversized_body_refused_before_base64_decode() {
        let mut config = PipelineConfig::default();
        config.limits.receiver_max_bytes = 64;
        let receiver = Receiver::new(VerdictPipeline::new(config)).unwrap();

        // Not valid base64: a decode-first receiver would answer 400.
        let request = SubmissionRequest { image: Some("@".repeat(4000)), ..Default::default() };
        let response = receiver.handle_request(&request);
        assert_eq!(response.status, 413);
    }

    #[test]
    fn test_payload_at_ceiling_passes_encoded_gate() {
        let png = striped_png();
        let mut config = PipelineConfig::default();
        config.limits.receiver_max_bytes = png.len();
        let receiver = Receiver::new(VerdictPipeline::new(config)).unwrap();
        let request = SubmissionRequest::new(&png, MediaType::Png, None);
        assert_eq!(receiver.handle_request(&request).status, 200);
    }

    #[test]
    fn test_unsupported_declared_type_is_415() {
        let request = SubmissionRequest {
            media_type: Some("image/gif".into()),
            ..SubmissionRequest::new(&striped_png(), MediaType::Png, None)
        };
        assert_eq!(receiver().handle_request(&request).status, 415);
    }

    #[test]
    fn test_profile_drift_is_rejected() {
        let drifted = NormalizationProfile { max_side: 800, ..NormalizationProfile::default() };
        let stamp = ProfileStamp::for_profile(&drifted).unwrap();
        let request = SubmissionRequest::new(&striped_png(), MediaType::Png, Some(stamp));
        let response = receiver().handle_request(&request);
        assert_eq!(response.status, 409);
    }

    #[test]
    fn test_matching_profile_passes() {
        let receiver = receiver();
        let stamp = receiver.profile().clone();
        let request = SubmissionRequest::new(&striped_png(), MediaType::Png, Some(stamp));
        assert_eq!(receiver.handle_request(&request).status, 200);
    }

    #[test]
    fn test_garbage_image_is_400_with_generic_message() {
        let request = SubmissionRequest::new(&[0u8; 50], MediaType::Jpeg, None);
        let response = receiver().handle_request(&request);
        assert_eq!(response.status, 400);
        assert_eq!(error_text(&response), crate::pipeline::DECODE_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_async_handle_runs_on_blocking_pool() {
        let receiver = Arc::new(receiver());
        let request = SubmissionRequest::new(&striped_png(), MediaType::Png, None);
        let (a, b) = tokio::join!(
            Arc::clone(&receiver).handle(request.clone()),
            Arc::clone(&receiver).handle(request),
        );
        assert_eq!(a, b);
        assert!(a.is_success());
    }

    #[test]
    fn test_local_transport_roundtrips_wire_format() {
        let transport = LocalTransport::new(Arc::new(receiver()));
        let request = SubmissionRequest::new(&striped_png(), MediaType::Png, None);
        let response = transport.send(&request).unwrap();
        assert!(response.is_success());
    }
}
