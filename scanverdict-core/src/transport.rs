//! Transport Boundary - wire contract between submitter and receiver.
//!
//! Request: `{"image": "<base64 or data URL>", "mediaType": "...", "profile": {...}}`
//! Response: `{"label", "confidence"}` on success, `{"error"}` otherwise.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibrate::Verdict;
use crate::config::NormalizationProfile;
use crate::media::MediaType;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Which normalization profile produced the transported bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStamp {
    pub version: String,
    pub digest: String,
}

impl ProfileStamp {
    pub fn for_profile(profile: &NormalizationProfile) -> Result<Self, serde_json::Error> {
        Ok(Self {
            version: profile.version.clone(),
            digest: profile.digest()?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileStamp>,
}

impl SubmissionRequest {
    /// Wrap image bytes as a data URL.
    pub fn new(bytes: &[u8], media_type: MediaType, profile: Option<ProfileStamp>) -> Self {
        let image = format!("data:{};base64,{}", media_type.as_mime(), STANDARD.encode(bytes));
        Self {
            image: Some(image),
            media_type: Some(media_type.as_mime().to_string()),
            profile,
        }
    }

    /// Upper bound on the decoded payload size, read off the base64 text
    /// without decoding it. Overestimates by at most two bytes of padding.
    pub fn decoded_len_hint(&self) -> Option<usize> {
        let payload = self.image.as_deref()?.trim();
        if payload.is_empty() {
            return None;
        }
        Some(extract_base64(payload).len() / 4 * 3)
    }

    /// Decoded image bytes. `None` when the field is absent or blank.
    pub fn image_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        let payload = self.image.as_deref()?.trim();
        if payload.is_empty() {
            return None;
        }
        Some(STANDARD.decode(extract_base64(payload)))
    }
}

/// Accept `data:image/jpeg;base64,....` or plain base64.
pub fn extract_base64(payload: &str) -> &str {
    match payload.find(',') {
        Some(comma) => &payload[comma + 1..],
        None => payload,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmissionResponse {
    Verdict(Verdict),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: SubmissionResponse,
}

impl TransportResponse {
    pub fn ok(verdict: Verdict) -> Self {
        Self { status: 200, body: SubmissionResponse::Verdict(verdict) }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: SubmissionResponse::Error { error: message.into() } }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn from_json(status: u16, body: &[u8]) -> Result<Self, TransportError> {
        let body = serde_json::from_slice(body)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(Self { status, body })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.body)
    }
}

/// The only network dependency the submitter has.
pub trait Transport: Send + Sync {
    fn send(&self, request: &SubmissionRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Label;

    #[test]
    fn test_extract_base64_variants() {
        assert_eq!(extract_base64("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(extract_base64("QUJD"), "QUJD");
    }

    #[test]
    fn test_request_carries_data_url() {
        let req = SubmissionRequest::new(b"ABC", MediaType::Jpeg, None);
        assert_eq!(req.image.as_deref(), Some("data:image/jpeg;base64,QUJD"));
        assert_eq!(req.image_bytes().unwrap().unwrap(), b"ABC".to_vec());
    }

    #[test]
    fn test_missing_or_blank_image() {
        assert!(SubmissionRequest::default().image_bytes().is_none());
        let blank = SubmissionRequest { image: Some("  ".into()), ..Default::default() };
        assert!(blank.image_bytes().is_none());
    }

    #[test]
    fn test_decoded_len_hint_bounds_real_size() {
        for n in [0usize, 1, 2, 3, 4, 100, 101, 102] {
            let req = SubmissionRequest::new(&vec![7u8; n], MediaType::Png, None);
            let hint = req.decoded_len_hint().unwrap();
            assert!(hint >= n && hint <= n + 2, "n={n} hint={hint}");
        }
        assert!(SubmissionRequest::default().decoded_len_hint().is_none());
    }

    #[test]
    fn test_invalid_base64_surfaces() {
        let req = SubmissionRequest { image: Some("data:image/png;base64,@@@".into()), ..Default::default() };
        assert!(req.image_bytes().unwrap().is_err());
    }

    #[test]
    fn test_request_json_uses_camel_case() {
        let req = SubmissionRequest::new(b"x", MediaType::Png, None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mediaType"], "image/png");
        assert!(json.get("profile").is_none());
    }

    #[test]
    fn test_response_bodies_parse_both_shapes() {
        let ok = TransportResponse::from_json(200, br#"{"label":"boy","confidence":0.8}"#).unwrap();
        assert_eq!(ok.body, SubmissionResponse::Verdict(Verdict { label: Label::Boy, confidence: 0.8 }));

        let err = TransportResponse::from_json(413, br#"{"error":"Image too large"}"#).unwrap();
        assert_eq!(err.body, SubmissionResponse::Error { error: "Image too large".into() });
        assert!(!err.is_success());
    }

    #[test]
    fn test_malformed_response() {
        assert!(matches!(
            TransportResponse::from_json(200, b"<html>"),
            Err(TransportError::Malformed(_))
        ));
    }
}
