//! Raw upload bytes and the payload-size gate.
//!
//! The gate runs before any decode attempt so worst-case memory stays bounded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl MediaType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }

    /// Guess from a file extension, as a browser would when filling `File.type`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported media type: {0}")]
pub struct UnsupportedMediaType(pub String);

impl FromStr for MediaType {
    type Err = UnsupportedMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(MediaType::Jpeg),
            "image/png" => Ok(MediaType::Png),
            other => Err(UnsupportedMediaType(other.to_string())),
        }
    }
}

/// Upload bytes plus the media type the sender claims they are.
#[derive(Debug, Clone)]
pub struct RawImage {
    bytes: Vec<u8>,
    declared: Option<MediaType>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, declared: Option<MediaType>) -> Self {
        Self { bytes, declared }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn declared(&self) -> Option<MediaType> {
        self.declared
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `Err((len, ceiling))` when the payload is over the ceiling.
    pub fn check_size(&self, ceiling: usize) -> Result<(), (usize, usize)> {
        check_payload_size(self.len(), ceiling)
    }
}

/// Payload of exactly `ceiling` bytes is accepted.
pub fn check_payload_size(len: usize, ceiling: usize) -> Result<(), (usize, usize)> {
    if len > ceiling {
        Err((len, ceiling))
    } else {
        Ok(())
    }
}

/// Browser-side view of a picked file: bytes plus the type string it reported.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let media_type = MediaType::from_path(path)
            .map(|m| m.as_mime().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, media_type, bytes })
    }
}
