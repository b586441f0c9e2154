//! Canonical Normalizer
//!
//! Produces the single representation both sides agree on. Step order is
//! part of the profile contract: orient, bound, grayscale, stretch, encode.
//! Changing it means bumping `NormalizationProfile::version`.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GrayImage, Luma, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NormalizationProfile;
use crate::decode::{decode, DecodeError, DecodedImage};
use crate::media::{MediaType, RawImage};
use crate::validation::luminance;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("Cannot normalize undecodable input: {0}")]
    Undecodable(#[from] DecodeError),

    #[error("Canonical encoding failed: {0}")]
    Encode(String),
}

/// Grayscale, bounded, contrast-stretched image plus its encoded bytes.
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    pub pixels: GrayImage,
    pub bytes: Vec<u8>,
    pub profile_version: String,
}

impl CanonicalImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn encoded_len(&self) -> usize {
        self.bytes.len()
    }
}

/// JPEG comment prefix that tags bytes as canonical output of one profile.
pub const CANONICAL_MARKER_PREFIX: &str = "scanverdict-canonical";

#[derive(Debug, Clone)]
pub struct CanonicalNormalizer {
    profile: NormalizationProfile,
    /// `None` only if the profile could not be digested; then nothing is
    /// ever treated as already canonical.
    marker: Option<Vec<u8>>,
}

impl Default for CanonicalNormalizer {
    fn default() -> Self {
        Self::new(NormalizationProfile::default())
    }
}

impl CanonicalNormalizer {
    pub fn new(profile: NormalizationProfile) -> Self {
        let marker = match profile.digest() {
            Ok(digest) => Some(canonical_marker(&profile.version, &digest)),
            Err(e) => {
                warn!(error = %e, "Profile digest unavailable; canonical pass-through disabled");
                None
            }
        };
        Self { profile, marker }
    }

    pub fn profile(&self) -> &NormalizationProfile {
        &self.profile
    }

    /// Decode then normalize. The only path that can fail on input content.
    pub fn normalize_raw(&self, raw: &RawImage) -> Result<CanonicalImage, NormalizationError> {
        let decoded = decode(raw)?;
        self.normalize_source(raw.bytes(), &decoded)
    }

    /// Normalize `image`, which was decoded from `source`.
    ///
    /// Output of this profile is a fixed point: when `source` already is
    /// canonical bytes for this profile they are returned untouched, so
    /// `N(N(x)) == N(x)` byte for byte.
    pub fn normalize_source(
        &self,
        source: &[u8],
        image: &DecodedImage,
    ) -> Result<CanonicalImage, NormalizationError> {
        match self.pass_through(source, image) {
            Some(canonical) => Ok(canonical),
            None => self.normalize(image),
        }
    }

    fn pass_through(&self, source: &[u8], image: &DecodedImage) -> Option<CanonicalImage> {
        let marker = self.marker.as_deref()?;
        if image.format != MediaType::Jpeg || image.orientation != 1 {
            return None;
        }
        if image.width().max(image.height()) > self.profile.max_side {
            return None;
        }
        if read_jpeg_comment(source)? != marker {
            return None;
        }
        let pixels = exact_gray(&image.pixels)?;

        debug!(bytes = source.len(), profile = %self.profile.version, "Input already canonical");
        Some(CanonicalImage {
            pixels,
            bytes: source.to_vec(),
            profile_version: self.profile.version.clone(),
        })
    }

    /// `image` is already upright (the decoder applied EXIF), so step 1 is
    /// satisfied by construction.
    pub fn normalize(&self, image: &DecodedImage) -> Result<CanonicalImage, NormalizationError> {
        let bounded = bound_longer_side(&image.pixels, self.profile.max_side);
        let mut gray = to_luma(&bounded);
        stretch_contrast(&mut gray);
        let mut bytes = encode_jpeg(&gray, self.profile.jpeg_quality)?;
        if let Some(marker) = &self.marker {
            bytes = insert_jpeg_comment(&bytes, marker);
        }

        debug!(
            from = format!("{}x{}", image.width(), image.height()),
            to = format!("{}x{}", gray.width(), gray.height()),
            bytes = bytes.len(),
            profile = %self.profile.version,
            "Normalized to canonical form"
        );

        Ok(CanonicalImage {
            pixels: gray,
            bytes,
            profile_version: self.profile.version.clone(),
        })
    }
}

/// Dimensions with the longer side at most `max_side`, aspect preserved.
/// Never upscales; never returns a zero dimension.
pub fn compute_fit_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    let longer = width.max(height);
    if longer <= max_side {
        return (width, height);
    }

    let scale = max_side as f64 / longer as f64;
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, max_side);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, max_side);
    (new_w, new_h)
}

fn bound_longer_side(img: &RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (nw, nh) = compute_fit_dimensions(w, h, max_side);
    if (nw, nh) == (w, h) {
        return img.clone();
    }
    image::imageops::resize(img, nw, nh, FilterType::Triangle)
}

/// Single-channel luminance with the same weights the validator uses.
pub fn to_luma(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        Luma([luminance(p[0], p[1], p[2]).round().clamp(0.0, 255.0) as u8])
    })
}

/// Global min/max stretch onto 0-255. Uniform images are left as they are.
pub fn stretch_contrast(img: &mut GrayImage) {
    let (lo, hi) = img.pixels().fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo || (lo == 0 && hi == u8::MAX) {
        return;
    }

    let range = (hi - lo) as u32;
    for p in img.pixels_mut() {
        let offset = (p[0] - lo) as u32;
        p[0] = ((offset * 255 + range / 2) / range) as u8;
    }
}

pub fn encode_jpeg(img: &GrayImage, quality: u8) -> Result<Vec<u8>, NormalizationError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode_image(img)
        .map_err(|e| NormalizationError::Encode(e.to_string()))?;
    Ok(bytes)
}

fn canonical_marker(version: &str, digest: &str) -> Vec<u8> {
    format!("{} {} {}", CANONICAL_MARKER_PREFIX, version, digest).into_bytes()
}

/// Single-channel copy of `img` if every pixel has equal channels.
fn exact_gray(img: &RgbImage) -> Option<GrayImage> {
    if img.pixels().any(|p| p[0] != p[1] || p[1] != p[2]) {
        return None;
    }
    Some(GrayImage::from_fn(img.width(), img.height(), |x, y| Luma([img.get_pixel(x, y)[0]])))
}

/// Insert a COM segment after SOI and any APP0 header.
pub fn insert_jpeg_comment(jpeg: &[u8], comment: &[u8]) -> Vec<u8> {
    if jpeg.len() < 4 || jpeg[..2] != [0xFF, 0xD8] || comment.len() > u16::MAX as usize - 2 {
        return jpeg.to_vec();
    }

    let mut insert_at = 2;
    if jpeg[2] == 0xFF && jpeg[3] == 0xE0 && jpeg.len() >= 6 {
        let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        if 2 + 2 + app0_len <= jpeg.len() {
            insert_at += 2 + app0_len;
        }
    }

    let mut out = Vec::with_capacity(jpeg.len() + comment.len() + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, 0xFE]);
    out.extend_from_slice(&((comment.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(comment);
    out.extend_from_slice(&jpeg[insert_at..]);
    out
}

/// Body of the first COM segment before scan data, if any.
pub fn read_jpeg_comment(jpeg: &[u8]) -> Option<&[u8]> {
    if jpeg.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return None;
        }
        let marker = jpeg[pos + 1];
        // SOS or EOI: no more header segments
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 {
            return None;
        }
        let body = jpeg.get(pos + 4..pos + 2 + len)?;
        if marker == 0xFE {
            return Some(body);
        }
        pos += 2 + len;
    }
    None
}
