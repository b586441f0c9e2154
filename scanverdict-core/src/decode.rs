//! Orientation-Aware Decoder
//!
//! Bytes in, upright RGB grid out. EXIF rotation is applied here, before any
//! geometric step downstream, so every later stage can assume top-left origin.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::media::{MediaType, RawImage};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Unsupported image format: {0:?}")]
    UnsupportedFormat(ImageFormat),

    #[error("Corrupt or truncated image: {0}")]
    Corrupt(String),
}

/// Upright pixel grid. Derived per request, never persisted.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: RgbImage,
    pub format: MediaType,
    /// EXIF orientation (1-8) that was applied; 1 when none was present.
    pub orientation: u32,
}

impl DecodedImage {
    pub fn from_rgb(pixels: RgbImage, format: MediaType) -> Self {
        Self { pixels, format, orientation: 1 }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decode `raw` into an upright RGB grid.
///
/// The container format is sniffed from the bytes; only JPEG and PNG pass.
/// A declared type that disagrees with the bytes is logged, not fatal.
pub fn decode(raw: &RawImage) -> Result<DecodedImage, DecodeError> {
    let bytes = raw.bytes();
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let format = image::guess_format(bytes).map_err(|_| DecodeError::UnknownFormat)?;
    let media = match format {
        ImageFormat::Jpeg => MediaType::Jpeg,
        ImageFormat::Png => MediaType::Png,
        other => return Err(DecodeError::UnsupportedFormat(other)),
    };

    if let Some(declared) = raw.declared() {
        if declared != media {
            warn!(declared = %declared, detected = %media, "Declared media type disagrees with content");
        }
    }

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let orientation = read_exif_orientation(bytes);
    let upright = apply_orientation(img, orientation);
    let pixels = upright.to_rgb8();

    debug!(
        format = %media,
        orientation,
        size = format!("{}x{}", pixels.width(), pixels.height()),
        "Decoded upload"
    );

    Ok(DecodedImage { pixels, format: media, orientation })
}

/// Read EXIF tag 0x0112 (Orientation). Returns 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .filter(|v| (1..=8).contains(v))
        .unwrap_or(1)
}

/// EXIF orientation values:
/// 1 = normal, 2 = mirrored, 3 = 180, 4 = flipped vertically,
/// 5 = mirrored + 90 CW, 6 = 90 CW, 7 = mirrored + 270 CW, 8 = 270 CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
