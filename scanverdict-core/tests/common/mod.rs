//! Synthetic scans for integration tests.

#![allow(dead_code)]

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};

/// Checkerboard with a soft horizontal gradient so nothing is uniform.
pub fn scan_pattern(width: u32, height: u32, cell: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let shade = (x * 60 / width.max(1)) as u8;
        if (x / cell + y / cell) % 2 == 0 {
            Rgb([190 + shade, 190 + shade, 190 + shade])
        } else {
            Rgb([10 + shade, 12 + shade, 14 + shade])
        }
    })
}

pub fn uniform(width: u32, height: u32, value: u8) -> RgbImage {
    ImageBuffer::from_pixel(width, height, Rgb([value, value, value]))
}

pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("png encode");
    cursor.into_inner()
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(img)
        .expect("jpeg encode");
    bytes
}

/// Splice a minimal big-endian EXIF APP1 segment carrying only the
/// Orientation tag into a baseline JPEG, after SOI and any APP0.
pub fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG");

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2A");
    tiff.extend_from_slice(&8u32.to_be_bytes());
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&orientation.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(&payload);

    let mut insert_at = 2;
    if jpeg[2] == 0xFF && jpeg[3] == 0xE0 {
        let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        insert_at += 2 + app0_len;
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&segment);
    out.extend_from_slice(&jpeg[insert_at..]);
    out
}
