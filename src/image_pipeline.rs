//! Upload classification and HEIC-to-JPEG conversion.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, DynamicImage, ExtendedColorType};
use thiserror::Error;

use crate::protocol::UploadFile;

const FALLBACK_EXTENSION: &str = "jpg";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error(
        "File too large ({}MB). Maximum is {}MB.",
        mb_rounded(.size_bytes),
        mb_rounded(.limit_bytes)
    )]
    TooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },

    #[error("{0}")]
    Decode(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(String),

    #[error("HEIC decoding support is not compiled in")]
    DecoderUnavailable,
}

fn mb_rounded(bytes: &usize) -> usize {
    (*bytes as f64 / 1024.0 / 1024.0).round() as usize
}

/// Bytes ready to be written to the photo bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpload {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub converted: bool,
}

/// HEIC by declared type (`image/heic`, `image/heif`) or by file extension.
pub fn is_heic(content_type: &str, file_name: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    if content_type == "image/heic" || content_type == "image/heif" {
        return true;
    }
    matches!(
        file_extension(file_name).as_deref(),
        Some("heic") | Some("heif")
    )
}

/// Uploads accepted into a memory: any `image/*` type, or HEIC detected by name.
pub fn is_image_upload(content_type: &str, file_name: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
        || is_heic(content_type, file_name)
}

/// Lowercased extension after the last dot, if it is a plain alphanumeric token.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

pub fn check_size(size_bytes: usize, limit_bytes: usize) -> Result<(), ConversionError> {
    if size_bytes > limit_bytes {
        return Err(ConversionError::TooLarge {
            size_bytes,
            limit_bytes,
        });
    }
    Ok(())
}

pub fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF
}

/// Encodes an image as baseline JPEG. Alpha is dropped since JPEG has none.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ConversionError> {
    let rgb = image.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|error| ConversionError::Encode(error.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(feature = "heic")]
fn decode_heif(bytes: &[u8]) -> Result<DynamicImage, ConversionError> {
    use image::RgbImage;
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let decode_error = |error: libheif_rs::HeifError| ConversionError::Decode(error.to_string());
    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_bytes(bytes).map_err(decode_error)?;
    let handle = context.primary_image_handle().map_err(decode_error)?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(decode_error)?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| ConversionError::Decode("Decoded image has no RGB plane".to_string()))?;
    let width = plane.width;
    let height = plane.height;
    let row_bytes = width as usize * 3;

    // Rows may be padded past width * 3.
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * plane.stride;
        let end = start + row_bytes;
        let slice = plane
            .data
            .get(start..end)
            .ok_or_else(|| ConversionError::Decode("Truncated RGB plane".to_string()))?;
        pixels.extend_from_slice(slice);
    }

    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| ConversionError::Decode("RGB buffer size mismatch".to_string()))?;
    Ok(DynamicImage::ImageRgb8(image))
}

#[cfg(not(feature = "heic"))]
fn decode_heif(_bytes: &[u8]) -> Result<DynamicImage, ConversionError> {
    Err(ConversionError::DecoderUnavailable)
}

/// Some exporters name plain JPEGs `.heic`; those are returned untouched.
pub fn convert_heic_to_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, ConversionError> {
    if bytes.is_empty() {
        return Err(ConversionError::Decode("File is empty".to_string()));
    }
    if looks_like_jpeg(bytes) {
        return Ok(bytes.to_vec());
    }
    let image = decode_heif(bytes)?;
    encode_jpeg(&image, quality)
}

/// Converts HEIC uploads and passes everything else through with its own extension.
pub fn prepare_upload(file: UploadFile, quality: u8) -> Result<PreparedUpload, ConversionError> {
    if is_heic(&file.content_type, &file.file_name) {
        let bytes = convert_heic_to_jpeg(&file.bytes, quality)?;
        return Ok(PreparedUpload {
            bytes,
            extension: FALLBACK_EXTENSION.to_string(),
            converted: true,
        });
    }

    let extension =
        file_extension(&file.file_name).unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    Ok(PreparedUpload {
        bytes: file.bytes,
        extension,
        converted: false,
    })
}
