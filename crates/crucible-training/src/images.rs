//! Decoding of embedded image payloads.
//!
//! Samples carry images as base64 strings, optionally wrapped in a `data:`
//! URI. Decoding validates the transport encoding and sniffs the container
//! format; pixel-level work belongs to the content processor.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to decode image payload: {0}")]
pub struct ImageDecodeError(String);

/// Container format recognized from the payload's magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

/// A decoded image payload, ready to hand to a content processor.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl DecodedImage {
    /// Decodes a base64 string or `data:` URI into image bytes.
    pub fn from_payload(payload: &str) -> Result<Self, ImageDecodeError> {
        let encoded = if payload.starts_with("data:") {
            payload
                .split_once(',')
                .map(|(_, rest)| rest)
                .ok_or_else(|| ImageDecodeError("malformed data URI".to_string()))?
        } else {
            payload
        };

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ImageDecodeError(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageDecodeError("empty image payload".to_string()));
        }

        let format = sniff_format(&bytes)
            .ok_or_else(|| ImageDecodeError("unrecognized image format".to_string()))?;
        Ok(Self { bytes, format })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::Webp);
    }
    None
}
