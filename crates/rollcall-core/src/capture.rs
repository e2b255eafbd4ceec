//! Still-frame encoding for submission to the recognizer.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame available")]
    NoFrame,
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has zero size")]
    EmptyFrame,
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encode a grayscale frame as JPEG.
pub fn encode_jpeg(
    frame: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyFrame);
    }
    let expected = width as usize * height as usize;
    if frame.len() < expected {
        return Err(CaptureError::InvalidLength {
            expected,
            actual: frame.len(),
        });
    }

    let mut out = Vec::with_capacity(expected / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&frame[..expected], width, height, ExtendedColorType::L8)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_jpeg_markers() {
        let frame: Vec<u8> = (0..64 * 48).map(|i| (i % 256) as u8).collect();
        let jpeg = encode_jpeg(&frame, 64, 48, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let err = encode_jpeg(&[0u8; 10], 64, 48, 80).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidLength { expected: 3072, actual: 10 }));
    }

    #[test]
    fn test_encode_rejects_empty_dimensions() {
        assert!(matches!(
            encode_jpeg(&[], 0, 0, 80),
            Err(CaptureError::EmptyFrame)
        ));
    }
}
