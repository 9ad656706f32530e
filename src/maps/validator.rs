use std::io::Cursor;

use image::{ImageFormat, ImageReader};

use super::error::MapError;
use crate::storage::models::MapFormat;

/// What a successful validation learned about the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedImage {
    pub format: MapFormat,
    pub width: u32,
    pub height: u32,
}

/// Identify the format from the bytes themselves and fully decode the image.
///
/// The caller-declared content type plays no part; a PNG sent as
/// `image/jpeg` is accepted as PNG, and anything that is not a decodable JPEG
/// or PNG is rejected.
pub fn validate(bytes: &[u8]) -> Result<ValidatedImage, MapError> {
    if bytes.is_empty() {
        return Err(MapError::rejected("Empty upload, expected a JPEG or PNG image"));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MapError::rejected(format!("Unable to read image: {e}")))?;

    let format = match reader.format() {
        Some(ImageFormat::Jpeg) => MapFormat::Jpeg,
        Some(ImageFormat::Png) => MapFormat::Png,
        Some(other) => {
            return Err(MapError::rejected(format!(
                "Invalid image format {}, only JPEG and PNG allowed",
                format!("{other:?}").to_uppercase()
            )))
        }
        None => {
            return Err(MapError::rejected(
                "Cannot identify image file, only JPEG and PNG allowed",
            ))
        }
    };

    let decoded = reader
        .decode()
        .map_err(|e| MapError::rejected(format!("Corrupt {format} image: {e}")))?;

    Ok(ValidatedImage {
        format,
        width: decoded.width(),
        height: decoded.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{gif_bytes, jpeg_bytes, png_bytes};

    fn rejection(bytes: &[u8]) -> String {
        match validate(bytes) {
            Err(MapError::RejectedFormat { reason }) => reason,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_png() {
        let validated = validate(&png_bytes(7)).unwrap();
        assert_eq!(validated.format, MapFormat::Png);
        assert_eq!((validated.width, validated.height), (16, 12));
    }

    #[test]
    fn test_accepts_jpeg() {
        let validated = validate(&jpeg_bytes(7)).unwrap();
        assert_eq!(validated.format, MapFormat::Jpeg);
        assert_eq!((validated.width, validated.height), (16, 12));
    }

    #[test]
    fn test_rejects_gif() {
        let reason = rejection(&gif_bytes());
        assert!(reason.contains("GIF"), "{reason}");
        assert!(reason.contains("only JPEG and PNG allowed"), "{reason}");
    }

    #[test]
    fn test_rejects_text() {
        let reason = rejection(b"Hahaha");
        assert!(reason.contains("Cannot identify image file"), "{reason}");
    }

    #[test]
    fn test_rejects_empty() {
        let reason = rejection(b"");
        assert!(reason.contains("Empty upload"), "{reason}");
    }

    #[test]
    fn test_rejects_truncated_png() {
        let png = png_bytes(3);
        let reason = rejection(&png[..png.len() / 2]);
        assert!(reason.contains("Corrupt PNG image"), "{reason}");
    }

    #[test]
    fn test_rejects_png_magic_with_garbage() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            validate(&bytes),
            Err(MapError::RejectedFormat { .. })
        ));
    }
}
