//! Frame type and image intake — decoding uploads and camera data URLs.

use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("not a base64 image data URL")]
    InvalidDataUrl,
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decoded image, interleaved RGB (width * height * 3 bytes).
#[derive(Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    /// Pixel at (x, y) as [r, g, b]. Panics if out of bounds.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let off = (y * self.width as usize + x) * 3;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }
}

/// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RgbFrame, FrameError> {
    let img = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = img.dimensions();
    Ok(RgbFrame {
        data: img.into_raw(),
        width,
        height,
    })
}

/// Extract the raw image bytes from a browser camera data URL
/// (`data:image/jpeg;base64,...`).
///
/// Accepts any `data:` media type; only the base64 payload is used.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, FrameError> {
    let (header, payload) = url.split_once(',').ok_or(FrameError::InvalidDataUrl)?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(FrameError::InvalidDataUrl);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_url() {
        let url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"hello")
        );
        assert_eq!(decode_data_url(&url).unwrap(), b"hello");
    }

    #[test]
    fn test_decode_data_url_no_comma() {
        assert!(matches!(
            decode_data_url("data:image/jpeg;base64"),
            Err(FrameError::InvalidDataUrl)
        ));
    }

    #[test]
    fn test_decode_data_url_not_base64_header() {
        assert!(matches!(
            decode_data_url("data:image/jpeg,rawbytes"),
            Err(FrameError::InvalidDataUrl)
        ));
    }

    #[test]
    fn test_decode_data_url_bad_payload() {
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@@"),
            Err(FrameError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_image_roundtrip() {
        // Encode a tiny PNG with the image crate, then decode it back.
        let img = image::RgbImage::from_fn(4, 2, |x, _| image::Rgb([x as u8 * 10, 0, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();

        let frame = decode_image(bytes.get_ref()).unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(frame.pixel(3, 1), [30, 0, 255]);
    }

    #[test]
    fn test_decode_image_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(FrameError::Decode(_))
        ));
    }
}
