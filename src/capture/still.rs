//! Encoded still image handed to the caller.

use chrono::{DateTime, Utc};

/// MIME type of every [`CapturedImage`].
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// A single captured frame, JPEG-encoded.
///
/// Created fresh by each capture. The capturer keeps no reference to it.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// Encoded JPEG data.
    bytes: Vec<u8>,
    /// Width in pixels, equal to the sink's width at capture time.
    width: u32,
    /// Height in pixels, equal to the sink's height at capture time.
    height: u32,
    /// When the frame was drawn.
    captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub(crate) fn new(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    /// Returns the encoded bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the image, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Always `image/jpeg`.
    #[inline]
    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME_TYPE
    }

    /// Returns the image width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the image height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the encoded buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the buffer starts with a JPEG start-of-image marker and ends
    /// with an end-of-image marker.
    pub fn has_jpeg_markers(&self) -> bool {
        self.bytes.starts_with(&[0xFF, 0xD8]) && self.bytes.ends_with(&[0xFF, 0xD9])
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("mime_type", &JPEG_MIME_TYPE)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoded_bytes", &self.bytes.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_accessors() {
        let image = CapturedImage::new(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9], 640, 480);

        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.width(), 640);
        assert_eq!(image.height(), 480);
        assert_eq!(image.len(), 5);
        assert!(image.has_jpeg_markers());
    }

    #[test]
    fn test_debug_omits_payload() {
        let image = CapturedImage::new(vec![7u8; 1024], 2, 2);
        let debug = format!("{image:?}");
        assert!(debug.contains("encoded_bytes: 1024"));
        assert!(!debug.contains("7, 7"));
    }
}
