//! Encoded camera frames
//!
//! Frames arrive as encoded JPEG or PNG bytes. A frame is only constructed
//! after its bytes have been decoded once, so downstream consumers never see
//! an undecodable image.

use bytes::Bytes;
use image::ImageFormat;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is empty")]
    Empty,
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }
}

/// A validated, still-encoded image
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    pub received_at: Instant,
}

impl Frame {
    /// Validate that `data` is a decodable JPEG or PNG
    pub fn decode_checked(data: Bytes) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }

        let format = match image::guess_format(&data) {
            Ok(ImageFormat::Jpeg) => FrameFormat::Jpeg,
            Ok(ImageFormat::Png) => FrameFormat::Png,
            _ => return Err(FrameError::UnsupportedFormat),
        };

        let image_format = match format {
            FrameFormat::Jpeg => ImageFormat::Jpeg,
            FrameFormat::Png => ImageFormat::Png,
        };
        let decoded = image::load_from_memory_with_format(&data, image_format)?;

        Ok(Self {
            data,
            format,
            width: decoded.width(),
            height: decoded.height(),
            received_at: Instant::now(),
        })
    }

    /// JPEG bytes for this frame, transcoding PNG input
    pub fn to_jpeg(&self) -> Result<Bytes, FrameError> {
        match self.format {
            FrameFormat::Jpeg => Ok(self.data.clone()),
            FrameFormat::Png => {
                let decoded = image::load_from_memory_with_format(&self.data, ImageFormat::Png)?;
                let mut out = std::io::Cursor::new(Vec::with_capacity(self.data.len()));
                decoded.to_rgb8().write_to(&mut out, ImageFormat::Jpeg)?;
                Ok(Bytes::from(out.into_inner()))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::encoded_image;
    use super::*;

    #[test]
    fn test_decode_jpeg() {
        let frame = Frame::decode_checked(encoded_image(ImageFormat::Jpeg)).unwrap();
        assert_eq!(frame.format, FrameFormat::Jpeg);
        assert_eq!((frame.width, frame.height), (8, 6));
    }

    #[test]
    fn test_decode_png() {
        let frame = Frame::decode_checked(encoded_image(ImageFormat::Png)).unwrap();
        assert_eq!(frame.format, FrameFormat::Png);
        assert_eq!(frame.format.mime(), "image/png");
    }

    #[test]
    fn test_png_transcodes_to_jpeg() {
        let frame = Frame::decode_checked(encoded_image(ImageFormat::Png)).unwrap();
        let jpeg = frame.to_jpeg().unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);

        let frame = Frame::decode_checked(encoded_image(ImageFormat::Jpeg)).unwrap();
        assert_eq!(frame.to_jpeg().unwrap(), frame.data);
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        assert!(matches!(Frame::decode_checked(Bytes::new()), Err(FrameError::Empty)));
        assert!(matches!(
            Frame::decode_checked(Bytes::from_static(b"not an image")),
            Err(FrameError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_rejects_truncated_jpeg() {
        let full = encoded_image(ImageFormat::Jpeg);
        let truncated = full.slice(..20);
        assert!(Frame::decode_checked(truncated).is_err());
    }
}
