//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the set of raster primitives the transform
//! pipeline is written against: decode, a handful of geometric and colour
//! operations, and encode. Every decision about *which* primitive to call
//! with *what* arguments lives in the pipeline and the calculation module,
//! so backends stay thin.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` in this module.

use super::calculations::Rect;
use super::color::Color;
use super::params::{FlipAxis, OutputFormat, Quality};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: OutputFormat,
        message: String,
    },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Per-pixel adjustments. Value ranges are validated before they get here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    /// -100..=100
    Brightness(i32),
    /// -100..=100
    Contrast(i32),
    /// 0.1..=9.99
    Gamma(f32),
    /// 0..=100
    Sharpen(u32),
    /// 0..=100
    Blur(u32),
    /// Block size in pixels, 0..=1000.
    Pixelate(u32),
    Greyscale,
    /// Per-channel shift in percent, -100..=100.
    Colorize(i32, i32, i32),
    /// Multiply the alpha channel by a percentage, 0..=100.
    Opacity(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub format: OutputFormat,
    pub quality: Quality,
}

/// Trait for image processing backends.
///
/// Operations take the image by value and return the transformed image so a
/// backend is free to work in place or allocate.
pub trait ImageBackend: Sync {
    type Image: Send;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Image, BackendError>;

    fn dimensions(&self, image: &Self::Image) -> Dimensions;

    /// Format the image was decoded from, if it is one we can also write.
    fn source_format(&self, image: &Self::Image) -> Option<OutputFormat>;

    /// Apply the EXIF orientation recorded at decode time.
    fn auto_orient(&self, image: Self::Image) -> Result<Self::Image, BackendError>;

    /// Rotate counter-clockwise by 0, 90, 180 or 270 degrees.
    fn rotate(&self, image: Self::Image, degrees: u32) -> Result<Self::Image, BackendError>;

    fn flip(&self, image: Self::Image, axis: FlipAxis) -> Result<Self::Image, BackendError>;

    /// Resample to exactly `width` × `height`.
    fn resize(&self, image: Self::Image, width: u32, height: u32)
    -> Result<Self::Image, BackendError>;

    fn crop(&self, image: Self::Image, rect: Rect) -> Result<Self::Image, BackendError>;

    /// Place the image at (`x`, `y`) on a new `width` × `height` canvas
    /// filled with `color`.
    fn canvas(
        &self,
        image: Self::Image,
        width: u32,
        height: u32,
        x: i64,
        y: i64,
        color: Color,
    ) -> Result<Self::Image, BackendError>;

    fn adjust(
        &self,
        image: Self::Image,
        adjustment: Adjustment,
    ) -> Result<Self::Image, BackendError>;

    /// Alpha-blend `mark` onto the image with its top-left corner at (`x`, `y`).
    fn overlay(
        &self,
        image: Self::Image,
        mark: &Self::Image,
        x: i64,
        y: i64,
    ) -> Result<Self::Image, BackendError>;

    /// Stroke the outline of `rect` with a line `width` pixels thick.
    fn stroke_rect(
        &self,
        image: Self::Image,
        rect: Rect,
        width: u32,
        color: Color,
    ) -> Result<Self::Image, BackendError>;

    fn encode(&self, image: &Self::Image, params: &EncodeParams) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fake raster: just a size and the format it came from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MockImage {
        pub width: u32,
        pub height: u32,
        pub format: Option<OutputFormat>,
    }

    /// Mock backend that records operations without touching pixels.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    ///
    /// Decodes text of the form `WxH` or `WxH.ext`; encodes to the same form,
    /// so rendered bytes can be inspected directly in tests.
    #[derive(Default)]
    pub struct MockBackend {
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Decode { width: u32, height: u32 },
        AutoOrient,
        Rotate(u32),
        Flip(FlipAxis),
        Resize { width: u32, height: u32 },
        Crop(Rect),
        Canvas {
            width: u32,
            height: u32,
            x: i64,
            y: i64,
            color: String,
        },
        Adjust(Adjustment),
        Overlay {
            width: u32,
            height: u32,
            x: i64,
            y: i64,
        },
        StrokeRect { rect: Rect, width: u32 },
        Encode { format: OutputFormat, quality: u32 },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.operations.lock().unwrap().clear();
        }

        /// Number of decode calls, i.e. pipeline runs.
        pub fn decode_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Decode { .. }))
                .count()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }
    }

    /// Parse `WxH` or `WxH.ext` mock image bytes.
    pub fn parse_mock(bytes: &[u8]) -> Option<MockImage> {
        let text = std::str::from_utf8(bytes).ok()?.trim();
        let (size, ext) = match text.split_once('.') {
            Some((size, ext)) => (size, Some(ext)),
            None => (text, None),
        };
        let (w, h) = size.split_once('x')?;
        Some(MockImage {
            width: w.parse().ok()?,
            height: h.parse().ok()?,
            format: ext.and_then(|e| match e {
                "jpeg" => Some(OutputFormat::Jpg),
                other => OutputFormat::parse(other),
            }),
        })
    }

    impl ImageBackend for MockBackend {
        type Image = MockImage;

        fn decode(&self, bytes: &[u8]) -> Result<MockImage, BackendError> {
            let image = parse_mock(bytes)
                .ok_or_else(|| BackendError::Decode("not a mock image".to_string()))?;
            self.record(RecordedOp::Decode {
                width: image.width,
                height: image.height,
            });
            Ok(image)
        }

        fn dimensions(&self, image: &MockImage) -> Dimensions {
            Dimensions {
                width: image.width,
                height: image.height,
            }
        }

        fn source_format(&self, image: &MockImage) -> Option<OutputFormat> {
            image.format
        }

        fn auto_orient(&self, image: MockImage) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::AutoOrient);
            Ok(image)
        }

        fn rotate(&self, image: MockImage, degrees: u32) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Rotate(degrees));
            if degrees % 180 == 90 {
                Ok(MockImage {
                    width: image.height,
                    height: image.width,
                    ..image
                })
            } else {
                Ok(image)
            }
        }

        fn flip(&self, image: MockImage, axis: FlipAxis) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Flip(axis));
            Ok(image)
        }

        fn resize(
            &self,
            image: MockImage,
            width: u32,
            height: u32,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Resize { width, height });
            Ok(MockImage {
                width,
                height,
                ..image
            })
        }

        fn crop(&self, image: MockImage, rect: Rect) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Crop(rect));
            Ok(MockImage {
                width: rect.width,
                height: rect.height,
                ..image
            })
        }

        fn canvas(
            &self,
            image: MockImage,
            width: u32,
            height: u32,
            x: i64,
            y: i64,
            color: Color,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Canvas {
                width,
                height,
                x,
                y,
                color: color.to_string(),
            });
            Ok(MockImage {
                width,
                height,
                ..image
            })
        }

        fn adjust(
            &self,
            image: MockImage,
            adjustment: Adjustment,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Adjust(adjustment));
            Ok(image)
        }

        fn overlay(
            &self,
            image: MockImage,
            mark: &MockImage,
            x: i64,
            y: i64,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::Overlay {
                width: mark.width,
                height: mark.height,
                x,
                y,
            });
            Ok(image)
        }

        fn stroke_rect(
            &self,
            image: MockImage,
            rect: Rect,
            width: u32,
            _color: Color,
        ) -> Result<MockImage, BackendError> {
            self.record(RecordedOp::StrokeRect { rect, width });
            Ok(image)
        }

        fn encode(
            &self,
            image: &MockImage,
            params: &EncodeParams,
        ) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::Encode {
                format: params.format,
                quality: params.quality.value(),
            });
            Ok(format!("{}x{}.{}", image.width, image.height, params.format).into_bytes())
        }
    }

    #[test]
    fn mock_decodes_size_text() {
        let backend = MockBackend::new();
        let image = backend.decode(b"800x600.png").unwrap();
        assert_eq!(backend.dimensions(&image).as_tuple(), (800, 600));
        assert_eq!(backend.source_format(&image), Some(OutputFormat::Png));

        let ops = backend.get_operations();
        assert_eq!(
            ops,
            vec![RecordedOp::Decode {
                width: 800,
                height: 600
            }]
        );
    }

    #[test]
    fn mock_rejects_garbage() {
        let backend = MockBackend::new();
        assert!(matches!(
            backend.decode(b"not an image"),
            Err(BackendError::Decode(_))
        ));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn mock_rotation_swaps_sides() {
        let backend = MockBackend::new();
        let image = backend.decode(b"800x600").unwrap();
        let rotated = backend.rotate(image, 90).unwrap();
        assert_eq!((rotated.width, rotated.height), (600, 800));
    }

    #[test]
    fn mock_encode_reports_size_and_format() {
        let backend = MockBackend::new();
        let image = backend.decode(b"40x30").unwrap();
        let bytes = backend
            .encode(
                &image,
                &EncodeParams {
                    format: OutputFormat::Webp,
                    quality: Quality::default(),
                },
            )
            .unwrap();
        assert_eq!(bytes, b"40x30.webp");
    }
}
