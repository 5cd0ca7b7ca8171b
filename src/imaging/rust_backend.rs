//! Pure Rust image backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, BMP, TIFF, WebP) | `image::ImageReader` with format sniffing |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1 decode) + YUV→RGB |
//! | EXIF orientation | `ImageDecoder::orientation` / `DynamicImage::apply_orientation` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Sharpen / blur | `imageops::unsharpen` / `DynamicImage::blur` |
//! | Canvas, overlay | `imageops::overlay` onto a filled `RgbaImage` |
//! | Encode JPEG / PNG / GIF | `image::codecs::{jpeg, png, gif}` |
//! | Encode progressive JPEG | `jpeg_encoder::Encoder` with `set_progressive` |
//! | Encode WebP | `image::codecs::webp::WebPEncoder` (lossless only) |
//! | Encode AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//!
//! The `image` JPEG encoder writes baseline scans only, hence the second
//! encoder for `pjpg`. It is limited to 65535 pixels per side.

use super::backend::{Adjustment, BackendError, Dimensions, EncodeParams, ImageBackend};
use super::calculations::Rect;
use super::color::Color;
use super::params::{FlipAxis, OutputFormat};
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{
    DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat, ImageReader, Pixel,
    Rgba, RgbaImage,
};
use std::io::Cursor;

/// A decoded image plus what the pipeline needs to know about its origin.
pub struct Raster {
    pixels: DynamicImage,
    format: Option<OutputFormat>,
    /// EXIF orientation not yet applied.
    orientation: Option<Orientation>,
}

impl Raster {
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    fn with_pixels(self, pixels: DynamicImage) -> Self {
        Self { pixels, ..self }
    }
}

/// Backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

fn output_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::Gif => Some(OutputFormat::Gif),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Avif => Some(OutputFormat::Avif),
        _ => None,
    }
}

/// ISO-BMFF brand check for AVIF still images and sequences.
fn is_avif(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[4..8] == b"ftyp" && matches!(&bytes[8..12], b"avif" | b"avis")
}

fn rgba(color: Color) -> Rgba<u8> {
    Rgba(color.to_rgba())
}

fn decode_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Decode(e.to_string())
}

/// Decode AVIF bytes with avif-parse (container) + rav1d (AV1 decode).
///
/// The `image` crate's `"avif"` feature only provides the encoder (rav1e);
/// its decoder needs the C library dav1d. `rav1d` is the pure Rust port.
fn decode_avif(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib as dav1d;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Decode(format!("AVIF container: {e:?}")))?;
    let av1: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    let settings_ptr = NonNull::new(settings.as_mut_ptr())
        .ok_or_else(|| BackendError::Decode("rav1d settings allocation".into()))?;
    unsafe { dav1d::dav1d_default_settings(settings_ptr) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(BackendError::Decode(format!("rav1d open failed ({})", rc.0)));
    }
    let close = |ctx: &mut Option<_>| unsafe { dav1d::dav1d_close(NonNull::new(ctx)) };

    let mut data = Dav1dData::default();
    let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut data), av1.len()) };
    if buf.is_null() {
        close(&mut ctx);
        return Err(BackendError::Decode("rav1d data_create failed".into()));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

    let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut data)) };
    if rc.0 != 0 {
        unsafe { dav1d::dav1d_data_unref(NonNull::new(&mut data)) };
        close(&mut ctx);
        return Err(BackendError::Decode(format!("rav1d send_data failed ({})", rc.0)));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        close(&mut ctx);
        return Err(BackendError::Decode(format!("rav1d get_picture failed ({})", rc.0)));
    }

    let layout = pic.p.layout;
    let subsampling = match layout {
        DAV1D_PIXEL_LAYOUT_I400 => Some((false, false)),
        DAV1D_PIXEL_LAYOUT_I420 => Some((true, true)),
        DAV1D_PIXEL_LAYOUT_I422 => Some((true, false)),
        DAV1D_PIXEL_LAYOUT_I444 => Some((false, false)),
        _ => None,
    };
    let plane = |i: usize| pic.data[i].map(|p| p.as_ptr() as *const u8);
    let planes = match (subsampling, plane(0)) {
        (Some((ss_x, ss_y)), Some(y_ptr)) => {
            let monochrome = layout == DAV1D_PIXEL_LAYOUT_I400;
            let (u_ptr, v_ptr) = if monochrome {
                (Some(y_ptr), Some(y_ptr))
            } else {
                (plane(1), plane(2))
            };
            u_ptr.zip(v_ptr).map(|(u_ptr, v_ptr)| YuvPlanes {
                y_ptr,
                u_ptr,
                v_ptr,
                y_stride: pic.stride[0],
                uv_stride: if monochrome { 0 } else { pic.stride[1] },
                width: pic.p.w as u32,
                height: pic.p.h as u32,
                bpc: pic.p.bpc as u32,
                ss_x,
                ss_y,
                monochrome,
            })
        }
        _ => None,
    };
    let decoded = planes.map(|p| (p.width, p.height, p.to_rgb()));

    unsafe { dav1d::dav1d_picture_unref(NonNull::new(&mut pic)) };
    close(&mut ctx);

    let (w, h, rgb) =
        decoded.ok_or_else(|| BackendError::Decode(format!("unsupported AVIF layout {layout}")))?;
    image::RgbImage::from_raw(w, h, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| BackendError::Decode("AVIF plane size mismatch".into()))
}

/// Decoded YUV plane data from rav1d, ready for RGB conversion.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Interleaved RGB8 via BT.601 coefficients.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;
        let mut rgb = Vec::with_capacity((self.width * self.height * 3) as usize);

        for row in 0..self.height {
            for col in 0..self.width {
                let luma = sample(self.y_ptr, self.y_stride, col, row, self.bpc);
                if self.monochrome {
                    let v = (luma * scale).clamp(0.0, 255.0) as u8;
                    rgb.extend_from_slice(&[v, v, v]);
                    continue;
                }
                let cx = if self.ss_x { col / 2 } else { col };
                let cy = if self.ss_y { row / 2 } else { row };
                let cb = sample(self.u_ptr, self.uv_stride, cx, cy, self.bpc) - center;
                let cr = sample(self.v_ptr, self.uv_stride, cx, cy, self.bpc) - center;
                rgb.extend_from_slice(&[
                    ((luma + 1.402 * cr) * scale).clamp(0.0, 255.0) as u8,
                    ((luma - 0.344136 * cb - 0.714136 * cr) * scale).clamp(0.0, 255.0) as u8,
                    ((luma + 1.772 * cb) * scale).clamp(0.0, 255.0) as u8,
                ]);
            }
        }
        rgb
    }
}

/// One plane sample; 10 and 12-bit samples are stored as u16.
#[inline]
fn sample(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        let offset = y as isize * stride + x as isize * 2;
        (unsafe { (ptr.offset(offset) as *const u16).read_unaligned() }) as f32
    }
}

fn map_rgb(image: &DynamicImage, f: impl Fn(u8, usize) -> u8) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        for channel in 0..3 {
            pixel.0[channel] = f(pixel.0[channel], channel);
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn gamma(image: &DynamicImage, gamma: f32) -> DynamicImage {
    let table: Vec<u8> = (0..=255u32)
        .map(|v| ((v as f32 / 255.0).powf(1.0 / gamma) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    map_rgb(image, |v, _| table[v as usize])
}

fn pixelate(image: &DynamicImage, block: u32) -> DynamicImage {
    if block <= 1 {
        return image.clone();
    }
    let (w, h) = (image.width(), image.height());
    let small = image.resize_exact(
        w.div_ceil(block).max(1),
        h.div_ceil(block).max(1),
        FilterType::Triangle,
    );
    small.resize_exact(w, h, FilterType::Nearest)
}

fn opacity(image: &DynamicImage, percent: u32) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        pixel.0[3] = (pixel.0[3] as u32 * percent / 100) as u8;
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Blend a `width`-thick outline centred on the edges of `rect`.
fn stroke(canvas: &mut RgbaImage, rect: Rect, width: u32, color: Rgba<u8>) {
    let half = (width / 2) as i64;
    let width = width as i64;
    let x0 = rect.x as i64 - half;
    let y0 = rect.y as i64 - half;
    let x1 = x0 + rect.width as i64 + width;
    let y1 = y0 + rect.height as i64 + width;
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);

    for y in y0.max(0)..y1.min(ch) {
        for x in x0.max(0)..x1.min(cw) {
            let inner = x >= x0 + width && x < x1 - width && y >= y0 + width && y < y1 - width;
            if !inner {
                canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
            }
        }
    }
}

fn encode_error(format: OutputFormat) -> impl Fn(image::ImageError) -> BackendError {
    move |e| BackendError::Encode {
        format,
        message: e.to_string(),
    }
}

impl ImageBackend for RustBackend {
    type Image = Raster;

    fn decode(&self, bytes: &[u8]) -> Result<Raster, BackendError> {
        if is_avif(bytes) {
            return Ok(Raster {
                pixels: decode_avif(bytes)?,
                format: Some(OutputFormat::Avif),
                orientation: None,
            });
        }
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let format = reader.format().and_then(output_format);
        let mut decoder = reader.into_decoder().map_err(decode_error)?;
        let orientation = decoder.orientation().ok();
        let pixels = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
        Ok(Raster {
            pixels,
            format,
            orientation,
        })
    }

    fn dimensions(&self, image: &Raster) -> Dimensions {
        Dimensions {
            width: image.pixels.width(),
            height: image.pixels.height(),
        }
    }

    fn source_format(&self, image: &Raster) -> Option<OutputFormat> {
        image.format
    }

    fn auto_orient(&self, mut image: Raster) -> Result<Raster, BackendError> {
        if let Some(orientation) = image.orientation.take() {
            image.pixels.apply_orientation(orientation);
        }
        Ok(image)
    }

    fn rotate(&self, image: Raster, degrees: u32) -> Result<Raster, BackendError> {
        // Counter-clockwise, while `image` rotates clockwise.
        let pixels = match degrees % 360 {
            90 => image.pixels.rotate270(),
            180 => image.pixels.rotate180(),
            270 => image.pixels.rotate90(),
            _ => return Ok(image),
        };
        Ok(image.with_pixels(pixels))
    }

    fn flip(&self, image: Raster, axis: FlipAxis) -> Result<Raster, BackendError> {
        let pixels = match axis {
            FlipAxis::Horizontal => image.pixels.fliph(),
            FlipAxis::Vertical => image.pixels.flipv(),
            FlipAxis::Both => image.pixels.fliph().flipv(),
        };
        Ok(image.with_pixels(pixels))
    }

    fn resize(&self, image: Raster, width: u32, height: u32) -> Result<Raster, BackendError> {
        let pixels = image
            .pixels
            .resize_exact(width.max(1), height.max(1), FilterType::Lanczos3);
        Ok(image.with_pixels(pixels))
    }

    fn crop(&self, image: Raster, rect: Rect) -> Result<Raster, BackendError> {
        let pixels = image
            .pixels
            .crop_imm(rect.x, rect.y, rect.width, rect.height);
        Ok(image.with_pixels(pixels))
    }

    fn canvas(
        &self,
        image: Raster,
        width: u32,
        height: u32,
        x: i64,
        y: i64,
        color: Color,
    ) -> Result<Raster, BackendError> {
        let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), rgba(color));
        imageops::overlay(&mut canvas, &image.pixels.to_rgba8(), x, y);
        Ok(image.with_pixels(DynamicImage::ImageRgba8(canvas)))
    }

    fn adjust(&self, image: Raster, adjustment: Adjustment) -> Result<Raster, BackendError> {
        let px = &image.pixels;
        let pixels = match adjustment {
            Adjustment::Brightness(level) => px.brighten((level as f32 * 2.55).round() as i32),
            Adjustment::Contrast(level) => px.adjust_contrast(level as f32),
            Adjustment::Gamma(value) => gamma(px, value),
            Adjustment::Sharpen(0) | Adjustment::Blur(0) => return Ok(image),
            Adjustment::Sharpen(amount) => px.unsharpen(0.5 + amount as f32 / 25.0, 0),
            Adjustment::Blur(amount) => px.blur(amount as f32 / 2.0),
            Adjustment::Pixelate(block) => pixelate(px, block),
            Adjustment::Greyscale => DynamicImage::ImageRgba8(px.grayscale().to_rgba8()),
            Adjustment::Colorize(r, g, b) => {
                let shift = [r, g, b].map(|pct| (pct as f32 * 2.55).round() as i32);
                map_rgb(px, |v, channel| (v as i32 + shift[channel]).clamp(0, 255) as u8)
            }
            Adjustment::Opacity(percent) => opacity(px, percent),
        };
        Ok(image.with_pixels(pixels))
    }

    fn overlay(&self, image: Raster, mark: &Raster, x: i64, y: i64) -> Result<Raster, BackendError> {
        let mut base = image.pixels.to_rgba8();
        imageops::overlay(&mut base, &mark.pixels.to_rgba8(), x, y);
        Ok(image.with_pixels(DynamicImage::ImageRgba8(base)))
    }

    fn stroke_rect(
        &self,
        image: Raster,
        rect: Rect,
        width: u32,
        color: Color,
    ) -> Result<Raster, BackendError> {
        let mut base = image.pixels.to_rgba8();
        stroke(&mut base, rect, width, rgba(color));
        Ok(image.with_pixels(DynamicImage::ImageRgba8(base)))
    }

    fn encode(&self, image: &Raster, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        let format = params.format;
        let quality = params.quality.value().clamp(1, 100) as u8;
        let (w, h) = (image.pixels.width(), image.pixels.height());
        let mut out = Vec::new();
        let err = encode_error(format);

        match format {
            OutputFormat::Jpg => {
                let rgb = image.pixels.to_rgb8();
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
                    .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                    .map_err(err)?;
            }
            OutputFormat::Pjpg => {
                let rgb = image.pixels.to_rgb8();
                let (Ok(w), Ok(h)) = (u16::try_from(w), u16::try_from(h)) else {
                    return Err(BackendError::Encode {
                        format,
                        message: format!("{w}x{h} exceeds 65535 pixels per side"),
                    });
                };
                let mut encoder = jpeg_encoder::Encoder::new(&mut out, quality);
                encoder.set_progressive(true);
                encoder
                    .encode(rgb.as_raw(), w, h, jpeg_encoder::ColorType::Rgb)
                    .map_err(|e| BackendError::Encode {
                        format,
                        message: e.to_string(),
                    })?;
            }
            OutputFormat::Png => {
                let rgba = image.pixels.to_rgba8();
                image::codecs::png::PngEncoder::new(&mut out)
                    .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                    .map_err(err)?;
            }
            OutputFormat::Gif => {
                let rgba = image.pixels.to_rgba8();
                image::codecs::gif::GifEncoder::new(&mut out)
                    .encode(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                    .map_err(err)?;
            }
            OutputFormat::Webp => {
                let rgba = image.pixels.to_rgba8();
                image::codecs::webp::WebPEncoder::new_lossless(&mut out)
                    .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                    .map_err(err)?;
            }
            OutputFormat::Avif => {
                let rgba = image.pixels.to_rgba8();
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut out, 6, quality)
                    .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                    .map_err(err)?;
            }
        }
        Ok(out)
    }
}
