//! The ordered transform chain that turns a source image into a rendition.
//!
//! Steps run in a fixed order:
//!
//! ```text
//! orientation → crop → size → brightness → contrast → gamma → sharpen →
//! filter → flip → blur → pixelate → watermark → background → border → encode
//! ```
//!
//! Each step reads only its own parameters and does nothing when they are
//! absent or invalid. The geometry of every step comes from
//! [`calculations`](super::calculations); this module only sequences backend
//! calls.

use super::backend::{Adjustment, BackendError, EncodeParams, ImageBackend};
use super::calculations::{
    BorderPlan, Rect, crop_rect, plan_border, plan_fit, resolve_dimension, resolve_target,
    watermark_origin,
};
use super::color::Color;
use super::params::{Filter, Fit, Orientation, OutputFormat, ParamValue, Params};
use crate::filesystem::Filesystem;
use std::fmt;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Orientation,
    Crop,
    Size,
    Brightness,
    Contrast,
    Gamma,
    Sharpen,
    Filter,
    Flip,
    Blur,
    Pixelate,
    Watermark,
    Background,
    Border,
    Encode,
}

impl Step {
    /// Every step in execution order.
    pub const ORDER: [Step; 15] = [
        Step::Orientation,
        Step::Crop,
        Step::Size,
        Step::Brightness,
        Step::Contrast,
        Step::Gamma,
        Step::Sharpen,
        Step::Filter,
        Step::Flip,
        Step::Blur,
        Step::Pixelate,
        Step::Watermark,
        Step::Background,
        Step::Border,
        Step::Encode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Orientation => "orientation",
            Step::Crop => "crop",
            Step::Size => "size",
            Step::Brightness => "brightness",
            Step::Contrast => "contrast",
            Step::Gamma => "gamma",
            Step::Sharpen => "sharpen",
            Step::Filter => "filter",
            Step::Flip => "flip",
            Step::Blur => "blur",
            Step::Pixelate => "pixelate",
            Step::Watermark => "watermark",
            Step::Background => "background",
            Step::Border => "border",
            Step::Encode => "encode",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoded output of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

/// State flowing through the steps of one run.
pub struct PipelineContext<'a, I> {
    pub image: I,
    pub params: &'a Params,
    /// Format of the decoded source, used as the encode fallback.
    pub source_format: Option<OutputFormat>,
}

/// Transform pipeline bound to a backend.
pub struct Pipeline<B: ImageBackend> {
    backend: B,
    watermarks: Option<Filesystem>,
    max_image_size: Option<u64>,
}

impl<B: ImageBackend> Pipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            watermarks: None,
            max_image_size: None,
        }
    }

    /// Base directory that `watermark_path` values are read from.
    pub fn with_watermarks(mut self, watermarks: Filesystem) -> Self {
        self.watermarks = Some(watermarks);
        self
    }

    /// Pixel-count ceiling for renditions without their own `max_size`.
    pub fn with_max_image_size(mut self, max: Option<u64>) -> Self {
        self.max_image_size = max;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decode `source`, run every step, and encode.
    pub fn render(&self, source: &[u8], params: &Params) -> Result<Rendered, BackendError> {
        let image = self.backend.decode(source)?;
        let source_format = self.backend.source_format(&image);
        let mut ctx = PipelineContext {
            image,
            params,
            source_format,
        };

        for step in Step::ORDER {
            if step == Step::Encode {
                break;
            }
            trace!(%step, "pipeline step");
            ctx.image = self.apply(step, ctx.image, params)?;
        }

        let rendered = self.encode(ctx)?;
        debug!(
            format = %rendered.format,
            bytes = rendered.bytes.len(),
            "rendered image"
        );
        Ok(rendered)
    }

    fn apply(
        &self,
        step: Step,
        image: B::Image,
        params: &Params,
    ) -> Result<B::Image, BackendError> {
        let adjustment = match step {
            Step::Brightness => params.brightness().map(Adjustment::Brightness),
            Step::Contrast => params.contrast().map(Adjustment::Contrast),
            Step::Gamma => params.gamma().map(Adjustment::Gamma),
            Step::Sharpen => params.sharpen().map(Adjustment::Sharpen),
            Step::Blur => params.blur().map(Adjustment::Blur),
            Step::Pixelate => params.pixelate().map(Adjustment::Pixelate),
            _ => None,
        };
        match step {
            Step::Orientation => self.orientation(image, params),
            Step::Crop => self.crop(image, params),
            Step::Size => self.size(image, params),
            Step::Brightness
            | Step::Contrast
            | Step::Gamma
            | Step::Sharpen
            | Step::Blur
            | Step::Pixelate => match adjustment {
                Some(adjustment) => self.backend.adjust(image, adjustment),
                None => Ok(image),
            },
            Step::Filter => self.filter(image, params),
            Step::Flip => match params.flip() {
                Some(axis) => self.backend.flip(image, axis),
                None => Ok(image),
            },
            Step::Watermark => self.watermark(image, params),
            Step::Background => self.background(image, params),
            Step::Border => self.border(image, params),
            Step::Encode => Ok(image),
        }
    }

    fn size_of(&self, image: &B::Image) -> (u32, u32) {
        self.backend.dimensions(image).as_tuple()
    }

    fn orientation(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        match params.orientation() {
            Orientation::Auto => self.backend.auto_orient(image),
            Orientation::Rotate(0) => Ok(image),
            Orientation::Rotate(degrees) => self.backend.rotate(image, degrees),
        }
    }

    fn crop(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        let size = self.size_of(&image);
        match params.crop_rect().and_then(|r| crop_rect(size, r)) {
            Some(rect) => self.backend.crop(image, rect),
            None => Ok(image),
        }
    }

    fn size(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        let source = self.size_of(&image);
        let target = resolve_target(
            source,
            params.width(),
            params.height(),
            params.dpr(),
            params.max_size().or(self.max_image_size),
        );
        if target.0 == 0 || target.1 == 0 || target == source {
            return Ok(image);
        }
        self.fit(image, target, params.fit())
    }

    /// Apply a fit plan; shared by the size and watermark steps.
    fn fit(
        &self,
        mut image: B::Image,
        target: (u32, u32),
        fit: Fit,
    ) -> Result<B::Image, BackendError> {
        let plan = plan_fit(self.size_of(&image), target, fit);

        if let Some((w, h)) = plan.resize
            && (w, h) != self.size_of(&image)
        {
            image = self.backend.resize(image, w, h)?;
        }
        if let Some(canvas) = plan.canvas {
            image = self.backend.canvas(
                image,
                canvas.width,
                canvas.height,
                canvas.x,
                canvas.y,
                Color::TRANSPARENT,
            )?;
        }
        if let Some(rect) = plan.crop {
            let (w, h) = self.size_of(&image);
            let whole = Rect {
                x: 0,
                y: 0,
                width: w,
                height: h,
            };
            if rect != whole {
                image = self.backend.crop(image, rect)?;
            }
        }
        Ok(image)
    }

    fn filter(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        match params.filter() {
            Some(Filter::Greyscale) => self.backend.adjust(image, Adjustment::Greyscale),
            Some(Filter::Sepia) => [
                Adjustment::Greyscale,
                Adjustment::Brightness(-10),
                Adjustment::Contrast(10),
                Adjustment::Colorize(38, 27, 12),
                Adjustment::Brightness(-10),
                Adjustment::Contrast(10),
            ]
            .into_iter()
            .try_fold(image, |image, adjustment| self.backend.adjust(image, adjustment)),
            None => Ok(image),
        }
    }

    fn watermark(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        let Some(mark) = params.watermark() else {
            return Ok(image);
        };
        let Some(watermarks) = &self.watermarks else {
            debug!(path = %mark.path, "no watermark directory configured; skipping watermark");
            return Ok(image);
        };
        if !watermarks.exists(&mark.path) {
            warn!(path = %mark.path, "watermark image not found; skipping watermark");
            return Ok(image);
        }

        let size = self.size_of(&image);
        let dpr = params.dpr();
        let dimension = |value: &Option<ParamValue>| {
            value
                .as_ref()
                .and_then(|v| resolve_dimension(v, size, dpr))
        };

        let mut offset = (
            dimension(&mark.offset_x).unwrap_or(0.0) as i64,
            dimension(&mark.offset_y).unwrap_or(0.0) as i64,
        );
        if let Some(padding) = dimension(&mark.padding).filter(|p| *p > 0.0) {
            offset = (padding as i64, padding as i64);
        }

        let mut overlay = self.backend.decode(&watermarks.read(&mark.path)?)?;
        let mark_size = self.size_of(&overlay);
        let pixels = |value: Option<f64>| value.map(|v| v as u32).filter(|v| *v > 0);
        let target = resolve_target(
            mark_size,
            pixels(dimension(&mark.width)),
            pixels(dimension(&mark.height)),
            1.0,
            None,
        );
        if target.0 > 0 && target.1 > 0 && target != mark_size {
            overlay = self.fit(overlay, target, mark.fit)?;
        }
        if mark.alpha < 100 {
            overlay = self.backend.adjust(overlay, Adjustment::Opacity(mark.alpha))?;
        }

        let (x, y) = watermark_origin(size, self.size_of(&overlay), mark.position, offset);
        self.backend.overlay(image, &overlay, x, y)
    }

    fn background(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        let Some(background) = params.background() else {
            return Ok(image);
        };
        let (w, h) = self.size_of(&image);
        self.backend
            .canvas(image, w, h, 0, 0, Color::parse(&background))
    }

    fn border(&self, image: B::Image, params: &Params) -> Result<B::Image, BackendError> {
        let Some(border) = params.border() else {
            return Ok(image);
        };
        let size = self.size_of(&image);
        let Some(width) = resolve_dimension(&border.width, size, params.dpr()) else {
            return Ok(image);
        };
        let color = Color::parse(border.color.as_deref().unwrap_or_default());

        match plan_border(size, width, border.method) {
            Some(BorderPlan::Overlay { rect, width }) => {
                self.backend.stroke_rect(image, rect, width, color)
            }
            Some(BorderPlan::Shrink { resize, canvas }) => {
                let image = self.backend.resize(image, resize.0, resize.1)?;
                self.backend
                    .canvas(image, canvas.width, canvas.height, canvas.x, canvas.y, color)
            }
            Some(BorderPlan::Expand { canvas }) => {
                self.backend
                    .canvas(image, canvas.width, canvas.height, canvas.x, canvas.y, color)
            }
            None => Ok(image),
        }
    }

    /// Format falls back to the source format, then JPEG. JPEG output has no
    /// alpha channel, so it is flattened onto white first.
    fn encode(&self, ctx: PipelineContext<'_, B::Image>) -> Result<Rendered, BackendError> {
        let format = ctx
            .params
            .format()
            .or(ctx.source_format)
            .unwrap_or(OutputFormat::Jpg);
        let params = EncodeParams {
            format,
            quality: ctx.params.quality(),
        };

        let mut image = ctx.image;
        if format.is_jpeg() {
            let (w, h) = self.size_of(&image);
            image = self.backend.canvas(image, w, h, 0, 0, Color::WHITE)?;
        }
        let bytes = self.backend.encode(&image, &params)?;

        Ok(Rendered { bytes, format })
    }
}
