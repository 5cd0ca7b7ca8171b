//! Rendition parameters and their typed accessors.
//!
//! A rendition is described by a flat map of parameter name → scalar. Every
//! transform step reads only its own keys through one of the accessors on
//! [`Params`], and every accessor encapsulates that key's validation rule.
//!
//! Invalid values never produce errors. An accessor returns either the
//! documented default (`dpr` → 1.0, `fit` → contain, `quality` → 90, ...) or
//! `None`, which the pipeline treats as "skip this step". Because unset and
//! invalid behave the same way, a rendition can inherit a `null` from the
//! defaults block without enabling anything.
//!
//! ## Types
//!
//! - [`ParamValue`] / [`Params`]: the raw map.
//! - [`Quality`]: encoder quality (0–100, default 90).
//! - [`OutputFormat`]: encode target (`avif`, `gif`, `jpg`, `pjpg`, `png`, `webp`).
//! - [`Fit`] / [`CropFocus`]: how a source is reconciled with a target box.
//! - [`Orientation`], [`FlipAxis`], [`Filter`], [`BorderMethod`], [`Position`].
//! - [`WatermarkParams`]: the `watermark_*` key family.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Numeric view: integers, floats, and strings that parse as a finite number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) if f.is_finite() => Some(*f),
            ParamValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// Integer view: integers, whole floats, and strings of (optionally negative) digits.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            ParamValue::Text(s) => {
                let digits = s.trim_start_matches('-');
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                s.parse::<i64>().ok()
            }
            _ => None,
        }
    }

    /// String view. Numbers are rendered the way they would be written in config.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ParamValue::Text(s) => Some(s.clone()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Ordered parameter map of a rendition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and programmatic renditions.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Whether the key exists at all (a `null` value still counts).
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Raw value, including explicit nulls.
    pub fn raw(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Non-null value for a key.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(ParamValue::as_text)
    }

    fn integer_in(&self, key: &str, min: i64, max: i64) -> Option<i64> {
        self.get(key)
            .and_then(ParamValue::as_integer)
            .filter(|v| (min..=max).contains(v))
    }

    fn number_in(&self, key: &str, min: f64, max: f64) -> Option<f64> {
        self.get(key)
            .and_then(ParamValue::as_number)
            .filter(|v| *v >= min && *v <= max)
    }

    // =========================================================================
    // Size
    // =========================================================================

    /// Requested width. Non-numeric, zero and negative values mean "absent".
    pub fn width(&self) -> Option<u32> {
        positive_pixels(self.get("width"))
    }

    /// Requested height. Same rules as [`Params::width`].
    pub fn height(&self) -> Option<u32> {
        positive_pixels(self.get("height"))
    }

    /// Device pixel ratio in `[0, 8]`; anything else resolves to 1.0.
    pub fn dpr(&self) -> f64 {
        self.number_in("dpr", 0.0, 8.0).unwrap_or(1.0)
    }

    /// Fit mode; unrecognized strings resolve to [`Fit::Contain`].
    pub fn fit(&self) -> Fit {
        self.text("fit")
            .map(|s| Fit::parse(&s))
            .unwrap_or(Fit::Contain)
    }

    /// Per-rendition pixel-count ceiling.
    pub fn max_size(&self) -> Option<u64> {
        self.get("max_size")
            .and_then(ParamValue::as_number)
            .filter(|v| *v > 0.0)
            .map(|v| v as u64)
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Orientation; defaults to EXIF-driven `auto`.
    pub fn orientation(&self) -> Orientation {
        match self.text("orientation").as_deref() {
            Some("0") => Orientation::Rotate(0),
            Some("90") => Orientation::Rotate(90),
            Some("180") => Orientation::Rotate(180),
            Some("270") => Orientation::Rotate(270),
            _ => Orientation::Auto,
        }
    }

    /// Raw `"width,height,x,y"` crop request. Bounds are checked against the
    /// image by the crop step.
    pub fn crop_rect(&self) -> Option<[f64; 4]> {
        let text = self.text("crop")?;
        let parts: Vec<f64> = text
            .split(',')
            .map(|p| p.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
            .collect::<Option<Vec<_>>>()?;
        <[f64; 4]>::try_from(parts).ok()
    }

    pub fn flip(&self) -> Option<FlipAxis> {
        match self.text("flip").as_deref() {
            Some("h") => Some(FlipAxis::Horizontal),
            Some("v") => Some(FlipAxis::Vertical),
            Some("both") => Some(FlipAxis::Both),
            _ => None,
        }
    }

    // =========================================================================
    // Colour and effects
    // =========================================================================

    pub fn brightness(&self) -> Option<i32> {
        self.integer_in("brightness", -100, 100).map(|v| v as i32)
    }

    pub fn contrast(&self) -> Option<i32> {
        self.integer_in("contrast", -100, 100).map(|v| v as i32)
    }

    pub fn gamma(&self) -> Option<f32> {
        self.number_in("gamma", 0.1, 9.99).map(|v| v as f32)
    }

    pub fn sharpen(&self) -> Option<u32> {
        self.number_in("sharpen", 0.0, 100.0).map(|v| v as u32)
    }

    pub fn blur(&self) -> Option<u32> {
        self.number_in("blur", 0.0, 100.0).map(|v| v as u32)
    }

    pub fn pixelate(&self) -> Option<u32> {
        self.number_in("pixelate", 0.0, 1000.0).map(|v| v as u32)
    }

    pub fn filter(&self) -> Option<Filter> {
        match self.text("filter").as_deref() {
            Some("greyscale") => Some(Filter::Greyscale),
            Some("sepia") => Some(Filter::Sepia),
            _ => None,
        }
    }

    /// Background colour string, unparsed.
    pub fn background(&self) -> Option<String> {
        self.text("background")
    }

    /// Border request `"width,color,method"`, split but unresolved.
    pub fn border(&self) -> Option<BorderRequest> {
        let text = self.text("border").filter(|s| !s.is_empty())?;
        let mut parts = text.split(',');
        let width = parts.next().map(|s| ParamValue::Text(s.trim().to_string()))?;
        let color = parts.next().map(|s| s.trim().to_string());
        let method = BorderMethod::parse(parts.next().map(str::trim));
        Some(BorderRequest {
            width,
            color,
            method,
        })
    }

    // =========================================================================
    // Encode
    // =========================================================================

    pub fn format(&self) -> Option<OutputFormat> {
        self.text("format").and_then(|s| OutputFormat::parse(&s))
    }

    pub fn quality(&self) -> Quality {
        self.integer_in("quality", 0, 100)
            .map(|q| Quality(q as u32))
            .unwrap_or_default()
    }

    // =========================================================================
    // Watermark
    // =========================================================================

    /// The `watermark_*` family, present only when a path is set.
    pub fn watermark(&self) -> Option<WatermarkParams> {
        let path = self.text("watermark_path").filter(|p| !p.is_empty())?;
        let dim = |key: &str| self.get(key).cloned();
        Some(WatermarkParams {
            path,
            width: dim("watermark_width"),
            height: dim("watermark_height"),
            fit: self
                .text("watermark_fit")
                .and_then(|s| Fit::parse_watermark(&s))
                .unwrap_or(Fit::Contain),
            offset_x: dim("watermark_offset_x"),
            offset_y: dim("watermark_offset_y"),
            padding: dim("watermark_padding"),
            position: self
                .text("watermark_position")
                .and_then(|s| Position::parse(&s))
                .unwrap_or(Position::BottomRight),
            alpha: self
                .integer_in("watermark_alpha", 0, 100)
                .map(|a| a as u32)
                .unwrap_or(100),
        })
    }
}

fn positive_pixels(value: Option<&ParamValue>) -> Option<u32> {
    value
        .and_then(ParamValue::as_number)
        .filter(|v| *v > 0.0)
        .map(|v| v as u32)
        .filter(|v| *v > 0)
}

/// Quality setting for lossy image encoding (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Encode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Avif,
    Gif,
    Jpg,
    /// Progressive JPEG.
    Pjpg,
    Png,
    Webp,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "avif" => Some(Self::Avif),
            "gif" => Some(Self::Gif),
            "jpg" => Some(Self::Jpg),
            "pjpg" => Some(Self::Pjpg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avif => "avif",
            Self::Gif => "gif",
            Self::Jpg => "jpg",
            Self::Pjpg => "pjpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Avif => "image/avif",
            Self::Gif => "image/gif",
            Self::Jpg | Self::Pjpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// JPEG variants have no alpha channel and are flattened onto white.
    pub fn is_jpeg(self) -> bool {
        matches!(self, Self::Jpg | Self::Pjpg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Focal point of a crop fit: percentages of the resized image plus zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropFocus {
    pub x: u32,
    pub y: u32,
    pub zoom: f64,
}

impl CropFocus {
    pub const CENTER: CropFocus = CropFocus {
        x: 50,
        y: 50,
        zoom: 1.0,
    };

    fn anchor(name: &str) -> Option<Self> {
        let (x, y) = match name {
            "top-left" => (0, 0),
            "top" => (50, 0),
            "top-right" => (100, 0),
            "left" => (0, 50),
            "center" => (50, 50),
            "right" => (100, 50),
            "bottom-left" => (0, 100),
            "bottom" => (50, 100),
            "bottom-right" => (100, 100),
            _ => return None,
        };
        Some(Self { x, y, zoom: 1.0 })
    }

    /// `x-y[-zoom]`, each component one to three digits, zoom optionally
    /// fractional. Any component above 100 resets the whole focus to center.
    fn numeric(suffix: &str) -> Option<Self> {
        let mut parts = suffix.split('-');
        let x = parse_short_int(parts.next()?)?;
        let y = parse_short_int(parts.next()?)?;
        let zoom = match parts.next() {
            Some(z) => parse_zoom(z)?,
            None => 1.0,
        };
        if parts.next().is_some() {
            return None;
        }
        if x > 100 || y > 100 || zoom > 100.0 || zoom <= 0.0 {
            return Some(Self::CENTER);
        }
        Some(Self { x, y, zoom })
    }
}

fn parse_short_int(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_zoom(s: &str) -> Option<f64> {
    let (whole, fraction) = match s.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (s, None),
    };
    parse_short_int(whole)?;
    if let Some(f) = fraction
        && (f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    s.parse().ok()
}

/// How a source is reconciled with the target box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fit {
    Contain,
    Max,
    Fill,
    Stretch,
    Crop(CropFocus),
}

impl Fit {
    /// Parse a `fit` value, falling back to [`Fit::Contain`].
    pub fn parse(value: &str) -> Fit {
        match value {
            "contain" => Fit::Contain,
            "max" => Fit::Max,
            "fill" => Fit::Fill,
            "stretch" => Fit::Stretch,
            "crop" => Fit::Crop(CropFocus::CENTER),
            other => other
                .strip_prefix("crop-")
                .and_then(|suffix| CropFocus::anchor(suffix).or_else(|| CropFocus::numeric(suffix)))
                .map(Fit::Crop)
                .unwrap_or(Fit::Contain),
        }
    }

    /// Watermarks accept a narrower set: no `fill`, no numeric focus.
    pub fn parse_watermark(value: &str) -> Option<Fit> {
        match value {
            "contain" => Some(Fit::Contain),
            "max" => Some(Fit::Max),
            "stretch" => Some(Fit::Stretch),
            "crop" => Some(Fit::Crop(CropFocus::CENTER)),
            other => other
                .strip_prefix("crop-")
                .and_then(CropFocus::anchor)
                .map(Fit::Crop),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Follow the EXIF orientation tag.
    Auto,
    /// Counter-clockwise rotation in degrees.
    Rotate(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Greyscale,
    Sepia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMethod {
    Overlay,
    Shrink,
    Expand,
}

impl BorderMethod {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("shrink") => BorderMethod::Shrink,
            Some("expand") => BorderMethod::Expand,
            _ => BorderMethod::Overlay,
        }
    }
}

/// Parsed `border` parameter. The width is a dimension string resolved
/// against the image at the time the step runs.
#[derive(Debug, Clone, PartialEq)]
pub struct BorderRequest {
    pub width: ParamValue,
    pub color: Option<String>,
    pub method: BorderMethod,
}

/// Nine-point anchor used for watermark placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Position {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "top-left" => Some(Self::TopLeft),
            "top" => Some(Self::Top),
            "top-right" => Some(Self::TopRight),
            "left" => Some(Self::Left),
            "center" => Some(Self::Center),
            "right" => Some(Self::Right),
            "bottom-left" => Some(Self::BottomLeft),
            "bottom" => Some(Self::Bottom),
            "bottom-right" => Some(Self::BottomRight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkParams {
    pub path: String,
    pub width: Option<ParamValue>,
    pub height: Option<ParamValue>,
    pub fit: Fit,
    pub offset_x: Option<ParamValue>,
    pub offset_y: Option<ParamValue>,
    pub padding: Option<ParamValue>,
    pub position: Position,
    pub alpha: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Params::new().quality().value(), 90);
    }

    #[test]
    fn quality_out_of_range_falls_back() {
        assert_eq!(Params::new().with("quality", 150i64).quality().value(), 90);
        assert_eq!(Params::new().with("quality", -1i64).quality().value(), 90);
        assert_eq!(Params::new().with("quality", 0i64).quality().value(), 0);
        assert_eq!(Params::new().with("quality", "75").quality().value(), 75);
    }

    #[test]
    fn width_and_height_treat_non_positive_as_absent() {
        let p = Params::new().with("width", 0i64).with("height", -5i64);
        assert_eq!(p.width(), None);
        assert_eq!(p.height(), None);

        let p = Params::new().with("width", "300").with("height", 200.7);
        assert_eq!(p.width(), Some(300));
        assert_eq!(p.height(), Some(200));

        let p = Params::new().with("width", "wide");
        assert_eq!(p.width(), None);
    }

    #[test]
    fn dpr_clamps_to_one_outside_range() {
        assert_eq!(Params::new().with("dpr", 9i64).dpr(), 1.0);
        assert_eq!(Params::new().with("dpr", -1i64).dpr(), 1.0);
        assert_eq!(Params::new().with("dpr", "abc").dpr(), 1.0);
        assert_eq!(Params::new().with("dpr", 2i64).dpr(), 2.0);
        assert_eq!(Params::new().with("dpr", 1.5).dpr(), 1.5);
        assert_eq!(Params::new().dpr(), 1.0);
    }

    #[test]
    fn fit_named_modes() {
        assert_eq!(Fit::parse("contain"), Fit::Contain);
        assert_eq!(Fit::parse("max"), Fit::Max);
        assert_eq!(Fit::parse("fill"), Fit::Fill);
        assert_eq!(Fit::parse("stretch"), Fit::Stretch);
        assert_eq!(Fit::parse("crop"), Fit::Crop(CropFocus::CENTER));
    }

    #[test]
    fn fit_unknown_resets_to_contain() {
        assert_eq!(Fit::parse("squash"), Fit::Contain);
        assert_eq!(Fit::parse("crop-sideways"), Fit::Contain);
        assert_eq!(Params::new().fit(), Fit::Contain);
    }

    #[test]
    fn fit_crop_anchors() {
        assert_eq!(
            Fit::parse("crop-top-left"),
            Fit::Crop(CropFocus {
                x: 0,
                y: 0,
                zoom: 1.0
            })
        );
        assert_eq!(
            Fit::parse("crop-bottom"),
            Fit::Crop(CropFocus {
                x: 50,
                y: 100,
                zoom: 1.0
            })
        );
        assert_eq!(
            Fit::parse("crop-right"),
            Fit::Crop(CropFocus {
                x: 100,
                y: 50,
                zoom: 1.0
            })
        );
    }

    #[test]
    fn fit_crop_numeric() {
        assert_eq!(
            Fit::parse("crop-0-0"),
            Fit::Crop(CropFocus {
                x: 0,
                y: 0,
                zoom: 1.0
            })
        );
        assert_eq!(
            Fit::parse("crop-25-75-1.5"),
            Fit::Crop(CropFocus {
                x: 25,
                y: 75,
                zoom: 1.5
            })
        );
    }

    #[test]
    fn fit_crop_out_of_range_resets_whole_focus() {
        assert_eq!(Fit::parse("crop-101-102"), Fit::Crop(CropFocus::CENTER));
        assert_eq!(Fit::parse("crop-20-30-101"), Fit::Crop(CropFocus::CENTER));
        // Four digits do not match the numeric form at all.
        assert_eq!(Fit::parse("crop-1000-0"), Fit::Contain);
    }

    #[test]
    fn watermark_fit_rejects_fill_and_numeric() {
        assert_eq!(Fit::parse_watermark("fill"), None);
        assert_eq!(Fit::parse_watermark("crop-10-10"), None);
        assert_eq!(
            Fit::parse_watermark("crop-top"),
            Some(Fit::Crop(CropFocus {
                x: 50,
                y: 0,
                zoom: 1.0
            }))
        );
    }

    #[test]
    fn orientation_defaults_to_auto() {
        assert_eq!(Params::new().orientation(), Orientation::Auto);
        assert_eq!(
            Params::new().with("orientation", 90i64).orientation(),
            Orientation::Rotate(90)
        );
        assert_eq!(
            Params::new().with("orientation", "45").orientation(),
            Orientation::Auto
        );
    }

    #[test]
    fn colour_adjustments_validate_ranges() {
        let p = Params::new()
            .with("brightness", 50i64)
            .with("contrast", -101i64)
            .with("gamma", 10.0)
            .with("sharpen", 20i64)
            .with("blur", 101i64)
            .with("pixelate", 1000i64);
        assert_eq!(p.brightness(), Some(50));
        assert_eq!(p.contrast(), None);
        assert_eq!(p.gamma(), None);
        assert_eq!(p.sharpen(), Some(20));
        assert_eq!(p.blur(), None);
        assert_eq!(p.pixelate(), Some(1000));
    }

    #[test]
    fn brightness_rejects_fractional_strings() {
        assert_eq!(Params::new().with("brightness", "1.5").brightness(), None);
        assert_eq!(Params::new().with("brightness", "-20").brightness(), Some(-20));
    }

    #[test]
    fn crop_rect_requires_four_numbers() {
        assert_eq!(
            Params::new().with("crop", "100,50,10,20").crop_rect(),
            Some([100.0, 50.0, 10.0, 20.0])
        );
        assert_eq!(Params::new().with("crop", "100,50,10").crop_rect(), None);
        assert_eq!(Params::new().with("crop", "a,b,c,d").crop_rect(), None);
    }

    #[test]
    fn border_defaults_to_overlay() {
        let b = Params::new().with("border", "10,5000,bogus").border().unwrap();
        assert_eq!(b.width, ParamValue::Text("10".into()));
        assert_eq!(b.color.as_deref(), Some("5000"));
        assert_eq!(b.method, BorderMethod::Overlay);

        let b = Params::new().with("border", "2w,red,expand").border().unwrap();
        assert_eq!(b.method, BorderMethod::Expand);
    }

    #[test]
    fn format_accepts_known_values_only() {
        assert_eq!(
            Params::new().with("format", "pjpg").format(),
            Some(OutputFormat::Pjpg)
        );
        assert_eq!(Params::new().with("format", "tiff").format(), None);
        assert_eq!(OutputFormat::Pjpg.mime_type(), "image/jpeg");
    }

    #[test]
    fn watermark_requires_path() {
        assert!(Params::new().with("watermark_alpha", 50i64).watermark().is_none());

        let wm = Params::new()
            .with("watermark_path", "logo.png")
            .with("watermark_alpha", 150i64)
            .with("watermark_position", "nowhere")
            .watermark()
            .unwrap();
        assert_eq!(wm.alpha, 100);
        assert_eq!(wm.position, Position::BottomRight);
        assert_eq!(wm.fit, Fit::Contain);
    }

    #[test]
    fn null_values_read_as_absent() {
        let p = Params::new().with("width", ParamValue::Null);
        assert!(p.contains("width"));
        assert!(p.get("width").is_none());
        assert_eq!(p.width(), None);
    }
}
