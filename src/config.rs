//! Rendition configuration module.
//!
//! Handles loading, validating, and normalising `renditions.toml`. User
//! values are merged over stock defaults, unknown keys are rejected, and the
//! result is turned into a [`Catalog`].
//!
//! ## Configuration Options
//!
//! ```toml
//! image_path = "public"             # Source images
//! render_path = "public/render"     # Rendered cache
//! # watermark_path = "watermarks"   # Watermark images (default: image_path)
//! # max_image_size = 16000000       # Pixel-count ceiling for every rendition
//!
//! [processing]
//! # max_processes = 4               # Max parallel workers (omit for auto)
//!
//! [defaults]                        # Inherited by every rendition
//! format = "webp"
//! quality = 90
//!
//! [renditions.1920x1080]
//! width = 1920
//! height = 1080
//!
//! [renditions.thumb]
//! width = "160px"
//! ratio = "4:3"
//! fit = "crop-top"
//! watermark = { path = "logo.png", width = "20w", alpha = 60 }
//!
//! [sets.hero]
//! renditions = ["thumb", "1920x1080"]
//! media_queries = ["(min-width: 1200px) 1920px", "100vw"]
//! ```
//!
//! Per-parameter values a renderer can shrug off (an unknown `fit`, a bad
//! colour) pass through untouched and fall back at render time. Values that
//! are out of range, or a watermark without a path, fail the load.

use crate::imaging::{OutputFormat, ParamValue, Params};
use crate::rendition::{Catalog, CatalogError, RenderDefaults, SetDefinition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "renditions.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Cache configuration loaded from `renditions.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Base directory of the source images.
    pub image_path: String,
    /// Base directory of the rendered cache.
    pub render_path: String,
    /// Base directory watermark paths are relative to.
    pub watermark_path: Option<String>,
    /// Pixel-count ceiling for renditions without their own `max_size`.
    pub max_image_size: Option<u64>,
    pub processing: ProcessingConfig,
    /// Values every rendition inherits unless it sets them itself.
    pub defaults: RenditionConfig,
    pub renditions: BTreeMap<String, RenditionConfig>,
    pub sets: BTreeMap<String, SetDefinition>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            image_path: "public".to_string(),
            render_path: "public/render".to_string(),
            watermark_path: None,
            max_image_size: None,
            processing: ProcessingConfig::default(),
            defaults: RenditionConfig::default(),
            renditions: BTreeMap::new(),
            sets: BTreeMap::new(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// A TOML scalar as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&Scalar> for ParamValue {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Int(i) => ParamValue::Int(*i),
            Scalar::Float(f) => ParamValue::Float(*f),
            Scalar::Text(s) => ParamValue::Text(s.clone()),
        }
    }
}

/// One rendition (or the `[defaults]` block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenditionConfig {
    pub dpr: Option<f64>,
    pub format: Option<String>,
    pub quality: Option<i64>,
    pub max_size: Option<u64>,
    pub ratio: Option<Scalar>,
    pub width: Option<Scalar>,
    pub height: Option<Scalar>,
    pub orientation: Option<Scalar>,
    pub crop: Option<String>,
    pub fit: Option<String>,
    pub flip: Option<String>,
    pub background: Option<String>,
    pub brightness: Option<i64>,
    pub contrast: Option<i64>,
    pub gamma: Option<f64>,
    pub blur: Option<i64>,
    pub filter: Option<String>,
    pub pixelate: Option<i64>,
    pub sharpen: Option<i64>,
    pub border: Option<String>,
    pub watermark: Option<WatermarkConfig>,
}

/// Watermark overlay settings. `path` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatermarkConfig {
    pub path: String,
    #[serde(default)]
    pub width: Option<Scalar>,
    #[serde(default)]
    pub height: Option<Scalar>,
    #[serde(default)]
    pub fit: Option<String>,
    #[serde(default)]
    pub offset_x: Option<Scalar>,
    #[serde(default)]
    pub offset_y: Option<Scalar>,
    #[serde(default)]
    pub padding: Option<Scalar>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub alpha: Option<i64>,
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(
    context: &str,
    key: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    match value {
        Some(v) if v < min || v > max => Err(ConfigError::Validation(format!(
            "{context}.{key} must be {min}-{max}, got {v}"
        ))),
        _ => Ok(()),
    }
}

/// `1.5`, `"4:3"`, `"4x3"`, `"4_3"` or `"4-3"` as width over height.
fn parse_ratio(value: &Scalar) -> Option<f64> {
    if let Some(n) = value.as_number() {
        return Some(n).filter(|n| *n > 0.0);
    }
    let Scalar::Text(text) = value else {
        return None;
    };
    let (x, y) = text.split_once(['x', ':', '_', '-'])?;
    let (x, y): (f64, f64) = (x.trim().parse().ok()?, y.trim().parse().ok()?);
    Some(x / y).filter(|r| r.is_finite() && *r > 0.0)
}

/// Pixel count from `640`, `640.0` or `"640px"`.
fn parse_pixels(value: &Scalar) -> Option<i64> {
    match value {
        Scalar::Int(i) => Some(*i),
        Scalar::Float(f) => Some(f.round() as i64),
        Scalar::Text(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
    }
}

impl RenditionConfig {
    /// Check every range-bound value.
    pub fn validate(&self, context: &str) -> Result<(), ConfigError> {
        check_range(context, "dpr", self.dpr, 0.0, 8.0)?;
        check_range(context, "quality", self.quality, 0, 100)?;
        check_range(context, "brightness", self.brightness, -100, 100)?;
        check_range(context, "contrast", self.contrast, -100, 100)?;
        check_range(context, "gamma", self.gamma, 0.1, 9.99)?;
        check_range(context, "blur", self.blur, 0, 100)?;
        check_range(context, "sharpen", self.sharpen, 0, 100)?;
        check_range(context, "pixelate", self.pixelate, 0, 1000)?;
        if let Some(format) = &self.format
            && OutputFormat::parse(format).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "{context}.format must be one of avif, gif, jpg, pjpg, png, webp, got \"{format}\""
            )));
        }
        if let Some(ratio) = &self.ratio
            && parse_ratio(ratio).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "{context}.ratio must be a positive number or W:H, got {ratio:?}"
            )));
        }
        for (key, value) in [("width", &self.width), ("height", &self.height)] {
            if let Some(v) = value
                && parse_pixels(v).is_none()
            {
                return Err(ConfigError::Validation(format!(
                    "{context}.{key} must be a pixel count, got {v:?}"
                )));
            }
        }
        if let Some(watermark) = &self.watermark {
            if watermark.path.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{context}.watermark.path must not be empty"
                )));
            }
            check_range(context, "watermark.alpha", watermark.alpha, 0, 100)?;
        }
        Ok(())
    }

    /// Flatten into a parameter map. Width and height are reduced to pixel
    /// counts; a ratio fills in (or, with a width, overrides) the height.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        let mut put = |key: &str, value: Option<ParamValue>| {
            if let Some(v) = value {
                params.set(key, v);
            }
        };

        let ratio = self.ratio.as_ref().and_then(parse_ratio);
        let mut width = self.width.as_ref().and_then(parse_pixels);
        let mut height = self.height.as_ref().and_then(parse_pixels);
        match (ratio, width, height) {
            (Some(r), Some(w), _) if w > 0 => height = Some((w as f64 / r) as i64),
            (Some(r), None, Some(h)) if h > 0 => width = Some((h as f64 * r) as i64),
            _ => {}
        }

        put("dpr", self.dpr.map(ParamValue::Float));
        put("format", self.format.clone().map(ParamValue::Text));
        put("quality", self.quality.map(ParamValue::Int));
        put("max_size", self.max_size.map(|v| ParamValue::Int(v as i64)));
        put("ratio", ratio.map(ParamValue::Float));
        put("width", width.map(ParamValue::Int));
        put("height", height.map(ParamValue::Int));
        put("orientation", self.orientation.as_ref().map(ParamValue::from));
        put("crop", self.crop.clone().map(ParamValue::Text));
        put("fit", self.fit.clone().map(ParamValue::Text));
        put("flip", self.flip.clone().map(ParamValue::Text));
        put("background", self.background.clone().map(ParamValue::Text));
        put("brightness", self.brightness.map(ParamValue::Int));
        put("contrast", self.contrast.map(ParamValue::Int));
        put("gamma", self.gamma.map(ParamValue::Float));
        put("blur", self.blur.map(ParamValue::Int));
        put("filter", self.filter.clone().map(ParamValue::Text));
        put("pixelate", self.pixelate.map(ParamValue::Int));
        put("sharpen", self.sharpen.map(ParamValue::Int));
        put("border", self.border.clone().map(ParamValue::Text));

        if let Some(w) = &self.watermark {
            let scalar = |s: &Option<Scalar>| s.as_ref().map(ParamValue::from);
            put("watermark_path", Some(ParamValue::Text(w.path.clone())));
            put("watermark_width", scalar(&w.width));
            put("watermark_height", scalar(&w.height));
            put("watermark_fit", w.fit.clone().map(ParamValue::Text));
            put("watermark_offset_x", scalar(&w.offset_x));
            put("watermark_offset_y", scalar(&w.offset_y));
            put("watermark_padding", scalar(&w.padding));
            put("watermark_position", w.position.clone().map(ParamValue::Text));
            put("watermark_alpha", w.alpha.map(ParamValue::Int));
        }
        params
    }
}

impl RenderConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image_path.trim().is_empty() || self.render_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "image_path and render_path must not be empty".into(),
            ));
        }
        if self.max_image_size == Some(0) {
            return Err(ConfigError::Validation(
                "max_image_size must be positive".into(),
            ));
        }
        self.defaults.validate("defaults")?;
        for (name, rendition) in &self.renditions {
            if matches!(name.as_str(), "" | "." | "..") || name.contains(['/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "rendition name \"{name}\" must be a single path segment"
                )));
            }
            rendition.validate(&format!("renditions.{name}"))?;
        }
        Ok(())
    }

    /// Resolve renditions and sets. Fails when a set names an unknown
    /// rendition.
    pub fn build_catalog(&self) -> Result<Catalog, ConfigError> {
        Ok(Catalog::new(
            self.renditions
                .iter()
                .map(|(name, r)| (name.clone(), r.to_params())),
            self.sets
                .iter()
                .map(|(name, set)| (name.clone(), set.clone())),
            RenderDefaults::new(self.defaults.to_params()),
        )?)
    }

    pub fn image_root(&self) -> PathBuf {
        PathBuf::from(&self.image_path)
    }

    pub fn render_root(&self) -> PathBuf {
        PathBuf::from(&self.render_path)
    }

    /// Watermark base directory, falling back to the image directory.
    pub fn watermark_root(&self) -> PathBuf {
        PathBuf::from(self.watermark_path.as_deref().unwrap_or(&self.image_path))
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(RenderConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse TOML text over the stock defaults, then validate.
pub fn parse_config(content: &str) -> Result<RenderConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(content)?;
    let config: RenderConfig = merge_toml(stock_defaults_value()?, overlay).try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load a config file. A missing file yields the validated stock defaults.
pub fn load_config(path: &Path) -> Result<RenderConfig, ConfigError> {
    if !path.exists() {
        return parse_config("");
    }
    parse_config(&fs::read_to_string(path)?)
}

/// Returns a fully-commented stock `renditions.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Rendition cache configuration
# =============================
# Paths are relative to the working directory.
# Unknown keys will cause an error.

# Source images.
image_path = "public"

# Rendered cache. Files land at
#   {render_path}/{rendition}/{source ext}/{source dir}/{name}.{format}
render_path = "public/render"

# Base directory for watermark images (default: image_path).
# watermark_path = "watermarks"

# Pixel-count ceiling applied to renditions without their own max_size.
# max_image_size = 16000000

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel render workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Defaults inherited by every rendition (except width and height)
# ---------------------------------------------------------------------------
[defaults]
# avif, gif, jpg, pjpg, png or webp. Falls back to webp.
format = "webp"

# Encoding quality (0 = worst, 100 = best).
quality = 90

# Device pixel ratio applied to width and height (0-8).
# dpr = 1.0

# ---------------------------------------------------------------------------
# Renditions
# ---------------------------------------------------------------------------
# Every key is optional:
#   width, height     pixels, "640px" accepted
#   ratio             1.5 or "4:3"; derives the missing dimension
#   fit               contain | max | fill | stretch | crop[-position|-x-y[-zoom]]
#   max_size          pixel-count ceiling
#   orientation       auto | 0 | 90 | 180 | 270
#   crop              "width,height,x,y" applied before resizing
#   flip              h | v | both
#   background        colour behind transparent areas ("fff", "#80ff0000", "red")
#   brightness        -100..100
#   contrast          -100..100
#   gamma             0.1..9.99
#   sharpen           0..100
#   blur              0..100
#   pixelate          0..1000
#   filter            greyscale | sepia
#   border            "width,colour,method", method overlay | shrink | expand
#   watermark         { path, width, height, fit, offset_x, offset_y,
#                       padding, position, alpha }
#
# [renditions.1920x1080]
# width = 1920
# height = 1080
#
# [renditions.thumb]
# width = 320
# ratio = "4:3"
# fit = "crop"

# ---------------------------------------------------------------------------
# Sets: groups of renditions for responsive <img srcset> markup
# ---------------------------------------------------------------------------
# [sets.hero]
# renditions = ["thumb", "1920x1080"]
# media_queries = ["(min-width: 1200px) 1920px", "100vw"]
"##
}
