//! Image transformation: parameters in, encoded bytes out.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader`, `avif-parse` + `rav1d` for AVIF |
//! | **Resize / crop / canvas** | `image::imageops` (Lanczos3) |
//! | **Adjustments** | `image` filters plus per-pixel maps |
//! | **Encode** | `image::codecs` (jpeg, png, gif, webp, avif/rav1e) |
//!
//! The module is split into:
//! - **Parameters**: typed views over rendition key/value maps
//! - **Color**: hex and CSS colour parsing
//! - **Calculations**: pure geometry (constrain, crop focus, placement)
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Pipeline**: the fixed step order, driving any backend

pub mod backend;
mod calculations;
mod color;
mod params;
pub mod pipeline;
pub mod rust_backend;

pub use backend::{Adjustment, BackendError, Dimensions, EncodeParams, ImageBackend};
pub use calculations::{Rect, constrain};
pub use color::Color;
pub use params::{
    BorderMethod, CropFocus, Filter, Fit, FlipAxis, Orientation, OutputFormat, ParamValue, Params,
    Position, Quality,
};
pub use pipeline::{Pipeline, Rendered, Step};
pub use rust_backend::RustBackend;
