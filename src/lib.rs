//! # Rendition Cache
//!
//! Derives cached, transformed copies ("renditions") of source images on
//! demand and keeps the cache consistent with its sources.
//!
//! A rendition is a named set of transform parameters (`width`, `fit`,
//! `format`, `watermark`, ...) applied uniformly to any source image. Every
//! rendered file lives at a path that encodes where it came from:
//!
//! ```text
//! public/blog/cat.jpg  --(1920x1080, webp)-->  render/1920x1080/jpg/blog/cat.webp
//! ```
//!
//! so the cache can be inverted back to its sources without a side index,
//! and a whole rendition can be dropped by deleting one directory.
//!
//! # Architecture
//!
//! ```text
//! Supervisor ─→ Finder ─→ pathname ─→ Responder ─→ Pipeline ─→ ImageBackend
//!  (batches)    (scan)    (keys)      (freshness)   (steps)     (pixels)
//!                                          │
//!                                          └─→ CacheStore (filesystem | memory)
//! ```
//!
//! Freshness is a single rule: a cache entry is valid when its modification
//! time equals the source's exactly. Renders stamp the entry with the source
//! mtime, so the check never needs to read either file.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pathname`] | Reversible `(source, rendition) ↔ cache path` mapping |
//! | [`rendition`] | `Rendition`, `RenditionSet` and the validated `Catalog` |
//! | [`imaging`] | Parameters, geometry, the transform pipeline and backends |
//! | [`filesystem`] | Base-relative file access, atomic writes, image discovery |
//! | [`store`] | `CacheStore` trait with filesystem and in-memory stores |
//! | [`responder`] | Render-on-miss cache front with per-key locking |
//! | [`supervisor`] | Parallel prime / expire / verify batches |
//! | [`srcset`] | Public URIs and `srcset`/`sizes` attributes |
//! | [`config`] | `renditions.toml` loading, validation and normalisation |
//!
//! # Design Decisions
//!
//! ## Fail-Open Parameters
//!
//! A bad per-rendition value (unknown `fit`, out-of-range `brightness`,
//! unparseable colour) disables that one step instead of failing the render.
//! Range checks that *can* fail happen once, when the config is loaded.
//!
//! ## Pure-Rust Imaging
//!
//! [`imaging::RustBackend`] uses the `image` crate for decode, resampling and
//! encode, and `rav1d` for AVIF decode. No system libraries are needed.
//! The [`imaging::ImageBackend`] trait keeps the pipeline testable with a
//! recording mock that never touches pixels.

pub mod config;
pub mod filesystem;
pub mod imaging;
pub mod pathname;
pub mod rendition;
pub mod responder;
pub mod srcset;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_helpers;
