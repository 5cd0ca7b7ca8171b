//! Reversible mapping between (source, rendition) and cache paths.
//!
//! ```text
//! {rendition}/{source ext}/{source dir}/{stem}.{output format}
//! ```
//!
//! The source extension is kept as its own segment so the source path can be
//! recovered from the cache path alone: `1920x1080/jpg/blog/cat.webp` resolves
//! back to `blog/cat.jpg` rendered with `1920x1080`. A source at the base root
//! has no directory segment (`thumb/png/logo.webp`).
//!
//! Every function here is pure and uses forward slashes on every platform.

use crate::filesystem::FileInfo;
use crate::rendition::Rendition;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathnameError {
    #[error(
        "\"{0}\" is not a render cache path: expected at least rendition/extension/file \
         (did you pass the source path instead?)"
    )]
    InvalidPath(String),
}

/// Cache path of `source` rendered with `rendition`.
pub fn generate(source: &FileInfo, rendition: &Rendition) -> String {
    let file = format!("{}.{}", source.stem(), rendition.format());
    [
        rendition.name(),
        source.extension(),
        source.relative_dir(),
        &file,
    ]
    .iter()
    .filter(|segment| !segment.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join("/")
}

fn segments(cache_path: &str) -> Vec<&str> {
    cache_path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Relative source path a cache path was generated from.
///
/// The output extension is the text after the last dot of the file name.
/// A file name whose only dot is the leading one (`.webp`) has no
/// extension, matching [`Path::extension`](std::path::Path::extension), so
/// `r/jpg/.webp` resolves to `.webp.jpg`.
pub fn resolve(cache_path: &str) -> Result<String, PathnameError> {
    let parts = segments(cache_path);
    if parts.len() < 3 {
        return Err(PathnameError::InvalidPath(cache_path.to_string()));
    }
    let extension = parts[1];
    let remainder = parts[2..].join("/");
    let stem = match remainder.rfind('.') {
        Some(dot) if dot > remainder.rfind('/').map_or(0, |slash| slash + 1) => &remainder[..dot],
        _ => remainder.as_str(),
    };
    Ok(format!("{stem}.{extension}"))
}

/// Name of the rendition a cache path belongs to (its first segment).
pub fn resolve_rendition_name(cache_path: &str) -> Result<String, PathnameError> {
    segments(cache_path)
        .first()
        .map(|s| s.to_string())
        .ok_or_else(|| PathnameError::InvalidPath(cache_path.to_string()))
}

/// Top-level cache directory holding every file of a rendition.
pub fn base(rendition: &Rendition) -> String {
    rendition.name().to_string()
}
