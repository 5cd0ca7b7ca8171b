//! Public URIs and responsive `srcset`/`sizes` attributes for renditions.
//!
//! URIs are cache keys prefixed by the render directory expressed relative
//! to the image directory, so with images in `public/` and the cache in
//! `public/render/`, `blog/cat.jpg` at rendition `thumb` is served from
//! `/render/thumb/jpg/blog/cat.webp`.

use crate::filesystem::FileInfo;
use crate::pathname;
use crate::rendition::{Catalog, CatalogError, Rendition};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Separator between `srcset` candidates and between `sizes` entries.
pub const DEFAULT_SEPARATOR: &str = ",\n";

#[derive(Error, Debug)]
pub enum SrcsetError {
    #[error("Pathname missing.")]
    MissingPathname,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// One member of a set as seen by a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrcsetEntry {
    pub rendition: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Relative to the image directory, no leading slash.
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct SrcsetGenerator {
    catalog: Arc<Catalog>,
    images_path: PathBuf,
    render_prefix: String,
}

impl SrcsetGenerator {
    pub fn new(catalog: Arc<Catalog>, images_path: &Path, render_path: &Path) -> Self {
        Self {
            catalog,
            images_path: images_path.to_path_buf(),
            render_prefix: relative_path(images_path, render_path),
        }
    }

    fn cache_path(&self, pathname: &str, rendition: &Rendition) -> Result<String, SrcsetError> {
        if pathname.is_empty() {
            return Err(SrcsetError::MissingPathname);
        }
        let source = FileInfo::new(&self.images_path, pathname);
        Ok(join(&self.render_prefix, &pathname::generate(&source, rendition)))
    }

    /// Absolute URI of `pathname` rendered with `rendition`.
    pub fn uri(&self, pathname: &str, rendition: &str) -> Result<String, SrcsetError> {
        let rendition = self.catalog.get(rendition)?;
        Ok(format!("/{}", self.cache_path(pathname, &rendition)?))
    }

    /// Every member of `set` for `pathname`, in set order.
    pub fn entries(&self, pathname: &str, set: &str) -> Result<Vec<SrcsetEntry>, SrcsetError> {
        self.catalog
            .get_set(set)?
            .renditions()
            .iter()
            .map(|r| {
                Ok(SrcsetEntry {
                    rendition: r.name().to_string(),
                    width: r.params().width(),
                    height: r.params().height(),
                    uri: self.cache_path(pathname, r)?,
                })
            })
            .collect()
    }

    /// The set's media queries, for a `sizes` attribute.
    pub fn sizes(&self, pathname: &str, set: &str) -> Result<Vec<String>, SrcsetError> {
        if pathname.is_empty() {
            return Err(SrcsetError::MissingPathname);
        }
        Ok(self.catalog.get_set(set)?.media_queries().to_vec())
    }

    /// `srcset="..." sizes="..."` for an `<img>` tag. Members without a
    /// configured width have no `w` descriptor and are left out.
    pub fn attributes(
        &self,
        pathname: &str,
        set: &str,
        separator: &str,
    ) -> Result<String, SrcsetError> {
        let candidates: Vec<String> = self
            .entries(pathname, set)?
            .into_iter()
            .filter_map(|e| e.width.map(|w| format!("/{} {w}w", e.uri)))
            .collect();
        let sizes = self.sizes(pathname, set)?;
        Ok(format!(
            "srcset=\"{}\" sizes=\"{}\"",
            candidates.join(separator),
            sizes.join(separator)
        ))
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

/// `to` relative to `from`, forward slashes, `..` where they diverge.
fn relative_path(from: &Path, to: &Path) -> String {
    let normal = |p: &Path| -> Vec<String> {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect()
    };
    let (from, to) = (normal(from), normal(to));
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    std::iter::repeat_n("..".to_string(), from.len() - common)
        .chain(to[common..].iter().cloned())
        .collect::<Vec<_>>()
        .join("/")
}
