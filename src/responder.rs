//! Render-on-miss cache front.
//!
//! A cache entry is valid when it exists and its stamped mtime equals the
//! source's current mtime exactly. Anything else (missing entry, source
//! touched forward or backward) runs the pipeline, stores the bytes, and
//! stamps the entry with the source mtime rather than the wall clock.
//!
//! The check-then-write sequence holds a lock for its cache key, so two
//! callers asking for the same source and rendition render once. Different
//! keys never wait on each other.

use crate::filesystem::{FileInfo, Filesystem};
use crate::imaging::{BackendError, ImageBackend, Pipeline};
use crate::pathname;
use crate::rendition::{Rendition, RenditionSet};
use crate::store::CacheStore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("source image {path}: {source}")]
    Source { path: String, source: io::Error },
    #[error("cache entry {key}: {source}")]
    Store { key: String, source: io::Error },
    #[error("rendering {key}: {source}")]
    Backend { key: String, source: BackendError },
    #[error("cache lock for {0} poisoned")]
    Poisoned(String),
}

/// Whether a response came from the store or a fresh render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Rendered,
}

/// Rendered bytes as handed to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResponse {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// Source mtime the entry is stamped with.
    pub last_modified: i64,
    pub status: CacheStatus,
}

impl ImageResponse {
    /// SHA-256 hex digest of the bytes.
    pub fn etag(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }
}

/// Per-key mutexes, dropped again once nobody holds them.
#[derive(Default)]
struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn with<T>(
        &self,
        key: &str,
        f: impl FnOnce() -> Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        let poisoned = || RenderError::Poisoned(key.to_string());
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| poisoned())?;
            slots.entry(key.to_string()).or_default().clone()
        };
        let result = {
            let _guard = slot.lock().map_err(|_| poisoned())?;
            f()
        };
        drop(slot);

        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        if slots.get(key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

/// Serves renditions of source images out of a [`CacheStore`].
pub struct Responder<S: CacheStore, B: ImageBackend> {
    sources: Filesystem,
    store: S,
    pipeline: Pipeline<B>,
    locks: KeyedLocks,
}

impl<S: CacheStore, B: ImageBackend> Responder<S, B> {
    pub fn new(sources: Filesystem, store: S, pipeline: Pipeline<B>) -> Self {
        Self {
            sources,
            store,
            pipeline,
            locks: KeyedLocks::default(),
        }
    }

    pub fn sources(&self) -> &Filesystem {
        &self.sources
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    /// Cache key of `source` rendered with `rendition`.
    pub fn file_name(&self, source: &FileInfo, rendition: &Rendition) -> String {
        pathname::generate(source, rendition)
    }

    /// Cache keys of every member of `set`, by rendition name.
    pub fn file_names(&self, source: &FileInfo, set: &RenditionSet) -> BTreeMap<String, String> {
        set.renditions()
            .iter()
            .map(|r| (r.name().to_string(), self.file_name(source, r)))
            .collect()
    }

    fn source_mtime(&self, source: &FileInfo) -> Result<i64, RenderError> {
        source.mtime().map_err(|e| RenderError::Source {
            path: source.relative.clone(),
            source: e,
        })
    }

    fn stamped(&self, key: &str) -> Result<Option<i64>, RenderError> {
        self.store.mtime(key).map_err(|e| RenderError::Store {
            key: key.to_string(),
            source: e,
        })
    }

    /// True when the cache entry exists and carries the source's mtime.
    pub fn is_fresh(&self, source: &FileInfo, rendition: &Rendition) -> Result<bool, RenderError> {
        let mtime = self.source_mtime(source)?;
        Ok(self.stamped(&self.file_name(source, rendition))? == Some(mtime))
    }

    /// Cached bytes when fresh, otherwise render, store and stamp.
    pub fn respond(
        &self,
        source: &FileInfo,
        rendition: &Rendition,
    ) -> Result<ImageResponse, RenderError> {
        let key = self.file_name(source, rendition);
        self.locks.with(&key, || {
            let mtime = self.source_mtime(source)?;
            if self.stamped(&key)? == Some(mtime) {
                let cached = self.store.get(&key).map_err(|e| RenderError::Store {
                    key: key.clone(),
                    source: e,
                })?;
                if let Some(bytes) = cached {
                    debug!(%key, "cache hit");
                    return Ok(ImageResponse {
                        bytes,
                        mime_type: rendition.format().mime_type(),
                        last_modified: mtime,
                        status: CacheStatus::Hit,
                    });
                }
            }
            self.render(&key, source, rendition, mtime)
        })
    }

    /// Respond with every member of `set`, keyed by rendition name.
    pub fn respond_batch(
        &self,
        source: &FileInfo,
        set: &RenditionSet,
    ) -> Result<BTreeMap<String, ImageResponse>, RenderError> {
        set.renditions()
            .iter()
            .map(|r| Ok((r.name().to_string(), self.respond(source, r)?)))
            .collect()
    }

    fn render(
        &self,
        key: &str,
        source: &FileInfo,
        rendition: &Rendition,
        mtime: i64,
    ) -> Result<ImageResponse, RenderError> {
        let input = source.read().map_err(|e| RenderError::Source {
                path: source.relative.clone(),
                source: e,
            })?;
        let rendered = self
            .pipeline
            .render(&input, rendition.params())
            .map_err(|e| RenderError::Backend {
                key: key.to_string(),
                source: e,
            })?;
        self.store
            .put(key, &rendered.bytes, mtime)
            .map_err(|e| RenderError::Store {
                key: key.to_string(),
                source: e,
            })?;
        info!(%key, bytes = rendered.bytes.len(), "rendered");

        Ok(ImageResponse {
            mime_type: rendered.format.mime_type(),
            bytes: rendered.bytes,
            last_modified: mtime,
            status: CacheStatus::Rendered,
        })
    }
}
