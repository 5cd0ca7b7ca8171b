//! Batch lifecycle operations over the render cache.
//!
//! No index is kept: every operation derives its work list from a scan of
//! the source tree or the cache store, and inverts cache keys back to
//! sources through [`pathname::resolve`].
//!
//! | Operation | Work units |
//! |---|---|
//! | `prime_*` | source × rendition pairs, rendered when stale or missing |
//! | `expire_rendition` / `expire_set` | one subtree removal per rendition |
//! | `expire_file` | every rendition of one source |
//! | `verify` | every cache key, classified as fresh, stale, orphan or invalid |
//!
//! Units are independent and run on the rayon pool. A failure in one unit
//! is logged and counted; the batch continues. Each log line starts with a
//! tag (`[RENDER]`, `[OK]`, `[ORPHAN]`, `[DELETE]`, `[INVALID]`, `[ERROR]`).

use crate::filesystem::{FileInfo, Finder};
use crate::imaging::ImageBackend;
use crate::pathname;
use crate::rendition::{Catalog, CatalogError, Rendition};
use crate::responder::Responder;
use crate::store::CacheStore;
use rayon::prelude::*;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("source image not found: {0}")]
    SourceNotFound(String),
}

/// Counts of what a batch did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    pub rendered: u32,
    pub fresh: u32,
    pub removed: u32,
    pub orphaned: u32,
    pub invalid: u32,
    pub failed: u32,
    /// Units not started because the deadline had passed.
    pub skipped: u32,
}

impl SupervisorReport {
    fn merge(mut self, other: Self) -> Self {
        self.rendered += other.rendered;
        self.fresh += other.fresh;
        self.removed += other.removed;
        self.orphaned += other.orphaned;
        self.invalid += other.invalid;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.invalid == 0 && self.orphaned == 0 && self.skipped == 0
    }
}

impl fmt::Display for SupervisorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.rendered, "rendered"),
            (self.fresh, "fresh"),
            (self.removed, "removed"),
            (self.orphaned, "orphaned"),
            (self.invalid, "invalid"),
            (self.failed, "failed"),
            (self.skipped, "skipped"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();
        if parts.is_empty() {
            write!(f, "nothing to do")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Runs prime, expire and verify batches against a [`Responder`].
pub struct Supervisor<S: CacheStore, B: ImageBackend> {
    catalog: Arc<Catalog>,
    responder: Responder<S, B>,
    finder: Finder,
    deadline: Option<Instant>,
}

impl<S: CacheStore, B: ImageBackend> Supervisor<S, B> {
    pub fn new(catalog: Arc<Catalog>, responder: Responder<S, B>) -> Self {
        Self {
            catalog,
            responder,
            finder: Finder::new(),
            deadline: None,
        }
    }

    /// Units starting after `deadline` are skipped.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn responder(&self) -> &Responder<S, B> {
        &self.responder
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn skipped() -> SupervisorReport {
        SupervisorReport {
            skipped: 1,
            ..Default::default()
        }
    }

    // ---------------------------------------------------------------------
    // Prime
    // ---------------------------------------------------------------------

    /// Render one rendition for every image below `paths` (all images when
    /// empty).
    pub fn prime_rendition(
        &self,
        name: &str,
        paths: &[String],
    ) -> Result<SupervisorReport, SupervisorError> {
        let rendition = self.catalog.get(name)?;
        let sources = self.find(paths)?;
        Ok(self.prime(&sources, &[rendition]))
    }

    /// Render every member of a set for every image below `paths`.
    pub fn prime_set(
        &self,
        name: &str,
        paths: &[String],
    ) -> Result<SupervisorReport, SupervisorError> {
        let renditions = self.catalog.get_set(name)?.renditions().to_vec();
        let sources = self.find(paths)?;
        Ok(self.prime(&sources, &renditions))
    }

    /// Render the named renditions (every rendition when empty) of one image.
    pub fn prime_file(
        &self,
        path: &str,
        renditions: &[String],
    ) -> Result<SupervisorReport, SupervisorError> {
        let source = self.source(path)?;
        let renditions = self.renditions(renditions)?;
        Ok(self.prime(&[source], &renditions))
    }

    fn find(&self, paths: &[String]) -> Result<Vec<FileInfo>, SupervisorError> {
        Ok(self.finder.find(self.responder.sources(), paths)?)
    }

    fn source(&self, path: &str) -> Result<FileInfo, SupervisorError> {
        let source = self.responder.sources().file_info(path);
        if !source.exists() {
            return Err(SupervisorError::SourceNotFound(path.to_string()));
        }
        Ok(source)
    }

    fn renditions(&self, names: &[String]) -> Result<Vec<Arc<Rendition>>, SupervisorError> {
        if names.is_empty() {
            return Ok(self.catalog.renditions().cloned().collect());
        }
        Ok(names
            .iter()
            .map(|n| self.catalog.get(n))
            .collect::<Result<_, _>>()?)
    }

    fn prime(&self, sources: &[FileInfo], renditions: &[Arc<Rendition>]) -> SupervisorReport {
        let units: Vec<(&FileInfo, &Rendition)> = sources
            .iter()
            .flat_map(|s| renditions.iter().map(move |r| (s, r.as_ref())))
            .collect();
        units
            .par_iter()
            .map(|(source, rendition)| self.prime_unit(source, rendition))
            .reduce(SupervisorReport::default, SupervisorReport::merge)
    }

    fn prime_unit(&self, source: &FileInfo, rendition: &Rendition) -> SupervisorReport {
        if self.expired() {
            return Self::skipped();
        }
        let key = self.responder.file_name(source, rendition);
        match self.responder.is_fresh(source, rendition) {
            Ok(true) => {
                info!("[OK] {key}");
                SupervisorReport {
                    fresh: 1,
                    ..Default::default()
                }
            }
            Ok(false) => self.render(source, rendition, &key),
            Err(e) => {
                error!("[ERROR] {key}: {e}");
                SupervisorReport {
                    failed: 1,
                    ..Default::default()
                }
            }
        }
    }

    fn render(&self, source: &FileInfo, rendition: &Rendition, key: &str) -> SupervisorReport {
        match self.responder.respond(source, rendition) {
            Ok(_) => {
                info!("[RENDER] {key}");
                SupervisorReport {
                    rendered: 1,
                    ..Default::default()
                }
            }
            Err(e) => {
                error!("[ERROR] {key}: {e}");
                SupervisorReport {
                    failed: 1,
                    ..Default::default()
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Expire
    // ---------------------------------------------------------------------

    /// Drop a rendition's whole cache subtree.
    pub fn expire_rendition(&self, name: &str) -> Result<SupervisorReport, SupervisorError> {
        let rendition = self.catalog.get(name)?;
        let base = pathname::base(&rendition);
        let store = self.responder.store();
        let removed = store.keys(Some(&base))?.len() as u32;
        store.remove_prefix(&base)?;
        info!("[DELETE] {base}/ ({removed} files)");
        Ok(SupervisorReport {
            removed,
            ..Default::default()
        })
    }

    pub fn expire_set(&self, name: &str) -> Result<SupervisorReport, SupervisorError> {
        let set = self.catalog.get_set(name)?;
        set.names()
            .into_iter()
            .try_fold(SupervisorReport::default(), |report, member| {
                Ok(report.merge(self.expire_rendition(member)?))
            })
    }

    /// Remove every cached rendition of one source, re-rendering each removed
    /// entry when `replace` is set.
    pub fn expire_file(
        &self,
        path: &str,
        replace: bool,
    ) -> Result<SupervisorReport, SupervisorError> {
        let source = self.responder.sources().file_info(path);
        if replace && !source.exists() {
            return Err(SupervisorError::SourceNotFound(path.to_string()));
        }
        let renditions: Vec<Arc<Rendition>> = self.catalog.renditions().cloned().collect();
        Ok(renditions
            .par_iter()
            .map(|rendition| self.expire_unit(&source, rendition, replace))
            .reduce(SupervisorReport::default, SupervisorReport::merge))
    }

    fn expire_unit(
        &self,
        source: &FileInfo,
        rendition: &Rendition,
        replace: bool,
    ) -> SupervisorReport {
        let store = self.responder.store();
        let key = self.responder.file_name(source, rendition);
        if !store.exists(&key) {
            return SupervisorReport::default();
        }
        let mut report = match store.remove(&key) {
            Ok(()) => {
                info!("[DELETE] {key}");
                SupervisorReport {
                    removed: 1,
                    ..Default::default()
                }
            }
            Err(e) => {
                error!("[ERROR] {key}: {e}");
                return SupervisorReport {
                    failed: 1,
                    ..Default::default()
                };
            }
        };
        if replace {
            report = report.merge(if self.expired() {
                Self::skipped()
            } else {
                self.render(source, rendition, &key)
            });
        }
        report
    }

    // ---------------------------------------------------------------------
    // Verify
    // ---------------------------------------------------------------------

    /// Reconcile the cache (or the part below `path`) against the sources.
    pub fn verify(
        &self,
        path: Option<&str>,
        remove: bool,
    ) -> Result<SupervisorReport, SupervisorError> {
        let keys = self.responder.store().keys(path)?;
        Ok(keys
            .par_iter()
            .map(|key| self.verify_unit(key, remove))
            .reduce(SupervisorReport::default, SupervisorReport::merge))
    }

    fn verify_unit(&self, key: &str, remove: bool) -> SupervisorReport {
        if self.expired() {
            return Self::skipped();
        }
        let source_path = match pathname::resolve(key) {
            Ok(path) => path,
            Err(e) => return self.invalid(key, &e.to_string(), remove),
        };

        let sources = self.responder.sources();
        if !sources.exists(&source_path) {
            warn!("[ORPHAN] {key} (no source {source_path})");
            let mut report = SupervisorReport {
                orphaned: 1,
                ..Default::default()
            };
            if remove {
                report = report.merge(self.delete(key));
            }
            return report;
        }

        let source = sources.file_info(&source_path);
        match (source.mtime(), self.responder.store().mtime(key)) {
            (Ok(mtime), Ok(Some(stamped))) if mtime == stamped => {
                info!("[OK] {key}");
                return SupervisorReport {
                    fresh: 1,
                    ..Default::default()
                };
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("[ERROR] {key}: {e}");
                return SupervisorReport {
                    failed: 1,
                    ..Default::default()
                };
            }
            _ => {}
        }

        let rendition = match pathname::resolve_rendition_name(key)
            .map_err(|e| e.to_string())
            .and_then(|name| self.catalog.get(&name).map_err(|e| e.to_string()))
        {
            Ok(rendition) => rendition,
            Err(message) => return self.invalid(key, &message, remove),
        };
        if self.responder.file_name(&source, &rendition) != key {
            return self.invalid(
                key,
                &format!("rendition {} now encodes {}", rendition.name(), rendition.format()),
                remove,
            );
        }

        self.prime_unit(&source, &rendition)
    }

    fn invalid(&self, key: &str, message: &str, remove: bool) -> SupervisorReport {
        error!("[INVALID] {key}: {message}");
        let report = SupervisorReport {
            invalid: 1,
            ..Default::default()
        };
        if remove {
            report.merge(self.delete(key))
        } else {
            report
        }
    }

    fn delete(&self, key: &str) -> SupervisorReport {
        match self.responder.store().remove(key) {
            Ok(()) => {
                info!("[DELETE] {key}");
                SupervisorReport {
                    removed: 1,
                    ..Default::default()
                }
            }
            Err(e) => {
                error!("[ERROR] {key}: {e}");
                SupervisorReport {
                    failed: 1,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::Filesystem;
    use crate::test_helpers::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn cached(tmp: &TempDir, key: &str) -> bool {
        tmp.path().join("render").join(Path::new(key)).exists()
    }

    // =========================================================================
    // Prime
    // =========================================================================

    #[test]
    fn prime_rendition_renders_every_image() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);

        let report = sup.prime_rendition("1920x1080", &[]).unwrap();
        assert_eq!(report.rendered, 3);
        assert!(cached(&tmp, "1920x1080/jpg/blog/cat.webp"));
        assert!(cached(&tmp, "1920x1080/png/blog/dog.webp"));
        assert!(cached(&tmp, "1920x1080/png/logo.webp"));
    }

    #[test]
    fn prime_twice_is_fresh() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_rendition("thumb", &[]).unwrap();

        let report = sup.prime_rendition("thumb", &[]).unwrap();
        assert_eq!(report.rendered, 0);
        assert_eq!(report.fresh, 3);
        assert_eq!(render_count(&sup), 3);
    }

    #[test]
    fn prime_restricts_to_paths() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        let report = sup.prime_rendition("thumb", &["blog".to_string()]).unwrap();
        assert_eq!(report.rendered, 2);
        assert!(!cached(&tmp, "thumb/png/logo.jpg"));
    }

    #[test]
    fn prime_set_covers_sources_times_members() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        let report = sup.prime_set("hero", &[]).unwrap();
        assert_eq!(report.rendered, 6);
        assert!(cached(&tmp, "thumb/jpg/blog/cat.jpg"));
        assert!(cached(&tmp, "1920x1080/jpg/blog/cat.webp"));
    }

    #[test]
    fn prime_file_defaults_to_all_renditions() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        let report = sup.prime_file("logo.png", &[]).unwrap();
        assert_eq!(report.rendered, sup.catalog().list().len() as u32);
    }

    #[test]
    fn prime_counts_failures_and_continues() {
        let tmp = setup_sources();
        write_source(&tmp, "broken.png", b"not an image", 1);
        let sup = mock_supervisor(&tmp);
        let report = sup.prime_rendition("thumb", &[]).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.rendered, 3);
    }

    #[test]
    fn prime_unknown_names_error() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        assert!(matches!(
            sup.prime_rendition("nope", &[]),
            Err(SupervisorError::Catalog(CatalogError::UnknownRendition { .. }))
        ));
        assert!(matches!(
            sup.prime_set("nope", &[]),
            Err(SupervisorError::Catalog(CatalogError::UnknownSet { .. }))
        ));
        assert!(matches!(
            sup.prime_file("ghost.jpg", &[]),
            Err(SupervisorError::SourceNotFound(_))
        ));
    }

    #[test]
    fn passed_deadline_skips_everything() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp).with_deadline(Instant::now());
        let report = sup.prime_rendition("thumb", &[]).unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(render_count(&sup), 0);
    }

    // =========================================================================
    // Expire
    // =========================================================================

    #[test]
    fn expire_rendition_removes_only_its_subtree() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_set("hero", &[]).unwrap();

        let report = sup.expire_rendition("1920x1080").unwrap();
        assert_eq!(report.removed, 3);
        assert!(!tmp.path().join("render/1920x1080").exists());
        assert!(cached(&tmp, "thumb/jpg/blog/cat.jpg"));
    }

    #[test]
    fn expire_set_expires_members() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_set("hero", &[]).unwrap();
        let report = sup.expire_set("hero").unwrap();
        assert_eq!(report.removed, 6);
    }

    #[test]
    fn expire_file_without_replace() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_set("hero", &[]).unwrap();

        let report = sup.expire_file("blog/cat.jpg", false).unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.rendered, 0);
        assert!(!cached(&tmp, "1920x1080/jpg/blog/cat.webp"));
        assert!(cached(&tmp, "1920x1080/png/blog/dog.webp"));
    }

    #[test]
    fn expire_file_with_replace_rerenders_removed_entries() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_rendition("thumb", &[]).unwrap();

        let report = sup.expire_file("blog/cat.jpg", true).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.rendered, 1);
        assert!(cached(&tmp, "thumb/jpg/blog/cat.jpg"));
        // Only the entry that existed comes back.
        assert!(!cached(&tmp, "1920x1080/jpg/blog/cat.webp"));
    }

    // =========================================================================
    // Verify
    // =========================================================================

    #[test]
    fn verify_fresh_cache_is_clean() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_set("hero", &[]).unwrap();

        let report = sup.verify(None, false).unwrap();
        assert_eq!(report.fresh, 6);
        assert!(report.is_clean());
    }

    #[test]
    fn verify_regenerates_stale_entries() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_rendition("thumb", &[]).unwrap();
        sup.responder().sources().touch("logo.png", 42).unwrap();

        let report = sup.verify(None, false).unwrap();
        assert_eq!(report.rendered, 1);
        assert_eq!(report.fresh, 2);
        assert_eq!(
            sup.responder().store().mtime("thumb/png/logo.jpg").unwrap(),
            Some(42)
        );
    }

    #[test]
    fn verify_removes_exactly_one_orphan() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        sup.prime_rendition("thumb", &[]).unwrap();
        sup.responder().sources().remove("blog/dog.png").unwrap();

        let report = sup.verify(None, false).unwrap();
        assert_eq!(report.orphaned, 1);
        assert!(cached(&tmp, "thumb/png/blog/dog.jpg"));

        let report = sup.verify(None, true).unwrap();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.removed, 1);
        assert!(!cached(&tmp, "thumb/png/blog/dog.jpg"));
        assert!(cached(&tmp, "thumb/jpg/blog/cat.jpg"));
        assert!(cached(&tmp, "thumb/png/logo.jpg"));
    }

    #[test]
    fn verify_flags_unknown_rendition_directories() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        write_cache(&tmp, "retired/jpg/blog/cat.webp");
        write_cache(&tmp, "stray.webp");

        let report = sup.verify(None, false).unwrap();
        assert_eq!(report.invalid, 2);
        assert!(cached(&tmp, "retired/jpg/blog/cat.webp"));

        let report = sup.verify(None, true).unwrap();
        assert_eq!(report.removed, 2);
        assert!(!cached(&tmp, "retired/jpg/blog/cat.webp"));
        assert!(!cached(&tmp, "stray.webp"));
    }

    #[test]
    fn verify_keeps_stamped_entries_of_retired_renditions() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        write_cache(&tmp, "retired/jpg/blog/cat.webp");
        let cache = Filesystem::new(tmp.path().join("render"));
        cache.touch("retired/jpg/blog/cat.webp", 1_700_000_000).unwrap();

        let report = sup.verify(None, true).unwrap();
        assert_eq!(report.fresh, 1);
        assert_eq!(report.invalid, 0);
        assert_eq!(report.removed, 0);
        assert!(cached(&tmp, "retired/jpg/blog/cat.webp"));
        assert_eq!(render_count(&sup), 0);
    }

    #[test]
    fn verify_flags_entries_with_an_outdated_format() {
        let tmp = setup_sources();
        let sup = mock_supervisor(&tmp);
        write_cache(&tmp, "thumb/jpg/blog/cat.png");
        let report = sup.verify(Some("thumb"), true).unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn report_display() {
        let report = SupervisorReport {
            rendered: 2,
            orphaned: 1,
            ..Default::default()
        };
        assert_eq!(report.to_string(), "2 rendered, 1 orphaned");
        assert_eq!(SupervisorReport::default().to_string(), "nothing to do");
    }
}
