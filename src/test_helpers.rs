//! Shared test utilities for the rendition-cache test suite.
//!
//! Fixture trees live in a `TempDir` laid out as `images/` (sources) and
//! `render/` (cache). Source files hold mock image text (`WxH.ext`) that
//! [`MockBackend`] decodes, so supervisor and responder tests run without
//! touching pixels.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let tmp = setup_sources();
//! let sup = mock_supervisor(&tmp);
//! sup.prime_set("hero", &[]).unwrap();
//! assert_eq!(render_count(&sup), 6);
//! ```

use std::sync::Arc;
use tempfile::TempDir;

use crate::filesystem::Filesystem;
use crate::imaging::backend::tests::MockBackend;
use crate::imaging::{Params, Pipeline};
use crate::rendition::{Catalog, RenderDefaults, SetDefinition};
use crate::responder::Responder;
use crate::store::FilesystemStore;
use crate::supervisor::Supervisor;

pub type MockSupervisor = Supervisor<FilesystemStore, MockBackend>;

// =========================================================================
// Fixture setup
// =========================================================================

/// Sources every supervisor test starts from, with their mtimes.
pub const SOURCES: &[(&str, &[u8], i64)] = &[
    ("blog/cat.jpg", b"1600x1200.jpg", 1_700_000_000),
    ("blog/dog.png", b"400x300.png", 1_700_000_100),
    ("logo.png", b"64x64.png", 1_700_000_200),
];

/// A temp dir with [`SOURCES`] written below `images/`.
pub fn setup_sources() -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (path, contents, mtime) in SOURCES {
        write_source(&tmp, path, contents, *mtime);
    }
    tmp
}

pub fn write_source(tmp: &TempDir, relative: &str, contents: &[u8], mtime: i64) {
    let images = Filesystem::new(tmp.path().join("images"));
    images.dump_file(relative, contents).unwrap();
    images.touch(relative, mtime).unwrap();
}

/// Drop an arbitrary file into the cache tree.
pub fn write_cache(tmp: &TempDir, key: &str) {
    Filesystem::new(tmp.path().join("render"))
        .dump_file(key, b"1x1.webp")
        .unwrap();
}

// =========================================================================
// Catalog and wiring
// =========================================================================

/// `1920x1080` (webp), `thumb` (160 square crop, jpg) and set `hero`.
pub fn sample_catalog() -> Catalog {
    Catalog::new(
        [
            (
                "1920x1080".to_string(),
                Params::new()
                    .with("width", 1920i64)
                    .with("height", 1080i64)
                    .with("format", "webp"),
            ),
            (
                "thumb".to_string(),
                Params::new()
                    .with("width", 160i64)
                    .with("height", 160i64)
                    .with("fit", "crop")
                    .with("format", "jpg"),
            ),
        ],
        [(
            "hero".to_string(),
            SetDefinition {
                renditions: vec!["thumb".into(), "1920x1080".into()],
                media_queries: vec!["(min-width: 1200px) 1920px".into(), "100vw".into()],
            },
        )],
        RenderDefaults::default(),
    )
    .unwrap()
}

pub fn mock_responder(tmp: &TempDir) -> Responder<FilesystemStore, MockBackend> {
    Responder::new(
        Filesystem::new(tmp.path().join("images")),
        FilesystemStore::new(Filesystem::new(tmp.path().join("render"))),
        Pipeline::new(MockBackend::new()),
    )
}

pub fn mock_supervisor(tmp: &TempDir) -> MockSupervisor {
    Supervisor::new(Arc::new(sample_catalog()), mock_responder(tmp))
}

/// Pipeline runs so far.
pub fn render_count(sup: &MockSupervisor) -> usize {
    sup.responder().pipeline().backend().decode_count()
}
