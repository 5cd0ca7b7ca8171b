//! Base-directory filesystems and the image finder.
//!
//! A [`Filesystem`] roots every relative path at a base directory: one for
//! source images, one for the render cache, optionally one for watermarks.
//! Relative paths always use forward slashes, on every platform, because they
//! double as cache keys.
//!
//! Writes go through [`Filesystem::dump_file`], which writes a sibling temp
//! file and renames it into place so a reader never observes a partial file.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/// Extensions the finder treats as images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["avif", "bmp", "gif", "png", "jpg", "jpeg", "webp"];

/// A file below a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute (base-joined) path.
    pub path: PathBuf,
    /// Base-relative path with forward slashes.
    pub relative: String,
}

impl FileInfo {
    pub fn new(base: &Path, relative: &str) -> Self {
        let relative = normalize_relative(relative);
        Self {
            path: join_relative(base, &relative),
            relative,
        }
    }

    /// Extension without the dot, as written on disk.
    pub fn extension(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[i + 1..],
            _ => "",
        }
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[..i],
            _ => name,
        }
    }

    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }

    /// Directory part of the relative path, empty at the base root.
    pub fn relative_dir(&self) -> &str {
        match self.relative.rfind('/') {
            Some(i) => &self.relative[..i],
            None => "",
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Modification time in whole seconds since the Unix epoch.
    pub fn mtime(&self) -> io::Result<i64> {
        mtime_of(&self.path)
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// Strip leading `./` and `/`, collapse backslashes, drop empty segments.
fn normalize_relative(relative: &str) -> String {
    relative
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    path.extend(relative.split('/').filter(|s| !s.is_empty()));
    path
}

fn mtime_of(path: &Path) -> io::Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs_f64().ceil() as i64),
    })
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// A directory tree addressed by forward-slash relative paths.
#[derive(Debug, Clone)]
pub struct Filesystem {
    base: PathBuf,
}

impl Filesystem {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn file_info(&self, relative: &str) -> FileInfo {
        FileInfo::new(&self.base, relative)
    }

    /// Absolute path for a relative one. Parent-directory components are
    /// rejected so a key can never escape the base.
    pub fn resolve(&self, relative: &str) -> io::Result<PathBuf> {
        let normalized = normalize_relative(relative);
        if Path::new(&normalized)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes base directory: {relative}"),
            ));
        }
        Ok(join_relative(&self.base, &normalized))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).is_ok_and(|p| p.exists())
    }

    pub fn read(&self, relative: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(relative)?)
    }

    pub fn mtime(&self, relative: &str) -> io::Result<i64> {
        mtime_of(&self.resolve(relative)?)
    }

    /// Atomically replace a file: write a temp file beside it, then rename.
    pub fn dump_file(&self, relative: &str, contents: &[u8]) -> io::Result<()> {
        self.write_atomic(relative, contents, None)
    }

    /// Like [`dump_file`](Self::dump_file), with the mtime set before the
    /// rename so readers never see the file unstamped.
    pub fn dump_file_stamped(&self, relative: &str, contents: &[u8], mtime: i64) -> io::Result<()> {
        self.write_atomic(relative, contents, Some(mtime))
    }

    fn write_atomic(&self, relative: &str, contents: &[u8], mtime: Option<i64>) -> io::Result<()> {
        let path = self.resolve(relative)?;
        let parent = path.parent().unwrap_or(&self.base);
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(contents)?;
        if let Some(mtime) = mtime {
            tmp.as_file().set_modified(system_time(mtime))?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Set a file's modification time (seconds since the epoch).
    pub fn touch(&self, relative: &str, mtime: i64) -> io::Result<()> {
        let file = fs::File::options()
            .write(true)
            .open(self.resolve(relative)?)?;
        file.set_modified(system_time(mtime))
    }

    /// Remove a file or a whole directory. Missing paths are not an error.
    pub fn remove(&self, relative: &str) -> io::Result<()> {
        let path = self.resolve(relative)?;
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Every regular file below `relative` (or the whole base), sorted.
    pub fn files(&self, relative: Option<&str>) -> io::Result<Vec<FileInfo>> {
        let root = match relative {
            Some(r) => self.resolve(r)?,
            None => self.base.clone(),
        };
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.base) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(FileInfo {
                path: entry.path().to_path_buf(),
                relative: rel,
            });
        }
        Ok(files)
    }
}

/// Image discovery below a filesystem, filtered by extension and path prefix.
#[derive(Debug, Clone)]
pub struct Finder {
    extensions: Vec<String>,
}

impl Default for Finder {
    fn default() -> Self {
        Self {
            extensions: IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl Finder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_image(&self, file: &FileInfo) -> bool {
        let ext = file.extension().to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    /// Images in `fs` whose relative path starts with one of `prefixes`.
    /// No prefixes means the whole tree.
    pub fn find(&self, fs: &Filesystem, prefixes: &[String]) -> io::Result<Vec<FileInfo>> {
        let prefixes: Vec<String> = prefixes
            .iter()
            .map(|p| normalize_relative(p))
            .filter(|p| !p.is_empty())
            .collect();
        let files = fs.files(None)?;
        Ok(files
            .into_iter()
            .filter(|f| self.is_image(f))
            .filter(|f| prefixes.is_empty() || prefixes.iter().any(|p| has_prefix(&f.relative, p)))
            .collect())
    }
}

/// Segment-aware prefix test: `blog` matches `blog/cat.jpg` but not
/// `blogger/dog.jpg`.
fn has_prefix(relative: &str, prefix: &str) -> bool {
    relative == prefix
        || relative
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
