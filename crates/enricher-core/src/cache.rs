//! On-disk response cache.
//!
//! One file per entry holds the raw model response between extraction and
//! merge. Only the extractor writes these files; the merger only reads them.

use std::io;
use std::path::{Path, PathBuf};

const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Replace path-unsafe characters in an entry key with `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for `key`: `<dir>/<sanitized key>.json`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Store `text` verbatim for `key`, overwriting any previous response.
    pub fn write(&self, key: &str, text: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        std::fs::write(&path, text)?;
        Ok(path)
    }

    /// The cached response for `key`, or `None` if nothing was stored.
    pub fn read(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Delete everything in the cache directory. Returns the number of
    /// entries removed. A missing directory counts as empty.
    pub fn clear(&self) -> io::Result<usize> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut removed = 0;
        for item in read_dir {
            let path = item?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        tracing::info!(dir = %self.dir.display(), removed, "cleared response cache");
        Ok(removed)
    }
}
