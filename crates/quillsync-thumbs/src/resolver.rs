//! Thumbnail resolver
//!
//! Implements the resolver port: given a local book path, decide by
//! container signature whether a thumbnail is paired with it, park the
//! produced JPEG in the scratch directory, and report only the file
//! name. Every failure - unreadable file, malformed container,
//! unsupported flavor - downgrades to "no thumbnail"; enumeration must
//! never stop because one book cannot be parsed.

use std::path::{Path, PathBuf};

use quillsync_core::ports::ThumbnailResolver;

use crate::{kfx, mobi, Thumb, ThumbError};

/// Resolver parking thumbnails in a per-run scratch directory.
pub struct Extractor {
    width: u32,
    height: u32,
    dir: PathBuf,
}

impl Extractor {
    pub fn new(width: u32, height: u32, dir: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            dir: dir.into(),
        }
    }

    fn produce(&self, path: &Path) -> Result<Option<Thumb>, ThumbError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let parse = match ext.as_str() {
            "mobi" | "azw3" => mobi::extract,
            "kfx" => kfx::extract,
            _ => return Ok(None), // not a supported container
        };
        let data = std::fs::read(path)
            .map_err(|e| ThumbError::Malformed(format!("unable to read '{}': {e}", path.display())))?;
        parse(&data, self.width, self.height)
    }
}

impl ThumbnailResolver for Extractor {
    fn extract(&self, path: &Path) -> Option<String> {
        match self.produce(path) {
            Ok(Some(thumb)) => {
                let target = self.dir.join(&thumb.file_name);
                if let Err(e) = std::fs::write(&target, &thumb.jpeg) {
                    tracing::warn!(file = %target.display(), error = %e, "Thumbnail saving failed");
                    return None;
                }
                tracing::debug!(file = %path.display(), thumb = %thumb.file_name, "Thumbnail extracted");
                Some(thumb.file_name)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "Thumbnail extraction failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book.epub");
        std::fs::write(&book, b"whatever").unwrap();
        let extractor = Extractor::new(330, 470, dir.path());
        assert_eq!(extractor.extract(&book), None);
    }

    #[test]
    fn malformed_book_downgrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book.azw3");
        std::fs::write(&book, b"this is not a palm database").unwrap();
        let extractor = Extractor::new(330, 470, dir.path());
        assert_eq!(extractor.extract(&book), None);
    }

    #[test]
    fn missing_file_downgrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Extractor::new(330, 470, dir.path());
        assert_eq!(extractor.extract(&dir.path().join("gone.mobi")), None);
    }
}
