//! Debug report bundle
//!
//! With `--debug` the program collects everything useful for
//! troubleshooting into one zip archive: the processed configuration,
//! the history database before and after the run, the thumbnail
//! scratch directory, captured mail messages, and the log file.
//! Registered paths are packed when the report is closed, so they must
//! stay alive until then; snapshots taken with `store_copy` capture
//! the bytes immediately.

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

use quillsync_sync::ReportSink;

enum Entry {
    /// Packed at close time; may be a file or a whole directory.
    Deferred(PathBuf),
    /// Bytes captured when the entry was stored.
    Snapshot(Vec<u8>),
}

pub struct DebugReport {
    path: PathBuf,
    entries: Vec<(String, Entry)>,
}

impl DebugReport {
    /// Creates the report directory and picks a timestamped archive
    /// name inside it.
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        Ok(Self {
            path: dir.join(format!("quillsync-report-{stamp}.zip")),
            entries: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores raw bytes under the given archive name.
    pub fn store_data(&mut self, name: &str, data: Vec<u8>) {
        self.entries.push((name.to_string(), Entry::Snapshot(data)));
    }

    /// Writes the archive. Registered paths that no longer exist are
    /// skipped with a warning rather than failing the report.
    pub fn close(self) -> anyhow::Result<PathBuf> {
        let file = std::fs::File::create(&self.path)?;
        let mut archive = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        for (name, entry) in &self.entries {
            match entry {
                Entry::Snapshot(data) => {
                    archive.start_file(name.clone(), options)?;
                    archive.write_all(data)?;
                }
                Entry::Deferred(path) if path.is_file() => {
                    archive.start_file(name.clone(), options)?;
                    archive.write_all(&std::fs::read(path)?)?;
                }
                Entry::Deferred(path) if path.is_dir() => {
                    for item in walkdir::WalkDir::new(path) {
                        let item = item?;
                        if !item.file_type().is_file() {
                            continue;
                        }
                        let rel = item
                            .path()
                            .strip_prefix(path)
                            .unwrap_or(item.path())
                            .to_string_lossy()
                            .replace('\\', "/");
                        archive.start_file(format!("{name}/{rel}"), options)?;
                        archive.write_all(&std::fs::read(item.path())?)?;
                    }
                }
                Entry::Deferred(path) => {
                    tracing::warn!(name, path = %path.display(), "Report entry vanished, skipping");
                }
            }
        }

        archive.finish()?;
        Ok(self.path)
    }
}

impl ReportSink for DebugReport {
    fn store(&mut self, name: &str, path: &Path) {
        self.entries
            .push((name.to_string(), Entry::Deferred(path.to_path_buf())));
    }

    fn store_copy(&mut self, name: &str, path: &Path) {
        match std::fs::read(path) {
            Ok(data) => self.entries.push((name.to_string(), Entry::Snapshot(data))),
            Err(e) => {
                tracing::warn!(name, path = %path.display(), error = %e, "Unable to snapshot report entry")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn report_packs_snapshots_files_and_directories() {
        let out = tempfile::tempdir().unwrap();
        let payload = tempfile::tempdir().unwrap();
        std::fs::write(payload.path().join("a.jpg"), b"aaa").unwrap();
        std::fs::create_dir(payload.path().join("sub")).unwrap();
        std::fs::write(payload.path().join("sub/b.jpg"), b"bbb").unwrap();
        let single = payload.path().join("history.db");
        std::fs::write(&single, b"db bytes").unwrap();

        let mut report = DebugReport::create(out.path()).unwrap();
        report.store_data("config/config.yaml", b"source: /books\n".to_vec());
        report.store("thumbs", payload.path());
        report.store_copy("history/original.db", &single);
        // content changes after the snapshot must not leak in
        std::fs::write(&single, b"changed").unwrap();
        report.store("history/updated.db", &single);

        let path = report.close().unwrap();
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();

        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert!(names.contains(&"config/config.yaml".to_string()));
        assert!(names.contains(&"thumbs/a.jpg".to_string()));
        assert!(names.contains(&"thumbs/sub/b.jpg".to_string()));
        assert!(names.contains(&"history/original.db".to_string()));
        assert!(names.contains(&"history/updated.db".to_string()));

        let mut original = String::new();
        archive
            .by_name("history/original.db")
            .unwrap()
            .read_to_string(&mut original)
            .unwrap();
        assert_eq!(original, "db bytes");

        let mut updated = String::new();
        archive
            .by_name("history/updated.db")
            .unwrap()
            .read_to_string(&mut updated)
            .unwrap();
        assert_eq!(updated, "changed");
    }

    #[test]
    fn vanished_deferred_entries_are_skipped() {
        let out = tempfile::tempdir().unwrap();
        let mut report = DebugReport::create(out.path()).unwrap();
        report.store("gone", Path::new("/definitely/not/here"));
        report.store_data("kept", b"data".to_vec());

        let path = report.close().unwrap();
        let archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }
}
