//! Local filesystem driver
//!
//! Serves two roles: rooted at the configured source directory it is
//! the source driver (with content hashing and thumbnail resolution),
//! rooted at a USB mount point it is the device side of a mass-storage
//! sync. With a mount prefix set, enumeration keys and action paths
//! are mount-relative, so the same device-rooted paths work across
//! transports.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use quillsync_core::ports::{Driver, ThumbnailResolver};
use quillsync_core::{ObjectInfo, ObjectSet};

const DRIVER_NAME: &str = "file-system";
const HASH_BUF_SIZE: usize = 256 * 1024;

pub struct FsDriver {
    roots: Vec<String>,
    mount: Option<String>,
    resolver: Option<Arc<dyn ThumbnailResolver>>,
}

impl FsDriver {
    /// Driver over one or more roots. With `mount` set, each root is
    /// taken relative to it and enumeration keys are re-rooted the
    /// same way. The resolver, when given, is consulted for every
    /// regular file during enumeration.
    pub fn new(
        paths: &[&str],
        mount: Option<&str>,
        resolver: Option<Arc<dyn ThumbnailResolver>>,
    ) -> Self {
        let mount = mount.map(|m| m.replace('\\', "/"));
        let mut roots: Vec<String> = Vec::new();
        for path in paths {
            let base = path.replace('\\', "/");
            let base = match &mount {
                Some(mount) => format!("{}/{}", mount.trim_end_matches('/'), base),
                None => base,
            };
            if !roots.contains(&base) {
                roots.push(base);
            }
        }
        Self {
            roots,
            mount,
            resolver,
        }
    }

    /// On-disk location for a driver-relative path.
    fn disk_path(&self, full_path: &str) -> PathBuf {
        match &self.mount {
            Some(mount) => Path::new(mount).join(full_path),
            None => PathBuf::from(full_path),
        }
    }

    /// Enumeration key for an on-disk location.
    fn key_for(&self, path: &Path) -> String {
        let slashed = path.to_string_lossy().replace('\\', "/");
        match &self.mount {
            Some(mount) => slashed
                .strip_prefix(mount.trim_end_matches('/'))
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or(slashed),
            None => slashed,
        }
    }
}

#[async_trait]
impl Driver for FsDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn unique_id(&self) -> String {
        DRIVER_NAME.to_string()
    }

    async fn enumerate(&self) -> anyhow::Result<ObjectSet> {
        let mut set = ObjectSet::new();
        let mut buf = vec![0u8; HASH_BUF_SIZE];

        for root in &self.roots {
            match std::fs::metadata(root) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(anyhow::anyhow!("root '{root}' inaccessible: {e}")),
            }
            for entry in WalkDir::new(root) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping path during file enumeration");
                        continue;
                    }
                };
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e,
                            "Skipping path during file enumeration");
                        continue;
                    }
                };
                if !meta.is_file() && !meta.is_dir() {
                    continue;
                }
                let key = self.key_for(entry.path());
                if set.contains(&key) {
                    tracing::warn!(path = %key, "Duplicate path during file enumeration, ignoring");
                    continue;
                }

                let modified = meta
                    .modified()
                    .map(chrono::DateTime::from)
                    .unwrap_or_else(|_| chrono::Utc::now());
                let mut obj = if meta.is_dir() {
                    ObjectInfo::directory(key, modified)
                } else {
                    ObjectInfo::file(key, meta.len(), modified)
                };
                if meta.is_file() {
                    obj.persistent_id = hash_file_content(entry.path(), &mut buf)
                        .map_err(|e| {
                            anyhow::anyhow!(
                                "unable to hash file content for '{}': {e}",
                                entry.path().display()
                            )
                        })?;
                    if let Some(resolver) = &self.resolver {
                        if let Some(name) = resolver.extract(entry.path()) {
                            obj.thumb_name = name;
                        }
                    }
                }
                set.insert(obj);
            }
        }
        Ok(set)
    }

    async fn mkdir(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let path = self.disk_path(&obj.full_path);
        tracing::debug!(path = %path.display(), "Action MkDir");
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| anyhow::anyhow!("unable to create directory '{}': {e}", path.display()))
    }

    async fn remove(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let path = self.disk_path(&obj.full_path);
        tracing::debug!(path = %path.display(), "Action Remove");
        let result = if obj.is_dir {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| anyhow::anyhow!("unable to remove '{}': {e}", path.display()))
    }

    async fn copy(&self, obj: &ObjectInfo) -> anyhow::Result<()> {
        let to = self.disk_path(&obj.full_path);
        tracing::debug!(from = %obj.object_name, to = %to.display(), "Action Copy");

        let written = tokio::fs::copy(&obj.object_name, &to).await.map_err(|e| {
            anyhow::anyhow!("failed to copy '{}' to '{}': {e}", obj.object_name, to.display())
        })?;
        if written != obj.size {
            anyhow::bail!(
                "failed to copy '{}' ({}) to '{}' ({written}), not all bytes have been written",
                obj.object_name,
                obj.size,
                to.display()
            );
        }
        Ok(())
    }

    async fn disconnect(&self) {
        // nothing to release
    }
}

fn hash_file_content(path: &Path, buf: &mut [u8]) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    loop {
        let n = file.read(buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
