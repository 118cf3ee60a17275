//! Sync orchestrator
//!
//! Wires the source tree, the device driver for the chosen transport
//! and the history store together for one run:
//!
//! 1. enumerate the source (with thumbnail resolution outside mail
//!    mode) and fail early when it holds no files
//! 2. connect the device and load the previous history step
//! 3. plan, then execute serially
//! 4. append a new history step - only after a fully successful
//!    non-dry run that either did something or was the very first
//!
//! A failed or interrupted run leaves the previous snapshot intact;
//! the next run sees whatever half-state the device is in as manual
//! additions/removals and converges it through the regular truth
//! table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use quillsync_core::config::Config;
use quillsync_core::devices::Protocol;
use quillsync_core::ports::{Driver, ThumbnailResolver};
use quillsync_core::{SyncError, THUMBNAIL_FOLDER};
use quillsync_history::{database_name, HistoryStore};
use quillsync_thumbs::Extractor;
use quillsync_transport::{FsDriver, MailDriver, MtpDriver, UsbDriver};

use crate::executor::Executor;
use crate::planner::{self, PlannerOptions};

/// Sink collecting run artifacts for the debug report bundle.
pub trait ReportSink {
    /// Registers a file or directory to be packed when the report is
    /// closed. The path must outlive the run.
    fn store(&mut self, name: &str, path: &Path);
    /// Snapshots the file's current content immediately.
    fn store_copy(&mut self, name: &str, path: &Path);
}

/// Sink used when no debug report was requested.
pub struct NoReport;

impl ReportSink for NoReport {
    fn store(&mut self, _name: &str, _path: &Path) {}
    fn store_copy(&mut self, _name: &str, _path: &Path) {}
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub ignore_device_removals: bool,
    /// Attempt a safe eject after a successful USB run.
    pub unmount: bool,
    /// Scratch directory for extracted thumbnails; `None` disables
    /// thumbnail handling (mail mode). Owned by the caller so the
    /// debug report can still pack it after the run.
    pub thumbs_dir: Option<PathBuf>,
    /// Where the mail driver parks a copy of every message it sends.
    pub mail_capture_dir: Option<PathBuf>,
}

pub struct SyncEngine {
    cfg: Config,
}

impl SyncEngine {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// One full sync run over the given transport.
    pub async fn run(
        &self,
        protocol: Protocol,
        opts: &SyncOptions,
        report: &mut dyn ReportSink,
    ) -> anyhow::Result<()> {
        let mut cfg = self.cfg.clone();
        if protocol == Protocol::Mail {
            mail_preflight(&mut cfg)?;
        }

        tracing::info!(
            protocol = %protocol,
            source = %cfg.source,
            target = %cfg.target,
            "Sync starting"
        );
        let start = std::time::Instant::now();

        // Source: local file system, with thumbnail extraction when a
        // scratch directory was provided.
        let resolver: Option<Arc<dyn ThumbnailResolver>> = opts.thumbs_dir.as_ref().map(|dir| {
            Arc::new(Extractor::new(cfg.thumbnails.width, cfg.thumbnails.height, dir.clone()))
                as Arc<dyn ThumbnailResolver>
        });
        let source: Arc<dyn Driver> = Arc::new(FsDriver::new(&[cfg.source.as_str()], None, resolver));

        // Target: device over the requested transport.
        let device: Arc<dyn Driver> = connect_device(protocol, &cfg, opts)
            .context("unable to connect to device")?;

        // History: one database per device/destination pairing.
        let device_id = device.unique_id();
        let history_dir = cfg.ensure_history_dir()?;
        let history_path =
            history_dir.join(database_name(protocol, &[device_id.as_str(), cfg.target.as_str()]));
        tracing::debug!(path = %history_path.display(), "History database");

        if history_path.exists() {
            report.store_copy("history/original.db", &history_path);
        } else {
            HistoryStore::create(
                &history_path,
                &[protocol.tag(), device_id.as_str(), cfg.target.as_str()],
            )
            .await
            .with_context(|| {
                format!("unable to create history database '{}'", history_path.display())
            })?;
        }
        let mut history = HistoryStore::open(&history_path)
            .await
            .context("history cannot be opened")?;
        tracing::debug!(step_id = history.step_id(), "History last step");

        let result = sync_with_drivers(
            &cfg,
            protocol,
            opts,
            source.clone(),
            device.clone(),
            &mut history,
        )
        .await;

        source.disconnect().await;
        device.disconnect().await;
        history.close().await;
        report.store("history/updated.db", &history_path);

        tracing::info!(protocol = %protocol, elapsed = ?start.elapsed(), "Sync finished");
        result.map(|_| ())
    }
}

/// Enumerates, plans, executes and commits the next history step.
/// Returns the number of planned actions.
async fn sync_with_drivers(
    cfg: &Config,
    protocol: Protocol,
    opts: &SyncOptions,
    source: Arc<dyn Driver>,
    device: Arc<dyn Driver>,
    history: &mut HistoryStore,
) -> anyhow::Result<usize> {
    let src_set = source
        .enumerate()
        .await
        .context("unable to get source files")?;
    if !src_set.values().any(|o| o.is_file) {
        return Err(SyncError::NoFiles("no files in the source path".to_string()).into());
    }

    let hst_set = history
        .enumerate()
        .await
        .context("history objects cannot be read")?;

    let dst_set = device
        .enumerate()
        .await
        .context("unable to get files on the device")?;
    if dst_set.is_empty() && protocol != Protocol::Mail {
        return Err(SyncError::NoObjects.into());
    }

    let plan = planner::prepare(
        src_set,
        hst_set,
        dst_set,
        cfg,
        opts.thumbs_dir.as_deref(),
        PlannerOptions {
            ignore_device_removals: opts.ignore_device_removals,
            mail_mode: protocol == Protocol::Mail,
        },
    )?;
    if plan.actions.is_empty() {
        tracing::info!("Nothing to do");
    }

    Executor::new(source, device)
        .run(&plan.actions, opts.dry_run)
        .await?;

    // Update history only when something ran, or on the very first
    // sync so later runs have a previous state to compare against.
    if !opts.dry_run && (!plan.actions.is_empty() || history.step_id() == 0) {
        history
            .save(&cfg.source, &cfg.target, &plan.snapshot.subset_by_path(&cfg.source))
            .await
            .context("history objects cannot be saved")?;
        tracing::debug!(step_id = history.step_id(), "History next step");
    }
    Ok(plan.actions.len())
}

fn connect_device(
    protocol: Protocol,
    cfg: &Config,
    opts: &SyncOptions,
) -> anyhow::Result<Arc<dyn Driver>> {
    Ok(match protocol {
        Protocol::Usb => Arc::new(UsbDriver::connect(
            &[cfg.target.as_str(), THUMBNAIL_FOLDER],
            &cfg.device_serial,
            opts.unmount && !opts.dry_run,
        )?),
        Protocol::Mtp => Arc::new(MtpDriver::connect(&cfg.device_serial)?),
        Protocol::Mail => Arc::new(MailDriver::connect(
            &cfg.target,
            &cfg.smtp,
            opts.mail_capture_dir.clone(),
        )),
    })
}

/// Mail-mode preflight: the target must be an address, and only
/// formats the delivery service accepts stay in the book filter.
fn mail_preflight(cfg: &mut Config) -> anyhow::Result<()> {
    if !cfg.is_mail_target() {
        anyhow::bail!("target is not a valid e-mail address: {}", cfg.target);
    }
    let (supported, unsupported): (Vec<String>, Vec<String>) = cfg
        .book_extensions
        .iter()
        .cloned()
        .partition(|ext| quillsync_transport::mail::is_supported_mail_format(ext));
    if !unsupported.is_empty() {
        tracing::warn!(
            extensions = ?unsupported,
            "Extensions not supported by e-mail are configured, skipping them"
        );
    }
    if supported.is_empty() {
        anyhow::bail!("no book extensions supported by e-mail delivery are configured");
    }
    cfg.book_extensions = supported;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    const TARGET: &str = "documents/mybooks";

    struct Rig {
        source: tempfile::TempDir,
        mount: tempfile::TempDir,
        history: tempfile::TempDir,
        cfg: Config,
    }

    impl Rig {
        fn new() -> Self {
            let source = tempfile::tempdir().unwrap();
            let mount = tempfile::tempdir().unwrap();
            let history = tempfile::tempdir().unwrap();
            // a real reader ships with its documents and thumbnail
            // folders already in place
            std::fs::create_dir_all(mount.path().join(THUMBNAIL_FOLDER)).unwrap();
            std::fs::create_dir_all(mount.path().join("documents")).unwrap();

            let mut cfg = Config::default();
            cfg.source = source.path().to_string_lossy().replace('\\', "/");
            cfg.target = TARGET.to_string();
            cfg.history = history.path().to_string_lossy().into_owned();
            cfg.book_extensions = vec![".azw3".into(), ".mobi".into(), ".pdf".into()];
            Self {
                source,
                mount,
                history,
                cfg,
            }
        }

        fn add_book(&self, name: &str, content: &[u8]) {
            std::fs::write(self.source.path().join(name), content).unwrap();
        }

        fn device_driver(&self) -> Arc<dyn Driver> {
            let mount = self.mount.path().to_string_lossy().replace('\\', "/");
            Arc::new(FsDriver::new(&[TARGET, THUMBNAIL_FOLDER], Some(mount.as_str()), None))
        }

        fn source_driver(&self) -> Arc<dyn Driver> {
            Arc::new(FsDriver::new(&[self.cfg.source.as_str()], None, None))
        }

        async fn history_store(&self) -> HistoryStore {
            let path = self.history.path().join(database_name(
                Protocol::Usb,
                &["TESTSERIAL", TARGET],
            ));
            if !path.exists() {
                HistoryStore::create(&path, &["USB", "TESTSERIAL", TARGET]).await.unwrap();
            }
            HistoryStore::open(&path).await.unwrap()
        }

        async fn run(&self, opts: &SyncOptions) -> anyhow::Result<usize> {
            let mut history = self.history_store().await;
            let result = sync_with_drivers(
                &self.cfg,
                Protocol::Usb,
                opts,
                self.source_driver(),
                self.device_driver(),
                &mut history,
            )
            .await;
            history.close().await;
            result
        }

        fn device_file(&self, rel: &str) -> PathBuf {
            self.mount.path().join(rel)
        }
    }

    fn sha(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    #[tokio::test]
    async fn first_sync_copies_books_and_writes_step_one() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.add_book("b.mobi", b"book b");
        rig.add_book("notes.txt", b"not a book");

        let ran = rig.run(&SyncOptions::default()).await.unwrap();
        assert_eq!(ran, 3); // mkdir of the target root plus two copies

        assert_eq!(std::fs::read(rig.device_file("documents/mybooks/a.azw3")).unwrap(), b"book a");
        assert_eq!(std::fs::read(rig.device_file("documents/mybooks/b.mobi")).unwrap(), b"book b");

        let history = rig.history_store().await;
        assert_eq!(history.step_id(), 1);
        let snapshot = history.load().await.unwrap();
        assert_eq!(snapshot.find("a.azw3").unwrap().persistent_id, sha(b"book a"));
        history.close().await;
    }

    #[tokio::test]
    async fn steady_state_plans_nothing_and_keeps_history() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.run(&SyncOptions::default()).await.unwrap();

        let ran = rig.run(&SyncOptions::default()).await.unwrap();
        assert_eq!(ran, 0);

        let history = rig.history_store().await;
        assert_eq!(history.step_id(), 1); // no new step for an empty plan
        history.close().await;
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");

        let ran = rig
            .run(&SyncOptions {
                dry_run: true,
                ..SyncOptions::default()
            })
            .await
            .unwrap();
        assert!(ran > 0);
        assert!(!rig.device_file("documents/mybooks/a.azw3").exists());

        let history = rig.history_store().await;
        assert_eq!(history.step_id(), 0); // even the first step is withheld
        history.close().await;
    }

    #[tokio::test]
    async fn local_edit_reaches_the_device() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"first edition");
        rig.run(&SyncOptions::default()).await.unwrap();

        rig.add_book("a.azw3", b"second edition");
        rig.run(&SyncOptions::default()).await.unwrap();

        assert_eq!(
            std::fs::read(rig.device_file("documents/mybooks/a.azw3")).unwrap(),
            b"second edition"
        );
        let history = rig.history_store().await;
        assert_eq!(history.step_id(), 2);
        assert_eq!(
            history.load().await.unwrap().find("a.azw3").unwrap().persistent_id,
            sha(b"second edition")
        );
        history.close().await;
    }

    #[tokio::test]
    async fn device_removal_propagates_to_source() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.add_book("b.azw3", b"book b");
        rig.run(&SyncOptions::default()).await.unwrap();

        std::fs::remove_file(rig.device_file("documents/mybooks/a.azw3")).unwrap();
        rig.run(&SyncOptions::default()).await.unwrap();

        assert!(!rig.source.path().join("a.azw3").exists());
        assert!(rig.source.path().join("b.azw3").exists());
    }

    #[tokio::test]
    async fn device_removal_is_kept_with_the_ignore_flag() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.run(&SyncOptions::default()).await.unwrap();

        std::fs::remove_file(rig.device_file("documents/mybooks/a.azw3")).unwrap();
        let ran = rig
            .run(&SyncOptions {
                ignore_device_removals: true,
                ..SyncOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(ran, 0);
        assert!(rig.source.path().join("a.azw3").exists());
        assert!(!rig.device_file("documents/mybooks/a.azw3").exists());
    }

    #[tokio::test]
    async fn local_removal_propagates_to_device() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.add_book("b.azw3", b"book b");
        rig.run(&SyncOptions::default()).await.unwrap();

        std::fs::remove_file(rig.source.path().join("a.azw3")).unwrap();
        rig.run(&SyncOptions::default()).await.unwrap();

        assert!(!rig.device_file("documents/mybooks/a.azw3").exists());
        assert!(rig.device_file("documents/mybooks/b.azw3").exists());
    }

    #[tokio::test]
    async fn empty_source_fails_with_no_files() {
        let rig = Rig::new();
        let err = rig.run(&SyncOptions::default()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NoFiles(_))
        ));
    }

    #[tokio::test]
    async fn empty_device_enumeration_fails_with_no_objects() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        // a device driver pointed at roots that do not exist sees nothing
        let empty_mount = tempfile::tempdir().unwrap();
        let mount = empty_mount.path().to_string_lossy().replace('\\', "/");
        let device: Arc<dyn Driver> =
            Arc::new(FsDriver::new(&[TARGET, THUMBNAIL_FOLDER], Some(mount.as_str()), None));

        let mut history = rig.history_store().await;
        let err = sync_with_drivers(
            &rig.cfg,
            Protocol::Usb,
            &SyncOptions::default(),
            rig.source_driver(),
            device,
            &mut history,
        )
        .await
        .unwrap_err();
        history.close().await;

        assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NoObjects)));
    }

    #[tokio::test]
    async fn interrupted_run_recovers_on_the_next_one() {
        let rig = Rig::new();
        rig.add_book("a.azw3", b"book a");
        rig.run(&SyncOptions::default()).await.unwrap();

        // simulate a partial manual state: the book vanished from the
        // device but history still records it
        std::fs::remove_file(rig.device_file("documents/mybooks/a.azw3")).unwrap();
        rig.add_book("b.azw3", b"book b");
        rig.run(&SyncOptions::default()).await.unwrap();

        // a removed on device -> removed locally; b arrived
        assert!(!rig.source.path().join("a.azw3").exists());
        assert!(rig.device_file("documents/mybooks/b.azw3").exists());
    }

    // -- mail preflight --

    #[test]
    fn mail_preflight_requires_an_address() {
        let mut cfg = Config::default();
        cfg.target = "documents/mybooks".to_string();
        assert!(mail_preflight(&mut cfg).is_err());
    }

    #[test]
    fn mail_preflight_filters_unsupported_formats() {
        let mut cfg = Config::default();
        cfg.target = "reader@kindle.com".to_string();
        cfg.book_extensions = vec![".azw3".into(), ".pdf".into(), ".epub".into()];
        mail_preflight(&mut cfg).unwrap();
        assert_eq!(cfg.book_extensions, vec![".pdf".to_string(), ".epub".to_string()]);
    }

    #[test]
    fn mail_preflight_needs_at_least_one_mailable_format() {
        let mut cfg = Config::default();
        cfg.target = "reader@kindle.com".to_string();
        cfg.book_extensions = vec![".azw3".into(), ".kfx".into()];
        assert!(mail_preflight(&mut cfg).is_err());
    }
}
