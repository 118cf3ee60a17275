//! CLI subcommands.

pub mod dumpconfig;
pub mod history;
pub mod mail;
pub mod mtp;
pub mod usb;

use quillsync_core::config::Config;
use quillsync_core::devices::Protocol;
use quillsync_core::SyncError;
use quillsync_sync::engine::NoReport;
use quillsync_sync::{ReportSink, SyncEngine, SyncOptions};

use crate::report::DebugReport;

/// Everything a command needs, in one place.
pub struct Env {
    pub cfg: Config,
    pub report: Option<DebugReport>,
    /// Scratch directories that must stay alive until the report has
    /// been packed at the end of the run.
    pub scratch: Vec<tempfile::TempDir>,
}

/// Shared body of the three sync subcommands.
pub async fn sync(env: &mut Env, protocol: Protocol, mut opts: SyncOptions) -> anyhow::Result<()> {
    let errors = env.cfg.validate();
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SyncError::Config(joined).into());
    }

    if protocol == Protocol::Mail {
        if env.report.is_some() {
            let dir = tempfile::Builder::new()
                .prefix("quillsync-mail-")
                .tempdir()?;
            if let Some(report) = &mut env.report {
                report.store("mails", dir.path());
            }
            opts.mail_capture_dir = Some(dir.path().to_path_buf());
            env.scratch.push(dir);
        }
    } else {
        // thumbnails are extracted into a per-run scratch directory
        let dir = tempfile::Builder::new()
            .prefix("quillsync-thumbs-")
            .tempdir()?;
        if let Some(report) = &mut env.report {
            report.store("thumbs", dir.path());
        }
        opts.thumbs_dir = Some(dir.path().to_path_buf());
        env.scratch.push(dir);
    }

    let engine = SyncEngine::new(env.cfg.clone());
    let mut no_report = NoReport;
    let sink: &mut dyn ReportSink = match env.report.as_mut() {
        Some(report) => report,
        None => &mut no_report,
    };
    engine.run(protocol, &opts, sink).await
}
