//! `quillsync mtp` - sync over the MTP protocol.

use clap::Args;

use quillsync_core::devices::Protocol;
use quillsync_sync::SyncOptions;

use super::Env;

#[derive(Debug, Args)]
pub struct MtpCommand {
    /// Do not respect book removals on the device
    #[arg(short, long)]
    pub ignore_device_removals: bool,

    /// Do not perform any actual changes
    #[arg(long)]
    pub dry_run: bool,
}

impl MtpCommand {
    pub async fn execute(&self, env: &mut Env) -> anyhow::Result<()> {
        super::sync(
            env,
            Protocol::Mtp,
            SyncOptions {
                dry_run: self.dry_run,
                ignore_device_removals: self.ignore_device_removals,
                ..SyncOptions::default()
            },
        )
        .await
    }
}
