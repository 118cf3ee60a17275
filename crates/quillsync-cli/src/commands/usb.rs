//! `quillsync usb` - sync through the device's USB mass-storage mount.

use clap::Args;

use quillsync_core::devices::Protocol;
use quillsync_sync::SyncOptions;

use super::Env;

#[derive(Debug, Args)]
pub struct UsbCommand {
    /// Do not respect book removals on the device
    #[arg(short, long)]
    pub ignore_device_removals: bool,

    /// Do not perform any actual changes
    #[arg(long)]
    pub dry_run: bool,

    /// Attempt to prepare the device for safe disconnect afterwards;
    /// has no effect together with --dry-run
    #[arg(short, long)]
    pub unmount: bool,
}

impl UsbCommand {
    pub async fn execute(&self, env: &mut Env) -> anyhow::Result<()> {
        super::sync(
            env,
            Protocol::Usb,
            SyncOptions {
                dry_run: self.dry_run,
                ignore_device_removals: self.ignore_device_removals,
                unmount: self.unmount,
                ..SyncOptions::default()
            },
        )
        .await
    }
}
