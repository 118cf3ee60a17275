//! `quillsync mail` - deliver books to the device's mail address.

use clap::Args;

use quillsync_core::devices::Protocol;
use quillsync_sync::SyncOptions;

use super::Env;

#[derive(Debug, Args)]
pub struct MailCommand {
    /// Do not perform any actual changes
    #[arg(long)]
    pub dry_run: bool,
}

impl MailCommand {
    pub async fn execute(&self, env: &mut Env) -> anyhow::Result<()> {
        super::sync(
            env,
            Protocol::Mail,
            SyncOptions {
                dry_run: self.dry_run,
                ..SyncOptions::default()
            },
        )
        .await
    }
}
