//! `quillsync dumpconfig` - print default or effective configuration.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;

use quillsync_core::config::Config;

use super::Env;

#[derive(Debug, Args)]
pub struct DumpConfigCommand {
    /// Output the active configuration, including values from the
    /// --config file, instead of the defaults
    #[arg(long)]
    pub dry_run: bool,

    /// File to write the configuration to; stdout when absent
    pub destination: Option<PathBuf>,
}

impl DumpConfigCommand {
    pub async fn execute(&self, env: &mut Env) -> anyhow::Result<()> {
        let (state, data) = if self.dry_run {
            ("active", env.cfg.dump()?)
        } else {
            ("default", Config::default().dump()?)
        };

        tracing::info!(
            state,
            file = %self
                .destination
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdout".to_string()),
            "Outputting configuration"
        );

        match &self.destination {
            Some(path) => {
                let mut file = std::fs::File::create(path)?;
                file.write_all(data.as_bytes())?;
            }
            None => {
                std::io::stdout().write_all(data.as_bytes())?;
            }
        }
        Ok(())
    }
}
