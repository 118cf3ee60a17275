//! `quillsync history` - list local history databases.

use clap::Args;

use quillsync_history::list_databases;

use super::Env;

#[derive(Debug, Args)]
pub struct HistoryCommand {}

impl HistoryCommand {
    pub async fn execute(&self, env: &mut Env) -> anyhow::Result<()> {
        let dir = env.cfg.ensure_history_dir()?;
        let reports = list_databases(&dir).await?;
        if reports.is_empty() {
            tracing::info!(dir = %dir.display(), "No history databases found");
        }
        for report in reports {
            tracing::info!(
                path = %report.path.display(),
                last_step = report.last_step,
                identifiers = ?report.identifiers,
                "Report"
            );
        }
        Ok(())
    }
}
