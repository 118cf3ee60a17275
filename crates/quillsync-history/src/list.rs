//! History directory listing for the `history` subcommand.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;

use crate::HistoryError;

/// Summary of one history database.
#[derive(Debug, Clone)]
pub struct HistoryReport {
    pub path: PathBuf,
    pub last_step: i64,
    pub identifiers: Vec<String>,
}

/// Reports every `.db` file in the history directory. Databases that
/// cannot be read are skipped with a warning rather than failing the
/// whole listing.
pub async fn list_databases(dir: &Path) -> Result<Vec<HistoryReport>, HistoryError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HistoryError::Connection(format!("cannot read '{}': {e}", dir.display())))?;

    let mut reports = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_file() || path.extension().map(|e| e != "db").unwrap_or(true) {
            continue;
        }
        match report(&path).await {
            Ok(r) => reports.push(r),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unable to report history")
            }
        }
    }
    reports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(reports)
}

async fn report(path: &Path) -> Result<HistoryReport, HistoryError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| HistoryError::Connection(format!("cannot open '{}': {e}", path.display())))?;

    let identifiers = sqlx::query("SELECT value FROM identifiers ORDER BY value")
        .fetch_all(&pool)
        .await?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let last_step = sqlx::query("SELECT step_id FROM steps ORDER BY step_id DESC LIMIT 1")
        .fetch_optional(&pool)
        .await?
        .map(|row| row.get(0))
        .unwrap_or(0);

    pool.close().await;
    Ok(HistoryReport {
        path: path.to_path_buf(),
        last_step,
        identifiers,
    })
}
