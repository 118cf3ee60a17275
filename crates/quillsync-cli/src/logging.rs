//! Tracing setup
//!
//! Level comes from the configuration unless `--debug` raises it, and
//! `RUST_LOG` overrides both. With a log file configured, output goes
//! there without ANSI colors; otherwise it goes to stderr.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use quillsync_core::config::LoggingConfig;

pub fn init(cfg: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { cfg.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cfg.file.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        if let Some(parent) = std::path::Path::new(&cfg.file).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    }
    Ok(())
}
