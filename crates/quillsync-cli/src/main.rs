//! quillsync - synchronize local books with a supported reading
//! device over MTP, a USB mass-storage mount, or e-mail delivery.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod report;

use commands::{
    dumpconfig::DumpConfigCommand, history::HistoryCommand, mail::MailCommand, mtp::MtpCommand,
    usb::UsbCommand, Env,
};
use quillsync_core::config::Config;
use quillsync_sync::ReportSink;
use report::DebugReport;

#[derive(Debug, Parser)]
#[command(
    name = "quillsync",
    version,
    about = "Synchronizes local books with a supported reading device over MTP, USB mount or e-mail",
    disable_help_subcommand = true
)]
struct Cli {
    /// Load configuration from FILE (YAML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Collect a debug report bundle to help troubleshooting
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Synchronize books with the device over the MTP protocol
    Mtp(MtpCommand),
    /// Synchronize books with the device through its USB mount
    Usb(UsbCommand),
    /// Synchronize books with the device using its e-mail address
    Mail(MailCommand),
    /// List local history databases with their details
    History(HistoryCommand),
    /// Dump either the default or the active configuration (YAML)
    Dumpconfig(DumpConfigCommand),
}

// reconciliation is deterministic and strictly serial - one thread is
// all there is to schedule
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command ended with error");
        eprintln!("Command ended with error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .map_err(|e| anyhow::anyhow!("unable to prepare configuration: {e:#}"))?,
        None => Config::default(),
    };

    logging::init(&cfg.logging, cli.debug)?;
    if cli.config.is_none() {
        tracing::info!("Using defaults (no configuration file)");
    }

    let report = if cli.debug {
        let mut report = DebugReport::create(Path::new(&cfg.reporting.dir))?;
        // secrets are masked by the config serializer
        if let Some(path) = &cli.config {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "config.yaml".to_string());
            report.store_data(&format!("config/{name}"), cfg.dump()?.into_bytes());
        }
        if !cfg.logging.file.is_empty() {
            report.store("logs/quillsync.log", Path::new(&cfg.logging.file));
        }
        tracing::info!(location = %report.path().display(), "Creating debug report");
        Some(report)
    } else {
        None
    };

    let mut env = Env {
        cfg,
        report,
        scratch: Vec::new(),
    };

    let result = match &cli.command {
        Commands::Mtp(cmd) => cmd.execute(&mut env).await,
        Commands::Usb(cmd) => cmd.execute(&mut env).await,
        Commands::Mail(cmd) => cmd.execute(&mut env).await,
        Commands::History(cmd) => cmd.execute(&mut env).await,
        Commands::Dumpconfig(cmd) => cmd.execute(&mut env).await,
    };

    // pack the report and only then let the scratch directories go
    if let Some(report) = env.report.take() {
        match report.close() {
            Ok(path) => tracing::info!(path = %path.display(), "Debug report written"),
            Err(e) => eprintln!("Error creating debug report: {e:#}"),
        }
    }
    drop(env.scratch);

    result
}
