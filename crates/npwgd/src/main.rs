#![allow(clippy::expect_used)]
//! npwgd binary entrypoint.
//!
//! The NexusPointWG daemon: owns one WireGuard interface's configuration
//! file, mediates peer changes, and reconciles the file with its
//! database.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use npwgd::settings::Settings;
use npwgd::Service;

/// npwgd - NexusPointWG Daemon
///
/// Management plane for a single WireGuard interface.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "npwgd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (TOML format).
    #[arg(short, long, env = "NPWG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Loads settings from the configured file, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or malformed.
    pub fn load_settings(&self) -> Result<Settings, npwg_manager::Error> {
        match &self.config {
            Some(path) => Settings::from_file(path),
            None => Ok(Settings::default()),
        }
    }
}

/// Initialize tracing based on verbosity and the log settings.
fn init_tracing(verbose: bool, settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("npwg=debug,npwgd=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("npwg=info,npwgd=info,warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    if settings.log.log_file.is_empty() {
        builder.init();
        return;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.log.log_file)
    {
        Ok(file) => builder.with_ansi(false).with_writer(Arc::new(file)).init(),
        Err(e) => {
            builder.init();
            tracing::warn!(
                path = %settings.log.log_file,
                error = %e,
                "log file unavailable, logging to stderr"
            );
        }
    }
}

/// Run the daemon.
///
/// # Errors
///
/// Returns an error if configuration is invalid or startup fails.
async fn run(cli: Cli) -> Result<(), npwg_manager::Error> {
    let settings = cli.load_settings()?;
    init_tracing(cli.verbose, &settings);

    info!(
        interface = %settings.wireguard.interface,
        root_dir = %settings.wireguard.root_dir,
        "npwgd starting"
    );

    let service = Service::build(settings).await?;
    info!("service initialized");

    service.run().await
}

fn main() {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run(cli)) {
        eprintln!("npwgd error: {e}");
        std::process::exit(1);
    }
}
