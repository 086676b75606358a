//! The service factory and run loop.
//!
//! `Service::build` constructs everything in dependency order: store,
//! config file, lifecycle manager, synchronizer; then bootstraps the
//! default admin and runs one adoption pass. The returned handle is what
//! the HTTP layer binds its routes to.

use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use npwg_conf::ConfFile;
use npwg_manager::{Error, ErrorKind, PeerManager, PoolAdmin, Synchronizer};
use npwg_store::{Store, User, UserRole};

use crate::settings::Settings;

/// Where the bootstrap admin password lands.
const BOOTSTRAP_PASSWORD_FILE: &str = "./pwd.txt";

/// The assembled service.
pub struct Service {
    /// The validated settings the service was built from.
    pub settings: Settings,
    /// The shared store handle.
    pub store: Store,
    /// Peer lifecycle operations.
    pub manager: PeerManager,
    /// Pool administration.
    pub pools: PoolAdmin,
    /// File/database reconciliation.
    pub synchronizer: Synchronizer,
    cancel: CancellationToken,
}

impl Service {
    /// Builds the service: validates settings, opens the store, wires
    /// the components, bootstraps the admin and runs one adoption pass.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or storage error; the process
    /// exits with code 1.
    pub async fn build(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;

        let store = Store::open(&settings.sqlite.data_source_name)?;
        let wg = settings.wg_settings();
        std::fs::create_dir_all(&wg.user_dir).map_err(|e| {
            Error::new(
                ErrorKind::Validation,
                format!("creating {}: {e}", wg.user_dir.display()),
            )
        })?;

        let conf = Arc::new(ConfFile::new(wg.conf_path()));
        let manager = PeerManager::new(store.clone(), conf, wg.clone(), settings.apply_driver());
        let pools = PoolAdmin::new(store.clone());
        let synchronizer = Synchronizer::new(store.clone(), wg);

        bootstrap_admin(&store)?;

        let cancel = CancellationToken::new();
        match synchronizer.sync(&cancel).await {
            Ok(report) => info!(
                adopted = report.adopted,
                retired = report.retired,
                reactivated = report.reactivated,
                failed = report.failed,
                "boot sync pass complete"
            ),
            Err(e) => warn!(error = %e, "boot sync pass failed; continuing"),
        }

        Ok(Self {
            settings,
            store,
            manager,
            pools,
            synchronizer,
            cancel,
        })
    }

    /// The token mutating operations should be called with; cancelled on
    /// shutdown.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Blocks until SIGINT or SIGTERM, then cancels in-flight work.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn run(&self) -> Result<(), Error> {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).map_err(
                |e| Error::new(ErrorKind::Unknown, format!("installing SIGTERM handler: {e}")),
            )?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        self.cancel.cancel();
        info!("shutting down");
        Ok(())
    }
}

/// Creates the default `admin` account on first start. The generated
/// password is written to `./pwd.txt` (mode 0600) and never logged.
fn bootstrap_admin(store: &Store) -> Result<(), Error> {
    if store.first_active_admin()?.is_some() {
        return Ok(());
    }
    if store.user_by_username("admin").is_ok() {
        // An admin row exists but is inactive; leave it to the operator.
        return Ok(());
    }

    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    let admin = User::new("admin", "admin@nexuspointwg.local", &password, UserRole::Admin);
    store.create_user(&admin)?;
    write_password_file(Path::new(BOOTSTRAP_PASSWORD_FILE), &password).map_err(|e| {
        Error::new(
            ErrorKind::Unknown,
            format!("writing {BOOTSTRAP_PASSWORD_FILE}: {e}"),
        )
    })?;
    info!(username = "admin", file = BOOTSTRAP_PASSWORD_FILE, "bootstrap admin created");
    Ok(())
}

fn write_password_file(path: &Path, password: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(password.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
