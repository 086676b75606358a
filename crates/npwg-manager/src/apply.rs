//! The interface apply step.
//!
//! The service never talks netlink; it rewrites the config file and asks
//! the process supervisor to reload the interface from it.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, ErrorKind, Result};

/// Upper bound on a single reload invocation.
const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// The reload mechanism, selected by `wireguard.apply_method`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyDriver {
    /// `systemctl restart wg-quick@<interface>`.
    Systemctl,
    /// Succeed immediately. For tests and read-only deployments.
    Noop,
}

impl ApplyDriver {
    /// Parses the configured method name.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "systemctl" => Some(Self::Systemctl),
            "none" => Some(Self::Noop),
            _ => None,
        }
    }

    /// Requests a reload of `interface`.
    ///
    /// Only success or failure is distinguished; output is never parsed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WgApplyFailed`] with stderr appended on a
    /// non-zero exit, on timeout, or when the tool cannot be spawned.
    pub async fn apply(&self, interface: &str) -> Result<()> {
        match self {
            Self::Noop => {
                debug!(interface, "apply skipped (method none)");
                Ok(())
            }
            Self::Systemctl => restart_unit(interface).await,
        }
    }
}

async fn restart_unit(interface: &str) -> Result<()> {
    let unit = format!("wg-quick@{interface}");
    let run = Command::new("systemctl")
        .args(["restart", &unit])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(APPLY_TIMEOUT, run)
        .await
        .map_err(|_| {
            Error::new(
                ErrorKind::WgApplyFailed,
                format!("systemctl restart {unit} timed out after {}s", APPLY_TIMEOUT.as_secs()),
            )
        })?
        .map_err(|e| {
            Error::new(
                ErrorKind::WgApplyFailed,
                format!("spawning systemctl restart {unit}: {e}"),
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::new(
            ErrorKind::WgApplyFailed,
            format!("systemctl restart {unit} failed: {}", stderr.trim()),
        ));
    }

    info!(interface, "interface reloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse() {
        assert_eq!(ApplyDriver::from_method("systemctl"), Some(ApplyDriver::Systemctl));
        assert_eq!(ApplyDriver::from_method("none"), Some(ApplyDriver::Noop));
        assert_eq!(ApplyDriver::from_method("ifup"), None);
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        ApplyDriver::Noop.apply("wg0").await.expect("noop");
    }
}
