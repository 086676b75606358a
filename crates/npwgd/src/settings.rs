//! Startup configuration.
//!
//! Settings load from an optional TOML file; every field has the
//! documented default, so an empty file (or none at all) yields a working
//! local configuration. Validation failures abort startup with exit
//! code 1.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use npwg_manager::{ApplyDriver, Error, ErrorKind, WgSettings};

/// Bind settings for the (out-of-process) HTTP front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingSettings {
    /// Address to bind.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to bind.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSettings {
    /// Database path.
    #[serde(default = "default_data_source_name")]
    pub data_source_name: String,
}

/// JWT settings, consumed by the external HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    /// Signing secret.
    #[serde(default)]
    pub secret: String,
    /// Token lifetime, e.g. `7d`, `24h`, `30m`.
    #[serde(default = "default_jwt_expiration")]
    pub expiration: String,
}

/// Log settings. Rotation knobs are accepted for compatibility; rotation
/// itself is handled outside this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log file path; empty logs to stderr.
    #[serde(default)]
    pub log_file: String,
    /// Max size per file, MB.
    #[serde(default = "default_log_max_size")]
    pub max_size: u32,
    /// Rotated files kept.
    #[serde(default = "default_log_max_backups")]
    pub max_backups: u32,
    /// Max age, days.
    #[serde(default = "default_log_max_age")]
    pub max_age: u32,
    /// Compress rotated files.
    #[serde(default = "default_log_compress")]
    pub compress: bool,
}

/// WireGuard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireguardSettings {
    /// Directory holding the interface configs.
    #[serde(default = "default_wg_root_dir")]
    pub root_dir: String,
    /// Managed interface name.
    #[serde(default = "default_wg_interface")]
    pub interface: String,
    /// Client artifact directory, absolute or relative to `root_dir`.
    #[serde(default)]
    pub user_dir: String,
    /// Global endpoint fallback, `host:port`.
    #[serde(default)]
    pub endpoint: String,
    /// Global DNS fallback.
    #[serde(default)]
    pub dns: String,
    /// Global AllowedIPs fallback.
    #[serde(default)]
    pub default_allowed_ips: String,
    /// Reload mechanism: `systemctl` or `none`.
    #[serde(default = "default_apply_method")]
    pub apply_method: String,
    /// Public address of this host.
    #[serde(default)]
    pub server_ip: String,
}

/// The full startup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP bind settings.
    #[serde(default)]
    pub insecure_serving: ServingSettings,
    /// Database settings.
    #[serde(default)]
    pub sqlite: SqliteSettings,
    /// JWT settings.
    #[serde(default)]
    pub jwt: JwtSettings,
    /// Log settings.
    #[serde(default)]
    pub log: LogSettings,
    /// WireGuard settings.
    #[serde(default)]
    pub wireguard: WireguardSettings,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_port() -> u16 {
    8001
}
fn default_data_source_name() -> String {
    "./nexuspointwg.db".to_string()
}
fn default_jwt_expiration() -> String {
    "7d".to_string()
}
fn default_log_max_size() -> u32 {
    100
}
fn default_log_max_backups() -> u32 {
    3
}
fn default_log_max_age() -> u32 {
    28
}
fn default_log_compress() -> bool {
    true
}
fn default_wg_root_dir() -> String {
    "/etc/wireguard".to_string()
}
fn default_wg_interface() -> String {
    "wg0".to_string()
}
fn default_apply_method() -> String {
    "systemctl".to_string()
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
        }
    }
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            data_source_name: default_data_source_name(),
        }
    }
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration: default_jwt_expiration(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_file: String::new(),
            max_size: default_log_max_size(),
            max_backups: default_log_max_backups(),
            max_age: default_log_max_age(),
            compress: default_log_compress(),
        }
    }
}

impl Default for WireguardSettings {
    fn default() -> Self {
        Self {
            root_dir: default_wg_root_dir(),
            interface: default_wg_interface(),
            user_dir: String::new(),
            endpoint: String::new(),
            dns: String::new(),
            default_allowed_ips: String::new(),
            apply_method: default_apply_method(),
            server_ip: String::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            insecure_serving: ServingSettings::default(),
            sqlite: SqliteSettings::default(),
            jwt: JwtSettings::default(),
            log: LogSettings::default(),
            wireguard: WireguardSettings::default(),
        }
    }
}

/// Parses a duration of the form `<n>[s|m|h|d]`.
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.len().checked_sub(1)?);
    let value: u64 = value.parse().ok()?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return None,
    };
    Some(std::time::Duration::from_secs(seconds))
}

impl Settings {
    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the file is unreadable or
    /// malformed.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::new(
                ErrorKind::Validation,
                format!("reading config {}: {e}", path.display()),
            )
        })?;
        toml::from_str(&text).map_err(|e| {
            Error::new(
                ErrorKind::Validation,
                format!("parsing config {}: {e}", path.display()),
            )
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; startup exits with code 1.
    pub fn validate(&self) -> Result<(), Error> {
        if self.insecure_serving.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(Error::new(
                ErrorKind::Bind,
                format!("invalid bind address: {}", self.insecure_serving.bind_address),
            ));
        }
        if self.insecure_serving.bind_port == 0 {
            return Err(Error::new(ErrorKind::Bind, "bind port must be non-zero"));
        }
        if self.sqlite.data_source_name.is_empty() {
            return Err(Error::new(ErrorKind::Validation, "sqlite data source is empty"));
        }
        if parse_duration(&self.jwt.expiration).is_none() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("invalid jwt expiration: {}", self.jwt.expiration),
            ));
        }
        let wg = &self.wireguard;
        if wg.root_dir.is_empty() {
            return Err(Error::new(ErrorKind::Validation, "wireguard root_dir is empty"));
        }
        if wg.interface.is_empty() || wg.interface.contains(['/', ' ']) {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("invalid interface name: {:?}", wg.interface),
            ));
        }
        if ApplyDriver::from_method(&wg.apply_method).is_none() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("unknown apply method: {}", wg.apply_method),
            ));
        }
        if !wg.endpoint.is_empty() && wg.endpoint.parse::<npwg_net::Endpoint>().is_err() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("invalid endpoint: {}", wg.endpoint),
            ));
        }
        Ok(())
    }

    /// The resolved client artifact directory: absolute, or relative to
    /// the WireGuard root; defaults to `<root>/clients`.
    #[must_use]
    pub fn user_dir(&self) -> PathBuf {
        let root = PathBuf::from(&self.wireguard.root_dir);
        if self.wireguard.user_dir.is_empty() {
            return root.join("clients");
        }
        let dir = PathBuf::from(&self.wireguard.user_dir);
        if dir.is_absolute() {
            dir
        } else {
            root.join(dir)
        }
    }

    /// The manager-facing view of these settings.
    #[must_use]
    pub fn wg_settings(&self) -> WgSettings {
        WgSettings {
            root_dir: PathBuf::from(&self.wireguard.root_dir),
            interface: self.wireguard.interface.clone(),
            user_dir: self.user_dir(),
            endpoint: self.wireguard.endpoint.clone(),
            dns: self.wireguard.dns.clone(),
            default_allowed_ips: self.wireguard.default_allowed_ips.clone(),
            server_ip: self.wireguard.server_ip.clone(),
        }
    }

    /// The configured apply driver. Call after [`Settings::validate`].
    #[must_use]
    pub fn apply_driver(&self) -> ApplyDriver {
        ApplyDriver::from_method(&self.wireguard.apply_method).unwrap_or(ApplyDriver::Noop)
    }
}
