//! Error types for the configuration codec.

use thiserror::Error;

/// Errors that can occur loading or interrogating a server config file.
#[derive(Debug, Error)]
pub enum ConfError {
    /// The server configuration file does not exist.
    #[error("server config not found: {0}")]
    NotFound(String),

    /// Reading the file failed.
    #[error("reading server config {path}: {source}")]
    Io {
        /// The file being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The Interface section carries no private key.
    #[error("server private key missing from interface section")]
    ServerPrivateKeyMissing,

    /// The Interface private key failed to decode.
    #[error(transparent)]
    Key(#[from] npwg_keys::KeyError),
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, ConfError>;
