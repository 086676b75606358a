//! The unified error surface of the management plane.
//!
//! Every error carries a stable numeric kind plus a human message; the
//! REST layer maps kinds to status codes and serializes the code for
//! clients. Leaf-crate errors convert losslessly into this type.

use std::fmt;

use npwg_alloc::AllocError;
use npwg_conf::ConfError;
use npwg_keys::KeyError;
use npwg_net::NetError;
use npwg_store::StoreError;

/// Stable error kinds. The numeric values are part of the external API
/// and must never be renumbered: 1xxx input, 2xxx conflict, 3xxx
/// not-found, 4xxx crypto, 5xxx environment, 6xxx auth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Unknown = 1000,
    Validation = 1001,
    Bind = 1002,
    IpNotIpv4 = 1003,
    IpOutOfRange = 1004,
    IpPoolInvalidCidr = 1005,

    IpAlreadyInUse = 2001,
    IpIsNetworkAddress = 2002,
    IpIsBroadcastAddress = 2003,
    IpIsServerIp = 2004,
    IpPoolAlreadyExists = 2005,
    IpPoolInUse = 2006,
    UserAlreadyExist = 2007,
    EmailAlreadyExist = 2008,
    IpPoolDisabled = 2009,

    WgPeerNotFound = 3001,
    IpPoolNotFound = 3002,
    UserNotFound = 3003,
    WgServerConfigNotFound = 3004,
    WgAllowedIpsNotFound = 3005,
    WgIpv4PrefixNotFound = 3006,
    WgUserConfigNotFound = 3007,

    WgKeyGenerationFailed = 4001,
    WgPrivateKeyInvalid = 4002,
    WgPublicKeyGenerationFailed = 4003,
    WgServerPrivateKeyMissing = 4004,

    WgConfigNotInitialized = 5001,
    WgServerAddressInvalid = 5002,
    WgEndpointRequired = 5003,
    WgPrefixTooSmall = 5004,
    WgWriteServerConfigFailed = 5005,
    WgApplyFailed = 5006,
    WgLockAcquireFailed = 5007,
    Database = 5008,
    WgIpAllocationFailed = 5009,

    PasswordIncorrect = 6001,
    UserNotActive = 6002,
    PermissionDenied = 6003,
}

impl ErrorKind {
    /// The stable numeric code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// An error with a stable kind and a human message.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error from a kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The stable numeric code of the kind.
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.kind.code()
    }

    /// The human message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for Error {}

/// Result type alias for management operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<KeyError> for Error {
    fn from(err: KeyError) -> Self {
        let kind = match &err {
            KeyError::Generation(_) => ErrorKind::WgKeyGenerationFailed,
            KeyError::InvalidPrivateKey(_) => ErrorKind::WgPrivateKeyInvalid,
            KeyError::InvalidPublicKey(_) => ErrorKind::Validation,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<NetError> for Error {
    fn from(err: NetError) -> Self {
        let kind = match &err {
            NetError::NotIpv4(_) => ErrorKind::IpNotIpv4,
            NetError::InvalidCidr(_) => ErrorKind::IpPoolInvalidCidr,
            NetError::InvalidEndpoint(_) => ErrorKind::Validation,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ConfError> for Error {
    fn from(err: ConfError) -> Self {
        let kind = match &err {
            ConfError::NotFound(_) => ErrorKind::WgServerConfigNotFound,
            ConfError::Io { .. } => ErrorKind::WgConfigNotInitialized,
            ConfError::ServerPrivateKeyMissing => ErrorKind::WgServerPrivateKeyMissing,
            ConfError::Key(_) => ErrorKind::WgPrivateKeyInvalid,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::UserAlreadyExists(_) => ErrorKind::UserAlreadyExist,
            StoreError::EmailAlreadyExists(_) => ErrorKind::EmailAlreadyExist,
            StoreError::PoolAlreadyExists(_) => ErrorKind::IpPoolAlreadyExists,
            StoreError::PoolInUse(_) => ErrorKind::IpPoolInUse,
            StoreError::IpAlreadyInUse(_) => ErrorKind::IpAlreadyInUse,
            StoreError::PoolCidrImmutable(_) => ErrorKind::Validation,
            StoreError::UserNotFound(_) => ErrorKind::UserNotFound,
            StoreError::PoolNotFound(_) => ErrorKind::IpPoolNotFound,
            StoreError::PeerNotFound(_) => ErrorKind::WgPeerNotFound,
            StoreError::PasswordIncorrect => ErrorKind::PasswordIncorrect,
            StoreError::UserNotActive(_) => ErrorKind::UserNotActive,
            StoreError::Database(_) => ErrorKind::Database,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        let kind = match &err {
            AllocError::PoolNotFound(_) => ErrorKind::IpPoolNotFound,
            AllocError::PoolDisabled(_) => ErrorKind::IpPoolDisabled,
            AllocError::InvalidCidr(_) => ErrorKind::IpPoolInvalidCidr,
            AllocError::NotIpv4(_) => ErrorKind::IpNotIpv4,
            AllocError::OutOfRange { .. } => ErrorKind::IpOutOfRange,
            AllocError::NetworkAddress(_) => ErrorKind::IpIsNetworkAddress,
            AllocError::BroadcastAddress(_) => ErrorKind::IpIsBroadcastAddress,
            AllocError::ServerIp(_) => ErrorKind::IpIsServerIp,
            AllocError::AlreadyInUse(_) => ErrorKind::IpAlreadyInUse,
            AllocError::Exhausted(_) => ErrorKind::WgIpAllocationFailed,
            AllocError::Store(store) => return Self::from_store_ref(store, err.to_string()),
        };
        Self::new(kind, err.to_string())
    }
}

impl Error {
    fn from_store_ref(err: &StoreError, message: String) -> Self {
        let kind = match err {
            StoreError::UserAlreadyExists(_) => ErrorKind::UserAlreadyExist,
            StoreError::EmailAlreadyExists(_) => ErrorKind::EmailAlreadyExist,
            StoreError::PoolAlreadyExists(_) => ErrorKind::IpPoolAlreadyExists,
            StoreError::PoolInUse(_) => ErrorKind::IpPoolInUse,
            StoreError::IpAlreadyInUse(_) => ErrorKind::IpAlreadyInUse,
            StoreError::PoolCidrImmutable(_) => ErrorKind::Validation,
            StoreError::UserNotFound(_) => ErrorKind::UserNotFound,
            StoreError::PoolNotFound(_) => ErrorKind::IpPoolNotFound,
            StoreError::PeerNotFound(_) => ErrorKind::WgPeerNotFound,
            StoreError::PasswordIncorrect => ErrorKind::PasswordIncorrect,
            StoreError::UserNotActive(_) => ErrorKind::UserNotActive,
            StoreError::Database(_) => ErrorKind::Database,
        };
        Self::new(kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_class() {
        assert_eq!(ErrorKind::Validation.code(), 1001);
        assert_eq!(ErrorKind::IpAlreadyInUse.code(), 2001);
        assert_eq!(ErrorKind::WgPeerNotFound.code(), 3001);
        assert_eq!(ErrorKind::WgKeyGenerationFailed.code(), 4001);
        assert_eq!(ErrorKind::WgApplyFailed.code(), 5006);
        assert_eq!(ErrorKind::PasswordIncorrect.code(), 6001);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::new(ErrorKind::IpAlreadyInUse, "ip already in use: 10.0.0.2");
        assert_eq!(err.to_string(), "[2001] ip already in use: 10.0.0.2");
    }

    #[test]
    fn alloc_errors_map_to_specific_kinds() {
        let err: Error = AllocError::NetworkAddress("10.0.0.0".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::IpIsNetworkAddress);
        let err: Error = AllocError::ServerIp("10.0.0.1".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::IpIsServerIp);
        let err: Error =
            AllocError::Store(StoreError::IpAlreadyInUse("x".to_string())).into();
        assert_eq!(err.kind(), ErrorKind::IpAlreadyInUse);
    }

    #[test]
    fn store_errors_map_to_specific_kinds() {
        let err: Error = StoreError::PasswordIncorrect.into();
        assert_eq!(err.kind(), ErrorKind::PasswordIncorrect);
        let err: Error = StoreError::PoolInUse("p".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::IpPoolInUse);
    }
}
