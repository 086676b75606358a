//! Path-bound access to a server configuration file.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use npwg_keys::{PrivateKey, PublicKey};

use crate::document::ServerDocument;
use crate::error::{ConfError, Result};
use crate::parse::parse;

/// A server configuration file on disk.
///
/// Caches the server public key derived from the Interface private key;
/// the cache must be invalidated whenever the Interface section is
/// rewritten.
pub struct ConfFile {
    path: PathBuf,
    public_key: RwLock<Option<PublicKey>>,
}

impl ConfFile {
    /// Binds to a config file path. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            public_key: RwLock::new(None),
        }
    }

    /// The bound path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::NotFound`] if the file does not exist.
    pub fn load(&self) -> Result<ServerDocument> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfError::NotFound(self.path.display().to_string())
            } else {
                ConfError::Io {
                    path: self.path.display().to_string(),
                    source: e,
                }
            }
        })?;
        Ok(parse(&text))
    }

    /// The server's public key, derived from the Interface private key.
    ///
    /// Cached across calls; see [`ConfFile::invalidate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfError::ServerPrivateKeyMissing`] when the Interface
    /// section has no private key, or a key error when it fails to decode.
    pub fn server_public_key(&self, doc: &ServerDocument) -> Result<PublicKey> {
        if let Some(key) = *self.public_key.read() {
            return Ok(key);
        }
        if doc.interface.private_key.is_empty() {
            return Err(ConfError::ServerPrivateKeyMissing);
        }
        let private = PrivateKey::from_base64(&doc.interface.private_key)?;
        let public = private.public_key();
        *self.public_key.write() = Some(public);
        Ok(public)
    }

    /// Drops the cached server public key. Call after any write that may
    /// have touched the Interface section.
    pub fn invalidate(&self) {
        debug!(path = %self.path.display(), "invalidating server public key cache");
        *self.public_key.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npwg_keys::KeyPair;
    use std::io::Write as _;

    fn write_conf(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(contents.as_bytes()).expect("write");
        path
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = ConfFile::new(dir.path().join("wg0.conf"));
        assert!(matches!(conf.load(), Err(ConfError::NotFound(_))));
    }

    #[test]
    fn server_public_key_is_derived_and_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pair = KeyPair::generate().expect("keypair");
        let path = write_conf(
            dir.path(),
            "wg0.conf",
            &format!(
                "[Interface]\nPrivateKey = {}\nAddress = 10.0.0.1/24\n",
                pair.private_key().to_base64()
            ),
        );
        let conf = ConfFile::new(path);
        let doc = conf.load().expect("load");
        let key = conf.server_public_key(&doc).expect("derive");
        assert_eq!(&key, pair.public_key());

        // Cached value survives a document with a different key until
        // invalidated.
        let other = KeyPair::generate().expect("keypair");
        let mut doc2 = doc.clone();
        doc2.interface.private_key = other.private_key().to_base64();
        assert_eq!(&conf.server_public_key(&doc2).expect("cached"), pair.public_key());
        conf.invalidate();
        assert_eq!(&conf.server_public_key(&doc2).expect("fresh"), other.public_key());
    }

    #[test]
    fn missing_private_key_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_conf(dir.path(), "wg0.conf", "[Interface]\nAddress = 10.0.0.1/24\n");
        let conf = ConfFile::new(path);
        let doc = conf.load().expect("load");
        assert!(matches!(
            conf.server_public_key(&doc),
            Err(ConfError::ServerPrivateKeyMissing)
        ));
    }
}
