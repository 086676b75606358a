//! Key types.
//!
//! Keys are 32 bytes. Private keys are stored clamped so that the base64
//! form written to configuration files is directly usable by other
//! WireGuard tooling.

use std::fmt;

use base64::Engine;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::error::{KeyError, Result};

/// WireGuard key size in bytes (256-bit Curve25519 keys).
pub const KEY_SIZE: usize = 32;

fn clamp(mut bytes: [u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    bytes[0] &= 0xf8;
    bytes[31] = (bytes[31] & 0x7f) | 0x40;
    bytes
}

/// A WireGuard public key (Curve25519, 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Creates a public key from raw bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a public key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidPublicKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the public key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a public key from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        let short = &b64[..8.min(b64.len())];
        write!(f, "PublicKey({short}...)")
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(key: X25519PublicKey) -> Self {
        Self::from_bytes_array(*key.as_bytes())
    }
}

/// A WireGuard private key (Curve25519, 32 bytes, clamped on generation).
#[derive(Clone)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    /// Generates a new random private key with the Curve25519 clamp applied.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generation`] if the system CSPRNG fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self(clamp(bytes)))
    }

    /// Creates a private key from a 32-byte array, as-is.
    ///
    /// Externally supplied keys are accepted unclamped; scalar
    /// multiplication clamps internally, matching other WireGuard
    /// implementations.
    #[must_use]
    pub const fn from_bytes_array(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a private key from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(KeyError::InvalidPrivateKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the private key.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derives the corresponding public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        let public = X25519PublicKey::from(&secret);
        PublicKey::from(public)
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decodes a private key from base64.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or wrong length.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PrivateKey {}

/// A WireGuard key pair (private + public).
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a new random key pair.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generation`] if the system CSPRNG fails.
    pub fn generate() -> Result<Self> {
        let private = PrivateKey::generate()?;
        let public = private.public_key();
        Ok(Self { private, public })
    }

    /// Creates a key pair from an existing private key.
    #[must_use]
    pub fn from_private_key(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Returns a reference to the private key.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Returns a reference to the public key.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .field("public", &self.public)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_private_key_is_clamped() {
        for _ in 0..100 {
            let key = PrivateKey::generate().expect("generate");
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key.to_base64())
                .expect("decode");
            assert_eq!(decoded.len(), KEY_SIZE);
            assert_eq!(decoded[0] & 0x07, 0, "low bits must be cleared");
            assert_eq!(decoded[31] & 0xc0, 0x40, "high bits must be 01");
        }
    }

    #[test]
    fn private_key_to_public_key_is_deterministic() {
        let private = PrivateKey::generate().expect("generate");
        assert_eq!(private.public_key(), private.public_key());
    }

    #[test]
    fn different_private_keys_produce_different_public_keys() {
        let a = PrivateKey::generate().expect("generate");
        let b = PrivateKey::generate().expect("generate");
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn public_key_base64_roundtrip() {
        let public = PrivateKey::generate().expect("generate").public_key();
        let decoded = PublicKey::from_base64(&public.to_base64()).expect("decode");
        assert_eq!(public, decoded);
    }

    #[test]
    fn private_key_base64_roundtrip() {
        let private = PrivateKey::generate().expect("generate");
        let decoded = PrivateKey::from_base64(&private.to_base64()).expect("decode");
        assert_eq!(private, decoded);
    }

    #[test]
    fn base64_decode_tolerates_surrounding_whitespace() {
        let private = PrivateKey::generate().expect("generate");
        let padded = format!("  {}\n", private.to_base64());
        assert_eq!(PrivateKey::from_base64(&padded).expect("decode"), private);
    }

    #[test]
    fn unclamped_import_derives_same_public_as_wireguard() {
        // StaticSecret clamps during multiplication, so an unclamped
        // import and its clamped form must agree on the public key.
        let raw = [0xffu8; KEY_SIZE];
        let imported = PrivateKey::from_bytes_array(raw);
        let clamped = PrivateKey::from_bytes_array(clamp(raw));
        assert_eq!(imported.public_key(), clamped.public_key());
    }

    #[test]
    fn invalid_key_length_rejected() {
        let short = [0u8; 16];
        assert!(matches!(
            PrivateKey::from_bytes(&short),
            Err(KeyError::InvalidPrivateKey(_))
        ));
        assert!(matches!(
            PublicKey::from_bytes(&short),
            Err(KeyError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn invalid_base64_rejected() {
        assert!(PrivateKey::from_base64("not base64!!!").is_err());
        assert!(PublicKey::from_base64("====").is_err());
    }

    #[test]
    fn private_key_debug_redacts() {
        let private = PrivateKey::generate().expect("generate");
        let debug = format!("{private:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&private.to_base64()));
    }

    #[test]
    fn keypair_from_private_key() {
        let private = PrivateKey::generate().expect("generate");
        let expected = private.public_key();
        let keypair = KeyPair::from_private_key(private);
        assert_eq!(keypair.public_key(), &expected);
    }

    #[test]
    fn public_key_serde_roundtrip() {
        let public = PrivateKey::generate().expect("generate").public_key();
        let json = serde_json::to_string(&public).expect("serialize");
        let back: PublicKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(public, back);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn clamp_is_idempotent(bytes in prop::array::uniform32(any::<u8>())) {
                let once = clamp(bytes);
                prop_assert_eq!(clamp(once), once);
            }

            #[test]
            fn public_key_base64_roundtrip_prop(bytes in prop::array::uniform32(any::<u8>())) {
                let public = PublicKey::from_bytes_array(bytes);
                let decoded = PublicKey::from_base64(&public.to_base64());
                prop_assert!(decoded.is_ok());
                prop_assert_eq!(public, decoded.unwrap());
            }

            #[test]
            fn derivation_is_consistent(seed in prop::array::uniform32(any::<u8>())) {
                let private = PrivateKey::from_bytes_array(seed);
                prop_assert_eq!(private.public_key(), private.public_key());
            }
        }
    }
}
