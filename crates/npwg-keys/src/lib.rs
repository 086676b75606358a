//! Curve25519 key primitives for NexusPointWG.
//!
//! WireGuard identifies peers by Curve25519 keys, exchanged as base64.
//! This crate generates clamped private keys in-process (no external key
//! tooling), derives public keys, and validates keys received from
//! clients or found in configuration files.

pub mod error;
mod keys;

pub use error::KeyError;
pub use keys::{KeyPair, PrivateKey, PublicKey, KEY_SIZE};
