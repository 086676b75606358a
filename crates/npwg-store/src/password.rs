//! Salted password hashing.

use rand::RngCore;
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn digest(salt_hex: &str, password: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(password.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Hashes a password with a fresh random salt.
///
/// Returns `(salt, hash)` as lowercase hex strings.
#[must_use]
pub fn hash_password(password: &str) -> (String, String) {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = hex(&salt);
    let hash_hex = hex(&digest(&salt_hex, password));
    (salt_hex, hash_hex)
}

/// Verifies a password against a stored salt and hash, in constant time.
#[must_use]
pub fn verify_password(salt: &str, hash: &str, password: &str) -> bool {
    let computed = hex(&digest(salt, password));
    computed.as_bytes().ct_eq(hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let (salt, hash) = hash_password("hunter2");
        assert!(verify_password(&salt, &hash, "hunter2"));
        assert!(!verify_password(&salt, &hash, "hunter3"));
    }

    #[test]
    fn salts_are_unique() {
        let (a, _) = hash_password("same");
        let (b, _) = hash_password("same");
        assert_ne!(a, b);
    }

    #[test]
    fn same_password_different_salt_different_hash() {
        let (_, h1) = hash_password("same");
        let (_, h2) = hash_password("same");
        assert_ne!(h1, h2);
    }
}
