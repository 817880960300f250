//! Password-gated RPC access. The configured password is stored as its
//! SHA-256 hex digest; `Authenticate` compares against a freshly hashed
//! candidate. Authentication state is tracked per RPC session (see
//! [`crate::rpc`]) rather than as a single process-wide flag: the source's
//! single global `isUserAuth` does not specify what happens with concurrent
//! clients, and a shared flag would let one client's successful
//! authentication leak to another.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

pub struct AuthState {
    password_sha256_hex: RwLock<String>,
}

impl AuthState {
    pub fn new(password_sha256_hex: String) -> Self {
        AuthState {
            password_sha256_hex: RwLock::new(password_sha256_hex),
        }
    }

    pub fn has_password(&self) -> bool {
        !self.password_sha256_hex.read().is_empty()
    }

    /// Check a plaintext password against the configured digest.
    pub fn check(&self, candidate: &str) -> bool {
        let configured = self.password_sha256_hex.read();
        if configured.is_empty() {
            return true;
        }
        hash_hex(candidate) == *configured
    }

    /// Called by reload when the password field of the config document
    /// changes. Clearing any cached session auth flag is the caller's
    /// concern (here: there is none, since auth is per-session).
    pub fn apply_password(&self, new_password: &str) {
        let new_hash = if new_password.is_empty() {
            String::new()
        } else {
            new_password.to_string()
        };
        *self.password_sha256_hex.write() = new_hash;
    }
}

/// Hex-encoded SHA-256 digest of `input`.
pub fn hash_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The `-H` CLI utility: prompt twice with echo disabled, compare, print the
/// digest to stdout. Mirrors the source's `generateHash`.
pub fn generate_hash_interactive() -> anyhow::Result<()> {
    let first = rpassword::prompt_password("Password: ")?;
    let second = rpassword::prompt_password("Confirm password: ")?;
    if first != second {
        anyhow::bail!("password incorrect");
    }
    println!("{}", hash_hex(&first));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_allows_everything() {
        let auth = AuthState::new(String::new());
        assert!(!auth.has_password());
        assert!(auth.check("anything"));
    }

    #[test]
    fn configured_password_requires_matching_hash() {
        let auth = AuthState::new(hash_hex("secret"));
        assert!(auth.has_password());
        assert!(auth.check("secret"));
        assert!(!auth.check("wrong"));
    }

    #[test]
    fn apply_password_updates_digest() {
        let auth = AuthState::new(hash_hex("old"));
        auth.apply_password(&hash_hex("new"));
        assert!(!auth.check("old"));
        assert!(auth.check("new"));
    }
}
