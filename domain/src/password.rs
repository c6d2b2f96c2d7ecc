//! Password hashing: lowercase hex SHA-256 of the UTF-8 password.

use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(password: &str) -> Self {
        Self(hex::encode(Sha256::digest(password.as_bytes())))
    }

    pub fn verify(&self, password: &str) -> bool {
        *self == Self::new(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep digests out of logs.
impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}
