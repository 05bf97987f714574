//! bcrypt credential hashing with a work factor fixed per instance.

use thiserror::Error;

pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;
pub const DEFAULT_COST: u32 = 10;

/// Length of every modular-crypt bcrypt string (`$2b$10$` + salt + digest).
pub const HASH_LEN: usize = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("bcrypt cost must be between {MIN_COST} and {MAX_COST}, got {0}")]
    InvalidConfiguration(u32),
    #[error("password does not match")]
    Mismatch,
    #[error("stored password hash is malformed")]
    MalformedHash,
    #[error("failed to hash password: {0}")]
    Internal(String),
}

#[derive(Clone, Copy, Debug)]
pub struct CredentialHasher {
    cost: u32,
}

impl CredentialHasher {
    /// # Errors
    /// Returns [`CredentialError::InvalidConfiguration`] when `cost` is outside 4..=31.
    pub fn new(cost: u32) -> Result<Self, CredentialError> {
        if (MIN_COST..=MAX_COST).contains(&cost) {
            Ok(Self { cost })
        } else {
            Err(CredentialError::InvalidConfiguration(cost))
        }
    }

    #[must_use]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash `plaintext` with a fresh random salt.
    ///
    /// # Errors
    /// Returns [`CredentialError::Internal`] if the salt cannot be generated.
    pub fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        bcrypt::hash(plaintext, self.cost).map_err(|err| CredentialError::Internal(err.to_string()))
    }

    /// # Errors
    /// Returns [`CredentialError::Mismatch`] when the password is wrong and
    /// [`CredentialError::MalformedHash`] when `hash` is not a bcrypt string.
    pub fn verify(&self, hash: &str, plaintext: &str) -> Result<(), CredentialError> {
        match bcrypt::verify(plaintext, hash) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CredentialError::Mismatch),
            Err(_) => Err(CredentialError::MalformedHash),
        }
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}
