use sha2::{Digest, Sha256};

use super::DeterministicTokenizationStrategy;

pub const HASH_SIZE_BYTES: usize = 32;

/// SHA-256 of `canonicalize(identifier) + salt`.
#[derive(Debug, Clone)]
pub struct Sha256DeterministicTokenizationStrategy {
    salt: String,
}

impl Sha256DeterministicTokenizationStrategy {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }
}

impl DeterministicTokenizationStrategy for Sha256DeterministicTokenizationStrategy {
    fn token(&self, identifier: &str, canonicalize: &dyn Fn(&str) -> String) -> Vec<u8> {
        Sha256::new()
            .chain_update(canonicalize(identifier).as_bytes())
            .chain_update(self.salt.as_bytes())
            .finalize()
            .to_vec()
    }

    fn token_length(&self) -> usize {
        HASH_SIZE_BYTES
    }

    fn name(&self) -> &str {
        "sha256"
    }
}
