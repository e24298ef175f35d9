use md5::{Digest, Md5};

use super::DeterministicTokenizationStrategy;

pub const HASH_SIZE_BYTES: usize = 16;

/// MD5 of `salt + canonicalize(identifier)`.
///
/// Shorter tokens for contexts where 43-character SHA-256 tokens are too long. The salt
/// precedes the identifier here, unlike the SHA-256 strategy; both orders are fixed by
/// tokens already issued.
#[derive(Debug, Clone)]
pub struct Md5DeterministicTokenizationStrategy {
    salt: String,
}

impl Md5DeterministicTokenizationStrategy {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }
}

impl DeterministicTokenizationStrategy for Md5DeterministicTokenizationStrategy {
    fn token(&self, identifier: &str, canonicalize: &dyn Fn(&str) -> String) -> Vec<u8> {
        Md5::new()
            .chain_update(self.salt.as_bytes())
            .chain_update(canonicalize(identifier).as_bytes())
            .finalize()
            .to_vec()
    }

    fn token_length(&self) -> usize {
        HASH_SIZE_BYTES
    }

    fn name(&self) -> &str {
        "md5"
    }
}
