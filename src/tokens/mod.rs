//! Tokenization strategies: deterministic digests of identifiers, and reversible tokens that
//! prefix such a digest to an encryption of the identifier.

pub mod aes;
pub mod md5;
pub mod sha256;

pub use self::aes::{AesReversibleTokenizationStrategy, CipherSuite, SecretKey};
pub use self::md5::Md5DeterministicTokenizationStrategy;
pub use self::sha256::Sha256DeterministicTokenizationStrategy;

use crate::error::Result;

/// Canonicalization that leaves the identifier as-is.
pub fn identity(identifier: &str) -> String {
    identifier.to_string()
}

/// Canonicalization that lower-cases the identifier.
pub fn lower_case(identifier: &str) -> String {
    identifier.to_lowercase()
}

/// Salted, one-way digest of an identifier.
///
/// Implementations are pure: the same salt, canonicalization and identifier always yield the
/// same bytes, and every input (including the empty string) yields exactly
/// [`token_length`](DeterministicTokenizationStrategy::token_length) bytes.
pub trait DeterministicTokenizationStrategy: Send + Sync {
    /// Digest of `canonicalize(identifier)` mixed with the strategy's salt.
    fn token(&self, identifier: &str, canonicalize: &dyn Fn(&str) -> String) -> Vec<u8>;

    /// Length in bytes of every token this strategy produces.
    fn token_length(&self) -> usize;

    /// Name of this strategy (for logging/debugging).
    fn name(&self) -> &str;

    /// Digest of `identifier` with no canonicalization.
    fn token_of(&self, identifier: &str) -> Vec<u8> {
        self.token(identifier, &identity)
    }
}

/// Token of the form `hash || ciphertext`, reversible by whoever holds the key.
pub trait ReversibleTokenizationStrategy: Send + Sync {
    /// Deterministic token for `identifier`; its leading bytes equal the paired
    /// deterministic strategy's token for the same input.
    fn reversible_token(
        &self,
        identifier: &str,
        canonicalize: &dyn Fn(&str) -> String,
    ) -> Result<Vec<u8>>;

    /// Decrypts a token produced by [`reversible_token`](Self::reversible_token).
    fn original_datum(&self, reversible_token: &[u8]) -> Result<String>;

    /// Length in bytes of the hash prefix of every token.
    fn hash_length(&self) -> usize;
}
