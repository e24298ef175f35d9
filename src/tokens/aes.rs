use std::fmt;
use std::sync::Arc;

use aes::Aes256;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{DeterministicTokenizationStrategy, ReversibleTokenizationStrategy};
use crate::error::{GatewayError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const KEY_SIZE_BYTES: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 65_536;

const CBC_IV_LENGTH: usize = 16;
const GCM_NONCE_LENGTH: usize = 12;

/// Which AES mode encrypts the identifier.
///
/// CBC tokens have a fixed size for a given plaintext block count; GCM tokens are always
/// `hash + plaintext + 16` bytes (authentication tag), so their length tracks the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSuite {
    Cbc,
    #[default]
    Gcm,
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherSuite::Cbc => write!(f, "AES/CBC/PKCS5Padding"),
            CipherSuite::Gcm => write!(f, "AES/GCM/NoPadding"),
        }
    }
}

/// 256-bit AES key. Zeroed on drop and never printed.
#[derive(Clone)]
pub struct SecretKey(Zeroizing<[u8; KEY_SIZE_BYTES]>);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE_BYTES] =
            bytes.try_into().map_err(|_| GatewayError::InvalidKey {
                reason: format!("expected {KEY_SIZE_BYTES} bytes, got {}", bytes.len()),
            })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Parse a base64 (url-safe or standard, padding optional) encoded key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed)
            .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
            .map_err(|e| GatewayError::InvalidKey {
                reason: e.to_string(),
            })?;
        Self::from_bytes(&Zeroizing::new(bytes))
    }

    /// PBKDF2-HMAC-SHA256 with 65,536 iterations. Intended for tests and local tooling;
    /// production keys come from the secret store.
    pub fn derive_from_password(password: &str, salt: &str) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE_BYTES]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            password.as_bytes(),
            salt.as_bytes(),
            PBKDF2_ITERATIONS,
            &mut key[..],
        );
        Self(key)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// `hash || AES(identifier)`, where the IV (CBC) or nonce (GCM) is the leading bytes of
/// `hash`.
///
/// Deriving the cipher parameters from the hash makes encryption deterministic: the same
/// identifier, salt and key always produce the same token, so tokens can be joined across
/// requests.
pub struct AesReversibleTokenizationStrategy {
    cipher_suite: CipherSuite,
    deterministic: Arc<dyn DeterministicTokenizationStrategy>,
    key: SecretKey,
}

impl AesReversibleTokenizationStrategy {
    pub fn new(
        cipher_suite: CipherSuite,
        deterministic: Arc<dyn DeterministicTokenizationStrategy>,
        key: SecretKey,
    ) -> Self {
        Self {
            cipher_suite,
            deterministic,
            key,
        }
    }

    fn encrypt(&self, hash: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.cipher_suite {
            CipherSuite::Cbc => {
                let cipher = Aes256CbcEnc::new_from_slices(
                    self.key.as_bytes(),
                    &hash[..CBC_IV_LENGTH],
                )
                .map_err(|e| GatewayError::InvalidKey {
                    reason: e.to_string(),
                })?;
                Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
            }
            CipherSuite::Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes()).map_err(|e| {
                    GatewayError::InvalidKey {
                        reason: e.to_string(),
                    }
                })?;
                cipher
                    .encrypt(Nonce::from_slice(&hash[..GCM_NONCE_LENGTH]), plaintext)
                    .map_err(|_| GatewayError::InvalidKey {
                        reason: "AES-GCM encryption failed".into(),
                    })
            }
        }
    }

    fn decrypt(&self, hash: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self.cipher_suite {
            CipherSuite::Cbc => {
                let cipher = Aes256CbcDec::new_from_slices(
                    self.key.as_bytes(),
                    &hash[..CBC_IV_LENGTH],
                )
                .map_err(|e| GatewayError::InvalidKey {
                    reason: e.to_string(),
                })?;
                cipher
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| GatewayError::CannotReverse {
                        reason: "bad padding; wrong key or corrupted token".into(),
                    })
            }
            CipherSuite::Gcm => {
                let cipher = Aes256Gcm::new_from_slice(self.key.as_bytes()).map_err(|e| {
                    GatewayError::InvalidKey {
                        reason: e.to_string(),
                    }
                })?;
                cipher
                    .decrypt(Nonce::from_slice(&hash[..GCM_NONCE_LENGTH]), ciphertext)
                    .map_err(|_| GatewayError::CannotReverse {
                        reason: "authentication failed; wrong key or corrupted token".into(),
                    })
            }
        }
    }

    fn min_hash_length(&self) -> usize {
        match self.cipher_suite {
            CipherSuite::Cbc => CBC_IV_LENGTH,
            CipherSuite::Gcm => GCM_NONCE_LENGTH,
        }
    }
}

impl ReversibleTokenizationStrategy for AesReversibleTokenizationStrategy {
    fn reversible_token(
        &self,
        identifier: &str,
        canonicalize: &dyn Fn(&str) -> String,
    ) -> Result<Vec<u8>> {
        let hash = self.deterministic.token(identifier, canonicalize);
        if hash.len() < self.min_hash_length() {
            return Err(GatewayError::InvalidRule {
                reason: format!(
                    "{} tokens too short to derive {} parameters",
                    self.deterministic.name(),
                    self.cipher_suite
                ),
            });
        }
        let ciphertext = self.encrypt(&hash, identifier.as_bytes())?;

        let mut token = hash;
        token.extend_from_slice(&ciphertext);
        Ok(token)
    }

    fn original_datum(&self, reversible_token: &[u8]) -> Result<String> {
        let hash_length = self.deterministic.token_length();
        if reversible_token.len() <= hash_length || hash_length < self.min_hash_length() {
            return Err(GatewayError::CannotReverse {
                reason: format!("token truncated ({} bytes)", reversible_token.len()),
            });
        }
        let (hash, ciphertext) = reversible_token.split_at(hash_length);
        let plaintext = Zeroizing::new(self.decrypt(hash, ciphertext)?);

        String::from_utf8(plaintext.to_vec()).map_err(|_| GatewayError::CannotReverse {
            reason: "decrypted bytes are not valid UTF-8".into(),
        })
    }

    fn hash_length(&self) -> usize {
        self.deterministic.token_length()
    }
}

impl fmt::Debug for AesReversibleTokenizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesReversibleTokenizationStrategy")
            .field("cipher_suite", &self.cipher_suite)
            .field("deterministic", &self.deterministic.name())
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{identity, Sha256DeterministicTokenizationStrategy};

    fn strategy(cipher_suite: CipherSuite) -> AesReversibleTokenizationStrategy {
        AesReversibleTokenizationStrategy::new(
            cipher_suite,
            Arc::new(Sha256DeterministicTokenizationStrategy::new("salt")),
            SecretKey::derive_from_password("secret", "salt"),
        )
    }

    #[test]
    fn test_cbc_reverses_known_token() {
        let token = URL_SAFE_NO_PAD
            .decode("NHXWS5CZDysDs3ETExXiMZxM2DfffirkjgmA64R9hCenHbNbPsOt4W-Hx8SDUaQY")
            .unwrap();
        assert_eq!(strategy(CipherSuite::Cbc).original_datum(&token).unwrap(), "blah");
    }

    #[test]
    fn test_gcm_reverses_known_token() {
        let token = URL_SAFE_NO_PAD
            .decode("nVPSMYD7ZO_ptGIMJ65TAFo5_vVVQQ2af5Bfg7bW0JpFszshi2nfr3BovVcPFYct2qRdcA")
            .unwrap();
        assert_eq!(strategy(CipherSuite::Gcm).original_datum(&token).unwrap(), "blah");
    }

    #[test]
    fn test_gcm_token_matches_known_encoding() {
        let token = strategy(CipherSuite::Gcm)
            .reversible_token("blah", &identity)
            .unwrap();
        assert_eq!(
            URL_SAFE_NO_PAD.encode(token),
            "nVPSMYD7ZO_ptGIMJ65TAFo5_vVVQQ2af5Bfg7bW0JpFszshi2nfr3BovVcPFYct2qRdcA"
        );
    }

    #[test]
    fn test_cbc_sizes_are_fixed_for_short_inputs() {
        let s = strategy(CipherSuite::Cbc);
        for i in [0u32, 7, 123_456, 999_999_999] {
            let token = s.reversible_token(&format!("blah{i}"), &identity).unwrap();
            assert_eq!(token.len(), 32 + 16);
            assert_eq!(URL_SAFE_NO_PAD.encode(&token).len(), 64);
        }
    }

    #[test]
    fn test_gcm_size_tracks_plaintext() {
        let s = strategy(CipherSuite::Gcm);
        assert_eq!(s.reversible_token("blah", &identity).unwrap().len(), 32 + 4 + 16);
        assert_eq!(s.reversible_token("blah!", &identity).unwrap().len(), 32 + 5 + 16);
    }

    #[test]
    fn test_hash_prefix_matches_deterministic_token() {
        let deterministic = Sha256DeterministicTokenizationStrategy::new("salt");
        for suite in [CipherSuite::Cbc, CipherSuite::Gcm] {
            let token = strategy(suite).reversible_token("blah", &identity).unwrap();
            assert_eq!(&token[..32], deterministic.token_of("blah").as_slice());
        }
    }

    #[test]
    fn test_wrong_key_cannot_reverse() {
        for suite in [CipherSuite::Cbc, CipherSuite::Gcm] {
            let token = strategy(suite).reversible_token("blah", &identity).unwrap();
            let other = AesReversibleTokenizationStrategy::new(
                suite,
                Arc::new(Sha256DeterministicTokenizationStrategy::new("salt")),
                SecretKey::derive_from_password("other secret", "salt"),
            );
            match other.original_datum(&token) {
                Err(GatewayError::CannotReverse { .. }) => {}
                // CBC padding can occasionally validate under a wrong key; the plaintext
                // must still differ from the original.
                Ok(plain) => {
                    assert_eq!(suite, CipherSuite::Cbc);
                    assert_ne!(plain, "blah");
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_corrupted_gcm_token_is_rejected() {
        let s = strategy(CipherSuite::Gcm);
        let mut token = s.reversible_token("blah", &identity).unwrap();
        let last = token.len() - 1;
        token[last] ^= 0x01;
        assert!(matches!(
            s.original_datum(&token),
            Err(GatewayError::CannotReverse { .. })
        ));
    }

    #[test]
    fn test_truncated_token_is_rejected() {
        let s = strategy(CipherSuite::Cbc);
        let token = s.reversible_token("blah", &identity).unwrap();
        assert!(matches!(
            s.original_datum(&token[..32]),
            Err(GatewayError::CannotReverse { .. })
        ));
        assert!(matches!(
            s.original_datum(&token[..40]),
            Err(GatewayError::CannotReverse { .. })
        ));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = SecretKey::derive_from_password("secret", "salt");
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = URL_SAFE_NO_PAD.encode([7u8; 32]);
        assert!(SecretKey::from_base64(&encoded).is_ok());
        assert!(matches!(
            SecretKey::from_base64("dG9vIHNob3J0"),
            Err(GatewayError::InvalidKey { .. })
        ));
    }
}
