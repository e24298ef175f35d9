use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::email::EmailCanonicalization;
use crate::error::{GatewayError, Result};
use crate::pseudonyms::{
    EmailDomainPolicy, PseudonymEncoding, PseudonymImplementation, Pseudonymizer,
    PseudonymizerOptions,
};
use crate::rules::RuleSet;
use crate::sanitize::Sanitizer;
use crate::tokens::{CipherSuite, SecretKey};

/// Overrides `salt`.
pub const SALT_ENV: &str = "GATEWAY_SALT";

/// Overrides `encryptionKey`.
pub const ENCRYPTION_KEY_ENV: &str = "GATEWAY_ENCRYPTION_KEY";

/// Pseudonymization settings for a gateway deployment.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Salt mixed into every deterministic token. Required.
    #[serde(default)]
    pub salt: String,

    /// Base64url AES-256 key; reversible pseudonyms are unavailable without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,

    #[serde(default)]
    pub cipher_suite: CipherSuite,

    #[serde(default)]
    pub pseudonym_implementation: PseudonymImplementation,

    #[serde(default)]
    pub email_domain_policy: EmailDomainPolicy,

    #[serde(default)]
    pub email_canonicalization: EmailCanonicalization,

    /// Encoding for pseudonymize transforms that do not name one.
    #[serde(default)]
    pub pseudonym_encoding: PseudonymEncoding,
}

impl GatewayConfig {
    /// Load config from a YAML file. Returns default if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| GatewayError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load config from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(salt) = std::env::var(SALT_ENV) {
            self.salt = salt;
        }
        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            self.encryption_key = Some(key);
        }
    }

    pub fn pseudonymizer_options(&self) -> PseudonymizerOptions {
        PseudonymizerOptions {
            implementation: self.pseudonym_implementation,
            email_domain_policy: self.email_domain_policy,
            email_canonicalization: self.email_canonicalization,
        }
    }

    pub fn pseudonymizer(&self) -> Result<Pseudonymizer> {
        if self.salt.is_empty() {
            return Err(GatewayError::MissingConfig {
                name: format!("salt (set it in the config file or {SALT_ENV})"),
            });
        }
        let key = self
            .encryption_key
            .as_deref()
            .map(SecretKey::from_base64)
            .transpose()?;
        Ok(Pseudonymizer::new(
            self.salt.clone(),
            key,
            self.cipher_suite,
            self.pseudonymizer_options(),
        ))
    }

    /// A sanitizer applying `rules` with these settings. Rules are not compiled here.
    pub fn sanitizer(&self, rules: RuleSet) -> Result<Sanitizer> {
        Ok(Sanitizer::new(rules, self.pseudonymizer()?).with_default_encoding(self.pseudonym_encoding))
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("salt", &"<redacted>")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("cipher_suite", &self.cipher_suite)
            .field("pseudonym_implementation", &self.pseudonym_implementation)
            .field("email_domain_policy", &self.email_domain_policy)
            .field("email_canonicalization", &self.email_canonicalization)
            .field("pseudonym_encoding", &self.pseudonym_encoding)
            .finish()
    }
}
