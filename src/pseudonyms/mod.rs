pub mod encoding;
pub mod pseudonymizer;

pub use encoding::{PseudonymEncoding, PseudonymImplementation};
pub use pseudonymizer::{Pseudonymizer, PseudonymizerOptions};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Length of the hash every pseudonym carries (SHA-256).
pub const HASH_SIZE_BYTES: usize = 32;

/// Surrogate for an identifier: its deterministic hash and, optionally, a reversible token
/// whose first [`HASH_SIZE_BYTES`] bytes are that same hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pseudonym {
    hash: Vec<u8>,
    reversible: Option<Vec<u8>>,
    domain: Option<String>,
}

impl Pseudonym {
    pub fn from_hash(hash: Vec<u8>) -> Self {
        Self {
            hash,
            reversible: None,
            domain: None,
        }
    }

    /// Builds a pseudonym from a reversible token; the hash is its prefix.
    pub fn from_reversible(reversible: Vec<u8>) -> Result<Self> {
        if reversible.len() <= HASH_SIZE_BYTES {
            return Err(GatewayError::InvalidPseudonym {
                reason: format!(
                    "reversible token of {} bytes has no payload after its hash",
                    reversible.len()
                ),
            });
        }
        Ok(Self {
            hash: reversible[..HASH_SIZE_BYTES].to_vec(),
            reversible: Some(reversible),
            domain: None,
        })
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn reversible(&self) -> Option<&[u8]> {
        self.reversible.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

/// What happens to the domain of an email address when the address is pseudonymized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailDomainPolicy {
    /// Carry the domain in clear; organizational domains are not PII.
    #[default]
    Preserve,
    /// Carry the deterministic token of the domain instead.
    Hash,
    /// Drop the domain.
    Redact,
}

impl std::str::FromStr for EmailDomainPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preserve" => Ok(EmailDomainPolicy::Preserve),
            "hash" => Ok(EmailDomainPolicy::Hash),
            "redact" => Ok(EmailDomainPolicy::Redact),
            _ => Err(format!("unknown email domain policy: {s}")),
        }
    }
}
