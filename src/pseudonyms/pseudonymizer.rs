use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;

use super::encoding::REVERSIBLE_TOKEN_PREFIX;
use super::{EmailDomainPolicy, Pseudonym, PseudonymEncoding, PseudonymImplementation};
use crate::email::{EmailAddress, EmailCanonicalization};
use crate::error::{GatewayError, Result};
use crate::tokens::{
    identity, lower_case, AesReversibleTokenizationStrategy, CipherSuite,
    DeterministicTokenizationStrategy, ReversibleTokenizationStrategy, SecretKey,
    Sha256DeterministicTokenizationStrategy,
};

/// Reversible URL-safe tokens embedded in free text.
static REVERSIBLE_TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}[A-Za-z0-9_-]{{43,}}",
        regex::escape(REVERSIBLE_TOKEN_PREFIX)
    ))
    .expect("reversible token pattern is valid")
});

/// An `@domain` suffix directly after an embedded token.
static DOMAIN_SUFFIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?")
        .expect("domain suffix pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PseudonymizerOptions {
    pub implementation: PseudonymImplementation,
    pub email_domain_policy: EmailDomainPolicy,
    pub email_canonicalization: EmailCanonicalization,
}

/// Turns identifiers into pseudonyms and, given the key, back again.
///
/// Values that parse as a single email address are canonicalized before hashing and keep
/// their domain per [`EmailDomainPolicy`]; everything else is hashed as-is.
pub struct Pseudonymizer {
    options: PseudonymizerOptions,
    deterministic: Arc<dyn DeterministicTokenizationStrategy>,
    reversible: Option<AesReversibleTokenizationStrategy>,
}

impl Pseudonymizer {
    /// SHA-256 pseudonyms salted with `salt`; reversible pseudonyms only when `key` is given.
    pub fn new(
        salt: impl Into<String>,
        key: Option<SecretKey>,
        cipher_suite: CipherSuite,
        options: PseudonymizerOptions,
    ) -> Self {
        let deterministic: Arc<dyn DeterministicTokenizationStrategy> =
            Arc::new(Sha256DeterministicTokenizationStrategy::new(salt));
        let reversible = key.map(|key| {
            AesReversibleTokenizationStrategy::new(cipher_suite, Arc::clone(&deterministic), key)
        });
        Self {
            options,
            deterministic,
            reversible,
        }
    }

    pub fn options(&self) -> &PseudonymizerOptions {
        &self.options
    }

    pub fn supports_reversal(&self) -> bool {
        self.reversible.is_some()
    }

    fn reversible_strategy(&self) -> Result<&AesReversibleTokenizationStrategy> {
        self.reversible.as_ref().ok_or(GatewayError::MissingKey)
    }

    pub fn pseudonymize(&self, value: &str, reversible: bool) -> Result<Pseudonym> {
        let (canonicalize, domain): (Box<dyn Fn(&str) -> String>, Option<String>) =
            match EmailAddress::parse(value) {
                Some(address) => {
                    let mode = self.options.email_canonicalization;
                    let canonical = mode.canonicalize(&address);
                    (
                        Box::new(move |_: &str| canonical.clone()),
                        self.domain_for(&address),
                    )
                }
                None => (Box::new(identity), None),
            };

        let pseudonym = if reversible {
            let token = self
                .reversible_strategy()?
                .reversible_token(value, &*canonicalize)?;
            Pseudonym::from_reversible(token)?
        } else {
            Pseudonym::from_hash(self.deterministic.token(value, &*canonicalize))
        };
        Ok(pseudonym.with_domain(domain))
    }

    fn domain_for(&self, address: &EmailAddress) -> Option<String> {
        match self.options.email_domain_policy {
            EmailDomainPolicy::Preserve => Some(address.domain.clone()),
            EmailDomainPolicy::Hash => {
                let token = self.deterministic.token(&address.domain, &lower_case);
                Some(self.options.implementation.encode_bytes(&token))
            }
            EmailDomainPolicy::Redact => None,
        }
    }

    /// Writes a pseudonym in the requested form.
    pub fn encode(&self, pseudonym: &Pseudonym, encoding: PseudonymEncoding) -> Result<Value> {
        let implementation = self.options.implementation;
        match encoding {
            PseudonymEncoding::Json => implementation.to_json(pseudonym),
            PseudonymEncoding::UrlSafeToken => {
                implementation.encode_token(pseudonym).map(Value::String)
            }
        }
    }

    pub fn decode(&self, encoded: &Value) -> Result<Pseudonym> {
        let implementation = self.options.implementation;
        match encoded {
            Value::String(token) => implementation.decode_token(token),
            other => implementation.from_json(other),
        }
    }

    /// Pseudonyms for each address in an email header value; malformed entries are skipped.
    pub fn pseudonymize_email_header(
        &self,
        header_value: &str,
        reversible: bool,
    ) -> Result<Vec<Pseudonym>> {
        crate::email::parse_addresses_from_header(header_value)
            .iter()
            .map(|address| self.pseudonymize(&address.address(), reversible))
            .collect()
    }

    /// Reversible URL-safe token of `value`, with no domain suffix.
    pub fn tokenize(&self, value: &str) -> Result<String> {
        let token = self.reversible_strategy()?.reversible_token(value, &identity)?;
        self.options
            .implementation
            .encode_token(&Pseudonym::from_reversible(token)?)
    }

    /// Original value behind a reversible pseudonym, given as a URL-safe token or as its JSON
    /// object text.
    pub fn reidentify(&self, encoded: &str) -> Result<String> {
        let trimmed = encoded.trim();
        let pseudonym = if trimmed.starts_with('{') {
            self.decode(&serde_json::from_str(trimmed)?)?
        } else {
            self.options.implementation.decode_token(trimmed)?
        };
        let reversible = pseudonym.reversible().ok_or_else(|| GatewayError::CannotReverse {
            reason: "pseudonym carries no reversible token".into(),
        })?;
        self.reversible_strategy()?.original_datum(reversible)
    }

    /// Replaces every reversible token embedded in `text` with its original value.
    ///
    /// An `@domain` right after a token is dropped only when the original value already ends
    /// with it; otherwise it stays as ordinary text. Fails on the first token that cannot be
    /// reversed; nothing is substituted partially.
    pub fn reverse_all_contained(&self, text: &str) -> Result<String> {
        let strategy = self.reversible_strategy()?;
        let implementation = self.options.implementation;
        let mut reversed = String::with_capacity(text.len());
        let mut last = 0;
        for found in REVERSIBLE_TOKEN_PATTERN.find_iter(text) {
            if found.start() < last {
                continue;
            }
            let pseudonym = implementation.decode_token(found.as_str())?;
            let token = pseudonym.reversible().ok_or_else(|| GatewayError::CannotReverse {
                reason: "not a reversible token".into(),
            })?;
            let original = strategy.original_datum(token)?;
            let suffix_len = DOMAIN_SUFFIX_PATTERN
                .find(&text[found.end()..])
                .map(|suffix| suffix.as_str())
                .filter(|suffix| ends_with_ignore_case(&original, suffix))
                .map_or(0, str::len);
            reversed.push_str(&text[last..found.start()]);
            reversed.push_str(&original);
            last = found.end() + suffix_len;
        }
        reversed.push_str(&text[last..]);
        Ok(reversed)
    }
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value.is_char_boundary(value.len() - suffix.len())
        && value[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

impl fmt::Debug for Pseudonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pseudonymizer")
            .field("options", &self.options)
            .field("deterministic", &self.deterministic.name())
            .field("reversible", &self.reversible)
            .finish()
    }
}
