//! Text forms of a [`Pseudonym`]: a JSON object (`h`/`r`/`d`) and a compact URL-safe token.
//!
//! Every form is tied to a [`PseudonymImplementation`] version. `v0.4` encodes bytes as
//! base64url without padding; `v0.3` is the legacy form (standard base64 with `/` mapped to
//! `_` and `+` to `.`, tokens prefixed `t~`) and cannot carry reversible tokens.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Pseudonym, HASH_SIZE_BYTES};
use crate::error::{GatewayError, Result};

/// Prefix of URL-safe tokens carrying a reversible token.
pub const REVERSIBLE_TOKEN_PREFIX: &str = "p~";

/// Prefix of legacy (`v0.3`) tokens.
pub const LEGACY_TOKEN_PREFIX: &str = "t~";

const DOMAIN_SEPARATOR: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PseudonymImplementation {
    /// `v0.4`
    #[default]
    Default,
    /// `v0.3`
    Legacy,
}

impl PseudonymImplementation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudonymImplementation::Default => "v0.4",
            PseudonymImplementation::Legacy => "v0.3",
        }
    }

    pub fn encode_bytes(&self, bytes: &[u8]) -> String {
        match self {
            PseudonymImplementation::Default => URL_SAFE_NO_PAD.encode(bytes),
            PseudonymImplementation::Legacy => STANDARD_NO_PAD
                .encode(bytes)
                .replace('/', "_")
                .replace('+', "."),
        }
    }

    pub fn decode_bytes(&self, encoded: &str) -> Result<Vec<u8>> {
        let decoded = match self {
            PseudonymImplementation::Default => URL_SAFE_NO_PAD.decode(encoded),
            PseudonymImplementation::Legacy => {
                STANDARD_NO_PAD.decode(encoded.replace('_', "/").replace('.', "+"))
            }
        };
        decoded.map_err(|e| GatewayError::InvalidPseudonym {
            reason: format!("bad {} encoding: {e}", self.as_str()),
        })
    }

    /// JSON object form: `h` (hash), `r` (reversible token), `d` (domain); absent fields
    /// are omitted. When `r` is present `h` is omitted, being derivable from it.
    pub fn to_json(&self, pseudonym: &Pseudonym) -> Result<Value> {
        let mut object = Map::new();
        match pseudonym.reversible() {
            Some(reversible) => {
                self.require_reversible_support()?;
                object.insert("r".into(), Value::String(self.encode_bytes(reversible)));
            }
            None => {
                object.insert("h".into(), Value::String(self.encode_bytes(pseudonym.hash())));
            }
        }
        if let Some(domain) = pseudonym.domain() {
            object.insert("d".into(), Value::String(domain.to_string()));
        }
        Ok(Value::Object(object))
    }

    pub fn from_json(&self, value: &Value) -> Result<Pseudonym> {
        let object = value.as_object().ok_or_else(|| GatewayError::InvalidPseudonym {
            reason: "expected a JSON object".into(),
        })?;
        let domain = string_field(object, "d")?.map(str::to_string);

        let pseudonym = match (string_field(object, "h")?, string_field(object, "r")?) {
            (hash, Some(reversible)) => {
                self.require_reversible_support()?;
                let pseudonym = Pseudonym::from_reversible(self.decode_bytes(reversible)?)?;
                if let Some(hash) = hash {
                    if self.decode_bytes(hash)? != pseudonym.hash() {
                        return Err(GatewayError::InvalidPseudonym {
                            reason: "hash does not match reversible token".into(),
                        });
                    }
                }
                pseudonym
            }
            (Some(hash), None) => Pseudonym::from_hash(self.decode_hash(hash)?),
            (None, None) => {
                return Err(GatewayError::InvalidPseudonym {
                    reason: "neither 'h' nor 'r' present".into(),
                })
            }
        };
        Ok(pseudonym.with_domain(domain))
    }

    /// Compact token: `p~<reversible>` or `<hash>` (`t~<hash>` for legacy), then
    /// `@<domain>` when a domain is carried.
    pub fn encode_token(&self, pseudonym: &Pseudonym) -> Result<String> {
        let mut token = match (self, pseudonym.reversible()) {
            (PseudonymImplementation::Default, Some(reversible)) => {
                format!("{REVERSIBLE_TOKEN_PREFIX}{}", self.encode_bytes(reversible))
            }
            (PseudonymImplementation::Default, None) => self.encode_bytes(pseudonym.hash()),
            (PseudonymImplementation::Legacy, Some(_)) => return Err(self.reversible_unsupported()),
            (PseudonymImplementation::Legacy, None) => {
                format!("{LEGACY_TOKEN_PREFIX}{}", self.encode_bytes(pseudonym.hash()))
            }
        };
        if let Some(domain) = pseudonym.domain() {
            token.push(DOMAIN_SEPARATOR);
            token.push_str(domain);
        }
        Ok(token)
    }

    pub fn decode_token(&self, token: &str) -> Result<Pseudonym> {
        let (body, domain) = match token.split_once(DOMAIN_SEPARATOR) {
            Some((body, domain)) => (body, Some(domain.to_string())),
            None => (token, None),
        };

        let pseudonym = match self {
            PseudonymImplementation::Default => {
                if let Some(encoded) = body.strip_prefix(REVERSIBLE_TOKEN_PREFIX) {
                    Pseudonym::from_reversible(self.decode_bytes(encoded)?)?
                } else if body.starts_with(LEGACY_TOKEN_PREFIX) {
                    return PseudonymImplementation::Legacy.decode_token(token);
                } else {
                    Pseudonym::from_hash(self.decode_hash(body)?)
                }
            }
            PseudonymImplementation::Legacy => {
                let encoded = body.strip_prefix(LEGACY_TOKEN_PREFIX).ok_or_else(|| {
                    GatewayError::InvalidPseudonym {
                        reason: format!("legacy token must start with '{LEGACY_TOKEN_PREFIX}'"),
                    }
                })?;
                Pseudonym::from_hash(self.decode_hash(encoded)?)
            }
        };
        Ok(pseudonym.with_domain(domain))
    }

    fn decode_hash(&self, encoded: &str) -> Result<Vec<u8>> {
        let hash = self.decode_bytes(encoded)?;
        if hash.len() != HASH_SIZE_BYTES {
            return Err(GatewayError::InvalidPseudonym {
                reason: format!("hash must be {HASH_SIZE_BYTES} bytes, got {}", hash.len()),
            });
        }
        Ok(hash)
    }

    fn require_reversible_support(&self) -> Result<()> {
        match self {
            PseudonymImplementation::Default => Ok(()),
            PseudonymImplementation::Legacy => Err(self.reversible_unsupported()),
        }
    }

    /// Whether this implementation can encode reversible pseudonyms.
    pub fn supports_reversible(&self) -> bool {
        matches!(self, PseudonymImplementation::Default)
    }

    pub(crate) fn reversible_unsupported(&self) -> GatewayError {
        GatewayError::InvalidPseudonym {
            reason: format!("{} pseudonyms cannot carry reversible tokens", self.as_str()),
        }
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, name: &str) -> Result<Option<&'a str>> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(GatewayError::InvalidPseudonym {
            reason: format!("field '{name}' must be a string"),
        }),
    }
}

impl fmt::Display for PseudonymImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PseudonymImplementation {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v0.4" => Ok(PseudonymImplementation::Default),
            "v0.3" => Ok(PseudonymImplementation::Legacy),
            other => Err(GatewayError::UnknownVersion {
                version: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PseudonymImplementation {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PseudonymImplementation> for String {
    fn from(value: PseudonymImplementation) -> Self {
        value.as_str().to_string()
    }
}

/// How a pseudonymized value is written back into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PseudonymEncoding {
    /// The `h`/`r`/`d` JSON object.
    #[default]
    #[serde(alias = "JSON")]
    Json,
    /// The compact string token.
    #[serde(alias = "URL_SAFE_TOKEN", alias = "url-safe-token")]
    UrlSafeToken,
}

impl FromStr for PseudonymEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "json" => Ok(PseudonymEncoding::Json),
            "urlsafetoken" => Ok(PseudonymEncoding::UrlSafeToken),
            _ => Err(format!("unknown pseudonym encoding: {s}")),
        }
    }
}
