//! Rule-driven sanitization of third-party API traffic: endpoint allow-lists, redaction, and
//! deterministic (optionally reversible) pseudonymization of identifiers in JSON responses.

pub mod cli;
pub mod config;
pub mod email;
pub mod error;
pub mod pseudonyms;
pub mod rules;
pub mod sanitize;
pub mod tokens;

pub use error::{GatewayError, Result};
pub use pseudonyms::{Pseudonym, Pseudonymizer};
pub use rules::{Endpoint, RuleSet, Transform};
pub use sanitize::{ApiRequest, BlockReason, SanitizeOutcome, Sanitizer};
