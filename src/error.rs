use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid rule: {reason}")]
    InvalidRule { reason: String },

    #[error("invalid selector {selector}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("no encryption key configured; reversible pseudonyms unavailable")]
    MissingKey,

    #[error("invalid encryption key: {reason}")]
    InvalidKey { reason: String },

    #[error("cannot reverse token: {reason}")]
    CannotReverse { reason: String },

    #[error("invalid pseudonym: {reason}")]
    InvalidPseudonym { reason: String },

    #[error("unknown pseudonym implementation: {version}")]
    UnknownVersion { version: String },

    #[error("missing configuration: {name}")]
    MissingConfig { name: String },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
