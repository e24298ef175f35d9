pub mod engine;
pub mod matcher;
pub mod request;

pub use engine::{CompiledTransform, TransformContext};
pub use matcher::{BlockReason, CompiledEndpoint, CompiledRuleSet};
pub use request::ApiRequest;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::pseudonyms::{PseudonymEncoding, Pseudonymizer};
use crate::rules::RuleSet;

/// Result of sanitizing a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeOutcome {
    Sanitized(String),
    Blocked(BlockReason),
}

impl SanitizeOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SanitizeOutcome::Blocked(_))
    }

    pub fn into_body(self) -> Option<String> {
        match self {
            SanitizeOutcome::Sanitized(body) => Some(body),
            SanitizeOutcome::Blocked(_) => None,
        }
    }
}

/// Applies a [`RuleSet`] to API traffic: decides whether a request may proceed, and rewrites
/// response bodies with the matched endpoint's transforms.
///
/// Rules are compiled once, on first use or by [`validate`](Self::validate), and shared by all
/// threads using this sanitizer.
pub struct Sanitizer {
    rules: RuleSet,
    pseudonymizer: Pseudonymizer,
    default_encoding: PseudonymEncoding,
    compiled: OnceCell<CompiledRuleSet>,
}

impl Sanitizer {
    pub fn new(rules: RuleSet, pseudonymizer: Pseudonymizer) -> Self {
        Self {
            rules,
            pseudonymizer,
            default_encoding: PseudonymEncoding::default(),
            compiled: OnceCell::new(),
        }
    }

    /// Encoding for pseudonymize transforms that do not name one.
    pub fn with_default_encoding(mut self, encoding: PseudonymEncoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    pub fn pseudonymizer(&self) -> &Pseudonymizer {
        &self.pseudonymizer
    }

    fn compiled(&self) -> Result<&CompiledRuleSet> {
        self.compiled.get_or_try_init(|| {
            let compiled = CompiledRuleSet::compile(&self.rules)?;
            tracing::debug!(endpoints = compiled.len(), "compiled rules");
            Ok(compiled)
        })
    }

    /// Compiles every rule now, so malformed rules fail at load time. Rules asking for
    /// reversible tokens also fail here when the pseudonymizer cannot produce them.
    pub fn validate(&self) -> Result<()> {
        let compiled = self.compiled()?;
        if !compiled.transforms().any(CompiledTransform::needs_reversal) {
            return Ok(());
        }
        if !self.pseudonymizer.supports_reversal() {
            return Err(GatewayError::MissingKey);
        }
        let implementation = self.pseudonymizer.options().implementation;
        if !implementation.supports_reversible() {
            return Err(implementation.reversible_unsupported());
        }
        Ok(())
    }

    /// Whether a request with this method, path and query parameter names may proceed.
    pub fn is_allowed(&self, method: &str, path: &str, query_param_names: &[&str]) -> Result<bool> {
        let request = query_param_names
            .iter()
            .fold(ApiRequest::new(method, path), |request, name| {
                request.with_query_param(*name, "")
            });
        Ok(self.compiled()?.resolve(&request).is_ok())
    }

    /// The request's headers that the matched endpoint allows to be forwarded; none when the
    /// request is blocked.
    pub fn allowed_request_headers(&self, request: &ApiRequest) -> Result<Vec<(String, String)>> {
        let headers = match self.compiled()?.resolve(request) {
            Ok(endpoint) => request
                .headers
                .iter()
                .filter(|(name, _)| endpoint.allows_request_header(name))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(headers)
    }

    /// Sanitizes a response body for `request`.
    ///
    /// An empty body is returned unchanged; a body that is not JSON is an error.
    pub fn sanitize(&self, request: &ApiRequest, body: &str) -> Result<SanitizeOutcome> {
        let endpoint = match self.compiled()?.resolve(request) {
            Ok(endpoint) => endpoint,
            Err(reason) => {
                tracing::warn!(method = %request.method, %reason, "request blocked");
                return Ok(SanitizeOutcome::Blocked(reason));
            }
        };

        if body.trim().is_empty() {
            return Ok(SanitizeOutcome::Sanitized(body.to_string()));
        }

        let mut doc: Value = serde_json::from_str(body)?;
        let ctx = TransformContext {
            pseudonymizer: &self.pseudonymizer,
            default_encoding: self.default_encoding,
        };
        for transform in endpoint.transforms() {
            transform.apply(&mut doc, &ctx)?;
        }
        Ok(SanitizeOutcome::Sanitized(serde_json::to_string(&doc)?))
    }

    /// [`sanitize`](Self::sanitize) for a method and relative URL (`/path?query`).
    pub fn sanitize_url(&self, method: &str, relative_url: &str, body: &str) -> Result<SanitizeOutcome> {
        self.sanitize(&ApiRequest::parse(method, relative_url), body)
    }
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer")
            .field("endpoints", &self.rules.endpoints.len())
            .field("compiled", &self.compiled.get().is_some())
            .field("default_encoding", &self.default_encoding)
            .finish()
    }
}
