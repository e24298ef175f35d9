use std::collections::HashSet;
use std::fmt;

use regex::{Regex, RegexBuilder};

use super::engine::CompiledTransform;
use super::request::ApiRequest;
use crate::error::{GatewayError, Result};
use crate::rules::{template_to_regex, Endpoint, RuleSet};

/// Why a request was refused. Distinct from errors: a blocked request is an expected outcome
/// that callers turn into a client-facing rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// No endpoint matches the request's method and path.
    NoMatchingEndpoint { method: String, path: String },
    /// The matching endpoint does not allow some of the request's query parameters.
    DisallowedQueryParams {
        endpoint: String,
        params: Vec<String>,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NoMatchingEndpoint { method, path } => {
                write!(f, "no endpoint rule matches {method} {path}")
            }
            BlockReason::DisallowedQueryParams { endpoint, params } => write!(
                f,
                "query parameters not allowed by endpoint {endpoint}: {}",
                params.join(", ")
            ),
        }
    }
}

/// An [`Endpoint`] with its path pattern and transforms compiled.
pub struct CompiledEndpoint {
    description: String,
    path: Regex,
    methods: Option<Vec<String>>,
    query_params: HashSet<String>,
    request_headers: Vec<String>,
    transforms: Vec<CompiledTransform>,
}

impl CompiledEndpoint {
    pub fn compile(endpoint: &Endpoint) -> Result<Self> {
        let pattern = match (&endpoint.path_template, &endpoint.path_regex) {
            (Some(template), None) => template_to_regex(template),
            (None, Some(regex)) => format!("^(?:{regex})$"),
            (Some(_), Some(_)) => {
                return Err(GatewayError::InvalidRule {
                    reason: format!(
                        "endpoint {} sets both pathTemplate and pathRegex",
                        endpoint.describe()
                    ),
                })
            }
            (None, None) => {
                return Err(GatewayError::InvalidRule {
                    reason: "endpoint has neither pathTemplate nor pathRegex".into(),
                })
            }
        };
        let path = RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| GatewayError::InvalidPattern {
                pattern: endpoint.describe().to_string(),
                reason: e.to_string(),
            })?;

        let transforms = endpoint
            .transforms
            .iter()
            .map(CompiledTransform::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            description: endpoint.describe().to_string(),
            path,
            methods: endpoint
                .allowed_methods
                .as_ref()
                .map(|methods| methods.iter().map(|m| m.to_uppercase()).collect()),
            query_params: endpoint.allowed_query_params.iter().cloned().collect(),
            request_headers: endpoint
                .allowed_request_headers
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            transforms,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this endpoint applies to the request's method and path.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_allowed = match &self.methods {
            Some(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
            None => true,
        };
        method_allowed && self.path.is_match(path)
    }

    /// Query parameter names not in the allow-list, in request order.
    pub fn disallowed_query_params(&self, request: &ApiRequest) -> Vec<String> {
        request
            .query_param_names()
            .into_iter()
            .filter(|name| !self.query_params.contains(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn allows_request_header(&self, name: &str) -> bool {
        self.request_headers
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    pub fn transforms(&self) -> &[CompiledTransform] {
        &self.transforms
    }
}

impl fmt::Debug for CompiledEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledEndpoint")
            .field("path", &self.description)
            .field("methods", &self.methods)
            .field("query_params", &self.query_params)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

/// Every endpoint of a [`RuleSet`], compiled, in rule order.
#[derive(Debug)]
pub struct CompiledRuleSet {
    endpoints: Vec<CompiledEndpoint>,
}

impl CompiledRuleSet {
    pub fn compile(rules: &RuleSet) -> Result<Self> {
        let endpoints = rules
            .endpoints
            .iter()
            .map(CompiledEndpoint::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { endpoints })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Every endpoint's transforms, in rule order.
    pub fn transforms(&self) -> impl Iterator<Item = &CompiledTransform> {
        self.endpoints.iter().flat_map(|endpoint| endpoint.transforms())
    }

    /// The first endpoint matching the request, provided the request carries only query
    /// parameters that endpoint allows.
    pub fn resolve(&self, request: &ApiRequest) -> std::result::Result<&CompiledEndpoint, BlockReason> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|endpoint| endpoint.matches(&request.method, &request.path))
            .ok_or_else(|| BlockReason::NoMatchingEndpoint {
                method: request.method.clone(),
                path: request.path.clone(),
            })?;

        let disallowed = endpoint.disallowed_query_params(request);
        if !disallowed.is_empty() {
            return Err(BlockReason::DisallowedQueryParams {
                endpoint: endpoint.description.clone(),
                params: disallowed,
            });
        }
        Ok(endpoint)
    }
}
