pub mod path_template;
pub mod selector;

pub use path_template::template_to_regex;
pub use selector::{Location, PathElement, Selector};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GatewayError, Result};
use crate::pseudonyms::PseudonymEncoding;

/// Ordered endpoints, evaluated first-match-wins.
///
/// Order is semantically significant: list more specific endpoints before broader ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl RuleSet {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Appends `other`'s endpoints after this rule set's own.
    pub fn append(&mut self, other: RuleSet) {
        self.endpoints.extend(other.endpoints);
    }

    /// Load rules from a YAML file (`endpoints:` list). A missing file yields no endpoints,
    /// so every request is blocked.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents).map_err(|e| match e {
            GatewayError::ConfigParse { reason, .. } => GatewayError::ConfigParse {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| GatewayError::ConfigParse {
            path: Default::default(),
            reason: e.to_string(),
        })
    }

    /// Compiles every path pattern, selector and regex, reporting the first failure.
    pub fn validate(&self) -> Result<()> {
        crate::sanitize::CompiledRuleSet::compile(self).map(|_| ())
    }
}

/// A rule binding a URL path pattern to allow-lists and an ordered list of transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Matched case-insensitively against the whole path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,

    /// `/users/{id}` style alternative to `path_regex`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_template: Option<String>,

    /// HTTP methods this endpoint applies to; any method when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_methods: Option<Vec<String>>,

    /// Query parameter names a request may carry; none when empty.
    #[serde(default)]
    pub allowed_query_params: Vec<String>,

    #[serde(default)]
    pub allowed_request_headers: Vec<String>,

    #[serde(default)]
    pub transforms: Vec<Transform>,
}

impl Endpoint {
    pub fn regex(path_regex: impl Into<String>) -> Self {
        Self {
            path_regex: Some(path_regex.into()),
            ..Default::default()
        }
    }

    pub fn template(path_template: impl Into<String>) -> Self {
        Self {
            path_template: Some(path_template.into()),
            ..Default::default()
        }
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_query_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_request_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_request_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// The path pattern as written, for messages.
    pub fn describe(&self) -> &str {
        self.path_template
            .as_deref()
            .or(self.path_regex.as_deref())
            .unwrap_or("<no path>")
    }
}

fn default_delimiter() -> String {
    r"\s+".to_string()
}

/// An operation over the JSON values a set of selectors identifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Transform {
    /// Remove the selected nodes entirely.
    Redact {
        json_paths: Vec<String>,
        /// Selector that must match something in the document for this transform to run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Replace selected scalars with their pseudonyms.
    Pseudonymize {
        json_paths: Vec<String>,
        #[serde(default, rename = "includeReversible", alias = "reversible")]
        reversible: bool,
        /// Falls back to the sanitizer's configured encoding when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<PseudonymEncoding>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Delete every match of any of the regexes from selected strings.
    RedactRegexMatches {
        json_paths: Vec<String>,
        redactions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Replace selected strings with the longest allowed phrase they contain, or `""`.
    RedactExceptPhrases {
        json_paths: Vec<String>,
        allowed_phrases: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Replace an email header value with a list of pseudonyms, one per address.
    PseudonymizeEmailHeader {
        json_paths: Vec<String>,
        #[serde(default, rename = "includeReversible", alias = "reversible")]
        reversible: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Split on `delimiter` and keep only tokens fully matching one of `filters`.
    FilterTokenByRegex {
        json_paths: Vec<String>,
        #[serde(default = "default_delimiter")]
        delimiter: String,
        filters: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },

    /// Replace the value, or its first capture group under `regex`, with a reversible token.
    Tokenize {
        json_paths: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        apply_only_when: Option<String>,
    },
}

fn paths<I, S>(json_paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    json_paths.into_iter().map(Into::into).collect()
}

impl Transform {
    pub fn redact<I, S>(json_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::Redact {
            json_paths: paths(json_paths),
            apply_only_when: None,
        }
    }

    pub fn pseudonymize<I, S>(json_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::Pseudonymize {
            json_paths: paths(json_paths),
            reversible: false,
            encoding: None,
            apply_only_when: None,
        }
    }

    pub fn pseudonymize_reversibly<I, S>(json_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::Pseudonymize {
            json_paths: paths(json_paths),
            reversible: true,
            encoding: None,
            apply_only_when: None,
        }
    }

    pub fn redact_regex_matches<I, S>(json_paths: I, redactions: &[&str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::RedactRegexMatches {
            json_paths: paths(json_paths),
            redactions: redactions.iter().map(|r| r.to_string()).collect(),
            apply_only_when: None,
        }
    }

    pub fn redact_except_phrases<I, S>(json_paths: I, allowed_phrases: &[&str]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::RedactExceptPhrases {
            json_paths: paths(json_paths),
            allowed_phrases: allowed_phrases.iter().map(|p| p.to_string()).collect(),
            apply_only_when: None,
        }
    }

    pub fn json_paths(&self) -> &[String] {
        match self {
            Transform::Redact { json_paths, .. }
            | Transform::Pseudonymize { json_paths, .. }
            | Transform::RedactRegexMatches { json_paths, .. }
            | Transform::RedactExceptPhrases { json_paths, .. }
            | Transform::PseudonymizeEmailHeader { json_paths, .. }
            | Transform::FilterTokenByRegex { json_paths, .. }
            | Transform::Tokenize { json_paths, .. } => json_paths,
        }
    }

    /// Runs this transform only on documents where `selector` matches at least one node.
    pub fn with_apply_only_when(mut self, selector: impl Into<String>) -> Self {
        let condition = match &mut self {
            Transform::Redact { apply_only_when, .. }
            | Transform::Pseudonymize { apply_only_when, .. }
            | Transform::RedactRegexMatches { apply_only_when, .. }
            | Transform::RedactExceptPhrases { apply_only_when, .. }
            | Transform::PseudonymizeEmailHeader { apply_only_when, .. }
            | Transform::FilterTokenByRegex { apply_only_when, .. }
            | Transform::Tokenize { apply_only_when, .. } => apply_only_when,
        };
        *condition = Some(selector.into());
        self
    }

    pub fn apply_only_when(&self) -> Option<&str> {
        match self {
            Transform::Redact { apply_only_when, .. }
            | Transform::Pseudonymize { apply_only_when, .. }
            | Transform::RedactRegexMatches { apply_only_when, .. }
            | Transform::RedactExceptPhrases { apply_only_when, .. }
            | Transform::PseudonymizeEmailHeader { apply_only_when, .. }
            | Transform::FilterTokenByRegex { apply_only_when, .. }
            | Transform::Tokenize { apply_only_when, .. } => apply_only_when.as_deref(),
        }
    }

    /// The `method` tag, for messages.
    pub fn method(&self) -> &'static str {
        match self {
            Transform::Redact { .. } => "redact",
            Transform::Pseudonymize { .. } => "pseudonymize",
            Transform::RedactRegexMatches { .. } => "redactRegexMatches",
            Transform::RedactExceptPhrases { .. } => "redactExceptPhrases",
            Transform::PseudonymizeEmailHeader { .. } => "pseudonymizeEmailHeader",
            Transform::FilterTokenByRegex { .. } => "filterTokenByRegex",
            Transform::Tokenize { .. } => "tokenize",
        }
    }
}
