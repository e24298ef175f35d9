//! Compiled transforms and the string operations behind them.
//!
//! String-valued transforms share one policy for what they find at a selector: a non-string,
//! non-null value becomes `null` (with a warning), `null` stays `null`, and a blank string is
//! left as-is.

use regex::{Regex, RegexSet};
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::pseudonyms::{PseudonymEncoding, Pseudonymizer};
use crate::rules::{Selector, Transform};

/// What transforms need from the sanitizer while running.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub pseudonymizer: &'a Pseudonymizer,
    pub default_encoding: PseudonymEncoding,
}

/// A [`Transform`] with its selectors parsed and its patterns compiled.
#[derive(Debug)]
pub struct CompiledTransform {
    condition: Option<Selector>,
    operation: Operation,
}

impl CompiledTransform {
    pub fn compile(transform: &Transform) -> Result<Self> {
        let condition = transform
            .apply_only_when()
            .map(Selector::parse)
            .transpose()?;
        Ok(Self {
            condition,
            operation: Operation::compile(transform)?,
        })
    }

    /// Whether running this transform produces reversible tokens, and so needs the key.
    pub fn needs_reversal(&self) -> bool {
        match &self.operation {
            Operation::Pseudonymize { reversible, .. }
            | Operation::PseudonymizeEmailHeader { reversible, .. } => *reversible,
            Operation::Tokenize { .. } => true,
            Operation::Redact { .. }
            | Operation::RedactRegexMatches { .. }
            | Operation::RedactExceptPhrases { .. }
            | Operation::FilterTokenByRegex { .. } => false,
        }
    }

    /// Applies this transform to every node its selectors match. Selectors that match
    /// nothing are no-ops, and so is the whole transform when its condition matches nothing.
    pub fn apply(&self, doc: &mut Value, ctx: &TransformContext<'_>) -> Result<()> {
        if let Some(condition) = &self.condition {
            if condition.select(doc).is_empty() {
                tracing::debug!(%condition, "condition matched nothing; transform skipped");
                return Ok(());
            }
        }
        self.operation.apply(doc, ctx)
    }
}

/// What a compiled transform does to the nodes it selects.
#[derive(Debug)]
enum Operation {
    Redact {
        selectors: Vec<Selector>,
    },
    Pseudonymize {
        selectors: Vec<Selector>,
        reversible: bool,
        encoding: Option<PseudonymEncoding>,
    },
    RedactRegexMatches {
        selectors: Vec<Selector>,
        redactor: RegexRedactor,
    },
    RedactExceptPhrases {
        selectors: Vec<Selector>,
        phrases: PhraseAllowList,
    },
    PseudonymizeEmailHeader {
        selectors: Vec<Selector>,
        reversible: bool,
    },
    FilterTokenByRegex {
        selectors: Vec<Selector>,
        filter: TokenFilter,
    },
    Tokenize {
        selectors: Vec<Selector>,
        pattern: Option<Regex>,
    },
}

impl Operation {
    fn compile(transform: &Transform) -> Result<Self> {
        let selectors = compile_selectors(transform)?;
        let compiled = match transform {
            Transform::Redact { .. } => Operation::Redact { selectors },
            Transform::Pseudonymize {
                reversible,
                encoding,
                ..
            } => Operation::Pseudonymize {
                selectors,
                reversible: *reversible,
                encoding: *encoding,
            },
            Transform::RedactRegexMatches { redactions, .. } => {
                Operation::RedactRegexMatches {
                    selectors,
                    redactor: RegexRedactor::new(redactions)?,
                }
            }
            Transform::RedactExceptPhrases {
                allowed_phrases, ..
            } => Operation::RedactExceptPhrases {
                selectors,
                phrases: PhraseAllowList::new(allowed_phrases)?,
            },
            Transform::PseudonymizeEmailHeader { reversible, .. } => {
                Operation::PseudonymizeEmailHeader {
                    selectors,
                    reversible: *reversible,
                }
            }
            Transform::FilterTokenByRegex {
                delimiter, filters, ..
            } => Operation::FilterTokenByRegex {
                selectors,
                filter: TokenFilter::new(delimiter, filters)?,
            },
            Transform::Tokenize { regex, .. } => Operation::Tokenize {
                selectors,
                pattern: regex.as_deref().map(compile_regex).transpose()?,
            },
        };
        Ok(compiled)
    }

    fn selectors(&self) -> &[Selector] {
        match self {
            Operation::Redact { selectors }
            | Operation::Pseudonymize { selectors, .. }
            | Operation::RedactRegexMatches { selectors, .. }
            | Operation::RedactExceptPhrases { selectors, .. }
            | Operation::PseudonymizeEmailHeader { selectors, .. }
            | Operation::FilterTokenByRegex { selectors, .. }
            | Operation::Tokenize { selectors, .. } => selectors,
        }
    }

    fn apply(&self, doc: &mut Value, ctx: &TransformContext<'_>) -> Result<()> {
        for selector in self.selectors() {
            match self {
                Operation::Redact { .. } => {
                    selector.delete(doc);
                }
                Operation::Pseudonymize {
                    reversible,
                    encoding,
                    ..
                } => {
                    let encoding = encoding.unwrap_or(ctx.default_encoding);
                    selector.map(doc, |node| {
                        pseudonymize_node(node, *reversible, encoding, ctx.pseudonymizer)
                    })?;
                }
                Operation::RedactRegexMatches { redactor, .. } => {
                    selector.map(doc, |node| {
                        map_string(node, selector, |s| Ok(Value::String(redactor.redact(s))))
                    })?;
                }
                Operation::RedactExceptPhrases { phrases, .. } => {
                    selector.map(doc, |node| {
                        map_string(node, selector, |s| Ok(Value::String(phrases.retain(s))))
                    })?;
                }
                Operation::PseudonymizeEmailHeader { reversible, .. } => {
                    selector.map(doc, |node| {
                        map_string(node, selector, |s| {
                            pseudonymize_header(s, *reversible, ctx)
                        })
                    })?;
                }
                Operation::FilterTokenByRegex { filter, .. } => {
                    selector.map(doc, |node| {
                        map_string(node, selector, |s| {
                            Ok(filter.filter(s).map_or(Value::Null, Value::String))
                        })
                    })?;
                }
                Operation::Tokenize { pattern, .. } => {
                    selector.map(doc, |node| {
                        map_string(node, selector, |s| {
                            tokenize(s, pattern.as_ref(), ctx.pseudonymizer).map(Value::String)
                        })
                    })?;
                }
            }
        }
        Ok(())
    }
}

fn compile_selectors(transform: &Transform) -> Result<Vec<Selector>> {
    let paths = transform.json_paths();
    if paths.is_empty() {
        return Err(GatewayError::InvalidRule {
            reason: format!("{} transform has no jsonPaths", transform.method()),
        });
    }
    paths.iter().map(|path| Selector::parse(path)).collect()
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| GatewayError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Applies `f` to a non-blank string node, following the shared policy for everything else.
fn map_string<F>(node: &mut Value, selector: &Selector, f: F) -> Result<()>
where
    F: FnOnce(&str) -> Result<Value>,
{
    let replacement = match node {
        Value::String(s) if s.trim().is_empty() => return Ok(()),
        Value::String(s) => f(s)?,
        Value::Null => return Ok(()),
        _ => {
            tracing::warn!(selector = %selector, "value is not a string; replacing with null");
            Value::Null
        }
    };
    *node = replacement;
    Ok(())
}

fn pseudonymize_node(
    node: &mut Value,
    reversible: bool,
    encoding: PseudonymEncoding,
    pseudonymizer: &Pseudonymizer,
) -> Result<()> {
    match node {
        Value::Array(items) => {
            for item in items.iter_mut() {
                if item.is_array() || item.is_object() {
                    tracing::debug!("skipping structured array element");
                    continue;
                }
                pseudonymize_scalar(item, reversible, encoding, pseudonymizer)?;
            }
            Ok(())
        }
        Value::Object(_) => {
            tracing::warn!("selector matched an object; pseudonymize applies to scalars only");
            Ok(())
        }
        _ => pseudonymize_scalar(node, reversible, encoding, pseudonymizer),
    }
}

fn pseudonymize_scalar(
    node: &mut Value,
    reversible: bool,
    encoding: PseudonymEncoding,
    pseudonymizer: &Pseudonymizer,
) -> Result<()> {
    let text = match node {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => return Ok(()),
        Value::Array(_) | Value::Object(_) => return Ok(()),
    };
    let pseudonym = pseudonymizer.pseudonymize(&text, reversible)?;
    *node = pseudonymizer.encode(&pseudonym, encoding)?;
    Ok(())
}

fn pseudonymize_header(
    header_value: &str,
    reversible: bool,
    ctx: &TransformContext<'_>,
) -> Result<Value> {
    if !crate::email::is_valid_address_list(header_value) {
        tracing::warn!("value is not a valid address list; replacing with null");
        return Ok(Value::Null);
    }
    let encoded = ctx
        .pseudonymizer
        .pseudonymize_email_header(header_value, reversible)?
        .iter()
        .map(|pseudonym| ctx.pseudonymizer.encode(pseudonym, ctx.default_encoding))
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(encoded))
}

fn tokenize(value: &str, pattern: Option<&Regex>, pseudonymizer: &Pseudonymizer) -> Result<String> {
    let Some(pattern) = pattern else {
        return pseudonymizer.tokenize(value);
    };
    let Some(captures) = pattern.captures(value) else {
        return Ok(value.to_string());
    };
    let whole = captures.get(0).map_or(0..0, |m| m.range());
    if whole != (0..value.len()) {
        return Ok(value.to_string());
    }
    let Some(group) = captures.get(1) else {
        return pseudonymizer.tokenize(value);
    };
    let token = pseudonymizer.tokenize(group.as_str())?;
    Ok(format!(
        "{}{}{}",
        &value[..group.start()],
        token,
        &value[group.end()..]
    ))
}

/// Deletes every match of any of a set of regexes.
#[derive(Debug)]
pub struct RegexRedactor {
    regex_set: RegexSet,
    patterns: Vec<Regex>,
}

impl RegexRedactor {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| compile_regex(p))
            .collect::<Result<Vec<_>>>()?;
        let regex_set = RegexSet::new(patterns).map_err(|e| GatewayError::InvalidPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            regex_set,
            patterns: compiled,
        })
    }

    pub fn redact(&self, input: &str) -> String {
        // RegexSet screens the input; patterns that never match are skipped.
        let matching: Vec<usize> = self.regex_set.matches(input).into_iter().collect();
        let mut result = input.to_string();
        for idx in matching {
            result = self.patterns[idx].replace_all(&result, "").into_owned();
        }
        result
    }
}

/// Keeps only the longest allow-listed phrase found in a string.
#[derive(Debug)]
pub struct PhraseAllowList {
    patterns: Vec<Regex>,
}

impl PhraseAllowList {
    pub fn new(phrases: &[String]) -> Result<Self> {
        let patterns = phrases
            .iter()
            .map(|phrase| compile_regex(&Self::pattern_for(phrase)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    // Word boundaries only hold next to word characters; `#OOO` or `(auto)` edges get none.
    fn pattern_for(phrase: &str) -> String {
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        let start = if phrase.chars().next().is_some_and(is_word) { r"\b" } else { "" };
        let end = if phrase.chars().last().is_some_and(is_word) { r"\b" } else { "" };
        format!("(?i){start}({}){end}", regex::escape(phrase))
    }

    /// The longest allowed phrase in `input`, as it appears there; `""` if none.
    pub fn retain(&self, input: &str) -> String {
        self.patterns
            .iter()
            .filter_map(|pattern| pattern.captures(input))
            .filter_map(|captures| captures.get(1))
            .map(|m| m.as_str())
            .max_by_key(|phrase| phrase.len())
            .unwrap_or_default()
            .to_string()
    }
}

/// Splits a string and keeps the tokens that fully match at least one filter.
#[derive(Debug)]
pub struct TokenFilter {
    delimiter: Regex,
    filters: Vec<Regex>,
}

impl TokenFilter {
    pub fn new(delimiter: &str, filters: &[String]) -> Result<Self> {
        let filters = filters
            .iter()
            .map(|f| compile_regex(&format!("^(?:{f})$")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            delimiter: compile_regex(delimiter)?,
            filters,
        })
    }

    /// Surviving tokens joined by a space, or `None` when none survive.
    pub fn filter(&self, input: &str) -> Option<String> {
        let kept: Vec<&str> = self
            .delimiter
            .split(input)
            .filter(|token| self.filters.iter().any(|f| f.is_match(token)))
            .collect();
        let joined = kept.join(" ");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
