//! Email address recognition, header-list splitting and canonicalization.
//!
//! Parsing accepts the mailbox forms seen in API payloads and mail headers: a bare
//! `local@domain`, or `Display Name <local@domain>` with an optionally quoted display name.
//! Group syntax, comments and obsolete routes are not recognized.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static LOCAL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r##"^(?:[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*|"(?:[^"\\\r\n]|\\.)*")$"##,
    )
    .expect("local-part pattern is valid")
});

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$|^\[[^\[\]\\]+\]$",
    )
    .expect("domain pattern is valid")
});

/// Characters that may not appear unquoted in a display name.
const DISPLAY_NAME_SPECIALS: &[char] = &['<', '>', '@', ',', ';', ':', '"', '\\', '[', ']'];

/// A syntactically valid address, split at its last `@`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub local_part: String,
    pub domain: String,
}

impl EmailAddress {
    /// Parses a single mailbox; `None` if `raw` is not exactly one valid address.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match find_unquoted(raw, '<') {
            Some(open) => {
                let display_name = raw[..open].trim();
                let rest = raw[open + 1..].trim_end();
                let addr_spec = rest.strip_suffix('>')?;
                if !is_valid_display_name(display_name) {
                    return None;
                }
                Self::parse_addr_spec(addr_spec.trim())
            }
            None => Self::parse_addr_spec(raw),
        }
    }

    fn parse_addr_spec(addr_spec: &str) -> Option<Self> {
        if addr_spec.len() > 254 {
            return None;
        }
        let (local_part, domain) = addr_spec.rsplit_once('@')?;
        if local_part.len() > 64 || !LOCAL_PART.is_match(local_part) || !DOMAIN.is_match(domain)
        {
            return None;
        }
        Some(Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        })
    }

    /// `local@domain`, without any display name.
    pub fn address(&self) -> String {
        format!("{}@{}", self.local_part, self.domain)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Whether `raw` is exactly one valid address (bare or with display name).
pub fn is_valid(raw: &str) -> bool {
    EmailAddress::parse(raw).is_some()
}

/// Splits a header value such as `To` or `Cc` into its addresses, skipping malformed entries.
pub fn parse_addresses_from_header(header_value: &str) -> Vec<EmailAddress> {
    split_header_list(header_value)
        .into_iter()
        .filter_map(EmailAddress::parse)
        .collect()
}

/// Whether every non-empty entry of the header value is a valid address.
pub fn is_valid_address_list(header_value: &str) -> bool {
    let entries: Vec<&str> = split_header_list(header_value);
    !entries.is_empty() && entries.iter().all(|entry| is_valid(entry))
}

/// How addresses are normalized before hashing, so variants of one mailbox share a pseudonym.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCanonicalization {
    /// Lowercase local part and domain.
    #[default]
    Strict,
    /// As `Strict`, also dropping `.` from the local part (Gmail-style addressing).
    IgnoreDots,
}

impl EmailCanonicalization {
    pub fn canonicalize(&self, address: &EmailAddress) -> String {
        let local_part = address.local_part.to_lowercase();
        let local_part = match self {
            EmailCanonicalization::Strict => local_part,
            EmailCanonicalization::IgnoreDots => local_part.replace('.', ""),
        };
        format!("{local_part}@{}", address.domain.to_lowercase())
    }
}

impl std::str::FromStr for EmailCanonicalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(EmailCanonicalization::Strict),
            "ignore_dots" => Ok(EmailCanonicalization::IgnoreDots),
            _ => Err(format!("unknown email canonicalization: {s}")),
        }
    }
}

/// Byte offset of the first `target` outside a quoted string.
fn find_unquoted(s: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == target && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_valid_display_name(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if let Some(inner) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        let mut escaped = false;
        for c in inner.chars() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => return false,
                _ => {}
            }
        }
        return !escaped;
    }
    !name.contains(DISPLAY_NAME_SPECIALS)
}

/// Splits on commas outside quoted strings and angle brackets; empty entries are dropped.
fn split_header_list(header_value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut angle_depth = 0usize;
    let mut start = 0;
    for (i, c) in header_value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle_depth += 1,
            '>' if !in_quotes => angle_depth = angle_depth.saturating_sub(1),
            ',' if !in_quotes && angle_depth == 0 => {
                entries.push(&header_value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&header_value[start..]);
    entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect()
}
