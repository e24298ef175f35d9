use std::io::Read;
use std::path::Path;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::rules::RuleSet;
use crate::sanitize::SanitizeOutcome;

/// Exit status for a request the rules refuse.
pub const BLOCKED_EXIT_CODE: i32 = 2;

/// Sanitize a response body read from `input` (or stdin) as the response to `method url`.
pub fn run(
    config: &GatewayConfig,
    rules_path: &Path,
    method: &str,
    url: &str,
    input: Option<&Path>,
) -> Result<()> {
    let rules = RuleSet::load_from(rules_path)?;
    let sanitizer = config.sanitizer(rules)?;
    sanitizer.validate()?;

    let body = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            body
        }
    };

    match sanitizer.sanitize_url(method, url, &body)? {
        SanitizeOutcome::Sanitized(sanitized) => {
            println!("{sanitized}");
            Ok(())
        }
        SanitizeOutcome::Blocked(reason) => {
            eprintln!("privacy-gateway: blocked: {reason}");
            std::process::exit(BLOCKED_EXIT_CODE);
        }
    }
}
