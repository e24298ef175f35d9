use std::path::Path;

use crate::error::Result;
use crate::rules::RuleSet;

/// Compile every rule in a rule file, reporting the first error.
pub fn run(rules_path: &Path) -> Result<()> {
    if !rules_path.exists() {
        eprintln!("privacy-gateway: rules file not found: {}", rules_path.display());
        std::process::exit(1);
    }

    let rules = RuleSet::load_from(rules_path)?;
    if let Err(e) = rules.validate() {
        eprintln!("privacy-gateway: invalid rules in {}: {e}", rules_path.display());
        std::process::exit(1);
    }

    let transforms: usize = rules.endpoints.iter().map(|e| e.transforms.len()).sum();
    println!(
        "{}: {} endpoint(s), {} transform(s) OK",
        rules_path.display(),
        rules.endpoints.len(),
        transforms
    );
    Ok(())
}
