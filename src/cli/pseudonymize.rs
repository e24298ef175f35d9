use crate::config::GatewayConfig;
use crate::error::Result;
use crate::pseudonyms::PseudonymEncoding;

/// Print the pseudonym of a single value.
pub fn run(
    config: &GatewayConfig,
    value: &str,
    reversible: bool,
    encoding: Option<PseudonymEncoding>,
) -> Result<()> {
    let pseudonymizer = config.pseudonymizer()?;
    let pseudonym = pseudonymizer.pseudonymize(value, reversible)?;
    let encoded = pseudonymizer.encode(&pseudonym, encoding.unwrap_or(config.pseudonym_encoding))?;
    match encoded {
        serde_json::Value::String(token) => println!("{token}"),
        other => println!("{other}"),
    }
    Ok(())
}
