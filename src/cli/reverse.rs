use crate::config::GatewayConfig;
use crate::error::Result;

/// Print the original value behind a reversible pseudonym, or with `contained`, `text` with
/// every reversible token in it replaced by its original.
pub fn run(config: &GatewayConfig, text: &str, contained: bool) -> Result<()> {
    let pseudonymizer = config.pseudonymizer()?;
    if !pseudonymizer.supports_reversal() {
        eprintln!("privacy-gateway: no encryption key configured; cannot reverse pseudonyms");
        std::process::exit(1);
    }

    let original = if contained {
        pseudonymizer.reverse_all_contained(text)?
    } else {
        pseudonymizer.reidentify(text)?
    };
    println!("{original}");
    Ok(())
}
