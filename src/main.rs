use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use privacy_gateway::cli;
use privacy_gateway::config::{self, GatewayConfig};
use privacy_gateway::pseudonyms::PseudonymEncoding;

#[derive(Parser)]
#[command(name = "privacy-gateway", version, about = "Sanitize third-party API responses by rule")]
struct Cli {
    /// Gateway config file [default: ~/.config/privacy-gateway/config.yaml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a rule file and report the first error
    Validate {
        #[arg(long)]
        rules: PathBuf,
    },
    /// Sanitize a response body (from --input or stdin) for a request
    Sanitize {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Relative URL of the request, e.g. /users?limit=5
        #[arg(long)]
        url: String,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Print the pseudonym of a value
    Pseudonymize {
        value: String,
        #[arg(long)]
        reversible: bool,
        /// json | url-safe-token [default: from config]
        #[arg(long)]
        encoding: Option<PseudonymEncoding>,
    },
    /// Recover the original value behind a reversible pseudonym
    Reverse {
        text: String,
        /// Reverse every token contained in the text
        #[arg(long)]
        contained: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let load_config = || {
        GatewayConfig::load(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))
    };

    match cli.command {
        Commands::Validate { rules } => cli::validate::run(&rules)?,
        Commands::Sanitize {
            rules,
            method,
            url,
            input,
        } => cli::sanitize::run(&load_config()?, &rules, &method, &url, input.as_deref())?,
        Commands::Pseudonymize {
            value,
            reversible,
            encoding,
        } => cli::pseudonymize::run(&load_config()?, &value, reversible, encoding)?,
        Commands::Reverse { text, contained } => {
            cli::reverse::run(&load_config()?, &text, contained)?
        }
    }
    Ok(())
}
