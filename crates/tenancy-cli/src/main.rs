//! tenantctl
//!
//! Operator tool for tenant routing deployments.
//!
//! # Usage
//!
//! ```bash
//! tenantctl verify-key
//! echo -n 'db-password' | tenantctl encrypt
//! tenantctl resolve --host acme.platform.example.com
//! tenantctl --config /etc/tenancy/tenancy.toml check acme --format json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod output;

#[derive(Parser)]
#[command(name = "tenantctl")]
#[command(version)]
#[command(about = "Tenant routing operator tool", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, short, env = "TENANCY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "text", global = true)]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a secret for a tenant row (reads stdin without --value)
    Encrypt {
        #[arg(long)]
        value: Option<String>,
    },
    /// Check the master key is present and round-trips
    VerifyKey,
    /// Show which tenant a request would resolve to
    Resolve {
        /// Host header value, port allowed
        #[arg(long)]
        host: String,
        /// Explicit tenant header value
        #[arg(long)]
        header: Option<String>,
    },
    /// Load, gate and connect a tenant end to end
    Check {
        slug: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match config::load(cli.config.as_deref()) {
        Ok(settings) => match cli.command {
            Commands::Encrypt { value } => commands::secret::encrypt(&settings, value, cli.format),
            Commands::VerifyKey => commands::secret::verify_key(&settings, cli.format),
            Commands::Resolve { host, header } => {
                commands::resolve::handle(&settings, &host, header.as_deref(), cli.format)
            }
            Commands::Check { slug } => commands::check::handle(&settings, &slug, cli.format).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_resolve() {
        let cli = Cli::parse_from([
            "tenantctl",
            "--format",
            "json",
            "resolve",
            "--host",
            "acme.localhost",
        ]);
        assert!(matches!(cli.format, output::OutputFormat::Json));
        assert!(matches!(cli.command, Commands::Resolve { ref host, header: None } if host == "acme.localhost"));
    }
}
