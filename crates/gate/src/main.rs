//! Registry Gate - Main entry point
//!
//! Operator commands for the registry's TLS identity and group permissions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use registry_gate::{
    ensure_self_signed, load_acme_config, prepare_server_identity, resolve_group, AcmeIssuer,
    BootstrapOutcome, TlsConfigProvider,
};

/// Registry Gate - TLS identity and access-policy bootstrap for a container registry
#[derive(Parser, Debug)]
#[command(name = "registry-gate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Static certificate locations
#[derive(clap::Args, Debug)]
struct PairArgs {
    /// Certificate path
    #[arg(long = "cert", env = "REGISTRY_TLS_CERT", default_value = "/certs/registry.crt")]
    cert: PathBuf,

    /// Private key path
    #[arg(long = "key", env = "REGISTRY_TLS_KEY", default_value = "/certs/registry.key")]
    key: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make sure the self-signed fallback pair exists
    Bootstrap {
        #[command(flatten)]
        pair: PairArgs,
    },
    /// Load the ACME configuration from the environment and print it
    Check,
    /// Print the capability each directory group grants
    Groups {
        /// Group names as returned by the directory service
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Resolve the TLS identity exactly as the registry would at startup
    Identity {
        #[command(flatten)]
        pair: PairArgs,

        /// Keep running so the ACME certificate is renewed, until Ctrl-C
        #[arg(long = "watch")]
        watch: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Bootstrap { pair } => bootstrap(&pair.cert, &pair.key),
        Commands::Check => check(),
        Commands::Groups { names } => groups(&names),
        Commands::Identity { pair, watch } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(identity(&pair.cert, &pair.key, watch))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn bootstrap(cert: &Path, key: &Path) -> Result<()> {
    let outcome = ensure_self_signed(cert, key).with_context(|| {
        format!(
            "Failed to bootstrap self-signed certificate at {}",
            cert.display()
        )
    })?;

    match outcome {
        BootstrapOutcome::AlreadyPresent => println!("present: {}", cert.display()),
        BootstrapOutcome::Generated => println!("generated: {}", cert.display()),
    }
    Ok(())
}

fn check() -> Result<()> {
    match load_acme_config().context("Invalid ACME configuration")? {
        Some(config) => println!("{}", serde_json::to_string_pretty(&config)?),
        None => println!("disabled"),
    }
    Ok(())
}

fn groups(names: &[String]) -> Result<()> {
    for name in names {
        match resolve_group(name) {
            Some(capability) => println!("{name}\t{}", serde_json::to_string(&capability)?),
            None => println!("{name}\tdeny"),
        }
    }
    Ok(())
}

async fn identity(cert: &Path, key: &Path, watch: bool) -> Result<()> {
    let issuer = if watch {
        AcmeIssuer::new()
    } else {
        AcmeIssuer::new().without_background_renewal()
    };
    let provider = TlsConfigProvider::new(issuer);

    let identity = prepare_server_identity(&provider, cert, key)
        .await
        .context("Failed to prepare TLS identity")?;
    println!("{}", identity.source());

    if watch && identity.is_acme() {
        info!("Watching certificate renewal, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Received shutdown signal");
    }
    Ok(())
}
