//! Sessiongate CLI - session-aware edge gateway
//!
//! Run `sessiongate --help` for usage information.

use clap::{Parser, Subcommand};
use sessiongate::config::{Config, ConfigError, LogFormat, DEFAULT_CONFIG_TEMPLATE};
use sessiongate::gateway::Gateway;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "sessiongate",
    about = "Edge gateway that keeps browser sessions alive and relays API prefixes to upstream services",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Address to bind to, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Validate the configuration and print the proxy table
    CheckConfig,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = load_config(cli.config.as_ref()).await?;
            init_logging(&config, cli.verbose);

            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let gateway = Gateway::new(config)?;
            gateway.run().await?;
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_ref()).await?;
            print_config(&config);
        }
        Commands::Init { force } => {
            init_config(force).await?;
        }
    }

    Ok(())
}

async fn load_config(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
    if let Some(config_path) = path {
        return Config::load(config_path).await;
    }

    let default_path = Config::default_path();
    if default_path.exists() {
        Config::load(&default_path).await
    } else {
        Ok(Config::default())
    }
}

fn init_logging(config: &Config, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        1 => EnvFilter::new(Level::DEBUG.as_str()),
        _ => EnvFilter::new(Level::TRACE.as_str()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

fn print_config(config: &Config) {
    println!("Configuration OK");
    println!();
    println!("Bind:      {}", config.server.bind);
    println!("Identity:  {}", config.identity.base_url);
    println!("Sign-in:   {}", config.session.sign_in_path);
    println!(
        "Tokens:    {}",
        if config.session.token_secret.is_some() {
            "signature verified"
        } else {
            "decoded without verification"
        }
    );
    println!();

    if config.proxy.targets.is_empty() {
        println!("No proxy targets configured.");
        return;
    }

    println!("Proxy targets ({:?} matching, first match wins):", config.proxy.match_mode);
    println!("{:<24} {:<40} {:<12} HEADERS", "PREFIX", "TARGET", "CREDENTIAL");
    println!("{}", "-".repeat(86));
    for target in &config.proxy.targets {
        println!(
            "{:<24} {:<40} {:<12} {}",
            target.prefix,
            target.base_url,
            if target.static_credential.is_some() { "static" } else { "session" },
            target.extra_headers.len()
        );
    }
}

async fn init_config(force: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = Config::default_path();

    if config_path.exists() && !force {
        return Err(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )
        .into());
    }

    // Create config directory
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE).await?;

    println!("Configuration written to {}", config_path.display());
    Ok(())
}
