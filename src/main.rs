use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use switchyard::{
    adapters::{StatsPlugin, build_provider},
    config::{ServerConfigValidator, load_config},
    core::Server,
    metrics, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "switchyard.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "switchyard.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let crypto_installed = rustls::crypto::CryptoProvider::install_default(provider).is_ok();

    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.log).context("Failed to initialize tracing")?;
    if !crypto_installed {
        tracing::warn!("A rustls crypto provider was already installed; keeping it");
    }

    if let Err(e) = ServerConfigValidator::validate(&config) {
        return Err(e).with_context(|| format!("Invalid configuration in {config_path}"));
    }

    let stats = metrics::init_metrics().context("Failed to initialize metrics")?;
    let api_provider =
        build_provider(&config.provider).context("Failed to create configuration provider")?;

    tracing::info!(config = config_path, "Starting switchyard");

    let server = Server::builder(config, api_provider)
        .with_stats(stats.clone())
        .with_plugin(Arc::new(StatsPlugin::new(stats)))
        .build();

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    server
        .start(graceful_shutdown.token())
        .await
        .context("Failed to start server")?;

    server.wait().await;
    tracing::info!("Switchyard exited");
    Ok(())
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.serving_addr());
            println!("   • TLS Enabled: {}", config.tls.is_https());
            println!("   • Management API Port: {}", config.web.port);
            println!("   • Provider: {:?}", config.provider);
            println!("   • Grace Timeout: {:?}", config.grace_timeout);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Set both tls.cert_file and tls.key_file, or neither");
            println!("   • Use distinct ports for traffic, TLS and the management API");
            println!("   • Write durations as humantime strings (e.g. '10s', '250ms')");
            std::process::exit(1);
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# Switchyard gateway configuration
host: "0.0.0.0"
port: 8080

# tls:
#   port: 8433
#   cert_file: "certs/server.pem"
#   key_file: "certs/server-key.pem"
#   redirect: true

grace_timeout: "10s"
hard_shutdown_deadline: "10s"
request_id: true
upstream_timeout: "30s"

web:
  port: 8081
  read_only: false
  # credentials:
  #   username: "admin"
  #   password: "change-me"

provider:
  type: file
  path: "apis.yaml"

log:
  level: "info"
  format: "pretty"
"#;

const DEFAULT_APIS: &str = r#"apis:
  - name: "example"
    proxy:
      listen_path: "/example"
      strip_path: true
      upstreams:
        balancing: round_robin
        targets:
          - "http://localhost:3000"
"#;

/// Initialize a new configuration file and, when missing, the API
/// definitions file it points at.
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");

    let apis_path = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("apis.yaml");
    if !apis_path.exists() {
        tokio::fs::write(&apis_path, DEFAULT_APIS)
            .await
            .context("Failed to write API definitions file")?;
        println!("✅ Created example API definitions at: {}", apis_path.display());
    }

    println!("   Run 'switchyard serve --config {config_path}' to start the gateway");
    Ok(())
}
