//! Switchyard - authenticating, policy-routing reverse proxy

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use switchyard_common::{init_logging, Config};
use switchyard_proxy::{build_engine, start_server};

/// Switchyard gateway
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway
    Server {
        /// Configuration file (YAML, or JSON when the extension is .json)
        #[arg(long, env = "SWITCHYARD_CONFIG")]
        config: PathBuf,

        /// Listen address, overrides http.addr
        #[arg(long, env = "SWITCHYARD_ADDR")]
        addr: Option<String>,

        /// Log level, overrides log.level
        #[arg(long, env = "SWITCHYARD_LOG_LEVEL")]
        log_level: Option<String>,

        /// Human-readable logs instead of JSON
        #[arg(long, env = "SWITCHYARD_LOG_PRETTY")]
        log_pretty: bool,
    },

    /// Probe a running gateway's health endpoint
    Health {
        /// Address of the gateway
        #[arg(long, env = "SWITCHYARD_ADDR", default_value = "127.0.0.1:9200")]
        addr: String,

        /// Probe over HTTPS (certificate is not verified)
        #[arg(long, env = "SWITCHYARD_HEALTH_TLS")]
        tls: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // aws-lc-rs backs every rustls config in the process
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            config,
            addr,
            log_level,
            log_pretty,
        } => {
            let mut config = Config::load(&config)
                .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
            if let Some(addr) = addr {
                config.http.addr = addr;
            }
            if let Some(level) = log_level {
                config.log.level = level;
            }
            config.log.pretty |= log_pretty;

            init_logging(&config.log)?;

            let engine = build_engine(&config)?;
            start_server(&config, engine).await?;
            Ok(())
        }
        Commands::Health { addr, tls } => health(&addr, tls).await,
    }
}

/// Exit status reflects whether `/healthz` answered 200
async fn health(addr: &str, tls: bool) -> anyhow::Result<()> {
    let addr = addr.replacen("0.0.0.0", "127.0.0.1", 1);
    let scheme = if tls { "https" } else { "http" };
    let url = format!("{}://{}/healthz", scheme, addr);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .danger_accept_invalid_certs(tls)
        .build()?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Health check against {} failed: {}", url, e))?;

    if !response.status().is_success() {
        anyhow::bail!("Health check against {} returned {}", url, response.status());
    }

    println!("ok");
    Ok(())
}
