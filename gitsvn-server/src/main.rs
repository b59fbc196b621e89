//! gitsvn server binary
//!
//! Serves version-controlled object graphs to `svn://` clients, persisting
//! history in a content-addressed object store.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gitsvn_server::server::{build_shared, initialize_repositories};
use gitsvn_server::{Config, SvnServer};

#[derive(Parser, Debug)]
#[command(name = "gitsvn-server")]
#[command(version = "0.1.0")]
#[command(about = "svnserve-protocol server over a content-addressed object store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Configuration file (TOML)
        #[arg(short = 'c', long, default_value = "gitsvn.toml")]
        config: String,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Initialise the repositories named in the configuration
    Init {
        /// Configuration file (TOML)
        #[arg(short = 'c', long, default_value = "gitsvn.toml")]
        config: String,
    },

    /// Write an example configuration file
    #[command(name = "init-config")]
    InitConfig {
        /// Config file path
        #[arg(short, long, default_value = "gitsvn.toml")]
        output: String,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config, debug } => {
            init_tracing(debug);
            let config_path = Path::new(&config);
            if !config_path.exists() {
                return Err(anyhow!(
                    "config file not found: {config} (create one with init-config)"
                ));
            }
            let config = Config::from_file(config_path)?;
            if config.repositories.is_empty() {
                return Err(anyhow!("no repositories configured"));
            }
            let shared = build_shared(config)?;
            initialize_repositories(&shared).await?;
            let server = SvnServer::bind(shared).await?;
            info!("ready to accept svn client connections");
            server.run(shutdown_signal()).await?;
        }

        Commands::Init { config } => {
            init_tracing(false);
            let config = Config::from_file(Path::new(&config))?;
            let shared = build_shared(config)?;
            initialize_repositories(&shared).await?;
            for repository in shared.mapping.repositories() {
                println!("{}: uuid {}", repository.name(), repository.uuid());
            }
        }

        Commands::InitConfig { output } => {
            Config::example().to_file(Path::new(&output))?;
            println!("Configuration file created: {output}");
            println!();
            println!("Edit the file to add your repositories, then start the server:");
            println!("  gitsvn-server start --config {output}");
        }
    }

    Ok(())
}

/// Resolve on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
