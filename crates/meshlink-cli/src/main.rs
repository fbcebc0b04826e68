//! meshlink - run a mesh link layer node

use clap::Parser;
use tracing::{error, info};

use meshlink_cli::{
    cli::{Cli, Commands},
    config::NodeConfig,
    error::Result,
    keys,
    node::Node,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Genkey => {
            let key = keys::generate();
            println!("private_key = \"{}\"", keys::encode_private_key(&key));
            println!("# public key: {}", keys::identity_of(&key));
            Ok(())
        }
        Commands::Run {
            ref listen,
            ref peer,
            ref interface,
        } => {
            let config = load_configuration(&cli)?.with_overrides(listen.clone(), peer.clone());
            config.validate()?;

            let node = match Node::start(&config, interface.as_deref()).await {
                Ok(node) => node,
                Err(e) => {
                    error!("Failed to start node: {}", e);
                    std::process::exit(1);
                }
            };

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            node.report().await;
            node.stop().await?;
            Ok(())
        }
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<NodeConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        NodeConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(NodeConfig::default())
    }
}
