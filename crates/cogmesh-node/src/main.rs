use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use cogmesh_core::Capabilities;
use cogmesh_logging::CogmeshSubscriberBuilder;
use cogmesh_node::{NodeConfig, cognitive_cleanup, cognitive_init, parse_capability_mask};

#[derive(Parser, Debug)]
#[command(name = "cogmeshd", about = "Distributed cognitive agent daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the mesh and run until interrupted
    Run(Overrides),
    /// Validate the configuration and print it with overrides applied
    CheckConfig(Overrides),
}

#[derive(Args, Debug)]
struct Overrides {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Agent id, must be nonzero and unique
    #[arg(long)]
    agent_id: Option<u32>,
    /// Local UDP address to bind
    #[arg(long)]
    bind: Option<String>,
    /// Seed peer address, repeatable
    #[arg(long = "peer")]
    peers: Vec<String>,
    /// Capability mask, decimal or 0x hex
    #[arg(long, value_parser = parse_capability_mask)]
    capabilities: Option<u32>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
    /// Multi-line console output
    #[arg(long)]
    pretty: bool,
}

impl Overrides {
    fn resolve(self) -> anyhow::Result<(NodeConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };
        if let Some(id) = self.agent_id {
            config = config.with_agent_id(id);
        }
        if let Some(bind) = self.bind {
            config = config.with_bind(bind);
        }
        for peer in self.peers {
            config = config.with_peer(peer);
        }
        if let Some(mask) = self.capabilities {
            config = config.with_capabilities(Capabilities::new(mask));
        }
        if let Some(level) = self.log_level {
            config = config.with_log_level(level);
        }
        config.validate()?;
        Ok((config, self.pretty))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig(overrides) => {
            let (config, _) = overrides.resolve()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Run(overrides) => {
            let (config, pretty) = overrides.resolve()?;
            let mut logging = CogmeshSubscriberBuilder::new().with_config(config.log.clone());
            if pretty {
                logging = logging.with_pretty(true);
            }
            let _guard = logging.init()?;

            let context = cognitive_init(config).await?;
            info!(
                agent = %context.agent_id(),
                caps = %context.config().capabilities(),
                "cogmeshd running, ctrl-c to stop"
            );

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            cognitive_cleanup(context).await?;
        }
    }

    Ok(())
}
