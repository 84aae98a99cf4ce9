mod events;
mod scenario;
mod scenario_host;
mod scenario_legacy;
mod scenario_race;

use clap::{Parser, Subcommand};
use peergroup_protocol::PeerGroupConfig;
use peergroup_transport::SessionPort;
use scenario::ScenarioSummary;

use crate::events::{emit, EventStarted};

#[derive(Parser)]
#[command(
    name = "peergroup-sim",
    about = "Run peer group scenarios over an in-process bus"
)]
struct Cli {
    /// Group name prefix (defaults to $PEERGROUP_PREFIX or org.peergroup).
    #[arg(long)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// One host, several joiners: discovery, membership, lock, leave, destroy.
    Host {
        /// Number of joining peers.
        #[arg(long, default_value = "3")]
        joiners: usize,
        /// Group name.
        #[arg(long, default_value = "lobby")]
        group: String,
    },

    /// Many peers call join-or-create on the same group at once.
    Race {
        /// Number of racing peers.
        #[arg(long, default_value = "4")]
        peers: usize,
        /// Group name.
        #[arg(long, default_value = "arena")]
        group: String,
        /// Max random start delay per peer in ms.
        #[arg(long, default_value = "50")]
        jitter_ms: u64,
    },

    /// A host without port suffix, joined via the legacy port hint.
    Legacy {
        /// Session port the legacy host binds.
        #[arg(long, default_value = "27")]
        port: u16,
        /// Group name.
        #[arg(long, default_value = "oldgame")]
        group: String,
    },

    /// Every scenario with default settings.
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PeerGroupConfig::new();
    if let Some(prefix) = cli.prefix {
        config = config.prefix(prefix);
    }

    eprintln!("peergroup-sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Prefix: {}", config.prefix_str());
    eprintln!();

    let results: Vec<ScenarioSummary> = match cli.command {
        Command::Host { joiners, group } => {
            emit(&EventStarted::new("host-lifecycle", config.prefix_str(), joiners + 1));
            vec![scenario_host::run(config, joiners, &group).await?]
        }

        Command::Race {
            peers,
            group,
            jitter_ms,
        } => {
            emit(&EventStarted::new("join-or-create-race", config.prefix_str(), peers));
            vec![scenario_race::run(config, peers, &group, jitter_ms).await?]
        }

        Command::Legacy { port, group } => {
            anyhow::ensure!(port != 0, "legacy port must be non-zero");
            emit(&EventStarted::new("legacy-interop", config.prefix_str(), 3));
            vec![scenario_legacy::run(config, SessionPort(port), &group).await?]
        }

        Command::All => {
            emit(&EventStarted::new("all", config.prefix_str(), 0));
            vec![
                scenario_host::run(config.clone(), 3, "lobby").await?,
                scenario_race::run(config.clone(), 4, "arena", 50).await?,
                scenario_legacy::run(config, SessionPort(27), "oldgame").await?,
            ]
        }
    };

    let mut success = true;
    for result in &results {
        result.print();
        emit(result);
        success &= result.success();
    }

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
