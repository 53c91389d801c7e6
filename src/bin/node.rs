//! Node binary

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ringkv::common::{NodeConfig, PlacementKind, DEFAULT_CONFIG_FILE};
use ringkv::NodeServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ringkv-node")]
#[command(about = "ringkv cluster node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Node ID (unique in the cluster)
        #[arg(long = "id", value_name = "ID")]
        id: Option<u64>,

        /// Client API address
        #[arg(long = "api", value_name = "ADDR")]
        api: Option<SocketAddr>,

        /// Cluster (peer) address
        #[arg(long = "cluster", value_name = "ADDR")]
        cluster: Option<SocketAddr>,

        /// Positional form: ID CLUSTER_ADDR API_ADDR
        #[arg(num_args = 0..=3, conflicts_with_all = ["id", "api", "cluster"])]
        launch: Vec<String>,

        /// Client API address announced to peers
        #[arg(long)]
        advertise_api: Option<String>,

        /// Cluster address announced to peers
        #[arg(long)]
        advertise_cluster: Option<String>,

        /// Key placement: modulo or rendezvous
        #[arg(long)]
        placement: Option<PlacementKind>,

        /// Config file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            api,
            cluster,
            advertise_api,
            advertise_cluster,
            placement,
            config,
            launch,
        } => {
            let (id, cluster, api) = match launch.as_slice() {
                [] => (id, cluster, api),
                [pos_id, pos_cluster, pos_api] => (
                    Some(pos_id.parse().context("invalid node id")?),
                    Some(pos_cluster.parse().context("invalid cluster address")?),
                    Some(pos_api.parse().context("invalid api address")?),
                ),
                _ => bail!("expected ID CLUSTER_ADDR API_ADDR"),
            };

            // File and environment first, command line has priority
            let mut node_config = NodeConfig::load_from(&config)?;
            if let Some(id) = id {
                node_config.node_id = id;
            }
            if let Some(api) = api {
                node_config.api_addr = api;
            }
            if let Some(cluster) = cluster {
                node_config.cluster_addr = cluster;
            }
            if advertise_api.is_some() {
                node_config.advertise_api = advertise_api;
            }
            if advertise_cluster.is_some() {
                node_config.advertise_cluster = advertise_cluster;
            }
            if let Some(placement) = placement {
                node_config.placement = placement;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| node_config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let server = NodeServer::bind(node_config).await?;
            server.serve().await?;
        }
    }

    Ok(())
}
