//! CLI for talking to a ringkv node

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ringkv::node::protocol::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ringkv")]
#[command(about = "ringkv distributed key-value store CLI")]
#[command(version)]
struct Cli {
    /// Node client API URL
    #[arg(long, default_value = "http://localhost:8080")]
    node: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the cluster of an existing node
    Join {
        /// ID of the node to join
        id: String,

        /// Its cluster address (host:port)
        address: String,
    },

    /// Check node liveness
    Ping,

    /// Store a value
    Set { key: String, value: String },

    /// Read a value
    Get { key: String },

    /// Delete a key
    Delete { key: String },

    /// Show which node owns a key
    Find { key: String },

    /// List the node's ring view
    Members,
}

struct NodeClient {
    http: reqwest::Client,
    base: String,
}

impl NodeClient {
    fn new(base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<R> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        Ok(response.json().await?)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> anyhow::Result<R> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        Ok(response.json().await?)
    }
}

fn check(ack: AckResponse) -> anyhow::Result<()> {
    if ack.error {
        bail!(ack.message.unwrap_or_else(|| "request failed".into()));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = NodeClient::new(&cli.node, Duration::from_millis(cli.timeout_ms))?;

    match cli.command {
        Commands::Join { id, address } => {
            let request = JoinRequest {
                id: id.parse()?,
                address,
            };
            check(client.post(ENDPOINT_JOIN, &request).await?)?;
            println!("✓ Joined via node {}", request.id);
        }

        Commands::Ping => {
            let pong: PingResponse = client.get(ENDPOINT_PING).await?;
            println!("Node {}:", pong.id);
            println!("  State: {}", pong.state);
            println!("  Members: {}", pong.members);
        }

        Commands::Set { key, value } => {
            check(client.post(ENDPOINT_SET, &SetRequest { key, value }).await?)?;
            println!("OK");
        }

        Commands::Get { key } => {
            let reply: GetResponse = client.post(ENDPOINT_GET, &KeyRequest { key: key.clone() }).await?;
            if reply.error {
                bail!(reply.message.unwrap_or_else(|| format!("key {} not found", key)));
            }
            println!("{}", reply.value);
        }

        Commands::Delete { key } => {
            check(client.post(ENDPOINT_DELETE, &KeyRequest { key }).await?)?;
            println!("OK");
        }

        Commands::Find { key } => {
            let found: FindResponse = client.post(ENDPOINT_FIND, &KeyRequest { key }).await?;
            match found.id {
                Some(id) if !found.error => {
                    println!("Owner: node {}", id);
                    println!("  API: {}", found.api_address);
                    println!("  Cluster: {}", found.address);
                }
                _ => bail!(found.message.unwrap_or_else(|| "no owner".into())),
            }
        }

        Commands::Members => {
            let view: MembersResponse = client.get(ENDPOINT_MEMBERS).await?;
            println!("Node {} ({}), {} members:", view.id, view.state, view.members.len());
            for entry in view.members {
                println!(
                    "  {:>4}  api={}  cluster={}",
                    entry.id, entry.address.api, entry.address.cluster
                );
            }
        }
    }

    Ok(())
}
