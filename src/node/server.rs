//! Node server
//!
//! Binds the client and cluster listeners, wires the components together
//! and runs both HTTP servers plus the background probe and handoff tasks.

use crate::common::{Metrics, NodeConfig, Result};
use crate::node::http::{create_client_router, create_cluster_router, NodeService};
use crate::node::keystore::KeyStore;
use crate::node::membership::MembershipManager;
use crate::node::peer_client::PeerClient;
use crate::node::placement::placement_for;
use crate::node::ring::RingEntry;
use crate::node::router::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

pub struct NodeServer {
    config: NodeConfig,
    api_listener: TcpListener,
    cluster_listener: TcpListener,
    service: NodeService,
}

impl NodeServer {
    /// Bind both listeners and build the node.
    ///
    /// Port 0 is allowed; the node then advertises the port actually bound
    /// unless `advertise_*` overrides it.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let api_listener = TcpListener::bind(config.api_addr).await?;
        let cluster_listener = TcpListener::bind(config.cluster_addr).await?;

        let api = match &config.advertise_api {
            Some(addr) => addr.clone(),
            None => api_listener.local_addr()?.to_string(),
        };
        let cluster = match &config.advertise_cluster {
            Some(addr) => addr.clone(),
            None => cluster_listener.local_addr()?.to_string(),
        };
        let local = RingEntry::new(config.node_id, api, cluster);

        let metrics = Arc::new(Metrics::new());
        let peers = PeerClient::new(config.forward_timeout(), config.ping_timeout())?;
        let membership = Arc::new(MembershipManager::new(
            local,
            placement_for(config.placement),
            peers.clone(),
            config.departed_ttl(),
            metrics.clone(),
        ));
        let store = Arc::new(KeyStore::with_tombstone_ttl(config.departed_ttl()));
        let router = Arc::new(
            Router::new(membership.clone(), store.clone(), peers, metrics.clone())
                .with_retry_on_failover(config.retry_on_failover)
                .with_probe_before_forward(config.probe_before_forward),
        );
        let service = NodeService::new(membership, router, store, metrics);

        Ok(Self {
            config,
            api_listener,
            cluster_listener,
            service,
        })
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        Ok(self.api_listener.local_addr()?)
    }

    pub fn cluster_addr(&self) -> Result<SocketAddr> {
        Ok(self.cluster_listener.local_addr()?)
    }

    pub fn service(&self) -> &NodeService {
        &self.service
    }

    /// Serve until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = self.service.membership.local().clone();
        tracing::info!("Starting node {}", local.id);
        tracing::info!("  Client API: {}", local.address.api);
        tracing::info!("  Cluster API: {}", local.address.cluster);
        tracing::info!(
            "  Placement: {}",
            self.service.membership.ring().placement().name()
        );

        let mut tasks = Vec::new();
        if let Some(interval) = self.config.probe_interval() {
            tasks.push(tokio::spawn(
                self.service.membership.clone().run_probe_loop(interval),
            ));
        }
        if self.config.handoff {
            let changes = self.service.membership.subscribe();
            tasks.push(tokio::spawn(
                self.service.router.clone().run_handoff_loop(changes),
            ));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            signal.await;
            let _ = stop_tx.send(true);
        });

        let client_router = create_client_router(self.service.clone(), self.config.max_body_bytes);
        let cluster_router =
            create_cluster_router(self.service.clone(), self.config.max_body_bytes);

        let api_server = axum::serve(self.api_listener, client_router)
            .with_graceful_shutdown(wait_for_stop(stop_rx.clone()));
        let cluster_server = axum::serve(self.cluster_listener, cluster_router)
            .with_graceful_shutdown(wait_for_stop(stop_rx));

        tracing::info!("✓ Node {} ready", local.id);

        let result = tokio::try_join!(api_server.into_future(), cluster_server.into_future());

        for task in tasks {
            task.abort();
        }
        tracing::info!("Node {} stopped", local.id);

        result?;
        Ok(())
    }
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    loop {
        let stopped = *stop.borrow_and_update();
        if stopped || stop.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
