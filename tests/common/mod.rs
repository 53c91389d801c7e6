//! In-process cluster harness shared by the integration tests

#![allow(dead_code)]

use ringkv::node::NodeService;
use ringkv::{NodeConfig, NodeServer};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct TestNode {
    pub id: u64,
    /// Client API, `host:port`
    pub api: String,
    /// Cluster listener, `host:port`
    pub cluster: String,
    /// In-process handle on the node's components
    pub service: NodeService,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<ringkv::Result<()>>>,
}

impl TestNode {
    /// Stop serving; in-flight requests are drained first.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap().unwrap();
        }
    }
}

pub fn config(id: u64) -> NodeConfig {
    let mut config = NodeConfig::new(
        id,
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:0".parse().unwrap(),
    );
    config.forward_timeout_ms = 1_000;
    config.ping_timeout_ms = 300;
    // probing off unless a test turns it on
    config.probe_interval_ms = 0;
    config
}

pub async fn spawn_node(id: u64) -> TestNode {
    spawn_with(config(id)).await
}

pub async fn spawn_with(config: NodeConfig) -> TestNode {
    let id = config.node_id;
    let server = NodeServer::bind(config).await.unwrap();
    let api = server.api_addr().unwrap().to_string();
    let cluster = server.cluster_addr().unwrap().to_string();
    let service = server.service().clone();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_with_shutdown(async {
        let _ = rx.await;
    }));
    TestNode {
        id,
        api,
        cluster,
        service,
        shutdown: Some(tx),
        handle: Some(handle),
    }
}

/// Start nodes `1..=count`; node i joins node (i mod count) + 1.
pub async fn spawn_cluster(count: u64) -> Vec<TestNode> {
    spawn_cluster_with(count, config).await
}

pub async fn spawn_cluster_with(count: u64, make: impl Fn(u64) -> NodeConfig) -> Vec<TestNode> {
    let mut nodes = Vec::new();
    for id in 1..=count {
        nodes.push(spawn_with(make(id)).await);
    }
    for i in 0..nodes.len() {
        let target = &nodes[(i + 1) % nodes.len()];
        let body = join(&nodes[i], target).await;
        assert_eq!(body["error"], false, "node {} failed to join: {}", nodes[i].id, body);
    }
    nodes
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub async fn post(node: &TestNode, path: &str, body: Value) -> Value {
    http()
        .post(format!("http://{}{}", node.api, path))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

pub async fn get(node: &TestNode, path: &str) -> Value {
    http()
        .get(format!("http://{}{}", node.api, path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

pub async fn join(node: &TestNode, target: &TestNode) -> Value {
    post(
        node,
        "/join",
        json!({ "id": target.id.to_string(), "address": target.cluster }),
    )
    .await
}

pub async fn set(node: &TestNode, key: &str, value: &str) -> Value {
    post(node, "/set", json!({ "key": key, "value": value })).await
}

pub async fn get_key(node: &TestNode, key: &str) -> Value {
    post(node, "/get", json!({ "key": key })).await
}

pub async fn delete(node: &TestNode, key: &str) -> Value {
    post(node, "/delete", json!({ "key": key })).await
}

pub async fn ping(node: &TestNode) -> Value {
    get(node, "/ping").await
}

/// Sorted member ids of a node's ring view
pub async fn member_ids(node: &TestNode) -> Vec<u64> {
    let view = get(node, "/members").await;
    let mut ids: Vec<u64> = view["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().parse().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

/// Owner id of `key` as seen by `node`
pub async fn owner_of(node: &TestNode, key: &str) -> u64 {
    let found = post(node, "/find", json!({ "key": key })).await;
    found["id"].as_str().unwrap().parse().unwrap()
}

/// Poll until `check` holds or the deadline passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
