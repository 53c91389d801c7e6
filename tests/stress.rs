//! Load test for a ringkv cluster: concurrent writes and reads across nodes
//!
//! Run with `--features heavy-tests`.

#![cfg(feature = "heavy-tests")]

mod common;

use common::*;
use futures_util::future::join_all;
use std::time::Instant;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_set_get() {
    let nodes = spawn_cluster(5).await;
    let n = 500;

    let start = Instant::now();
    let writes = join_all((0..n).map(|i| {
        let node = &nodes[i % nodes.len()];
        async move { set(node, &format!("key_{}", i), &format!("value_{}", i)).await }
    }))
    .await;
    let write_time = start.elapsed();
    assert!(writes.iter().all(|body| body["error"] == false));

    let start = Instant::now();
    let reads = join_all((0..n).map(|i| {
        let node = &nodes[(i + 2) % nodes.len()];
        async move { (i, get_key(node, &format!("key_{}", i)).await) }
    }))
    .await;
    let read_time = start.elapsed();
    for (i, body) in reads {
        assert_eq!(body["value"], format!("value_{}", i));
    }

    println!("Write {} keys: {:?}", n, write_time);
    println!("Read {} keys: {:?}", n, read_time);
    assert!(write_time.as_secs_f64() < 30.0, "Write too slow");
    assert!(read_time.as_secs_f64() < 30.0, "Read too slow");
}
