use std::{sync::Arc, time::Duration};

use rama::http::{StatusCode, service::client::HttpClientExt as _};
use tokio::time::Instant;

use crate::test::e2e::runtime::{self, TestStack};

#[tokio::test]
#[tracing_test::traced_test]
async fn test_proxied_response_latency_includes_injected_delay() {
    let stack = TestStack::start().await;
    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());

    stack.delay.set(Duration::from_millis(750));
    let started = Instant::now();
    let resp = client
        .get(stack.proxy_url("/dbs/harness-db"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, resp.status());
    assert!(
        started.elapsed() >= Duration::from_millis(750),
        "elapsed = {:?}",
        started.elapsed(),
    );

    // mid-run change applies to the next response
    stack.delay.set(Duration::ZERO);
    let started = Instant::now();
    let resp = client
        .get(stack.proxy_url("/dbs/harness-db"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, resp.status());
    assert!(
        started.elapsed() < Duration::from_millis(750),
        "elapsed = {:?}",
        started.elapsed(),
    );

    stack.stop().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_concurrent_requests_each_observe_delay_without_serializing() {
    let stack = TestStack::start().await;
    let client = Arc::new(runtime::new_trusted_client(stack.proxy.root_ca.clone()));

    stack.delay.set(Duration::from_millis(500));

    let started = Instant::now();
    let mut workers = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        let url = stack.proxy_url("/dbs/harness-db");
        workers.push(tokio::spawn(async move {
            let started = Instant::now();
            let resp = client.get(url).send().await.unwrap();
            assert_eq!(StatusCode::OK, resp.status());
            started.elapsed()
        }));
    }
    for worker in workers {
        let elapsed = worker.await.unwrap();
        assert!(
            elapsed >= Duration::from_millis(500),
            "per-request elapsed = {elapsed:?}",
        );
    }

    // four serialized stalls would take at least 2s
    let total = started.elapsed();
    assert!(total < Duration::from_millis(1600), "total = {total:?}");

    stack.stop().await;
}
