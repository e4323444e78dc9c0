use std::time::Duration;

use rama::http::{StatusCode, service::client::HttpClientExt as _};

use crate::test::e2e::runtime::{self, TestStack};

#[tokio::test]
#[tracing_test::traced_test]
async fn test_listening_port_is_released_after_shutdown() {
    let stack = TestStack::start().await;
    let port = stack.proxy.address.port;

    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());
    let resp = client
        .get(stack.proxy_url("/dbs/harness-db"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, resp.status());

    stack.stop().await;

    // the exact port must be rebindable within a bounded time
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let mut rebound = false;
    for _ in 0..50 {
        match std::net::TcpListener::bind(addr) {
            Ok(_) => {
                rebound = true;
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    assert!(rebound, "proxy port {port} was not released");

    // and a fresh stack starts cleanly afterwards
    let second = TestStack::start().await;
    let client = runtime::new_trusted_client(second.proxy.root_ca.clone());
    let resp = client
        .get(second.proxy_url("/dbs/harness-db"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, resp.status());
    second.stop().await;
}
