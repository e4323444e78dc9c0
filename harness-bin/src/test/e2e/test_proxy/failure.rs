use rama::http::{StatusCode, Uri, service::client::HttpClientExt as _};

use crate::test::e2e::runtime::{self, TestStack};

fn free_loopback_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unreachable_backend_maps_to_bad_gateway_and_listener_survives() {
    let backend: Uri = format!("https://127.0.0.1:{}", free_loopback_port())
        .parse()
        .unwrap();
    let stack = TestStack::start_proxy_only(backend).await;
    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());

    for _ in 0..3 {
        // one failed exchange must not take down the accept loop
        let resp = client
            .get(stack.proxy_url("/dbs/harness-db"))
            .send()
            .await
            .unwrap();
        assert_eq!(StatusCode::BAD_GATEWAY, resp.status());
    }

    stack.stop().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_backend_status_errors_pass_through_unchanged() {
    let stack = TestStack::start().await;
    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());

    // the mock knows no such database; its 404 must not be synthesized into
    // a proxy-level error
    let resp = client
        .get(stack.proxy_url("/dbs/no-such-db"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, resp.status());

    let resp = client
        .get(stack.proxy_url("/neither/a/known/path"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::NOT_FOUND, resp.status());

    stack.stop().await;
}
