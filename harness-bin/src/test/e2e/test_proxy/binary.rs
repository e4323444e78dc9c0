use rama::http::{
    StatusCode, body::util::BodyExt as _, service::client::HttpClientExt as _,
};

use crate::{
    mock,
    test::e2e::runtime::{self, TestStack},
};

#[tokio::test]
#[tracing_test::traced_test]
async fn test_binary_bodies_pass_through_byte_for_byte() {
    let stack = TestStack::start().await;
    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());

    let resp = client.get(stack.proxy_url("/blob")).send().await.unwrap();
    assert_eq!(StatusCode::OK, resp.status());

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(mock::BLOB, bytes.as_ref());

    stack.stop().await;
}
