use rama::http::{BodyExtractExt as _, StatusCode, service::client::HttpClientExt as _};

use crate::{
    mock,
    test::e2e::runtime::{self, TestStack},
};

#[tokio::test]
#[tracing_test::traced_test]
async fn test_body_urls_are_rehomed_to_the_proxy() {
    let stack = TestStack::start().await;
    let client = runtime::new_trusted_client(stack.proxy.root_ca.clone());

    let proxy_base = stack.proxy_url("");
    let backend_base = stack
        .mock
        .as_ref()
        .unwrap()
        .base_url
        .to_string()
        .trim_end_matches('/')
        .to_owned();

    let resp = client
        .get(stack.proxy_url("/dbs/harness-db/colls"))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, resp.status());
    let payload = resp.try_into_string().await.unwrap();

    assert!(
        payload.contains(&proxy_base),
        "expected proxy urls in: {payload}"
    );
    assert!(
        !payload.contains(&backend_base),
        "expected no backend urls left in: {payload}"
    );

    stack.stop().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_continuation_pages_are_followed_through_the_proxy() {
    let stack = TestStack::start().await;
    let client = stack.gateway_client_builder().build().unwrap();

    let database = client.database(mock::DATABASE);

    let collections = database.read_all_containers().await.unwrap();
    assert_eq!(2, collections.len());
    let proxy_base = stack.proxy_url("");
    for collection in &collections {
        let link = collection["_self"].as_str().unwrap();
        assert!(
            link.starts_with(&proxy_base),
            "collection link not re-homed: {link}"
        );
    }

    // five seeded documents at a page size of two: the client only sees all
    // of them if every continuation fetch goes back through the proxy
    let documents = database
        .container(mock::DEFAULT_COLLECTION)
        .query_items(
            latency_harness_lib::client::QuerySpec::new("SELECT * FROM c"),
            latency_harness_lib::client::QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(5, documents.len());

    stack.stop().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_point_read_and_count_through_the_proxy() {
    let stack = TestStack::start().await;
    let client = stack.gateway_client_builder().build().unwrap();

    let container = client.database(mock::DATABASE).container(mock::DEFAULT_COLLECTION);

    let doc = container.read_item("seed-1").await.unwrap().unwrap();
    let link = doc["_self"].as_str().unwrap();
    assert!(link.starts_with(&stack.proxy_url("")), "doc link = {link}");

    assert_eq!(None, container.read_item("no-such-doc").await.unwrap());

    assert_eq!(5, container.count().await.unwrap());

    let written = container
        .upsert_items(vec![serde_json::json!({"id": "fresh-doc", "value": 42})])
        .await
        .unwrap();
    assert_eq!(1, written);
    assert_eq!(6, container.count().await.unwrap());

    stack.stop().await;
}
