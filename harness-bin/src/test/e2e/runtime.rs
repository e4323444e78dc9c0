use std::{sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    error::BoxError,
    graceful,
    http::{
        Request, Response, client::EasyHttpWebClient,
        layer::map_request_body::MapRequestBodyLayer,
    },
    layer::TimeoutLayer,
    rt::Executor,
    tls::boring::client::TlsConnectorDataBuilder,
};

use latency_harness_lib::{
    client::GatewayClientBuilder,
    delay::ResponseDelay,
    proxy::{ProxyConfig, ProxyHandle, run_intercept_proxy},
    tls::RootCa,
};

use crate::mock::{MockGatewayConfig, MockGatewayHandle, run_mock_gateway};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// One scenario-shaped rig: in-process mock gateway (unless proxy-only)
/// behind an in-process interception proxy, with its own graceful scope.
pub(crate) struct TestStack {
    shutdown: graceful::Shutdown,
    stop_tx: tokio::sync::oneshot::Sender<()>,
    pub delay: ResponseDelay,
    pub proxy: ProxyHandle,
    pub mock: Option<MockGatewayHandle>,
}

impl TestStack {
    pub async fn start() -> Self {
        Self::start_with(MockGatewayConfig::default()).await
    }

    pub async fn start_with(cfg: MockGatewayConfig) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = graceful::Shutdown::new(async move {
            let _ = stop_rx.await;
        });

        let (mock_tx, mock_rx) = tokio::sync::oneshot::channel();
        shutdown.spawn_task_fn(async move |guard| {
            let bind = "127.0.0.1:0".parse().unwrap();
            if let Err(err) = run_mock_gateway(bind, cfg, guard, mock_tx).await {
                eprintln!("mock gateway exited with an error: {err}");
            }
        });
        let mock = tokio::time::timeout(READY_TIMEOUT, mock_rx)
            .await
            .expect("mock gateway start within timeout")
            .expect("mock gateway handle");

        let (delay, proxy) = Self::spawn_proxy(&shutdown, mock.base_url.clone()).await;

        Self {
            shutdown,
            stop_tx,
            delay,
            proxy,
            mock: Some(mock),
        }
    }

    /// Proxy with no backend behind it, for transport-failure tests.
    pub async fn start_proxy_only(backend: rama::http::Uri) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = graceful::Shutdown::new(async move {
            let _ = stop_rx.await;
        });

        let (delay, proxy) = Self::spawn_proxy(&shutdown, backend).await;

        Self {
            shutdown,
            stop_tx,
            delay,
            proxy,
            mock: None,
        }
    }

    async fn spawn_proxy(
        shutdown: &graceful::Shutdown,
        backend: rama::http::Uri,
    ) -> (ResponseDelay, ProxyHandle) {
        let delay = ResponseDelay::default();
        let (proxy_tx, proxy_rx) = tokio::sync::oneshot::channel();
        shutdown.spawn_task_fn({
            let delay = delay.clone();
            async move |guard| {
                let proxy_cfg = ProxyConfig {
                    bind: "127.0.0.1:0".parse().unwrap(),
                    backend,
                    insecure_upstream: true,
                };
                if let Err(err) = run_intercept_proxy(proxy_cfg, guard, delay, proxy_tx).await {
                    eprintln!("interception proxy exited with an error: {err}");
                }
            }
        });
        let proxy = tokio::time::timeout(READY_TIMEOUT, proxy_rx)
            .await
            .expect("interception proxy start within timeout")
            .expect("interception proxy handle");
        (delay, proxy)
    }

    pub fn proxy_url(&self, path: &str) -> String {
        format!(
            "{}{path}",
            self.proxy.base_url.to_string().trim_end_matches('/'),
        )
    }

    /// Gateway client pre-wired to the proxy endpoint and its CA.
    pub fn gateway_client_builder(&self) -> GatewayClientBuilder {
        GatewayClientBuilder::new()
            .endpoint(self.proxy.base_url.clone())
            .master_key("test-master-key")
            .trusted_ca(self.proxy.root_ca.clone())
    }

    /// Tear the whole rig down, draining in-flight work.
    pub async fn stop(self) {
        let TestStack {
            shutdown, stop_tx, ..
        } = self;
        let _ = stop_tx.send(());
        let _ = shutdown
            .shutdown_with_limit(Duration::from_secs(5))
            .await;
    }
}

/// Plain web client that trusts exactly the given proxy CA.
pub(crate) fn new_trusted_client(
    root_ca: RootCa,
) -> impl Service<Request, Output = Response, Error = BoxError> {
    let store = root_ca.try_into_cert_store().unwrap();
    let tls_config = Arc::new(
        TlsConnectorDataBuilder::new_http_auto().with_server_verify_cert_store(store),
    );

    let inner_client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(Some(tls_config))
        .with_default_http_connector(Executor::default())
        .try_with_default_connection_pool()
        .expect("create connection pool for e2e web client")
        .build_client();

    (
        // fail fast: no e2e exchange should ever take this long
        TimeoutLayer::new(Duration::from_secs(30)),
        MapRequestBodyLayer::new_boxed_streaming_body(),
    )
        .into_layer(inner_client)
}
