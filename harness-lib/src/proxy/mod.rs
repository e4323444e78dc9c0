use std::{convert::Infallible, sync::Arc};

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        Body, Request, Response, StatusCode, Uri,
        body::util::BodyExt as _,
        header::{CONTENT_LENGTH, ETAG, HOST, LAST_MODIFIED},
        layer::{
            decompression::DecompressionLayer,
            map_response_body::MapResponseBodyLayer,
            remove_header::{RemoveRequestHeaderLayer, RemoveResponseHeaderLayer},
            trace::TraceLayer,
        },
        server::HttpServer,
        service::web::response::IntoResponse,
    },
    net::{address::SocketAddress, socket::Interface},
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use crate::{
    delay::ResponseDelay,
    rewrite::{self, OriginMatcher},
    tls::{self, RootCa},
};

mod client;

/// Construction-time parameters of an interception proxy.
///
/// Immutable for the proxy's lifetime; only the injected [`ResponseDelay`]
/// is mutated while a proxy runs, and only by its owner.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// network interface to bind the TLS listener to
    pub bind: Interface,
    /// origin of the real backend every request is forwarded to,
    /// e.g. `https://myaccount.documents.example:443`
    pub backend: Uri,
    /// skip upstream certificate verification (self-signed mock backends)
    pub insecure_upstream: bool,
}

/// Runtime identity of a started proxy, handed to the owner once the
/// listener is bound and serving.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    pub address: SocketAddress,
    /// externally visible base URL clients are pointed at
    pub base_url: Uri,
    /// the CA clients must trust to accept the proxy's TLS identity
    pub root_ca: RootCa,
}

/// Runs the interception proxy until the guard initiates shutdown.
///
/// Every incoming request, regardless of method or path, is forwarded
/// verbatim to the configured backend origin. The full upstream response is
/// buffered, stalled by the delay value current *at that instant*, re-homed
/// via [`rewrite::rewrite_origin_urls`] and returned. Binding or TLS setup
/// failure is fatal; a single failed exchange is not.
pub async fn run_intercept_proxy(
    cfg: ProxyConfig,
    guard: ShutdownGuard,
    delay: ResponseDelay,
    ready_tx: tokio::sync::oneshot::Sender<ProxyHandle>,
) -> Result<(), BoxError> {
    let backend_origin =
        OriginMatcher::try_from_uri(&cfg.backend).context("parse backend origin")?;

    let exec = Executor::graceful(guard);

    let tcp_service = TcpListener::build(exec.clone())
        .bind(cfg.bind.clone())
        .await
        .context("bind TCP network interface for interception proxy")?;

    let bound_addr = tcp_service
        .local_addr()
        .context("fetch local addr of bound TCP port for interception proxy")?;
    let address: SocketAddress = bound_addr.into();

    let (tls_acceptor, root_ca) = tls::new_tls_acceptor_layer("latency-harness interception proxy")
        .context("prepare TLS acceptor for interception proxy")?;

    let base_url: Uri = format!("https://{address}")
        .parse()
        .context("parse interception proxy base url")?;

    let upstream = (
        RemoveResponseHeaderLayer::hop_by_hop(),
        RemoveRequestHeaderLayer::hop_by_hop(),
        MapResponseBodyLayer::new_boxed_streaming_body(),
        DecompressionLayer::new(),
    )
        .into_layer(client::new_upstream_client(cfg.insecure_upstream)?);

    let forward_svc = ForwardService {
        upstream,
        backend_base: cfg.backend.to_string().trim_end_matches('/').to_owned(),
        backend_origin,
        proxy_base_url: base_url.to_string().trim_end_matches('/').to_owned(),
        delay,
    };

    let http_svc = TraceLayer::new_for_http().into_layer(forward_svc);
    let http_server = HttpServer::auto(exec).service(Arc::new(http_svc));

    tracing::info!(
        proxy.address = %address,
        backend = %cfg.backend,
        "interception proxy ready"
    );
    if ready_tx
        .send(ProxyHandle {
            address,
            base_url,
            root_ca,
        })
        .is_err()
    {
        return Err(BoxError::from(
            "failed to hand the interception proxy handle to its owner",
        ));
    }

    tcp_service
        .serve(tls_acceptor.into_layer(http_server))
        .await;

    Ok(())
}

struct ForwardService<S> {
    upstream: S,
    backend_base: String,
    backend_origin: OriginMatcher,
    proxy_base_url: String,
    delay: ResponseDelay,
}

impl<S> Service<Request> for ForwardService<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let uri = req.uri().clone();
        match self.forward(req).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                // transport-level forwarding failure; backend *status* errors
                // never land here, they pass through untouched
                tracing::error!(uri = %uri, "error forwarding request to backend: {err:?}");
                Ok(StatusCode::BAD_GATEWAY.into_response())
            }
        }
    }
}

impl<S> ForwardService<S>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    async fn forward(&self, req: Request) -> Result<Response, BoxError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = format!("{}{path_and_query}", self.backend_base);
        parts.uri = target
            .parse()
            .context("rewrite request uri to backend origin")?;
        // egress derives the host header from the rewritten uri
        parts.headers.remove(HOST);

        let resp = self
            .upstream
            .serve(Request::from_parts(parts, body))
            .await
            .map_err(Into::into)?;

        let (mut parts, body) = resp.into_parts();
        let bytes = body
            .collect()
            .await
            .context("collect backend response body")?
            .to_bytes();

        // the upstream exchange is fully over before the stall starts,
        // and the delay is whatever is configured *now*, not at request time
        let delay = self.delay.current();
        if !delay.is_zero() {
            tracing::debug!(status = %parts.status, "stalling response for {delay:?}");
            tokio::time::sleep(delay).await;
        }

        let body = match rewrite::rewrite_origin_urls(
            &bytes,
            &self.backend_origin,
            &self.proxy_base_url,
        ) {
            Some(rewritten) => {
                // body length changed: drop the stale length and validators
                parts.headers.remove(CONTENT_LENGTH);
                parts.headers.remove(ETAG);
                parts.headers.remove(LAST_MODIFIED);
                Body::from(rewritten)
            }
            None => Body::from(bytes),
        };

        Ok(Response::from_parts(parts, body))
    }
}
