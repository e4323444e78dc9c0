use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};

use rama::{
    Service,
    error::{BoxError, ErrorContext as _, extra::OpaqueError},
    http::{
        Body, HeaderMap, Method, Request, Response, StatusCode, Uri,
        body::util::BodyExt as _,
        client::EasyHttpWebClient,
    },
    net::tls::client::ServerVerifyMode,
    rt::Executor,
    service::BoxService,
    telemetry::tracing,
    tls::boring::client::TlsConnectorDataBuilder,
};
use serde::{Deserialize, Serialize};

use crate::tls::RootCa;

mod config;

pub use self::config::{ConnectionMode, ConsistencyLevel, QueryOptions, ThrottlingRetryOptions};

const GATEWAY_API_VERSION: &str = "2018-12-31";

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_SINGLE_BACKOFF: Duration = Duration::from_secs(5);

/// Terminal failure of a gateway operation.
#[derive(Debug)]
pub enum GatewayError {
    /// the configured end-to-end latency budget elapsed before the
    /// operation (including its internal retries) finished
    BudgetExceeded { budget: Duration },
    /// the retry policy was spent without ever seeing a non-throttled answer
    RetriesExhausted {
        attempts: usize,
        last_status: StatusCode,
    },
    /// a non-retryable error status
    UnexpectedStatus { status: StatusCode },
    Transport(OpaqueError),
    Decode(OpaqueError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::BudgetExceeded { budget } => {
                write!(f, "end-to-end latency budget of {budget:?} exceeded")
            }
            GatewayError::RetriesExhausted {
                attempts,
                last_status,
            } => write!(
                f,
                "gateway still throttling after {attempts} retry attempt(s), last status {last_status}",
            ),
            GatewayError::UnexpectedStatus { status } => {
                write!(f, "gateway returned unexpected status {status}")
            }
            GatewayError::Transport(err) => write!(f, "gateway transport failure: {err}"),
            GatewayError::Decode(err) => write!(f, "gateway response decode failure: {err}"),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Transport(err) | GatewayError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl GatewayError {
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, GatewayError::BudgetExceeded { .. })
    }
}

/// SQL-ish query, wire-compatible with the gateway's
/// `application/query+json` request body.
#[derive(Debug, Clone, Serialize)]
pub struct QuerySpec {
    pub query: String,
    pub parameters: Vec<QueryParameter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl QuerySpec {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.parameters.push(QueryParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Deserialize)]
struct DocumentsPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<serde_json::Value>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionsPage {
    #[serde(rename = "DocumentCollections", default)]
    collections: Vec<serde_json::Value>,
}

/// Builder for the gateway client under test.
///
/// This is the whole policy surface the harness exercises: everything is
/// fixed at build time, the constructed client never mutates its
/// configuration.
#[derive(Debug, Default)]
pub struct GatewayClientBuilder {
    endpoint: Option<Uri>,
    master_key: Option<String>,
    consistency_level: ConsistencyLevel,
    retry: ThrottlingRetryOptions,
    content_response_on_write: Option<bool>,
    connection_mode: ConnectionMode,
    budget: Option<Duration>,
    trusted_ca: Option<RootCa>,
    accept_invalid_certs: bool,
}

impl GatewayClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway base URL; for harness runs, the interception proxy's base URL.
    pub fn endpoint(mut self, endpoint: Uri) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn master_key(mut self, key: impl Into<String>) -> Self {
        self.master_key = Some(key.into());
        self
    }

    pub fn consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = level;
        self
    }

    pub fn throttling_retry_options(mut self, retry: ThrottlingRetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn content_response_on_write(mut self, enabled: bool) -> Self {
        self.content_response_on_write = Some(enabled);
        self
    }

    pub fn connection_mode(mut self, mode: ConnectionMode) -> Self {
        self.connection_mode = mode;
        self
    }

    /// Bound for the total wall-clock time of a single operation, internal
    /// retries and continuation fetches included. `None` (the default)
    /// leaves operations unbounded.
    pub fn end_to_end_latency_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Trust exactly this CA for the gateway's TLS identity.
    pub fn trusted_ca(mut self, ca: RootCa) -> Self {
        self.trusted_ca = Some(ca);
        self
    }

    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    pub fn build(self) -> Result<GatewayClient, BoxError> {
        let endpoint = self.endpoint.context("gateway endpoint is required")?;
        let master_key = self.master_key.context("gateway master key is required")?;
        if self.connection_mode == ConnectionMode::Direct {
            return Err(BoxError::from(
                "direct connection mode bypasses the gateway endpoint; only gateway mode is supported",
            ));
        }

        let tls_config = if self.accept_invalid_certs {
            Some(Arc::new(
                TlsConnectorDataBuilder::new_http_auto()
                    .with_server_verify_mode(ServerVerifyMode::Disable),
            ))
        } else if let Some(ca) = &self.trusted_ca {
            Some(Arc::new(
                TlsConnectorDataBuilder::new_http_auto()
                    .with_server_verify_cert_store(ca.try_into_cert_store()?),
            ))
        } else {
            None
        };

        let http = EasyHttpWebClient::connector_builder()
            .with_default_transport_connector()
            .without_tls_proxy_support()
            .without_proxy_support()
            .with_tls_support_using_boringssl(tls_config)
            .with_default_http_connector(Executor::default())
            .try_with_default_connection_pool()
            .context("create connection pool for gateway client")?
            .build_client()
            .boxed();

        Ok(GatewayClient {
            inner: Arc::new(ClientInner {
                http,
                base: endpoint.to_string().trim_end_matches('/').to_owned(),
                // opaque credential material; a real gateway account would
                // require the per-request HMAC signature here
                auth_token: format!("type=master&ver=1.0&sig={master_key}"),
                consistency_level: self.consistency_level,
                retry: self.retry,
                content_response_on_write: self.content_response_on_write.unwrap_or(true),
                budget: self.budget,
            }),
        })
    }
}

/// Cheaply cloneable gateway client handle.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("endpoint", &self.inner.base)
            .finish()
    }
}

impl GatewayClient {
    pub fn builder() -> GatewayClientBuilder {
        GatewayClientBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.base
    }

    pub fn database(&self, id: impl Into<String>) -> GatewayDatabase {
        GatewayDatabase {
            client: self.clone(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayDatabase {
    client: GatewayClient,
    id: String,
}

impl GatewayDatabase {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn container(&self, id: impl Into<String>) -> GatewayContainer {
        GatewayContainer {
            client: self.client.clone(),
            db: self.id.clone(),
            id: id.into(),
        }
    }

    /// Metadata read of the database resource itself.
    pub async fn read(&self) -> Result<serde_json::Value, GatewayError> {
        let inner = &self.client.inner;
        inner.with_budget(self.read_inner()).await
    }

    async fn read_inner(&self) -> Result<serde_json::Value, GatewayError> {
        let inner = &self.client.inner;
        let uri = inner.request_uri(&format!("/dbs/{}", self.id))?;
        let resp = inner
            .execute(|| inner.new_request(Method::GET, uri.clone(), RequestKind::Bare))
            .await?;
        ensure_success(&resp)?;
        read_json(resp).await
    }

    /// List every collection in the database.
    pub async fn read_all_containers(&self) -> Result<Vec<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        inner.with_budget(self.read_all_containers_inner()).await
    }

    async fn read_all_containers_inner(&self) -> Result<Vec<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        let uri = inner.request_uri(&format!("/dbs/{}/colls", self.id))?;
        let resp = inner
            .execute(|| inner.new_request(Method::GET, uri.clone(), RequestKind::Bare))
            .await?;
        ensure_success(&resp)?;
        let page: CollectionsPage = decode_json(resp).await?;
        Ok(page.collections)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayContainer {
    client: GatewayClient,
    db: String,
    id: String,
}

impl GatewayContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn docs_path(&self) -> String {
        format!("/dbs/{}/colls/{}/docs", self.db, self.id)
    }

    /// Runs the query and drains every result page, following the absolute
    /// continuation URL each page advertises.
    pub async fn query_items(
        &self,
        spec: QuerySpec,
        options: QueryOptions,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        inner.with_budget(self.query_items_inner(spec, options)).await
    }

    async fn query_items_inner(
        &self,
        spec: QuerySpec,
        options: QueryOptions,
    ) -> Result<Vec<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        let body = serde_json::to_string(&spec)
            .map_err(|err| GatewayError::Decode(OpaqueError::from_display(err.to_string())))?;

        let mut documents = Vec::new();
        let mut next = Some(inner.request_uri(&self.docs_path())?);
        while let Some(uri) = next.take() {
            let resp = inner
                .execute(|| {
                    inner.new_request(
                        Method::POST,
                        uri.clone(),
                        RequestKind::Query {
                            body: &body,
                            options,
                        },
                    )
                })
                .await?;
            ensure_success(&resp)?;
            let page: DocumentsPage = decode_json(resp).await?;
            documents.extend(page.documents);
            next = match page.next_link {
                Some(link) => Some(parse_uri(&link)?),
                None => None,
            };
        }
        Ok(documents)
    }

    /// `SELECT VALUE COUNT(1)` over the collection.
    pub async fn count(&self) -> Result<u64, GatewayError> {
        let values = self
            .query_items(
                QuerySpec::new("SELECT VALUE COUNT(1) FROM c"),
                QueryOptions::default(),
            )
            .await?;
        values.first().and_then(|v| v.as_u64()).ok_or_else(|| {
            GatewayError::Decode(OpaqueError::from_display(
                "count query returned no numeric value",
            ))
        })
    }

    /// Point read; `Ok(None)` for an unknown document id.
    pub async fn read_item(&self, id: &str) -> Result<Option<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        inner.with_budget(self.read_item_inner(id)).await
    }

    async fn read_item_inner(&self, id: &str) -> Result<Option<serde_json::Value>, GatewayError> {
        let inner = &self.client.inner;
        let uri = inner.request_uri(&format!("{}/{id}", self.docs_path()))?;
        let resp = inner
            .execute(|| inner.new_request(Method::GET, uri.clone(), RequestKind::Bare))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success(&resp)?;
        Ok(Some(read_json(resp).await?))
    }

    /// Upserts every document, one write per document, and reports how many
    /// the gateway accepted.
    pub async fn upsert_items(
        &self,
        documents: Vec<serde_json::Value>,
    ) -> Result<usize, GatewayError> {
        let inner = &self.client.inner;
        inner.with_budget(self.upsert_items_inner(documents)).await
    }

    async fn upsert_items_inner(
        &self,
        documents: Vec<serde_json::Value>,
    ) -> Result<usize, GatewayError> {
        let inner = &self.client.inner;
        let uri = inner.request_uri(&self.docs_path())?;
        let mut written = 0;
        for document in documents {
            let body = serde_json::to_string(&document)
                .map_err(|err| GatewayError::Decode(OpaqueError::from_display(err.to_string())))?;
            let resp = inner
                .execute(|| {
                    inner.new_request(Method::POST, uri.clone(), RequestKind::Upsert { body: &body })
                })
                .await?;
            ensure_success(&resp)?;
            written += 1;
        }
        Ok(written)
    }
}

enum RequestKind<'a> {
    Bare,
    Query {
        body: &'a str,
        options: QueryOptions,
    },
    Upsert {
        body: &'a str,
    },
}

struct ClientInner {
    http: BoxService<Request, Response, OpaqueError>,
    base: String,
    auth_token: String,
    consistency_level: ConsistencyLevel,
    retry: ThrottlingRetryOptions,
    content_response_on_write: bool,
    budget: Option<Duration>,
}

impl ClientInner {
    fn request_uri(&self, path: &str) -> Result<Uri, GatewayError> {
        parse_uri(&format!("{}{path}", self.base))
    }

    fn new_request(
        &self,
        method: Method,
        uri: Uri,
        kind: RequestKind<'_>,
    ) -> Result<Request, GatewayError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-ms-version", GATEWAY_API_VERSION)
            .header(
                "x-ms-date",
                humantime::format_rfc3339(SystemTime::now()).to_string(),
            )
            .header(
                "x-ms-consistency-level",
                self.consistency_level.as_header_value(),
            )
            .header("authorization", self.auth_token.as_str())
            .header("user-agent", crate::utils::env::server_identifier());

        let body = match kind {
            RequestKind::Bare => Body::empty(),
            RequestKind::Query { body, options } => {
                builder = builder
                    .header("content-type", "application/query+json")
                    .header("x-ms-documentdb-isquery", "true");
                if options.max_degree_of_parallelism > 0 {
                    builder = builder
                        .header("x-ms-documentdb-query-parallelizecrosspartitionquery", "true");
                }
                Body::from(body.to_owned())
            }
            RequestKind::Upsert { body } => {
                builder = builder
                    .header("content-type", "application/json")
                    .header("x-ms-documentdb-is-upsert", "true")
                    .header(
                        "x-ms-documentdb-content-response-on-write",
                        if self.content_response_on_write {
                            "true"
                        } else {
                            "false"
                        },
                    );
                Body::from(body.to_owned())
            }
        };

        builder
            .body(body)
            .map_err(|err| GatewayError::Transport(OpaqueError::from_display(err.to_string())))
    }

    /// One logical exchange: send, and re-send while the gateway answers
    /// with a retryable status and the retry policy still has room. This
    /// loop, not the harness, is the behavior under test.
    async fn execute<F>(&self, make_request: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> Result<Request, GatewayError>,
    {
        let mut attempt = 0;
        let mut waited = Duration::ZERO;
        loop {
            let req = make_request()?;
            let resp = self
                .http
                .serve(req)
                .await
                .map_err(GatewayError::Transport)?;
            let status = resp.status();
            if !is_retryable_status(status) {
                return Ok(resp);
            }

            attempt += 1;
            let hint = retry_after_hint(resp.headers());
            let Some(wait) = next_retry_wait(&self.retry, attempt, waited, hint) else {
                return Err(GatewayError::RetriesExhausted {
                    attempts: attempt - 1,
                    last_status: status,
                });
            };
            tracing::debug!(
                %status,
                attempt,
                "gateway request throttled, retrying in {wait:?}"
            );
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    async fn with_budget<T>(
        &self,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        match self.budget {
            Some(budget) => match tokio::time::timeout(budget, fut).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::BudgetExceeded { budget }),
            },
            None => fut.await,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::REQUEST_TIMEOUT
    )
}

fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("x-ms-retry-after-ms")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// Sleep before retry number `attempt` (1-based), or `None` once either the
/// attempt cap or the cumulative wait cap is spent.
fn next_retry_wait(
    opts: &ThrottlingRetryOptions,
    attempt: usize,
    waited: Duration,
    hint: Option<Duration>,
) -> Option<Duration> {
    if attempt > opts.max_attempts {
        return None;
    }
    let remaining = opts.max_wait.saturating_sub(waited);
    if remaining.is_zero() {
        return None;
    }
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
    let backoff = INITIAL_BACKOFF
        .saturating_mul(1u32 << exponent)
        .min(MAX_SINGLE_BACKOFF);
    Some(hint.unwrap_or(backoff).min(remaining))
}

fn ensure_success(resp: &Response) -> Result<(), GatewayError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(GatewayError::UnexpectedStatus {
            status: resp.status(),
        })
    }
}

fn parse_uri(raw: &str) -> Result<Uri, GatewayError> {
    raw.parse()
        .map_err(|err| GatewayError::Transport(OpaqueError::from_display(format!(
            "invalid gateway uri '{raw}': {err}"
        ))))
}

async fn read_json(resp: Response) -> Result<serde_json::Value, GatewayError> {
    decode_json(resp).await
}

async fn decode_json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, GatewayError> {
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|err| GatewayError::Decode(OpaqueError::from_display(err.to_string())))?
        .to_bytes();
    serde_json::from_slice(&bytes)
        .map_err(|err| GatewayError::Decode(OpaqueError::from_display(err.to_string())))
}
