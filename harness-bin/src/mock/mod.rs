//! In-process stand-in for the real document gateway.
//!
//! Serves a fixed database with two collections over TLS (self-signed, so
//! the interception proxy talks to it with upstream verification disabled)
//! with a plaintext fallback. Response bodies carry absolute URLs pointing
//! at the mock's own base URL, exactly the material the interception proxy
//! must re-home.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use rama::{
    Layer as _, Service,
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::{
        Body, HeaderValue, Method, Request, Response, StatusCode, Uri,
        body::util::BodyExt as _,
        headers::ContentType,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
        service::web::response::{Headers, IntoResponse},
    },
    net::{
        address::SocketAddress,
        socket::Interface,
        tls::{
            self, ApplicationProtocol,
            server::{SelfSignedData, ServerAuth, TlsPeekRouter},
        },
    },
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
    tls::boring::server::{TlsAcceptorData, TlsAcceptorLayer},
};
use serde_json::{Value, json};

pub(crate) const DATABASE: &str = "harness-db";
pub(crate) const DEFAULT_COLLECTION: &str = "items-by-id";
pub(crate) const CUSTOM_PK_COLLECTION: &str = "items-by-custom-pk";

const QUERY_PAGE_SIZE: usize = 2;
const SEEDED_DOCUMENTS: usize = 5;

/// Bytes that are deliberately not valid UTF-8.
pub(crate) const BLOB: &[u8] = &[0x42, 0x4c, 0x4f, 0x42, 0x00, 0xff, 0xfe, 0x10, 0x80, 0x42];

#[derive(Debug, Clone, Copy, Default)]
pub struct MockGatewayConfig {
    /// answer every n-th document request with `429` plus a retry hint
    pub throttle_every: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MockGatewayHandle {
    pub address: SocketAddress,
    pub base_url: Uri,
}

/// Runs the mock gateway until the guard initiates shutdown.
pub async fn run_mock_gateway(
    bind: Interface,
    cfg: MockGatewayConfig,
    guard: ShutdownGuard,
    ready_tx: tokio::sync::oneshot::Sender<MockGatewayHandle>,
) -> Result<(), OpaqueError> {
    let exec = Executor::graceful(guard);

    let tcp_listener = TcpListener::build(exec.clone())
        .bind(bind)
        .await
        .map_err(OpaqueError::from_boxed)
        .context("bind mock gateway listener")?;

    let address: SocketAddress = tcp_listener
        .local_addr()
        .context("get bound address for mock gateway")?
        .into();
    let base_url: Uri = format!("https://{address}")
        .parse()
        .context("parse mock gateway base url")?;

    let gateway = MockGateway::new(&base_url, cfg);

    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static("latency-harness-mock")),
    )
        .into_layer(Arc::new(gateway));

    let http_server = HttpServer::auto(exec).service(Arc::new(http_svc));

    let tls_acceptor = TlsAcceptorLayer::new(try_new_tls_self_signed_server_data()?);
    let tcp_svc =
        TlsPeekRouter::new(tls_acceptor.into_layer(http_server.clone())).with_fallback(http_server);

    tracing::info!(mock.address = %address, "mock gateway ready");
    if ready_tx
        .send(MockGatewayHandle { address, base_url })
        .is_err()
    {
        return Err(OpaqueError::from_display(
            "failed to hand the mock gateway handle to its owner",
        ));
    }

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}

fn try_new_tls_self_signed_server_data() -> Result<TlsAcceptorData, OpaqueError> {
    let tls_server_config = tls::server::ServerConfig {
        application_layer_protocol_negotiation: Some(vec![
            ApplicationProtocol::HTTP_2,
            ApplicationProtocol::HTTP_11,
        ]),
        ..tls::server::ServerConfig::new(ServerAuth::SelfSigned(SelfSignedData {
            organisation_name: Some("latency-harness mock gateway".to_owned()),
            ..Default::default()
        }))
    };
    tls_server_config
        .try_into()
        .context("create tls server config")
}

#[derive(Debug)]
struct MockGateway {
    base: String,
    throttle_every: u32,
    docs_requests: AtomicU64,
    documents: Mutex<HashMap<&'static str, Vec<Value>>>,
}

impl MockGateway {
    fn new(base_url: &Uri, cfg: MockGatewayConfig) -> Self {
        let base = base_url.to_string().trim_end_matches('/').to_owned();

        let mut documents = HashMap::new();
        for collection in [DEFAULT_COLLECTION, CUSTOM_PK_COLLECTION] {
            let seeded = (0..SEEDED_DOCUMENTS)
                .map(|i| {
                    let id = format!("seed-{i}");
                    json!({
                        "id": id,
                        "value": i,
                        "_self": format!("{base}/dbs/{DATABASE}/colls/{collection}/docs/{id}"),
                    })
                })
                .collect();
            documents.insert(collection, seeded);
        }

        Self {
            base,
            throttle_every: cfg.throttle_every.unwrap_or_default(),
            docs_requests: AtomicU64::new(0),
            documents: Mutex::new(documents),
        }
    }

    fn documents_lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, Vec<Value>>> {
        match self.documents.lock() {
            Ok(docs) => docs,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn known_collection(id: &str) -> Option<&'static str> {
        [DEFAULT_COLLECTION, CUSTOM_PK_COLLECTION]
            .into_iter()
            .find(|known| *known == id)
    }

    fn json_response(status: StatusCode, value: &Value) -> Response {
        (
            status,
            Headers::single(ContentType::json()),
            Body::from(value.to_string()),
        )
            .into_response()
    }

    fn maybe_throttle(&self) -> Option<Response> {
        if self.throttle_every == 0 {
            return None;
        }
        let n = self.docs_requests.fetch_add(1, Ordering::SeqCst) + 1;
        (n % u64::from(self.throttle_every) == 0).then(|| {
            let mut resp = StatusCode::TOO_MANY_REQUESTS.into_response();
            resp.headers_mut()
                .insert("x-ms-retry-after-ms", HeaderValue::from_static("100"));
            resp
        })
    }

    fn database_response(&self, db: &str) -> Response {
        if db != DATABASE {
            return StatusCode::NOT_FOUND.into_response();
        }
        let base = &self.base;
        Self::json_response(
            StatusCode::OK,
            &json!({
                "id": db,
                "_self": format!("{base}/dbs/{db}"),
                "_colls": format!("{base}/dbs/{db}/colls"),
            }),
        )
    }

    fn collections_response(&self, db: &str) -> Response {
        if db != DATABASE {
            return StatusCode::NOT_FOUND.into_response();
        }
        let base = &self.base;
        let collections: Vec<Value> = [DEFAULT_COLLECTION, CUSTOM_PK_COLLECTION]
            .into_iter()
            .map(|collection| {
                json!({
                    "id": collection,
                    "_self": format!("{base}/dbs/{db}/colls/{collection}"),
                    "_docs": format!("{base}/dbs/{db}/colls/{collection}/docs"),
                })
            })
            .collect();
        Self::json_response(
            StatusCode::OK,
            &json!({
                "_rid": db,
                "_count": collections.len(),
                "DocumentCollections": collections,
            }),
        )
    }

    fn document_response(&self, db: &str, collection: &str, id: &str) -> Response {
        if db != DATABASE {
            return StatusCode::NOT_FOUND.into_response();
        }
        let Some(collection) = Self::known_collection(collection) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if let Some(resp) = self.maybe_throttle() {
            return resp;
        }
        let docs = self.documents_lock();
        match docs
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| doc["id"] == id))
        {
            Some(doc) => Self::json_response(StatusCode::OK, doc),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn docs_post_response(&self, db: &str, collection: &str, req: Request) -> Response {
        if db != DATABASE {
            return StatusCode::NOT_FOUND.into_response();
        }
        let Some(collection) = Self::known_collection(collection) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if let Some(resp) = self.maybe_throttle() {
            return resp;
        }

        let is_query = header_is_true(&req, "x-ms-documentdb-isquery");
        let content_response_on_write =
            !header_equals(&req, "x-ms-documentdb-content-response-on-write", "false");
        let page = page_param(req.uri());

        let bytes = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::debug!("failed to read mock gateway request body: {err}");
                return StatusCode::BAD_REQUEST.into_response();
            }
        };
        let Ok(body) = serde_json::from_slice::<Value>(&bytes) else {
            return StatusCode::BAD_REQUEST.into_response();
        };

        if is_query {
            self.query_response(collection, &body, page)
        } else {
            self.upsert_response(collection, body, content_response_on_write)
        }
    }

    fn query_response(&self, collection: &'static str, spec: &Value, page: usize) -> Response {
        let query = spec["query"].as_str().unwrap_or_default();
        let docs = self.documents_lock();
        let all = docs.get(collection).map(Vec::as_slice).unwrap_or_default();

        if query.contains("VALUE COUNT") {
            return Self::json_response(
                StatusCode::OK,
                &json!({ "_count": 1, "Documents": [all.len()] }),
            );
        }

        // an equality filter on c.id narrows the result set, everything
        // else is answered with the full collection
        let id_filter = spec["parameters"]
            .as_array()
            .and_then(|params| params.iter().find(|p| p["name"] == "@id"))
            .map(|p| p["value"].clone());
        let matching: Vec<&Value> = match &id_filter {
            Some(id) => all.iter().filter(|doc| &doc["id"] == id).collect(),
            None => all.iter().collect(),
        };

        let pages = matching.chunks(QUERY_PAGE_SIZE).count();
        let page = page.max(1);
        let chunk: Vec<&Value> = matching
            .iter()
            .skip((page - 1) * QUERY_PAGE_SIZE)
            .take(QUERY_PAGE_SIZE)
            .copied()
            .collect();

        let mut body = json!({
            "_count": chunk.len(),
            "Documents": chunk,
        });
        if page < pages {
            let base = &self.base;
            let next = page + 1;
            body["nextLink"] = json!(format!(
                "{base}/dbs/{DATABASE}/colls/{collection}/docs?page={next}"
            ));
        }
        Self::json_response(StatusCode::OK, &body)
    }

    fn upsert_response(
        &self,
        collection: &'static str,
        mut document: Value,
        content_response_on_write: bool,
    ) -> Response {
        let Some(id) = document["id"].as_str().map(str::to_owned) else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        let base = &self.base;
        document["_self"] = json!(format!("{base}/dbs/{DATABASE}/colls/{collection}/docs/{id}"));

        let mut docs = self.documents_lock();
        let docs = docs.entry(collection).or_default();
        let replaced = match docs.iter_mut().find(|doc| doc["id"] == id.as_str()) {
            Some(existing) => {
                *existing = document.clone();
                true
            }
            None => {
                docs.push(document.clone());
                false
            }
        };

        let status = if replaced {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        if content_response_on_write {
            Self::json_response(status, &document)
        } else {
            status.into_response()
        }
    }

    fn blob_response() -> Response {
        (
            StatusCode::OK,
            Headers::single(ContentType::octet_stream()),
            Body::from(BLOB.to_vec()),
        )
            .into_response()
    }
}

impl Service<Request> for MockGateway {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let is_get = method == Method::GET;
        let is_post = method == Method::POST;

        Ok(match segments.as_slice() {
            ["blob"] if is_get => Self::blob_response(),
            ["dbs", db] if is_get => self.database_response(db),
            ["dbs", db, "colls"] if is_get => self.collections_response(db),
            ["dbs", db, "colls", collection, "docs"] if is_post => {
                self.docs_post_response(db, collection, req).await
            }
            ["dbs", db, "colls", collection, "docs", id] if is_get => {
                self.document_response(db, collection, id)
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        })
    }
}

fn header_is_true(req: &Request, name: &str) -> bool {
    req.headers()
        .get(name)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"true"))
}

fn header_equals(req: &Request, name: &str, expected: &str) -> bool {
    req.headers()
        .get(name)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(expected.as_bytes()))
}

fn page_param(uri: &Uri) -> usize {
    uri.query()
        .and_then(|query| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("page="))
        })
        .and_then(|value| value.parse().ok())
        .unwrap_or(1)
}
