use std::sync::Arc;

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    http::{Request, Response, client::EasyHttpWebClient},
    net::tls::client::ServerVerifyMode,
    rt::Executor,
    tls::boring::client::TlsConnectorDataBuilder,
};

/// Egress client used to reach the single fixed backend origin.
///
/// `insecure` disables upstream certificate verification, for backends
/// presenting self-signed certificates (the bundled mock gateway does).
pub(super) fn new_upstream_client(
    insecure: bool,
) -> Result<impl Service<Request, Output = Response, Error: Into<BoxError>>, BoxError> {
    let tls_config = insecure.then(|| {
        Arc::new(
            TlsConnectorDataBuilder::new_http_auto()
                .with_server_verify_mode(ServerVerifyMode::Disable),
        )
    });

    Ok(EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(tls_config)
        .with_default_http_connector(Executor::default())
        .try_with_default_connection_pool()
        .context("create connection pool for upstream web client")?
        .build_client())
}
