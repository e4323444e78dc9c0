use std::sync::Arc;

use rama::{
    error::{BoxError, ErrorContext as _},
    net::{
        address::Domain,
        tls::{
            ApplicationProtocol, DataEncoding,
            server::{
                SelfSignedData, ServerAuth, ServerAuthData, ServerCertIssuerData,
                ServerCertIssuerKind, ServerConfig,
            },
        },
    },
    tls::boring::{
        core::x509::{X509, store::X509StoreBuilder},
        server::{TlsAcceptorData, TlsAcceptorLayer, utils::self_signed_server_auth_gen_ca},
    },
    utils::str::NonEmptyStr,
};

/// PEM-encoded root CA certificate the interception proxy serves under.
///
/// Scenario clients trust exactly this certificate (and nothing else) to
/// accept the proxy's TLS identity; nothing is installed system-wide.
#[derive(Debug, Clone)]
pub struct RootCa(Arc<str>);

impl RootCa {
    pub fn pem(&self) -> &str {
        &self.0
    }

    /// Certificate store trusting only this CA, for egress TLS verification.
    pub fn try_into_cert_store(
        &self,
    ) -> Result<Arc<rama::tls::boring::core::x509::store::X509Store>, BoxError> {
        let mut store_builder = X509StoreBuilder::new().context("create x509 store builder")?;
        store_builder
            .add_cert(X509::from_pem(self.0.as_bytes()).context("parse root CA PEM")?)
            .context("add root CA to x509 store")?;
        Ok(Arc::new(store_builder.build()))
    }
}

/// Build the TLS acceptor for an interception proxy.
///
/// A fresh self-signed root CA is generated in memory; server certificates
/// for whatever SNI clients present are issued from it on the fly. The CA is
/// scenario-scoped: it lives exactly as long as the proxy that owns it and is
/// never persisted.
pub fn new_tls_acceptor_layer(organisation: &str) -> Result<(TlsAcceptorLayer, RootCa), BoxError> {
    let (crt, key) = self_signed_server_auth_gen_ca(&SelfSignedData {
        organisation_name: Some(organisation.to_owned()),
        common_name: Some(Domain::from_static("latency-harness.invalid")),
        subject_alternative_names: None,
    })
    .context("generate self signed TLS CA")?;

    let crt_pem = String::from_utf8(crt.to_pem().context("generate PEM CA crt byte slice")?)
        .context("PEM CA crt byte slice as String")?;
    let key_pem = String::from_utf8(
        key.private_key_to_pem_pkcs8()
            .context("generate PEM CA key byte slice")?,
    )
    .context("PEM CA key byte slice as String")?;

    let crt_data: NonEmptyStr = crt_pem
        .clone()
        .try_into()
        .context("PEM CA crt string as NonEmpty variant")?;
    let key_data: NonEmptyStr = key_pem
        .try_into()
        .context("PEM CA key string as NonEmpty variant")?;

    let tls_acceptor_data: TlsAcceptorData = ServerConfig {
        application_layer_protocol_negotiation: Some(vec![
            ApplicationProtocol::HTTP_2,
            ApplicationProtocol::HTTP_11,
        ]),
        ..ServerConfig::new(ServerAuth::CertIssuer(ServerCertIssuerData {
            kind: ServerCertIssuerKind::Single(ServerAuthData {
                private_key: DataEncoding::Pem(key_data),
                cert_chain: DataEncoding::Pem(crt_data),
                ocsp: None,
            }),
            ..Default::default()
        }))
    }
    .try_into()
    .context("create tls acceptor data")?;

    Ok((
        TlsAcceptorLayer::new(tls_acceptor_data),
        RootCa(crt_pem.into()),
    ))
}
