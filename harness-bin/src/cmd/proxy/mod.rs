use std::{path::PathBuf, time::Duration};

use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::Uri,
    net::socket::Interface,
    telemetry::tracing,
};

use clap::Args;
use latency_harness_lib::{
    delay::ResponseDelay,
    proxy::{ProxyConfig, run_intercept_proxy},
};

#[derive(Debug, Clone, Args)]
/// run a standalone interception proxy in front of a backend origin
pub struct ProxyCommand {
    /// origin of the backend to forward all traffic to,
    /// e.g. `https://myaccount.documents.example`
    #[arg(value_name = "ORIGIN", required = true)]
    pub backend: Uri,

    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:0"
    )]
    pub bind: Interface,

    /// artificial delay applied to every proxied response
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    pub delay: Duration,

    /// skip certificate verification towards the backend
    #[arg(long, default_value_t = false)]
    pub insecure: bool,
}

pub async fn exec(
    data: PathBuf,
    guard: ShutdownGuard,
    args: ProxyCommand,
) -> Result<(), OpaqueError> {
    tokio::fs::create_dir_all(&data)
        .await
        .with_context(|| format!("create data directory at path '{}'", data.display()))?;

    let delay = ResponseDelay::new(args.delay);

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    tokio::spawn({
        let data = data.clone();
        async move {
            let Ok(handle) = ready_rx.await else { return };
            tracing::info!(proxy.base_url = %handle.base_url, "interception proxy serving");
            if let Err(err) =
                super::write_server_socket_address_as_file(&data, "proxy", handle.address).await
            {
                tracing::error!("failed to write proxy address file: {err}");
            }
            if let Err(err) = super::write_root_ca_as_file(&data, &handle.root_ca).await {
                tracing::error!("failed to write proxy root CA file: {err}");
            }
        }
    });

    run_intercept_proxy(
        ProxyConfig {
            bind: args.bind,
            backend: args.backend,
            insecure_upstream: args.insecure,
        },
        guard,
        delay,
        ready_tx,
    )
    .await
    .map_err(OpaqueError::from_boxed)
}
