use std::path::PathBuf;

use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    net::socket::Interface,
    telemetry::tracing,
};

use clap::Args;

use crate::mock::{MockGatewayConfig, run_mock_gateway};

#[derive(Debug, Clone, Args)]
/// run a standalone mock document gateway
pub struct MockCommand {
    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:0"
    )]
    pub bind: Interface,

    /// answer every n-th document request with 429 plus a retry hint
    #[arg(long, value_name = "N")]
    pub throttle_every: Option<u32>,
}

pub async fn exec(
    data: PathBuf,
    guard: ShutdownGuard,
    args: MockCommand,
) -> Result<(), OpaqueError> {
    tokio::fs::create_dir_all(&data)
        .await
        .with_context(|| format!("create data directory at path '{}'", data.display()))?;

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    tokio::spawn({
        let data = data.clone();
        async move {
            let Ok(handle) = ready_rx.await else { return };
            tracing::info!(mock.base_url = %handle.base_url, "mock gateway serving");
            if let Err(err) =
                super::write_server_socket_address_as_file(&data, "mock", handle.address).await
            {
                tracing::error!("failed to write mock gateway address file: {err}");
            }
        }
    });

    run_mock_gateway(
        args.bind,
        MockGatewayConfig {
            throttle_every: args.throttle_every,
        },
        guard,
        ready_tx,
    )
    .await
}
