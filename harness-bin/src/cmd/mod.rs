use std::path::Path;

use rama::{
    error::{ErrorContext as _, OpaqueError},
    net::address::SocketAddress,
};

use latency_harness_lib::tls::RootCa;

pub mod mock;
pub mod proxy;
pub mod run;

pub(crate) async fn write_server_socket_address_as_file(
    dir: &Path,
    name: &str,
    addr: SocketAddress,
) -> Result<(), OpaqueError> {
    let path = dir.join(format!("{name}.addr.txt"));
    tokio::fs::write(&path, addr.to_string())
        .await
        .with_context(|| {
            format!(
                "write socket address '{addr}' for server '{name}' to file '{}'",
                path.display()
            )
        })
}

pub(crate) async fn write_root_ca_as_file(dir: &Path, root_ca: &RootCa) -> Result<(), OpaqueError> {
    let path = dir.join("ca.pem");
    tokio::fs::write(&path, root_ca.pem())
        .await
        .with_context(|| format!("write proxy root CA to file '{}'", path.display()))
}
