use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use crate::domain::error::ConnectError;

/// Resolve and connect to `host:port`.
///
/// IPv4 addresses are tried before IPv6 ones. Only a refused or timed out
/// connect is worth retrying.
pub async fn open_tcp(host: &str, port: u16) -> Result<OwnedFd, ConnectError> {
    let addr = resolve(host, port).await?;
    debug!("connecting to {}", addr);

    let stream = TcpStream::connect(addr)
        .await
        .map_err(ConnectError::from_connect)?;
    stream.set_nodelay(true).map_err(ConnectError::Fatal)?;
    info!("connected to {}", addr);

    let stream = stream.into_std().map_err(ConnectError::Fatal)?;
    Ok(OwnedFd::from(stream))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let mut addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(ConnectError::Fatal)?
        .collect();
    addrs.sort_by_key(|addr| !addr.is_ipv4());

    addrs.into_iter().next().ok_or_else(|| {
        ConnectError::Fatal(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        ))
    })
}
