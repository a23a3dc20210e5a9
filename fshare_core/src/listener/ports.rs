//! Port selection for the control and status listeners

use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;

use crate::error::{Result, ShareError};

/// Bind `preferred` if given and free, otherwise an ephemeral port
pub async fn bind_port(addr: IpAddr, preferred: Option<u16>, what: &'static str) -> Result<TcpListener> {
    if let Some(port) = preferred.filter(|p| *p != 0) {
        match TcpListener::bind(SocketAddr::new(addr, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::warn!("{} port {} is busy, picking a free one", what, port);
            }
            Err(source) => return Err(ShareError::Bind { what, source }),
        }
    }

    TcpListener::bind(SocketAddr::new(addr, 0))
        .await
        .map_err(|source| ShareError::Bind { what, source })
}

/// Bind the control/data and status listeners on two distinct ports.
///
/// Both sockets are held open together, so the second bind can never land on
/// the first one's port.
pub async fn bind_pair(
    addr: IpAddr,
    control: Option<u16>,
    status: Option<u16>,
) -> Result<(TcpListener, TcpListener)> {
    let control = bind_port(addr, control, "control").await?;
    let status = bind_port(addr, status, "status").await?;
    Ok((control, status))
}
