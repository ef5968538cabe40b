//! Shared-port TCP listener.
//!
//! Every worker binds the same address with `SO_REUSEPORT`; the kernel
//! spreads incoming connections across them.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket};

const BACKLOG: u32 = 1024;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid bind address '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// Bind `address` with address and port reuse enabled.
pub fn bind_shared(address: &str) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = address.parse().map_err(|source| ListenerError::InvalidAddress {
        address: address.to_string(),
        source,
    })?;

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(BACKLOG)?;

    tracing::info!(address = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_listeners_share_a_port() {
        let first = bind_shared("127.0.0.1:0").unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_shared(&format!("127.0.0.1:{}", port)).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn rejects_bad_address() {
        assert!(matches!(
            bind_shared("not-an-address"),
            Err(ListenerError::InvalidAddress { .. })
        ));
    }
}
