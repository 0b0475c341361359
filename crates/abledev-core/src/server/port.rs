//! Listening socket allocation with upward retry on busy ports.

use crate::error::{GatewayError, Result};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// How far the allocator keeps trying after the preferred port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortRetryPolicy {
    /// Total bind attempts, the preferred port included. `None` retries until
    /// the port range runs out.
    pub max_attempts: Option<u32>,
}

impl PortRetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
        }
    }
}

/// A bound listener and the address it actually got.
#[derive(Debug)]
pub struct BoundListener {
    pub listener: TcpListener,
    pub address: SocketAddr,
}

impl BoundListener {
    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

/// Bind to `preferred`, or the next port up while the current one is in use.
///
/// Only "address in use" is retried; any other bind error is returned as is.
/// Port `0` asks the OS for an ephemeral port and never retries.
pub async fn listen_on_available_port(
    host: IpAddr,
    preferred: u16,
    policy: PortRetryPolicy,
) -> Result<BoundListener> {
    let mut port = preferred;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let addr = SocketAddr::new(host, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let address = listener.local_addr()?;
                info!("Listening on {}", address);
                return Ok(BoundListener { listener, address });
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let ceiling_reached = policy.max_attempts.is_some_and(|max| attempts >= max);
                if ceiling_reached || port == u16::MAX || port == 0 {
                    return Err(GatewayError::PortsExhausted {
                        start: preferred,
                        attempts,
                    });
                }
                debug!("Port {} is in use, trying {}", port, port + 1);
                port += 1;
            }
            Err(source) => return Err(GatewayError::Bind { addr, source }),
        }
    }
}
