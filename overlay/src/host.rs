//! Overlay host capability and a TCP-based implementation.

use crate::error::HostError;
use crate::peer::{Address, PeerId, PeerInfo};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;

/// Default timeout for a single address attempt.
pub const DEFAULT_ADDRESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level access to the overlay.
///
/// Implementations must be cheap to clone and safe to share across tasks. The
/// caller bounds each attempt with its own deadline by dropping the returned
/// future, so implementations need not impose one of their own.
pub trait Host: Clone + Send + Sync + 'static {
    /// Attempt a connection to one of the peer's addresses.
    ///
    /// Success leaves a persistent session with the peer on the host.
    fn connect(&self, peer: &PeerInfo) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// Host that opens plain TCP sessions to advertised addresses.
///
/// Addresses are tried in order and the first that accepts wins. Sessions are
/// kept open until the host is dropped or [`TcpHost::disconnect`] is called.
#[derive(Debug, Clone)]
pub struct TcpHost {
    address_timeout: Duration,
    sessions: Arc<Mutex<HashMap<PeerId, TcpStream>>>,
}

impl TcpHost {
    /// Create a host with the default per-address timeout.
    pub fn new() -> Self {
        Self::with_address_timeout(DEFAULT_ADDRESS_TIMEOUT)
    }

    /// Create a host with a custom per-address timeout.
    pub fn with_address_timeout(address_timeout: Duration) -> Self {
        TcpHost {
            address_timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether a session with the peer is open.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.sessions
            .lock()
            .map(|s| s.contains_key(peer))
            .unwrap_or(false)
    }

    /// Close the session with a peer, if any.
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        self.sessions
            .lock()
            .map(|mut s| s.remove(peer).is_some())
            .unwrap_or(false)
    }

    async fn dial(&self, address: &Address) -> Option<Result<TcpStream, HostError>> {
        let attempt = match address {
            Address::Ip { ip, port } => {
                tokio::time::timeout(self.address_timeout, TcpStream::connect((*ip, *port))).await
            }
            Address::Dns { host, port, .. } => {
                tokio::time::timeout(
                    self.address_timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
            }
            Address::Opaque(_) => return None,
        };

        Some(match attempt {
            Ok(Ok(stream)) => stream.set_nodelay(true).map(|_| stream).map_err(HostError::Io),
            Ok(Err(e)) => Err(HostError::Io(e)),
            Err(_) => Err(HostError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "Connection attempt timed out",
            ))),
        })
    }
}

impl Default for TcpHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for TcpHost {
    fn connect(&self, peer: &PeerInfo) -> impl Future<Output = Result<(), HostError>> + Send {
        let host = self.clone();
        let peer = peer.clone();
        async move {
            let first = peer.addresses.first().ok_or(HostError::NoAddresses)?;

            let mut last_error = None;
            for address in &peer.addresses {
                match host.dial(address).await {
                    None => log::trace!("Skipping unsupported address {address} for {}", peer.id),
                    Some(Ok(stream)) => {
                        log::trace!("TCP session with {} via {address}", peer.id);
                        if let Ok(mut sessions) = host.sessions.lock() {
                            sessions.insert(peer.id.clone(), stream);
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        log::trace!("Address {address} of {} failed: {e}", peer.id);
                        last_error = Some(e);
                    }
                }
            }

            Err(last_error.unwrap_or_else(|| HostError::UnsupportedAddress(first.clone())))
        }
    }
}
