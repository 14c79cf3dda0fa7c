//! Distributed hash table capability.

use crate::error::DhtError;
use crate::peer::{PeerId, PeerInfo};
use std::future::Future;
use tokio::sync::mpsc;

/// Lazy, finite sequence of peer identifiers produced by a DHT query.
///
/// The sequence ends when the producer drops its sender.
pub type PeerIdStream = mpsc::Receiver<PeerId>;

/// Lazy, finite sequence of peer descriptors produced by a DHT query.
pub type PeerInfoStream = mpsc::Receiver<PeerInfo>;

/// Kademlia-style lookups over the overlay.
///
/// Callers bound every query with their own deadline by dropping the returned
/// future or stream. Implementations are treated as internally thread-safe.
pub trait Dht: Send + Sync + 'static {
    /// Peers closest to `key` in the DHT keyspace, in DHT-defined order.
    fn get_closest_peers(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<PeerIdStream, DhtError>> + Send;

    /// Resolve an identifier to the peer's current addresses.
    fn find_peer(&self, peer: &PeerId) -> impl Future<Output = Result<PeerInfo, DhtError>> + Send;

    /// The DHT's view of the peers `peer` is currently connected to.
    fn find_peers_connected_to_peer(
        &self,
        peer: &PeerId,
    ) -> impl Future<Output = Result<PeerInfoStream, DhtError>> + Send;
}

/// Build an already-completed stream out of a list of items.
///
/// Handy for DHT implementations that compute their answer up front.
pub fn stream_of<T>(items: Vec<T>) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(items.len().max(1));
    for item in items {
        // Capacity covers every item, so this never fails.
        let _ = tx.try_send(item);
    }
    rx
}
