//! In-process simulated overlay.
//!
//! [`MemoryOverlay`] implements both [`Host`] and [`Dht`] over a hand-built or
//! randomly generated topology. Every call is recorded so tests can inspect
//! what a crawler actually asked for.

use crate::dht::{stream_of, Dht, PeerIdStream, PeerInfoStream};
use crate::error::{DhtError, HostError};
use crate::host::Host;
use crate::peer::{Address, PeerId, PeerInfo};
use rand::seq::SliceRandom;
use rand::Rng;
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Number of peers a closest-peers lookup returns, Kademlia's `k`.
pub const DEFAULT_CLOSEST_PEERS: usize = 20;

#[derive(Debug, Clone)]
struct SimulatedPeer {
    addresses: Vec<Address>,
    neighbors: Vec<PeerId>,
    reachable: bool,
    resolvable: bool,
    neighbor_query_fails: bool,
}

#[derive(Debug, Default)]
struct State {
    peers: HashMap<PeerId, SimulatedPeer>,
    closest_override: Option<Vec<PeerId>>,
    closest_limit: usize,
    anchor_failure: Option<String>,
    connect_latency: Duration,
    connected: HashSet<PeerId>,
    closest_queries: Vec<String>,
    find_peer_calls: Vec<PeerId>,
    neighbor_queries: Vec<PeerId>,
    connect_attempts: Vec<PeerInfo>,
    connects_in_flight: usize,
    max_connects_in_flight: usize,
}

/// A simulated overlay network shared between a crawler's host and DHT roles.
///
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryOverlay {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOverlay {
    /// Create an empty overlay.
    pub fn new() -> Self {
        MemoryOverlay {
            state: Arc::new(Mutex::new(State {
                closest_limit: DEFAULT_CLOSEST_PEERS,
                ..State::default()
            })),
        }
    }

    /// Generate a random overlay.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of peers.
    /// * `degree` - Neighbours per peer, links are symmetric so the actual degree may be higher.
    /// * `unreachable_ratio` - Fraction of peers that refuse connections, in `[0, 1]`.
    pub fn random(size: usize, degree: usize, unreachable_ratio: f64) -> Self {
        let overlay = Self::new();
        let mut rng = rand::thread_rng();

        let ids: Vec<PeerId> = (0..size).map(|_| PeerId::random()).collect();
        for id in &ids {
            let ip = Ipv4Addr::new(10, rng.gen(), rng.gen(), rng.gen_range(1..255));
            overlay.insert_peer(
                id.clone(),
                vec![Address::Ip {
                    ip: IpAddr::V4(ip),
                    port: 4001,
                }],
            );
            if rng.gen_bool(unreachable_ratio.clamp(0.0, 1.0)) {
                overlay.set_unreachable(id);
            }
        }

        for id in &ids {
            for neighbor in ids.choose_multiple(&mut rng, degree) {
                if neighbor != id {
                    overlay.link(id, neighbor);
                }
            }
        }

        overlay
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a reachable, resolvable peer with no neighbours.
    ///
    /// Re-inserting a known peer replaces its addresses and keeps its links.
    pub fn insert_peer(&self, id: PeerId, addresses: Vec<Address>) {
        let mut state = self.state();
        match state.peers.get_mut(&id) {
            Some(peer) => peer.addresses = addresses,
            None => {
                state.peers.insert(
                    id,
                    SimulatedPeer {
                        addresses,
                        neighbors: Vec::new(),
                        reachable: true,
                        resolvable: true,
                        neighbor_query_fails: false,
                    },
                );
            }
        }
    }

    /// Record that `from` sees `to` as a neighbour. Directional.
    pub fn add_neighbor(&self, from: &PeerId, to: &PeerId) {
        let mut state = self.state();
        if let Some(peer) = state.peers.get_mut(from) {
            if !peer.neighbors.contains(to) {
                peer.neighbors.push(to.clone());
            }
        }
    }

    /// Record a symmetric neighbourhood between two peers.
    pub fn link(&self, a: &PeerId, b: &PeerId) {
        self.add_neighbor(a, b);
        self.add_neighbor(b, a);
    }

    /// Make connect attempts to the peer fail.
    pub fn set_unreachable(&self, id: &PeerId) {
        if let Some(peer) = self.state().peers.get_mut(id) {
            peer.reachable = false;
        }
    }

    /// Make `find_peer` for the peer fail.
    pub fn set_unresolvable(&self, id: &PeerId) {
        if let Some(peer) = self.state().peers.get_mut(id) {
            peer.resolvable = false;
        }
    }

    /// Make the neighbour query for the peer fail.
    pub fn set_neighbor_query_failure(&self, id: &PeerId) {
        if let Some(peer) = self.state().peers.get_mut(id) {
            peer.neighbor_query_fails = true;
        }
    }

    /// Answer every closest-peers lookup with exactly these peers, in order.
    pub fn set_closest_peers(&self, peers: Vec<PeerId>) {
        self.state().closest_override = Some(peers);
    }

    /// Limit how many peers a distance-ordered closest-peers lookup yields.
    pub fn set_closest_limit(&self, limit: usize) {
        self.state().closest_limit = limit;
    }

    /// Reject closest-peers lookups with the given reason, or accept them again with `None`.
    pub fn set_anchor_failure(&self, reason: Option<String>) {
        self.state().anchor_failure = reason;
    }

    /// Delay added to every connect attempt.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state().connect_latency = latency;
    }

    /// Number of simulated peers.
    pub fn len(&self) -> usize {
        self.state().peers.len()
    }

    /// Whether the overlay has no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key a closest-peers lookup was issued for.
    pub fn closest_peer_queries(&self) -> Vec<String> {
        self.state().closest_queries.clone()
    }

    /// Every identifier `find_peer` was called with.
    pub fn find_peer_calls(&self) -> Vec<PeerId> {
        self.state().find_peer_calls.clone()
    }

    /// Every identifier a neighbour query was issued for.
    pub fn neighbor_queries(&self) -> Vec<PeerId> {
        self.state().neighbor_queries.clone()
    }

    /// Every descriptor a connect attempt was started with, in start order.
    pub fn connect_attempts(&self) -> Vec<PeerInfo> {
        self.state().connect_attempts.clone()
    }

    /// Connect attempts currently in progress.
    pub fn connects_in_flight(&self) -> usize {
        self.state().connects_in_flight
    }

    /// Highest number of simultaneous connect attempts observed.
    pub fn max_connects_in_flight(&self) -> usize {
        self.state().max_connects_in_flight
    }

    /// Peers a connect attempt succeeded for.
    pub fn connected_peers(&self) -> HashSet<PeerId> {
        self.state().connected.clone()
    }

    fn closest_to(&self, key: &str) -> Vec<PeerId> {
        let state = self.state();
        if let Some(peers) = &state.closest_override {
            return peers.clone();
        }

        let target = kademlia_key(key.as_bytes());
        let mut peers: Vec<(Vec<u8>, PeerId)> = state
            .peers
            .keys()
            .map(|id| (xor_distance(&target, &kademlia_key(id.as_bytes())), id.clone()))
            .collect();
        peers.sort();
        peers
            .into_iter()
            .take(state.closest_limit)
            .map(|(_, id)| id)
            .collect()
    }
}

/// Position of some bytes in the DHT keyspace.
fn kademlia_key(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

fn xor_distance(a: &[u8; 32], b: &[u8; 32]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Decrements the in-flight counter even if the attempt is abandoned.
struct InFlight<'a>(&'a MemoryOverlay);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.connects_in_flight = state.connects_in_flight.saturating_sub(1);
    }
}

impl Host for MemoryOverlay {
    fn connect(&self, peer: &PeerInfo) -> impl Future<Output = Result<(), HostError>> + Send {
        let overlay = self.clone();
        let peer = peer.clone();
        async move {
            let latency = {
                let mut state = overlay.state();
                state.connect_attempts.push(peer.clone());
                state.connects_in_flight += 1;
                state.max_connects_in_flight =
                    state.max_connects_in_flight.max(state.connects_in_flight);
                state.connect_latency
            };
            let _in_flight = InFlight(&overlay);

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if peer.addresses.is_empty() {
                return Err(HostError::NoAddresses);
            }
            let mut state = overlay.state();
            match state.peers.get(&peer.id) {
                Some(simulated) if simulated.reachable => {
                    state.connected.insert(peer.id.clone());
                    Ok(())
                }
                _ => Err(HostError::Unreachable("connection refused".to_string())),
            }
        }
    }
}

impl Dht for MemoryOverlay {
    fn get_closest_peers(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<PeerIdStream, DhtError>> + Send {
        let overlay = self.clone();
        let key = key.to_string();
        async move {
            let failure = {
                let mut state = overlay.state();
                state.closest_queries.push(key.clone());
                state.anchor_failure.clone()
            };
            if let Some(reason) = failure {
                return Err(DhtError::QueryFailed(reason));
            }
            Ok(stream_of(overlay.closest_to(&key)))
        }
    }

    fn find_peer(&self, peer: &PeerId) -> impl Future<Output = Result<PeerInfo, DhtError>> + Send {
        let overlay = self.clone();
        let peer = peer.clone();
        async move {
            let mut state = overlay.state();
            state.find_peer_calls.push(peer.clone());
            match state.peers.get(&peer) {
                Some(simulated) if simulated.resolvable => {
                    Ok(PeerInfo::new(peer, simulated.addresses.clone()))
                }
                _ => Err(DhtError::NotFound(peer)),
            }
        }
    }

    fn find_peers_connected_to_peer(
        &self,
        peer: &PeerId,
    ) -> impl Future<Output = Result<PeerInfoStream, DhtError>> + Send {
        let overlay = self.clone();
        let peer = peer.clone();
        async move {
            let mut state = overlay.state();
            state.neighbor_queries.push(peer.clone());
            let simulated = match state.peers.get(&peer) {
                Some(simulated) => simulated,
                None => return Err(DhtError::NotFound(peer)),
            };
            if simulated.neighbor_query_fails {
                return Err(DhtError::QueryFailed(format!(
                    "no route to neighbours of {peer}"
                )));
            }
            let neighbors = simulated
                .neighbors
                .iter()
                .map(|id| {
                    let addresses = state
                        .peers
                        .get(id)
                        .map(|p| p.addresses.clone())
                        .unwrap_or_default();
                    PeerInfo::new(id.clone(), addresses)
                })
                .collect();
            Ok(stream_of(neighbors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(n: u8) -> Address {
        Address::Ip {
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)),
            port: 4001,
        }
    }

    async fn drain<T>(mut rx: tokio::sync::mpsc::Receiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_closest_peers_ordered_by_distance() {
        let overlay = MemoryOverlay::new();
        for n in 0..30 {
            overlay.insert_peer(PeerId::random(), vec![address(n)]);
        }
        overlay.set_closest_limit(5);

        let closest = drain(overlay.get_closest_peers("anchor").await.unwrap()).await;
        assert_eq!(closest.len(), 5);

        let target = kademlia_key(b"anchor");
        let distances: Vec<Vec<u8>> = closest
            .iter()
            .map(|id| xor_distance(&target, &kademlia_key(id.as_bytes())))
            .collect();
        let mut sorted = distances.clone();
        sorted.sort();
        assert_eq!(distances, sorted);
        assert_eq!(overlay.closest_peer_queries(), vec!["anchor".to_string()]);
    }

    #[tokio::test]
    async fn test_closest_peers_override_and_failure() {
        let overlay = MemoryOverlay::new();
        let a = PeerId::random();
        overlay.insert_peer(a.clone(), vec![address(1)]);
        overlay.insert_peer(PeerId::random(), vec![address(2)]);
        overlay.set_closest_peers(vec![a.clone()]);

        let closest = drain(overlay.get_closest_peers("k").await.unwrap()).await;
        assert_eq!(closest, vec![a]);

        overlay.set_anchor_failure(Some("bootstrap incomplete".into()));
        assert!(matches!(
            overlay.get_closest_peers("k").await,
            Err(DhtError::QueryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_find_peer_and_neighbors() {
        let overlay = MemoryOverlay::new();
        let a = PeerId::random();
        let b = PeerId::random();
        overlay.insert_peer(a.clone(), vec![address(1)]);
        overlay.insert_peer(b.clone(), vec![address(2)]);
        overlay.add_neighbor(&a, &b);

        let info = overlay.find_peer(&a).await.unwrap();
        assert_eq!(info.addresses, vec![address(1)]);

        let neighbors = drain(overlay.find_peers_connected_to_peer(&a).await.unwrap()).await;
        assert_eq!(neighbors, vec![PeerInfo::new(b.clone(), vec![address(2)])]);
        // Directional.
        let neighbors = drain(overlay.find_peers_connected_to_peer(&b).await.unwrap()).await;
        assert!(neighbors.is_empty());

        overlay.set_unresolvable(&a);
        assert_eq!(overlay.find_peer(&a).await, Err(DhtError::NotFound(a.clone())));
        overlay.set_neighbor_query_failure(&a);
        assert!(overlay.find_peers_connected_to_peer(&a).await.is_err());

        assert_eq!(overlay.find_peer_calls(), vec![a.clone(), a.clone()]);
        assert_eq!(overlay.neighbor_queries(), vec![a.clone(), b, a]);
    }

    #[tokio::test]
    async fn test_connect_records_attempts() {
        let overlay = MemoryOverlay::new();
        let a = PeerId::random();
        let b = PeerId::random();
        overlay.insert_peer(a.clone(), vec![address(1)]);
        overlay.insert_peer(b.clone(), vec![address(2)]);
        overlay.set_unreachable(&b);

        assert!(overlay.connect(&PeerInfo::new(a.clone(), vec![address(1)])).await.is_ok());
        assert!(matches!(
            overlay.connect(&PeerInfo::new(b.clone(), vec![address(2)])).await,
            Err(HostError::Unreachable(_))
        ));
        assert!(matches!(
            overlay.connect(&PeerInfo::new(a.clone(), Vec::new())).await,
            Err(HostError::NoAddresses)
        ));

        assert_eq!(overlay.connect_attempts().len(), 3);
        assert_eq!(overlay.connected_peers(), HashSet::from([a]));
        assert_eq!(overlay.connects_in_flight(), 0);
        assert_eq!(overlay.max_connects_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_connect_is_not_counted_in_flight() {
        let overlay = MemoryOverlay::new();
        let a = PeerId::random();
        overlay.insert_peer(a.clone(), vec![address(1)]);
        overlay.set_connect_latency(Duration::from_secs(30));

        let peer = PeerInfo::new(a, vec![address(1)]);
        let attempt = overlay.connect(&peer);
        let result = tokio::time::timeout(Duration::from_secs(1), attempt).await;
        assert!(result.is_err());
        assert_eq!(overlay.connects_in_flight(), 0);
        assert_eq!(overlay.max_connects_in_flight(), 1);
    }

    #[test]
    fn test_random_overlay_is_linked() {
        let overlay = MemoryOverlay::random(50, 4, 0.0);
        assert_eq!(overlay.len(), 50);
        let state = overlay.state();
        assert!(state.peers.values().all(|p| !p.neighbors.is_empty()));
        assert!(state.peers.values().all(|p| p.reachable));
    }
}
