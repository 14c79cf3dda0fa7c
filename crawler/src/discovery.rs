//! The discovery loop.
//!
//! Each round draws a random anchor key, asks the DHT for the peers closest to
//! it, and walks outwards from each of them: resolve the peer, hand it to the
//! dialers, then expand the peers it is connected to. The walk is depth-first
//! pre-order, kept on an explicit stack so pathological topologies can't
//! exhaust the call stack.

use crate::anchor::AnchorKey;
use crate::crawler::CrawlerError;
use crate::lifecycle::{Interrupted, Lifecycle};
use crate::queue::{DialQueueSender, QueueError};
use crate::registry::PeerRegistry;
use crate::stats::StatsRecorder;
use kad_peers_overlay::{Dht, DhtError, PeerId, PeerInfo};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What to do when the DHT rejects an anchor query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorErrorPolicy {
    /// Log it, end the round, and try a new anchor after the usual interval.
    #[default]
    SkipRound,
    /// Stop the crawler with [`CrawlerError::AnchorQuery`].
    Fatal,
}

/// Timing and failure policy for the discovery task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DiscoveryConfig {
    pub(crate) query_timeout: Duration,
    pub(crate) round_interval: Duration,
    pub(crate) anchor_error_policy: AnchorErrorPolicy,
}

/// Why a round stopped early.
#[derive(Debug)]
pub(crate) enum RoundError {
    Cancelled,
    Fatal(CrawlerError),
}

/// Single task performing every DHT call and every registry mutation.
pub(crate) struct DiscoveryDriver<'a, D: Dht> {
    dht: &'a D,
    queue: DialQueueSender,
    registry: PeerRegistry,
    config: DiscoveryConfig,
    lifecycle: Lifecycle,
    stats: Arc<StatsRecorder>,
}

impl<'a, D: Dht> DiscoveryDriver<'a, D> {
    pub(crate) fn new(
        dht: &'a D,
        queue: DialQueueSender,
        config: DiscoveryConfig,
        lifecycle: Lifecycle,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        DiscoveryDriver {
            dht,
            queue,
            registry: PeerRegistry::new(),
            config,
            lifecycle,
            stats,
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Run rounds until cancellation or a fatal error.
    ///
    /// Dropping the driver afterwards closes the dial queue.
    pub(crate) async fn run(&mut self) -> Result<(), CrawlerError> {
        loop {
            match self.round().await {
                Ok(()) => {}
                Err(RoundError::Cancelled) => return Ok(()),
                Err(RoundError::Fatal(e)) => return Err(e),
            }

            if self.lifecycle.sleep(self.config.round_interval).await.is_err() {
                return Ok(());
            }
        }
    }

    /// One discovery pass from a fresh anchor.
    pub(crate) async fn round(&mut self) -> Result<(), RoundError> {
        let anchor = AnchorKey::generate().map_err(|e| {
            error!("Unable to draw an anchor key: {e}");
            RoundError::Fatal(CrawlerError::AnchorGeneration(e))
        })?;
        self.stats.round_started();
        info!("Crawling from anchor {anchor}");

        let lookup = self
            .lifecycle
            .bounded(
                self.config.query_timeout,
                self.dht.get_closest_peers(anchor.as_str()),
            )
            .await;
        let mut closest = match lookup {
            Ok(Ok(closest)) => closest,
            Ok(Err(e)) => return self.anchor_query_failed(e),
            Err(Interrupted::TimedOut) => {
                return self.anchor_query_failed(DhtError::QueryFailed(format!(
                    "closest peers lookup timed out after {:?}",
                    self.config.query_timeout
                )))
            }
            Err(Interrupted::Cancelled) => return Err(RoundError::Cancelled),
        };

        loop {
            let next = self
                .lifecycle
                .bounded(self.config.query_timeout, closest.recv())
                .await;
            match next {
                Ok(Some(peer)) => self.walk(peer).await?,
                Ok(None) => break,
                Err(Interrupted::TimedOut) => {
                    warn!("Closest peers for anchor {anchor} stalled, ending round");
                    break;
                }
                Err(Interrupted::Cancelled) => return Err(RoundError::Cancelled),
            }
        }

        info!(
            "Round complete: {} peers known, {}",
            self.registry.len(),
            self.stats.snapshot()
        );
        Ok(())
    }

    fn anchor_query_failed(&self, e: DhtError) -> Result<(), RoundError> {
        self.stats.anchor_query_failed();
        match self.config.anchor_error_policy {
            AnchorErrorPolicy::SkipRound => {
                warn!("Anchor query failed, skipping round: {e}");
                Ok(())
            }
            AnchorErrorPolicy::Fatal => {
                error!("Anchor query failed: {e}");
                Err(RoundError::Fatal(CrawlerError::AnchorQuery(e)))
            }
        }
    }

    /// Depth-first walk rooted at `root`.
    ///
    /// A peer is queued for dialling strictly before any of its neighbours is
    /// expanded. Peers already in the registry are skipped, which cuts cycles.
    async fn walk(&mut self, root: PeerId) -> Result<(), RoundError> {
        let mut pending = vec![root];

        while let Some(peer) = pending.pop() {
            if !self.registry.insert_if_absent(peer.clone()) {
                continue;
            }
            self.stats.peer_seen();
            debug!("Crawling peer {peer}");

            let info = match self.resolve(&peer).await? {
                Some(info) => info,
                None => continue,
            };

            let slot = match self.queue.reserve(&self.lifecycle).await {
                Ok(slot) => slot,
                Err(QueueError::Cancelled) => return Err(RoundError::Cancelled),
                Err(QueueError::Closed) => {
                    error!("Dial queue closed under discovery, every dialer is gone");
                    return Err(RoundError::Fatal(CrawlerError::DialQueueClosed));
                }
            };
            self.stats.enqueued();
            debug!("Queued {info} for dialling");
            slot.send(info);

            let neighbors = match self.neighbors(&peer).await? {
                Some(neighbors) => neighbors,
                None => continue,
            };
            // Reversed so the first neighbour yielded is the next one expanded.
            pending.extend(
                neighbors
                    .into_iter()
                    .rev()
                    .map(|neighbor| neighbor.id)
                    .filter(|id| !self.registry.contains(id)),
            );
        }

        Ok(())
    }

    /// Resolve a peer's addresses, `None` if the DHT can't.
    async fn resolve(&self, peer: &PeerId) -> Result<Option<PeerInfo>, RoundError> {
        let lookup = self
            .lifecycle
            .bounded(self.config.query_timeout, self.dht.find_peer(peer))
            .await;
        match lookup {
            Ok(Ok(info)) => Ok(Some(info)),
            Ok(Err(e)) => {
                warn!("Peer not found: {peer}: {e}");
                self.stats.resolve_failed();
                Ok(None)
            }
            Err(Interrupted::TimedOut) => {
                warn!(
                    "Peer not found: {peer}: timed out after {:?}",
                    self.config.query_timeout
                );
                self.stats.resolve_failed();
                Ok(None)
            }
            Err(Interrupted::Cancelled) => Err(RoundError::Cancelled),
        }
    }

    /// Every neighbour the DHT reports for `peer` within one query timeout.
    ///
    /// A stream cut short by the deadline still yields what arrived before it.
    async fn neighbors(&self, peer: &PeerId) -> Result<Option<Vec<PeerInfo>>, RoundError> {
        let deadline = Instant::now() + self.config.query_timeout;

        let lookup = self
            .lifecycle
            .bounded_until(deadline, self.dht.find_peers_connected_to_peer(peer))
            .await;
        let mut stream = match lookup {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Can't find peers connected to peer {peer}: {e}");
                self.stats.neighbor_query_failed();
                return Ok(None);
            }
            Err(Interrupted::TimedOut) => {
                warn!("Can't find peers connected to peer {peer}: timed out");
                self.stats.neighbor_query_failed();
                return Ok(None);
            }
            Err(Interrupted::Cancelled) => return Err(RoundError::Cancelled),
        };

        let mut neighbors = Vec::new();
        loop {
            match self.lifecycle.bounded_until(deadline, stream.recv()).await {
                Ok(Some(neighbor)) => neighbors.push(neighbor),
                Ok(None) => break,
                Err(Interrupted::TimedOut) => {
                    debug!(
                        "Neighbours of {peer} cut off at deadline after {}",
                        neighbors.len()
                    );
                    break;
                }
                Err(Interrupted::Cancelled) => return Err(RoundError::Cancelled),
            }
        }
        Ok(Some(neighbors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{dial_queue, DialQueueReceiver};
    use kad_peers_overlay::{stream_of, Address, MemoryOverlay, PeerIdStream, PeerInfoStream};
    use std::future::Future;
    use tokio::sync::mpsc;

    fn address(n: u8) -> Address {
        format!("/ip4/10.0.0.{n}/tcp/4001").parse().unwrap()
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            query_timeout: Duration::from_secs(60),
            round_interval: Duration::from_secs(60),
            anchor_error_policy: AnchorErrorPolicy::SkipRound,
        }
    }

    fn peers(overlay: &MemoryOverlay, count: u8) -> Vec<PeerId> {
        (0..count)
            .map(|n| {
                let id = PeerId::random();
                overlay.insert_peer(id.clone(), vec![address(n)]);
                id
            })
            .collect()
    }

    async fn drain(queue: &DialQueueReceiver, lifecycle: &Lifecycle) -> Vec<PeerInfo> {
        let mut queued = Vec::new();
        while let Ok(info) = queue.pop(lifecycle).await {
            queued.push(info);
        }
        queued
    }

    struct Harness<'a, D: Dht> {
        driver: DiscoveryDriver<'a, D>,
        rx: DialQueueReceiver,
        lifecycle: Lifecycle,
    }

    fn harness<D: Dht>(dht: &D, config: DiscoveryConfig) -> Harness<'_, D> {
        let lifecycle = Lifecycle::new();
        let (tx, rx) = dial_queue(64);
        Harness {
            driver: DiscoveryDriver::new(
                dht,
                tx,
                config,
                lifecycle.clone(),
                Arc::new(StatsRecorder::default()),
            ),
            rx,
            lifecycle,
        }
    }

    impl<D: Dht> Harness<'_, D> {
        /// Close the queue and collect what the driver handed over.
        async fn finish(self) -> (PeerRegistry, Vec<PeerInfo>) {
            let DiscoveryDriver { registry, queue, .. } = self.driver;
            // The queue only ends once its sender is gone.
            drop(queue);
            let queued = drain(&self.rx, &self.lifecycle).await;
            (registry, queued)
        }
    }

    #[tokio::test]
    async fn test_single_peer_universe() {
        let overlay = MemoryOverlay::new();
        let a = peers(&overlay, 1).remove(0);
        overlay.set_closest_peers(vec![a.clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        let (registry, queued) = h.finish().await;

        assert_eq!(queued, vec![PeerInfo::new(a.clone(), vec![address(0)])]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&a));
    }

    #[tokio::test]
    async fn test_cycle_is_walked_once() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 2);
        let (a, b) = (ids[0].clone(), ids[1].clone());
        overlay.add_neighbor(&a, &b);
        overlay.add_neighbor(&b, &a);
        overlay.set_closest_peers(vec![a.clone(), b.clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        let (registry, queued) = h.finish().await;

        let queued: Vec<PeerId> = queued.into_iter().map(|info| info.id).collect();
        assert_eq!(queued, vec![a.clone(), b.clone()]);
        assert_eq!(registry.len(), 2);
        assert_eq!(overlay.find_peer_calls(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_not_retried() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 2);
        let (a, b) = (ids[0].clone(), ids[1].clone());
        overlay.set_unresolvable(&a);
        overlay.add_neighbor(&b, &a);
        overlay.set_closest_peers(vec![a.clone(), b.clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        assert_eq!(h.driver.stats.snapshot().resolve_failures, 1);
        let (registry, queued) = h.finish().await;

        assert!(registry.contains(&a));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, b);
        // `a` shows up again as a neighbour of `b` but isn't looked up again.
        assert_eq!(overlay.find_peer_calls(), vec![a.clone(), b]);
        // And never had its neighbours queried.
        assert!(!overlay.neighbor_queries().contains(&a));
    }

    #[tokio::test]
    async fn test_neighbor_failure_keeps_peer_dialable() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 2);
        let (a, b) = (ids[0].clone(), ids[1].clone());
        overlay.add_neighbor(&a, &b);
        overlay.set_neighbor_query_failure(&a);
        overlay.set_closest_peers(vec![a.clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        assert_eq!(h.driver.stats.snapshot().neighbor_query_failures, 1);
        let (registry, queued) = h.finish().await;

        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, a);
        // Recursion through `a` stopped, so `b` was never reached.
        assert!(!registry.contains(&b));
    }

    #[tokio::test]
    async fn test_walk_enqueues_in_depth_first_pre_order() {
        //     a
        //    / \
        //   b   e
        //  / \
        // c   d
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 5);
        let (a, b, c, d, e) = (&ids[0], &ids[1], &ids[2], &ids[3], &ids[4]);
        overlay.add_neighbor(a, b);
        overlay.add_neighbor(a, e);
        overlay.add_neighbor(b, c);
        overlay.add_neighbor(b, d);
        overlay.add_neighbor(d, a);
        overlay.set_closest_peers(vec![a.clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        let (_, queued) = h.finish().await;

        let order: Vec<PeerId> = queued.into_iter().map(|info| info.id).collect();
        assert_eq!(
            order,
            vec![a.clone(), b.clone(), c.clone(), d.clone(), e.clone()]
        );
    }

    #[tokio::test]
    async fn test_registry_carries_over_between_rounds() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 2);
        overlay.link(&ids[0], &ids[1]);
        overlay.set_closest_peers(vec![ids[0].clone()]);

        let mut h = harness(&overlay, config());
        h.driver.round().await.unwrap();
        h.driver.round().await.unwrap();
        assert_eq!(h.driver.registry().len(), 2);

        let queries = overlay.closest_peer_queries();
        assert_eq!(queries.len(), 2);
        assert_ne!(queries[0], queries[1]);
        assert_eq!(overlay.find_peer_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_anchor_error_policies() {
        let overlay = MemoryOverlay::new();
        overlay.set_anchor_failure(Some("no bootstrap peers".into()));

        let mut h = harness(&overlay, config());
        assert!(h.driver.round().await.is_ok());
        assert_eq!(h.driver.stats.snapshot().anchor_query_failures, 1);

        let fatal = DiscoveryConfig {
            anchor_error_policy: AnchorErrorPolicy::Fatal,
            ..config()
        };
        let mut h = harness(&overlay, fatal);
        assert!(matches!(
            h.driver.round().await,
            Err(RoundError::Fatal(CrawlerError::AnchorQuery(
                DhtError::QueryFailed(_)
            )))
        ));
        assert!(matches!(
            h.driver.run().await,
            Err(CrawlerError::AnchorQuery(_))
        ));
    }

    /// DHT whose closest-peers stream yields one peer and then hangs.
    struct StallingDht {
        peer: PeerInfo,
        held: std::sync::Mutex<Vec<mpsc::Sender<PeerId>>>,
    }

    impl Dht for StallingDht {
        fn get_closest_peers(
            &self,
            _key: &str,
        ) -> impl Future<Output = Result<PeerIdStream, DhtError>> + Send {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(self.peer.id.clone());
            self.held.lock().unwrap().push(tx);
            async move { Ok(rx) }
        }

        fn find_peer(
            &self,
            _peer: &PeerId,
        ) -> impl Future<Output = Result<PeerInfo, DhtError>> + Send {
            let info = self.peer.clone();
            async move { Ok(info) }
        }

        fn find_peers_connected_to_peer(
            &self,
            _peer: &PeerId,
        ) -> impl Future<Output = Result<PeerInfoStream, DhtError>> + Send {
            async move { Ok(stream_of(Vec::new())) }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_closest_stream_ends_round() {
        let dht = StallingDht {
            peer: PeerInfo::new(PeerId::random(), vec![address(1)]),
            held: std::sync::Mutex::new(Vec::new()),
        };

        let start = Instant::now();
        let mut h = harness(&dht, config());
        h.driver.round().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        let (_, queued) = h.finish().await;
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn test_dialers_gone_is_fatal() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 2);
        overlay.set_closest_peers(ids);

        let lifecycle = Lifecycle::new();
        let (tx, rx) = dial_queue(4);
        drop(rx);
        let mut driver = DiscoveryDriver::new(
            &overlay,
            tx,
            config(),
            lifecycle.clone(),
            Arc::new(StatsRecorder::default()),
        );

        assert!(matches!(
            driver.run().await,
            Err(CrawlerError::DialQueueClosed)
        ));
        assert!(!lifecycle.is_cancelled());
        assert_eq!(driver.stats.snapshot().peers_resolved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_queue_full() {
        let overlay = MemoryOverlay::new();
        let ids = peers(&overlay, 3);
        overlay.set_closest_peers(ids);

        let lifecycle = Lifecycle::new();
        let (tx, rx) = dial_queue(1);
        let mut driver = DiscoveryDriver::new(
            &overlay,
            tx,
            config(),
            lifecycle.clone(),
            Arc::new(StatsRecorder::default()),
        );

        let canceller = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        assert!(driver.run().await.is_ok());
        drop(driver);
        // Only the first peer made it into the full queue.
        assert_eq!(drain(&rx, &Lifecycle::new()).await.len(), 1);
    }
}
