//! Running counters describing a crawl.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time view of a crawl's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlerStats {
    /// Discovery rounds started.
    pub rounds: u64,
    /// Anchor queries that failed and ended their round early.
    pub anchor_query_failures: u64,
    /// Distinct peers a peer-walk was entered for.
    pub peers_seen: u64,
    /// Peers successfully resolved and handed to the dialers.
    pub peers_resolved: u64,
    /// Peers that could not be resolved.
    pub resolve_failures: u64,
    /// Neighbour queries that failed.
    pub neighbor_query_failures: u64,
    /// Dial attempts started.
    pub dials_started: u64,
    /// Dial attempts that connected.
    pub dials_succeeded: u64,
    /// Dial attempts that failed or timed out.
    pub dials_failed: u64,
    /// Peers currently queued or being dialled.
    pub in_flight: usize,
    /// Highest value `in_flight` has reached.
    pub max_in_flight: usize,
}

impl fmt::Display for CrawlerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rounds, {} peers seen, {} resolved ({} unresolved), {} connected, {} failed, {} in flight",
            self.rounds,
            self.peers_seen,
            self.peers_resolved,
            self.resolve_failures,
            self.dials_succeeded,
            self.dials_failed,
            self.in_flight
        )
    }
}

/// Shared atomic counters behind [`CrawlerStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    rounds: AtomicU64,
    anchor_query_failures: AtomicU64,
    peers_seen: AtomicU64,
    peers_resolved: AtomicU64,
    resolve_failures: AtomicU64,
    neighbor_query_failures: AtomicU64,
    dials_started: AtomicU64,
    dials_succeeded: AtomicU64,
    dials_failed: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StatsRecorder {
    pub(crate) fn round_started(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn anchor_query_failed(&self) {
        self.anchor_query_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn peer_seen(&self) {
        self.peers_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resolve_failed(&self) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn neighbor_query_failed(&self) {
        self.neighbor_query_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A resolved peer took a queue slot.
    pub(crate) fn enqueued(&self) {
        self.peers_resolved.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn dial_started(&self) {
        self.dials_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dial_succeeded(&self) {
        self.dials_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dial_failed(&self) {
        self.dials_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A popped peer is finished with, dialled or discarded.
    pub(crate) fn released(&self) {
        // Never underflows: every release follows the enqueue of the same peer.
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> CrawlerStats {
        CrawlerStats {
            rounds: self.rounds.load(Ordering::Relaxed),
            anchor_query_failures: self.anchor_query_failures.load(Ordering::Relaxed),
            peers_seen: self.peers_seen.load(Ordering::Relaxed),
            peers_resolved: self.peers_resolved.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            neighbor_query_failures: self.neighbor_query_failures.load(Ordering::Relaxed),
            dials_started: self.dials_started.load(Ordering::Relaxed),
            dials_succeeded: self.dials_succeeded.load(Ordering::Relaxed),
            dials_failed: self.dials_failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            max_in_flight: self.max_in_flight.load(Ordering::Acquire),
        }
    }
}
