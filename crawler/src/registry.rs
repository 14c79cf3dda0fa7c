//! Set of peers the crawler has already started resolving.

use kad_peers_overlay::PeerId;
use std::collections::HashSet;

/// Every peer identifier the discovery task has entered a peer-walk for.
///
/// Membership only grows. Owned by the discovery task, its single writer.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    seen: HashSet<PeerId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer.
    ///
    /// # Returns
    ///
    /// `true` if the peer was not known before, `false` if it already was.
    pub fn insert_if_absent(&mut self, peer: PeerId) -> bool {
        self.seen.insert(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.seen.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.seen.iter()
    }
}
