mod anchor;
mod builder;
mod crawler;
mod dialer;
mod discovery;
mod lifecycle;
mod queue;
mod registry;
mod stats;

pub use anchor::{AnchorKey, ANCHOR_LEN};
pub use builder::{
    CrawlerBuilder, CrawlerBuilderError, DEFAULT_DIALERS, DEFAULT_DIAL_TIMEOUT,
    DEFAULT_QUERY_TIMEOUT, DEFAULT_ROUND_INTERVAL,
};
pub use crawler::{Crawler, CrawlerError, CrawlerMessage};
pub use discovery::AnchorErrorPolicy;
pub use lifecycle::{Interrupted, Lifecycle};
pub use queue::{dial_queue, DialQueueReceiver, DialQueueSender, DialSlot, QueueError};
pub use registry::PeerRegistry;
pub use stats::CrawlerStats;

// Re-exports.
pub use kad_peers_overlay::{
    Address, Dht, DhtError, Host, HostError, MemoryOverlay, PeerId, PeerInfo, TcpHost,
};
