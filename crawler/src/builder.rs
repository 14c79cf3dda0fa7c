//! Builder pattern for configuring and creating crawler instances.

use crate::crawler::{Crawler, CrawlerConfig, CrawlerMessage};
use crate::discovery::{AnchorErrorPolicy, DiscoveryConfig};
use kad_peers_overlay::{Dht, Host};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default number of dialer tasks, which is also the dial queue capacity.
pub const DEFAULT_DIALERS: usize = 16;
/// Default deadline for a single connect attempt.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default deadline for a single DHT query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Default pause between discovery rounds.
pub const DEFAULT_ROUND_INTERVAL: Duration = Duration::from_secs(60);

/// Errors that can occur during crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerBuilderError {
    /// The dialer pool must have at least one worker.
    NoDialers,
    /// A timeout that must be positive was zero.
    ZeroTimeout(&'static str),
}

impl fmt::Display for CrawlerBuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerBuilderError::NoDialers => write!(f, "At least one dialer is required"),
            CrawlerBuilderError::ZeroTimeout(which) => write!(f, "The {which} must be non-zero"),
        }
    }
}

impl std::error::Error for CrawlerBuilderError {}

/// Builder for creating a customized [`Crawler`] instance.
///
/// # Example
///
/// ```
/// # fn main() -> Result<(), kad_peers_crawler::CrawlerBuilderError> {
/// use kad_peers_crawler::{AnchorErrorPolicy, CrawlerBuilder, MemoryOverlay};
/// use std::time::Duration;
///
/// let overlay = MemoryOverlay::random(100, 4, 0.1);
///
/// // Create a crawler with the default settings.
/// let basic_crawler = CrawlerBuilder::new(overlay.clone(), overlay.clone()).build()?;
///
/// // Create a crawler with custom settings.
/// let custom_crawler = CrawlerBuilder::new(overlay.clone(), overlay)
///     .with_dialers(32)
///     .with_dial_timeout(Duration::from_secs(20))
///     .with_round_interval(Duration::from_secs(300))
///     .with_anchor_error_policy(AnchorErrorPolicy::Fatal)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CrawlerBuilder<H, D> {
    /// Transport used to dial discovered peers.
    host: H,
    /// DHT used for discovery.
    dht: D,
    /// Number of dialer tasks and dial queue slots.
    dialers: usize,
    /// Deadline for each connect attempt.
    dial_timeout: Duration,
    /// Deadline for each DHT query.
    query_timeout: Duration,
    /// Pause between rounds.
    round_interval: Duration,
    /// Reaction to a rejected anchor query.
    anchor_error_policy: AnchorErrorPolicy,
    /// Optional observer of dial outcomes.
    messages: Option<mpsc::Sender<CrawlerMessage>>,
}

impl<H: Host, D: Dht> CrawlerBuilder<H, D> {
    /// Create a new crawler builder over the given host and DHT.
    ///
    /// # Arguments
    ///
    /// * `host` - Connects to discovered peers.
    /// * `dht` - Answers closest-peer, peer, and neighbour lookups.
    ///
    /// # Returns
    ///
    /// A new `CrawlerBuilder` instance with default settings.
    pub fn new(host: H, dht: D) -> Self {
        CrawlerBuilder {
            host,
            dht,
            dialers: DEFAULT_DIALERS,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            round_interval: DEFAULT_ROUND_INTERVAL,
            anchor_error_policy: AnchorErrorPolicy::default(),
            messages: None,
        }
    }

    /// Set the number of dialer tasks.
    ///
    /// The dial queue holds as many peers as there are dialers, so at most
    /// twice this many peers are queued or being dialled at once. Once the
    /// queue is full, discovery waits for the dialers.
    ///
    /// # Arguments
    ///
    /// * `dialers` - Number of concurrent connect attempts (defaults to 16).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_dialers(mut self, dialers: usize) -> Self {
        self.dialers = dialers;
        self
    }

    /// Set the deadline for each connect attempt (defaults to 60 seconds).
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the deadline for DHT queries.
    ///
    /// This timeout applies to the following.
    ///
    /// * Resolving a peer's addresses.
    /// * Listing a peer's neighbours, including reading the whole list.
    /// * Starting a closest-peers lookup, and waiting for each of its results.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait (defaults to 60 seconds).
    ///
    /// # Returns
    ///
    /// Self for method chaining.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the pause between discovery rounds (defaults to 60 seconds).
    pub fn with_round_interval(mut self, interval: Duration) -> Self {
        self.round_interval = interval;
        self
    }

    /// Choose what happens when the DHT rejects an anchor query.
    ///
    /// Defaults to [`AnchorErrorPolicy::SkipRound`].
    pub fn with_anchor_error_policy(mut self, policy: AnchorErrorPolicy) -> Self {
        self.anchor_error_policy = policy;
        self
    }

    /// Report every dial outcome on `sender`.
    ///
    /// Delivery is best effort: if the channel is full or closed the message
    /// is dropped rather than holding up a dialer.
    pub fn with_message_sender(mut self, sender: mpsc::Sender<CrawlerMessage>) -> Self {
        self.messages = Some(sender);
        self
    }

    /// Build the crawler with the configured options.
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - A configured `Crawler` instance.
    /// * `Err(CrawlerBuilderError)` - If an option is out of range.
    pub fn build(self) -> Result<Crawler<H, D>, CrawlerBuilderError> {
        if self.dialers == 0 {
            return Err(CrawlerBuilderError::NoDialers);
        }
        if self.dial_timeout.is_zero() {
            return Err(CrawlerBuilderError::ZeroTimeout("dial timeout"));
        }
        if self.query_timeout.is_zero() {
            return Err(CrawlerBuilderError::ZeroTimeout("query timeout"));
        }

        Ok(Crawler::new(
            self.host,
            self.dht,
            CrawlerConfig {
                dialers: self.dialers,
                dial_timeout: self.dial_timeout,
                discovery: DiscoveryConfig {
                    query_timeout: self.query_timeout,
                    round_interval: self.round_interval,
                    anchor_error_policy: self.anchor_error_policy,
                },
                messages: self.messages,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kad_peers_overlay::MemoryOverlay;

    fn builder() -> CrawlerBuilder<MemoryOverlay, MemoryOverlay> {
        let overlay = MemoryOverlay::new();
        CrawlerBuilder::new(overlay.clone(), overlay)
    }

    #[test]
    fn test_defaults() {
        let b = builder();
        assert_eq!(b.dialers, 16);
        assert_eq!(b.dial_timeout, Duration::from_secs(60));
        assert_eq!(b.query_timeout, Duration::from_secs(60));
        assert_eq!(b.round_interval, Duration::from_secs(60));
        assert_eq!(b.anchor_error_policy, AnchorErrorPolicy::SkipRound);
        assert!(b.build().is_ok());
    }

    #[test]
    fn test_rejects_invalid_settings() {
        assert_eq!(
            builder().with_dialers(0).build().err(),
            Some(CrawlerBuilderError::NoDialers)
        );
        assert_eq!(
            builder().with_dial_timeout(Duration::ZERO).build().err(),
            Some(CrawlerBuilderError::ZeroTimeout("dial timeout"))
        );
        assert_eq!(
            builder().with_query_timeout(Duration::ZERO).build().err(),
            Some(CrawlerBuilderError::ZeroTimeout("query timeout"))
        );
        // Back-to-back rounds are allowed.
        assert!(builder().with_round_interval(Duration::ZERO).build().is_ok());
    }
}
