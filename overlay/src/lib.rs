//! Peer identity, addressing, and the host and DHT capabilities a Kademlia
//! overlay crawler consumes.

mod dht;
mod error;
mod host;
mod memory;
mod peer;

pub use dht::{stream_of, Dht, PeerIdStream, PeerInfoStream};
pub use error::{AddressError, DhtError, HostError, PeerIdError};
pub use host::{Host, TcpHost, DEFAULT_ADDRESS_TIMEOUT};
pub use memory::{MemoryOverlay, DEFAULT_CLOSEST_PEERS};
pub use peer::{Address, DnsProtocol, PeerId, PeerInfo, MAX_PEER_ID_LEN};
