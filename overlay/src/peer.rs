//! Overlay peer identity and addressing.

use crate::error::{AddressError, PeerIdError};
use rand::RngCore;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Multihash code for SHA2-256, the prefix of most overlay peer identifiers.
const SHA2_256_CODE: u8 = 0x12;
/// Digest length of a SHA2-256 multihash.
const SHA2_256_LEN: u8 = 0x20;
/// Largest identifier accepted, generous enough for inline public keys.
pub const MAX_PEER_ID_LEN: usize = 128;

/// Opaque identifier of an overlay participant.
///
/// Only equality, hashing, and pretty-printing are meaningful. The printed form
/// is the base58 encoding of the raw identifier bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Wrap raw identifier bytes.
    ///
    /// # Returns
    ///
    /// * `Ok(PeerId)` - If the bytes are non-empty and not oversized.
    /// * `Err(PeerIdError)` - Otherwise.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PeerIdError> {
        if bytes.is_empty() {
            return Err(PeerIdError::Empty);
        }
        if bytes.len() > MAX_PEER_ID_LEN {
            return Err(PeerIdError::TooLong(bytes.len()));
        }
        Ok(PeerId(bytes))
    }

    /// Generate a random identifier shaped like a SHA2-256 multihash.
    pub fn random() -> Self {
        let mut bytes = vec![0u8; 2 + SHA2_256_LEN as usize];
        bytes[0] = SHA2_256_CODE;
        bytes[1] = SHA2_256_LEN;
        rand::thread_rng().fill_bytes(&mut bytes[2..]);
        PeerId(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base58 rendering used in logs.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| PeerIdError::InvalidBase58)?;
        PeerId::from_bytes(bytes)
    }
}

/// A transport address advertised by a peer, in multiaddr text form.
///
/// TCP over a literal IP or a DNS name is understood. Everything else is kept
/// verbatim so it can still be reported and counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `/ip4/<ip>/tcp/<port>` or `/ip6/<ip>/tcp/<port>`.
    Ip { ip: IpAddr, port: u16 },
    /// `/dns/<host>/tcp/<port>`, `/dns4/...`, or `/dns6/...`.
    Dns {
        protocol: DnsProtocol,
        host: String,
        port: u16,
    },
    /// Any other well-formed multiaddr, e.g. QUIC or relay circuits.
    Opaque(String),
}

/// Which address family a DNS multiaddr component resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsProtocol {
    /// `/dns`, either family.
    Any,
    /// `/dns4`.
    V4,
    /// `/dns6`.
    V6,
}

impl DnsProtocol {
    fn as_str(&self) -> &'static str {
        match self {
            DnsProtocol::Any => "dns",
            DnsProtocol::V4 => "dns4",
            DnsProtocol::V6 => "dns6",
        }
    }
}

impl Address {
    /// Create a TCP address from a socket address.
    pub fn tcp(socket_addr: SocketAddr) -> Self {
        Address::Ip {
            ip: socket_addr.ip(),
            port: socket_addr.port(),
        }
    }

    /// The socket address, if this is a TCP address over a literal IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Ip { ip, port } => Some(SocketAddr::new(*ip, *port)),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip {
                ip: IpAddr::V4(ip),
                port,
            } => write!(f, "/ip4/{ip}/tcp/{port}"),
            Address::Ip {
                ip: IpAddr::V6(ip),
                port,
            } => write!(f, "/ip6/{ip}/tcp/{port}"),
            Address::Dns {
                protocol,
                host,
                port,
            } => write!(f, "/{}/{host}/tcp/{port}", protocol.as_str()),
            Address::Opaque(raw) => f.write_str(raw),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(AddressError::Malformed(s.to_string()));
        }

        match parts.as_slice() {
            [proto @ ("ip4" | "ip6"), ip, "tcp", port] => {
                let ip: IpAddr = ip
                    .parse()
                    .map_err(|_| AddressError::InvalidIp(ip.to_string()))?;
                if ip.is_ipv4() != (*proto == "ip4") {
                    return Err(AddressError::InvalidIp(ip.to_string()));
                }
                let port = parse_port(port)?;
                Ok(Address::Ip { ip, port })
            }
            [proto @ ("dns" | "dns4" | "dns6"), host, "tcp", port] => Ok(Address::Dns {
                protocol: match *proto {
                    "dns4" => DnsProtocol::V4,
                    "dns6" => DnsProtocol::V6,
                    _ => DnsProtocol::Any,
                },
                host: host.to_string(),
                port: parse_port(port)?,
            }),
            _ => Ok(Address::Opaque(s.to_string())),
        }
    }
}

fn parse_port(port: &str) -> Result<u16, AddressError> {
    port.parse()
        .map_err(|_| AddressError::InvalidPort(port.to_string()))
}

/// A peer identifier together with its known transport addresses.
///
/// Produced by DHT lookups and consumed by dialers. Never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer's identifier.
    pub id: PeerId,
    /// Addresses in the order the DHT reported them.
    pub addresses: Vec<Address>,
}

impl PeerInfo {
    /// Create a new peer descriptor.
    pub fn new(id: PeerId, addresses: Vec<Address>) -> Self {
        PeerInfo { id, addresses }
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} addresses)", self.id, self.addresses.len())
    }
}
