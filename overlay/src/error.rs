//! Error types for overlay identity, addressing, and capabilities.

use crate::peer::{Address, PeerId};
use std::error::Error;
use std::fmt;
use std::io;

/// Errors building a [`PeerId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdError {
    /// No identifier bytes.
    Empty,
    /// More bytes than any identifier encoding uses.
    TooLong(usize),
    /// Text form is not valid base58.
    InvalidBase58,
}

impl fmt::Display for PeerIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdError::Empty => write!(f, "Peer identifier is empty"),
            PeerIdError::TooLong(len) => write!(f, "Peer identifier too long: {len} bytes"),
            PeerIdError::InvalidBase58 => write!(f, "Peer identifier is not valid base58"),
        }
    }
}

impl Error for PeerIdError {}

/// Errors parsing an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not a multiaddr: missing leading slash or empty components.
    Malformed(String),
    /// IP component doesn't parse, or doesn't match its protocol.
    InvalidIp(String),
    /// Port component is not a valid u16.
    InvalidPort(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Malformed(s) => write!(f, "Malformed multiaddr: {s}"),
            AddressError::InvalidIp(s) => write!(f, "Invalid IP in multiaddr: {s}"),
            AddressError::InvalidPort(s) => write!(f, "Invalid port in multiaddr: {s}"),
        }
    }
}

impl Error for AddressError {}

/// Errors from a [`Host`](crate::Host) connect attempt.
#[derive(Debug)]
pub enum HostError {
    /// An I/O error occurred on the last address tried.
    Io(io::Error),
    /// The peer advertised no addresses at all.
    NoAddresses,
    /// The peer could not be reached on any address.
    Unreachable(String),
    /// None of the peer's addresses use a transport this host speaks.
    UnsupportedAddress(Address),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::Io(err) => write!(f, "Connection error: {err}"),
            HostError::NoAddresses => write!(f, "Peer has no known addresses"),
            HostError::Unreachable(reason) => write!(f, "Peer unreachable: {reason}"),
            HostError::UnsupportedAddress(addr) => write!(f, "Unsupported address: {addr}"),
        }
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HostError::Io(err) => Some(err),
            HostError::NoAddresses => None,
            HostError::Unreachable(_) => None,
            HostError::UnsupportedAddress(_) => None,
        }
    }
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        HostError::Io(err)
    }
}

/// Errors from a [`Dht`](crate::Dht) query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtError {
    /// The DHT has no record of the peer.
    NotFound(PeerId),
    /// The query was rejected or failed inside the DHT engine.
    QueryFailed(String),
}

impl fmt::Display for DhtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhtError::NotFound(peer) => write!(f, "Peer not found: {peer}"),
            DhtError::QueryFailed(reason) => write!(f, "DHT query failed: {reason}"),
        }
    }
}

impl Error for DhtError {}
