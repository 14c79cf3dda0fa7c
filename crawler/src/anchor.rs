//! Random anchor keys seeding each discovery round.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

/// Bytes of random material in an anchor key.
pub const ANCHOR_LEN: usize = 32;

/// A random DHT lookup key, unpadded base64 of [`ANCHOR_LEN`] random bytes.
///
/// A new one is drawn for every round and dropped when the round ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorKey(String);

impl AnchorKey {
    /// Draw a fresh anchor from the operating system's random source.
    pub fn generate() -> Result<Self, rand::Error> {
        Self::generate_from(&mut OsRng)
    }

    /// Draw a fresh anchor from the given random source.
    pub fn generate_from<R: RngCore>(rng: &mut R) -> Result<Self, rand::Error> {
        let mut bytes = [0u8; ANCHOR_LEN];
        rng.try_fill_bytes(&mut bytes)?;
        Ok(AnchorKey(STANDARD_NO_PAD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
