//! 128-bit document identifiers.
//!
//! Auto-assigned identifiers are time-prefixed for locality in the ordered-key
//! store: a 48-bit millisecond UTC timestamp, a 16-bit process tag, and a
//! 64-bit atomic per-millisecond counter. Inter-process monotonicity is not
//! promised; sub-second monotonicity within one process is, via the counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 128-bit document identifier, stored and compared as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(#[serde(with = "id_bytes")] pub [u8; 16]);

mod id_bytes {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(d)?;
        parse_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid 16-byte hex identifier"))
    }

    fn hex(bytes: &[u8; 16]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn parse_hex(s: &str) -> Option<[u8; 16]> {
        if s.len() != 32 {
            return None;
        }
        let mut out = [0u8; 16];
        for i in 0..16 {
            out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(out)
    }
}

lazy_static! {
    static ref PROCESS_TAG: u16 = (std::process::id() as u16) ^ ((std::process::id() >> 16) as u16);
}

/// Per-millisecond atomic counter, reset implicitly by folding the millisecond
/// into the high bits so wraparound within a millisecond still sorts after.
static COUNTER: AtomicU64 = AtomicU64::new(0);

impl Identifier {
    pub const LEN: usize = 16;

    /// Generate a new, monotonically time-prefixed identifier.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tag = *PROCESS_TAG;

        let mut bytes = [0u8; 16];
        // 6 bytes: millisecond timestamp (big-endian, truncated to 48 bits).
        bytes[0..6].copy_from_slice(&millis.to_be_bytes()[2..8]);
        // 2 bytes: process tag.
        bytes[6..8].copy_from_slice(&tag.to_be_bytes());
        // 8 bytes: monotonic counter.
        bytes[8..16].copy_from_slice(&counter.to_be_bytes());
        Identifier(bytes)
    }

    /// Generate an identifier seeded by a random UUID, bypassing the
    /// time-prefix scheme. Used by tests that need collision-resistant ids
    /// without caring about ordering.
    pub fn random() -> Self {
        Identifier(*Uuid::new_v4().as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Identifier(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let mut out = [0u8; 16];
        for i in 0..16 {
            out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Identifier(out))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_hex())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
