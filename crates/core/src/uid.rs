//! Object identity
//!
//! A stored object is identified by its OID (dense index into the OID table)
//! paired with a generation hash minted at insert time. The pair is exposed
//! to callers as a UID string: the hex form of the big-endian packed pair.
//!
//! ```text
//! +-----------------+-----------------+
//! | oid (i32 BE)    | genhash (i32 BE)|
//! +-----------------+-----------------+
//! ```

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Row index in the OID table
pub type Oid = u32;

/// Random tag paired with an OID to detect stale handles
pub type GenHash = i32;

/// The reserved OID meaning "no object"
pub const NULL_OID: Oid = 0;

/// Packed length of a UID in bytes
pub const UID_BYTES: usize = 8;

/// External reference to a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid {
    /// OID table row
    pub oid: Oid,
    /// Generation hash recorded for that row
    pub genhash: GenHash,
}

impl Uid {
    /// The null reference `(0, 0)`
    pub const NULL: Uid = Uid {
        oid: NULL_OID,
        genhash: 0,
    };

    /// Create a UID from its parts
    pub fn new(oid: Oid, genhash: GenHash) -> Self {
        Uid { oid, genhash }
    }

    /// Whether this is the null reference
    pub fn is_null(&self) -> bool {
        self.oid == NULL_OID
    }

    /// Pack as two big-endian signed 32-bit integers
    pub fn to_bytes(&self) -> [u8; UID_BYTES] {
        let mut buf = [0u8; UID_BYTES];
        buf[..4].copy_from_slice(&(self.oid as i32).to_be_bytes());
        buf[4..].copy_from_slice(&self.genhash.to_be_bytes());
        buf
    }

    /// Unpack from the big-endian pair
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != UID_BYTES {
            return Err(Error::InvalidUid(format!(
                "expected {} bytes, got {}",
                UID_BYTES,
                bytes.len()
            )));
        }
        let oid = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let genhash = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if oid < 0 {
            return Err(Error::InvalidUid(format!("negative oid {}", oid)));
        }
        Ok(Uid {
            oid: oid as Oid,
            genhash,
        })
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl FromStr for Uid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidUid(format!("{}: {}", s, e)))?;
        Uid::from_bytes(&bytes)
    }
}

/// Mint a fresh, non-zero generation hash.
pub fn mint_genhash() -> GenHash {
    loop {
        let candidate: GenHash = rand::random();
        if candidate != 0 {
            return candidate;
        }
    }
}
