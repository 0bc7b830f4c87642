//! Prefixed opaque identifiers.
//!
//! Every entity carries a type-tagged id: a short prefix ("wlt" for
//! wallets, "wkey" for key shares, "acct" for accounts, "crsh" for crash
//! records) plus 16 random bytes. The canonical string form is
//! `<prefix>-<base64url(bytes)>` and is stable: it is what gets persisted,
//! compared, and used in backup filenames and relay addresses.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WalletError;
use crate::util;

/// A type-tagged identifier: prefix plus 16 random bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    prefix: String,
    bytes: [u8; 16],
}

impl Xid {
    /// Mint a fresh id under the given prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            bytes: *uuid::Uuid::new_v4().as_bytes(),
        }
    }

    /// Rebuild an id from its parts (used by restore paths).
    pub fn from_parts(prefix: &str, bytes: [u8; 16]) -> Self {
        Self {
            prefix: prefix.to_string(),
            bytes,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The 16 raw id bytes. These double as the party key in the MPC layer
    /// and as the salt binding credentials to a specific share.
    pub fn bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Fail unless the id carries the expected prefix.
    pub fn expect_prefix(&self, prefix: &str) -> Result<(), WalletError> {
        if self.prefix == prefix {
            Ok(())
        } else {
            Err(WalletError::InvalidConfiguration(format!(
                "bad id prefix: expected {}, got {}",
                prefix, self.prefix
            )))
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, util::b64(&self.bytes))
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({self})")
    }
}

impl FromStr for Xid {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s
            .split_once('-')
            .ok_or_else(|| WalletError::InvalidConfiguration(format!("malformed id: {s}")))?;
        let raw = util::b64_decode(rest)
            .map_err(|_| WalletError::InvalidConfiguration(format!("malformed id: {s}")))?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| WalletError::InvalidConfiguration(format!("malformed id: {s}")))?;
        Ok(Self {
            prefix: prefix.to_string(),
            bytes,
        })
    }
}

impl Serialize for Xid {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Xid {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(de::Error::custom)
    }
}
