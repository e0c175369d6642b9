//! Room Identity
//!
//! A room is a protocol version plus a 32-byte symmetric key. The key is the
//! shared secret for payload encryption; the topic id is derived from it so
//! that knowing the token is both necessary and sufficient to join.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Current room protocol version.
pub const ROOM_VERSION: u8 = 1;

/// Symmetric key length in bytes.
pub const ROOM_KEY_LEN: usize = 32;

/// Pub/sub topic identifying a room.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Borrow as string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room token errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// Token was empty.
    #[error("empty room id")]
    Empty,
    /// Token was not valid hex.
    #[error("room token is not valid hex")]
    InvalidEncoding,
    /// Token had the wrong length.
    #[error("room token has invalid length {0}")]
    InvalidLength(usize),
    /// Token was produced by an incompatible protocol version.
    #[error("unsupported room version {0}")]
    UnsupportedVersion(u8),
}

/// A room: protocol version and symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct Room {
    version: u8,
    key: [u8; ROOM_KEY_LEN],
}

impl Room {
    /// Create a room from a known key.
    pub fn new(key: [u8; ROOM_KEY_LEN]) -> Self {
        Self { version: ROOM_VERSION, key }
    }

    /// Create a room with a freshly generated random key.
    pub fn generate() -> Self {
        let mut key = [0u8; ROOM_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key)
    }

    /// Protocol version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Symmetric key for payload encryption.
    pub fn key(&self) -> &[u8; ROOM_KEY_LEN] {
        &self.key
    }

    /// Topic id, `hex(sha256("POKER_ROOM_V1" || version || key))[..32]`.
    pub fn id(&self) -> RoomId {
        let mut hasher = Sha256::new();
        hasher.update(b"POKER_ROOM_V1");
        hasher.update([self.version]);
        hasher.update(self.key);
        let digest = hasher.finalize();
        RoomId(hex::encode(&digest[..16]))
    }

    /// Shareable token: hex of the version byte followed by the key.
    pub fn to_token(&self) -> String {
        let mut bytes = Vec::with_capacity(1 + ROOM_KEY_LEN);
        bytes.push(self.version);
        bytes.extend_from_slice(&self.key);
        hex::encode(bytes)
    }

    /// Parse a token produced by [`Room::to_token`].
    pub fn from_token(token: &str) -> Result<Self, RoomError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RoomError::Empty);
        }
        let bytes = hex::decode(token).map_err(|_| RoomError::InvalidEncoding)?;
        if bytes.len() != 1 + ROOM_KEY_LEN {
            return Err(RoomError::InvalidLength(bytes.len()));
        }
        if bytes[0] != ROOM_VERSION {
            return Err(RoomError::UnsupportedVersion(bytes[0]));
        }
        let mut key = [0u8; ROOM_KEY_LEN];
        key.copy_from_slice(&bytes[1..]);
        Ok(Self { version: bytes[0], key })
    }
}

// Keep the key out of logs.
impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("version", &self.version)
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip_preserves_identity() {
        let room = Room::generate();
        let parsed = Room::from_token(&room.to_token()).unwrap();
        assert_eq!(parsed, room);
        assert_eq!(parsed.id(), room.id());
    }

    #[test]
    fn test_distinct_keys_give_distinct_topics() {
        let a = Room::new([1; ROOM_KEY_LEN]);
        let b = Room::new([2; ROOM_KEY_LEN]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().as_str().len(), 32);
    }

    #[test]
    fn test_invalid_tokens() {
        assert_eq!(Room::from_token(""), Err(RoomError::Empty));
        assert_eq!(Room::from_token("   "), Err(RoomError::Empty));
        assert_eq!(Room::from_token("zz"), Err(RoomError::InvalidEncoding));
        assert_eq!(Room::from_token("0102"), Err(RoomError::InvalidLength(2)));

        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&[0; ROOM_KEY_LEN]);
        assert_eq!(
            Room::from_token(&hex::encode(bytes)),
            Err(RoomError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let room = Room::new([0xAB; ROOM_KEY_LEN]);
        let debug = format!("{:?}", room);
        assert!(!debug.contains("abab"));
        assert!(debug.contains(room.id().as_str()));
    }
}
