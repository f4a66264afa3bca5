//! Identity and value primitives.
//!
//! `ObjectId` is the stable identity of a versioned object (and its
//! history). `ChangeId` is the content-derived identity of a frozen change.
//! `Value` is the opaque scalar the engine moves between changes and live
//! objects; it is totally ordered so set items and canonical encodings are
//! deterministic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Namespace mixed into every content hash so vergraph ids never collide
/// with other name-based UUID schemes.
const CHANGE_NAMESPACE: Uuid = Uuid::from_u128(0x8f3c_b2d4_5a61_4e7f_9b02_c6d8_11aa_34e5);

/// Stable global identity of a versioned object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Mint a fresh random identity for a new local object
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// First 8 hex chars, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-derived identity of a frozen change.
///
/// Computed as a name-based (v5-style) UUID over the change's canonical
/// byte sequence, using SHA-256 truncated to 128 bits with the version and
/// variant bits set. Identical content always yields an identical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(Uuid);

impl ChangeId {
    /// All-zero sentinel used when hashing an absent parent slot
    pub const NIL: ChangeId = ChangeId(Uuid::nil());

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Compute a ChangeId from canonical content bytes
    pub fn from_content(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(CHANGE_NAMESPACE.as_bytes());
        hasher.update(data);
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        // version 8 (custom), RFC 4122 variant
        bytes[6] = (bytes[6] & 0x0f) | 0x80;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// First 8 hex chars, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl std::fmt::Display for ChangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque field value.
///
/// `Null` represents an unset field. `Set` is the materialized form of a
/// set-valued field; deltas against it are expressed as `SetChange`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Set(BTreeSet<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Append the canonical byte encoding: a discriminant tag followed by
    /// the variant payload, length-prefixed where variable-sized.
    pub fn write_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(0x00),
            Value::Bool(b) => {
                buf.push(0x01);
                buf.push(*b as u8);
            }
            Value::Int(i) => {
                buf.push(0x02);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(0x03);
                write_len_prefixed(buf, s.as_bytes());
            }
            Value::Bytes(b) => {
                buf.push(0x04);
                write_len_prefixed(buf, b);
            }
            Value::Uuid(u) => {
                buf.push(0x05);
                buf.extend_from_slice(u.as_bytes());
            }
            Value::Set(items) => {
                buf.push(0x06);
                buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    item.write_canonical(buf);
                }
            }
        }
    }
}

/// Write a u32 little-endian length prefix followed by the bytes
pub(crate) fn write_len_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}
