//! Wire representation of a frozen change.
//!
//! A `ChangeDto` is a flattened, UUID-referencing snapshot of one frozen
//! change: target id, target type name, sorted parent ids, sorted field
//! changes. Its id must equal the hash recomputed from its own content;
//! a mismatch marks the record as corrupt and it must be rejected.
//!
//! The transport envelope is length-prefixed bincode behind a magic/version
//! header, with an optional zstd-compressed variant.

use crate::change::{identity_bytes, Change};
use crate::error::{Result as CoreResult, VersionError};
use crate::field::FieldChange;
use crate::value::{ChangeId, ObjectId};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Magic bytes for the vergraph wire format.
pub const WIRE_MAGIC: &[u8; 4] = b"VDAG";

/// Wire format version constant.
pub const WIRE_VERSION: u32 = 1;

/// Maximum single record size (16 MB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Transfer snapshot of one frozen change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDto {
    /// Content id of the change (self-verifying, see `verify`)
    pub id: ChangeId,
    /// Global id of the target object / history
    pub target: ObjectId,
    /// Target type name, used to bootstrap unknown replicas
    pub target_type: String,
    /// Parent change ids, sorted
    pub parents: Vec<ChangeId>,
    /// Field changes, sorted by field name
    pub fields: Vec<(String, FieldChange)>,
}

impl ChangeDto {
    /// Snapshot a frozen change for transfer
    pub fn from_change(change: &Change, target_type: &str) -> Self {
        let mut parents: Vec<ChangeId> = change.parents().collect();
        parents.sort();
        let fields: Vec<(String, FieldChange)> = change
            .fields()
            .iter()
            .map(|(name, fc)| (name.clone(), fc.clone()))
            .collect();
        Self {
            id: change.id(),
            target: change.target(),
            target_type: target_type.to_string(),
            parents,
            fields,
        }
    }

    /// Recompute the content id from this DTO's own fields
    pub fn calc_id(&self) -> ChangeId {
        let mut refs: Vec<(&String, &FieldChange)> =
            self.fields.iter().map(|(name, fc)| (name, fc)).collect();
        refs.sort_by_key(|(name, _)| *name);
        ChangeId::from_content(&identity_bytes(self.target, &self.parents, refs.into_iter()))
    }

    /// Check the declared id against the recomputed hash. A mismatch is a
    /// fatal corruption of this record; it must never be accepted.
    pub fn verify(&self) -> CoreResult<()> {
        let computed = self.calc_id();
        if computed != self.id {
            return Err(VersionError::IdentityMismatch {
                declared: self.id,
                computed,
            });
        }
        Ok(())
    }

    /// Rebuild a change node from this snapshot. Parent roles follow the
    /// sorted order; the content id is order-independent, so the node
    /// hashes identically on every replica.
    pub(crate) fn to_change(&self) -> Change {
        let fields: BTreeMap<String, FieldChange> = self.fields.iter().cloned().collect();
        Change::new(
            self.id,
            self.target,
            self.parents.first().copied(),
            self.parents.get(1).copied(),
            fields,
        )
    }

    /// Serialize with the wire header, uncompressed.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| anyhow!("Failed to serialize change: {}", e))?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(anyhow!(
                "Record too large: {} bytes (max {})",
                payload.len(),
                MAX_RECORD_SIZE
            ));
        }
        let mut buf = Vec::with_capacity(13 + payload.len());
        buf.extend_from_slice(WIRE_MAGIC);
        buf.extend_from_slice(&WIRE_VERSION.to_le_bytes());
        buf.push(0x00); // flags: uncompressed
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Serialize with the wire header and zstd compression.
    pub fn encode_compressed(&self) -> Result<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| anyhow!("Failed to serialize change: {}", e))?;
        if payload.len() > MAX_RECORD_SIZE {
            return Err(anyhow!(
                "Record too large: {} bytes (max {})",
                payload.len(),
                MAX_RECORD_SIZE
            ));
        }
        let compressed = zstd::encode_all(&payload[..], 3)
            .map_err(|e| anyhow!("Failed to compress change: {}", e))?;
        let mut buf = Vec::with_capacity(13 + compressed.len());
        buf.extend_from_slice(WIRE_MAGIC);
        buf.extend_from_slice(&WIRE_VERSION.to_le_bytes());
        buf.push(0x01); // flags: compressed
        buf.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        buf.extend_from_slice(&compressed);
        Ok(buf)
    }

    /// Decode either envelope variant.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 13 {
            return Err(anyhow!("Record too short for header"));
        }
        if &data[0..4] != WIRE_MAGIC {
            return Err(anyhow!("Invalid wire magic"));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
        if version != WIRE_VERSION {
            return Err(anyhow!("Unsupported wire version: {}", version));
        }
        let flags = data[8];
        let len = u32::from_le_bytes(data[9..13].try_into().unwrap()) as usize;
        if len > MAX_RECORD_SIZE {
            return Err(anyhow!("Record too large: {} bytes", len));
        }
        if data.len() < 13 + len {
            return Err(anyhow!("Record truncated"));
        }
        let payload = if flags & 0x01 != 0 {
            // bound the decompressed size too, not just the compressed length
            let decoder = zstd::stream::read::Decoder::new(&data[13..13 + len])
                .map_err(|e| anyhow!("Failed to decompress: {}", e))?;
            let mut payload = Vec::new();
            decoder
                .take(MAX_RECORD_SIZE as u64 + 1)
                .read_to_end(&mut payload)
                .map_err(|e| anyhow!("Failed to decompress: {}", e))?;
            if payload.len() > MAX_RECORD_SIZE {
                return Err(anyhow!(
                    "Record too large after decompression: over {} bytes",
                    MAX_RECORD_SIZE
                ));
            }
            payload
        } else {
            data[13..13 + len].to_vec()
        };
        bincode::deserialize(&payload).map_err(|e| anyhow!("Failed to deserialize change: {}", e))
    }

    /// Human-readable snapshot, for debugging and log archives
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow!("JSON encoding failed: {}", e))
    }
}
