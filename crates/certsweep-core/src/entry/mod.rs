//! Decoding of CT `get-entries` items.
//!
//! A CT log returns entries as two base64 blobs: `leaf_input` holds the
//! `MerkleTreeLeaf` structure, `extra_data` holds the chain material.
//! The leaf layout (RFC 6962 §3.4) is:
//!
//! ```text
//! offset 0   version        (1 byte)
//! offset 1   leaf_type      (1 byte)
//! offset 2   timestamp_ms   (8 bytes, big-endian)
//! offset 10  entry_type     (2 bytes, big-endian; 0 = x509, 1 = precert)
//! offset 12  ...            entry body
//! ```
//!
//! For an `x509_entry` the body starts with a 3-byte certificate length
//! followed by the DER certificate. For a `precert_entry` the leaf body
//! carries only the issuer key hash and TBS; the full pre-certificate
//! DER is recovered from the 3-byte length prefix at the head of
//! `extra_data` instead.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;


/// Minimum number of leaf bytes needed to read the entry type.
const LEAF_HEADER_LEN: usize = 12;

/// One undecoded entry as returned by `get-entries`.
///
/// This is the verbatim wire shape; its JSON serialization is also what
/// workers upload to the Manager as the `ct_entry` blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Base64 `MerkleTreeLeaf`.
    pub leaf_input: String,

    /// Base64 chain material; required for pre-certificate entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
}

/// Which leaf type an entry carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// `x509_entry`: a final certificate.
    X509,
    /// `precert_entry`: a pre-certificate.
    Precert,
}

/// The decoded pieces of a Merkle tree leaf the fleet cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLeaf {
    /// Log timestamp, millisecond precision on the wire.
    pub timestamp: DateTime<Utc>,

    /// Leaf type.
    pub kind: LeafKind,

    /// DER bytes of the certificate or pre-certificate.
    pub certificate_der: Vec<u8>,
}

/// Errors produced while decoding a raw entry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EntryError {
    /// A base64 field failed to decode.
    #[error("invalid base64 in {field}: {source}")]
    Base64 {
        /// Which field was malformed.
        field: &'static str,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// The leaf is shorter than its fixed header.
    #[error("leaf truncated: {actual} bytes, need at least {expected}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },

    /// The entry type is neither x509 nor precert.
    #[error("unknown leaf entry type {0}")]
    UnknownLeafType(u16),

    /// A pre-certificate entry arrived without `extra_data`.
    #[error("precert entry is missing extra_data")]
    MissingExtraData,

    /// The leaf timestamp does not map to a valid instant.
    #[error("leaf timestamp {0} ms is out of range")]
    InvalidTimestamp(u64),
}

impl RawEntry {
    /// Decodes the Merkle leaf and extracts the certificate DER.
    ///
    /// # Errors
    ///
    /// Returns an [`EntryError`] when the base64 is malformed, the leaf
    /// is truncated, the entry type is unknown, or a precert entry has
    /// no `extra_data`.
    pub fn decode(&self) -> Result<DecodedLeaf, EntryError> {
        let leaf = STANDARD
            .decode(&self.leaf_input)
            .map_err(|source| EntryError::Base64 {
                field: "leaf_input",
                source,
            })?;

        if leaf.len() < LEAF_HEADER_LEN {
            return Err(EntryError::Truncated {
                expected: LEAF_HEADER_LEN,
                actual: leaf.len(),
            });
        }

        let timestamp_ms = u64::from_be_bytes(leaf[2..10].try_into().unwrap_or_default());
        let entry_type = u16::from_be_bytes([leaf[10], leaf[11]]);
        let timestamp = millis_to_utc(timestamp_ms)
            .ok_or(EntryError::InvalidTimestamp(timestamp_ms))?;

        match entry_type {
            0 => {
                let certificate_der = read_length_prefixed(&leaf, LEAF_HEADER_LEN)?;
                Ok(DecodedLeaf {
                    timestamp,
                    kind: LeafKind::X509,
                    certificate_der,
                })
            }
            1 => {
                let extra = self
                    .extra_data
                    .as_deref()
                    .ok_or(EntryError::MissingExtraData)?;
                let extra = STANDARD
                    .decode(extra)
                    .map_err(|source| EntryError::Base64 {
                        field: "extra_data",
                        source,
                    })?;
                let certificate_der = read_length_prefixed(&extra, 0)?;
                Ok(DecodedLeaf {
                    timestamp,
                    kind: LeafKind::Precert,
                    certificate_der,
                })
            }
            other => Err(EntryError::UnknownLeafType(other)),
        }
    }
}

/// Reads a 24-bit big-endian length at `offset` and returns the bytes
/// that follow it.
fn read_length_prefixed(buf: &[u8], offset: usize) -> Result<Vec<u8>, EntryError> {
    let header_end = offset + 3;
    if buf.len() < header_end {
        return Err(EntryError::Truncated {
            expected: header_end,
            actual: buf.len(),
        });
    }
    let len = usize::from(buf[offset]) << 16 | usize::from(buf[offset + 1]) << 8
        | usize::from(buf[offset + 2]);
    let end = header_end + len;
    if buf.len() < end {
        return Err(EntryError::Truncated {
            expected: end,
            actual: buf.len(),
        });
    }
    Ok(buf[header_end..end].to_vec())
}

fn millis_to_utc(ms: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(ms / 1000).ok()?;
    let nanos = u32::try_from(ms % 1000).ok()? * 1_000_000;
    DateTime::from_timestamp(secs, nanos)
}
