//! Tag-length-value primitives for the key bag blob.
//!
//! A key bag is a flat sequence of records:
//!
//! ```text
//! [4 bytes: ASCII tag][UInt32 big endian: length][length bytes: value]
//! ```
//!
//! There is no header and no terminator; records are read until the buffer is
//! exhausted.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// A single tag-length-value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
    pub tag: [u8; 4],
    pub value: Vec<u8>,
}

impl TlvRecord {
    pub fn tag_str(&self) -> &str {
        std::str::from_utf8(&self.tag).unwrap_or("????")
    }
}

/// TlvReader provides methods for reading key bag records
pub trait TlvReader: Read {
    /// Read the next record. `remaining` is the number of bytes left in the blob
    /// and bounds the declared length.
    fn read_tlv(&mut self, remaining: usize) -> Result<TlvRecord> {
        if remaining < 8 {
            return Err(Error::InvalidFormat(format!(
                "truncated key bag record header: {remaining} bytes left"
            )));
        }
        let mut tag = [0u8; 4];
        self.read_exact(&mut tag)?;
        let length = self.read_u32::<BigEndian>()? as usize;
        if length > remaining - 8 {
            return Err(Error::InvalidFormat(format!(
                "key bag record {} declares {} bytes but only {} remain",
                String::from_utf8_lossy(&tag),
                length,
                remaining - 8
            )));
        }
        let mut value = vec![0u8; length];
        self.read_exact(&mut value)?;
        Ok(TlvRecord { tag, value })
    }
}

impl<R: Read> TlvReader for R {}

/// Split a blob into its records, failing if any length overruns the buffer.
pub fn read_records(data: &[u8]) -> Result<Vec<TlvRecord>> {
    let mut cursor = Cursor::new(data);
    let mut records = Vec::new();
    while (cursor.position() as usize) < data.len() {
        let remaining = data.len() - cursor.position() as usize;
        records.push(cursor.read_tlv(remaining)?);
    }
    Ok(records)
}

/// Decode a 4-byte big endian integer value.
pub fn be_u32(value: &[u8]) -> Result<u32> {
    if value.len() != 4 {
        return Err(Error::InvalidFormat(format!(
            "expected a 4 byte integer but got {} bytes",
            value.len()
        )));
    }
    Ok(Cursor::new(value).read_u32::<BigEndian>()?)
}

/// Encode one record. Used to build blobs for tests and fixtures.
pub fn encode(tag: &[u8; 4], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + value.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
    out
}
