// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk metablock record.
//!
//! # Slot layout
//!
//! ```text
//! +--------------------------------------------------+
//! | crc (4, LE) | version (8, LE) | payload (fixed)  |
//! +--------------------------------------------------+
//! ```
//!
//! The CRC-32 covers the little-endian version bytes followed by the payload,
//! so a bit flip in either field invalidates the slot. A slot is valid iff
//! its stored CRC matches the recomputed one; among valid slots the largest
//! version is the current metablock. Unwritten (zeroed) and torn slots fail
//! the CRC check and are skipped by the recovery scan.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Number of extents in the metablock ring.
pub const MB_NEXTENTS: usize = 2;

/// Spacing between metablock extents, in extents: extent `k` of the ring
/// lives at extent position `k * MB_EXTENT_SEPARATION` in the file.
pub const MB_EXTENT_SEPARATION: usize = 4;

/// Bytes of record framing ahead of the payload: crc (4) + version (8).
pub const RECORD_HEADER_SIZE: usize = 12;

/// One metablock slot as read from or written to disk.
#[derive(Debug, Clone)]
pub struct CrcMetablock {
    /// CRC-32 over version bytes + payload.
    pub crc: u32,
    /// Monotone per-writer version counter.
    pub version: u64,
    /// Opaque caller payload.
    pub payload: Vec<u8>,
}

impl CrcMetablock {
    /// Build a record for `payload` at `version`, computing the CRC.
    pub fn new(version: u64, payload: Vec<u8>) -> Self {
        let crc = compute_crc(version, &payload);
        Self {
            crc,
            version,
            payload,
        }
    }

    /// True iff the stored CRC matches the record contents.
    pub fn is_valid(&self) -> bool {
        self.crc == compute_crc(self.version, &self.payload)
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.crc)?;
        w.write_u64::<LittleEndian>(self.version)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R, payload_size: usize) -> io::Result<Self> {
        let crc = r.read_u32::<LittleEndian>()?;
        let version = r.read_u64::<LittleEndian>()?;
        let mut payload = vec![0u8; payload_size];
        r.read_exact(&mut payload)?;
        Ok(Self {
            crc,
            version,
            payload,
        })
    }
}

/// CRC-32 (polynomial 0x04C11DB7, reflected, init/final-xor 0xFFFFFFFF) over
/// the version bytes followed by the payload.
pub fn compute_crc(version: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&version.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
