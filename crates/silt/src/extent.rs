// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Extent reservation bookkeeping.
//!
//! The surrounding storage engine hands out extents (fixed contiguous file
//! regions) to its subsystems. The metablock manager reserves its extents
//! here at startup so the allocator never hands them to anyone else.

use std::collections::HashSet;
use thiserror::Error;

/// Errors from extent reservation.
#[derive(Debug, Error)]
pub enum ExtentError {
    #[error("extent {id} is already reserved")]
    AlreadyReserved { id: u64 },
}

/// Tracks which extents of the database file are off-limits to the
/// general-purpose allocator.
#[derive(Debug)]
pub struct ExtentManager {
    extent_size: u64,
    reserved: HashSet<u64>,
}

impl ExtentManager {
    pub fn new(extent_size: u64) -> Self {
        Self {
            extent_size,
            reserved: HashSet::new(),
        }
    }

    pub fn extent_size(&self) -> u64 {
        self.extent_size
    }

    /// Mark extent `id` as non-allocatable. Reserving the same extent twice
    /// is an error: it would mean two subsystems claim the same file region.
    pub fn reserve_extent(&mut self, id: u64) -> Result<(), ExtentError> {
        if !self.reserved.insert(id) {
            return Err(ExtentError::AlreadyReserved { id });
        }
        log::debug!("[Extent] reserved extent {}", id);
        Ok(())
    }

    pub fn is_reserved(&self, id: u64) -> bool {
        self.reserved.contains(&id)
    }

    /// Return extent `id` to the allocatable set. Returns `false` if it was
    /// not reserved.
    pub fn release_extent(&mut self, id: u64) -> bool {
        self.reserved.remove(&id)
    }
}
