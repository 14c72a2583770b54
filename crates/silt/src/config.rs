// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration for the runtime and the metablock region.
//!
//! Both structs are plain data with a `validate()` entry point; construction
//! sites call it once before handing the config to the pool or the manager.

use crate::metablock::record::{self, MB_NEXTENTS, MB_EXTENT_SEPARATION};
use thiserror::Error;

/// Default number of data workers when the caller does not care.
pub const DEFAULT_WORKERS: usize = 2;

/// Default number of helper threads in the blocking-operation pool.
pub const DEFAULT_BLOCKING_THREADS: usize = 4;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be >= 1 (got {0})")]
    NoWorkers(usize),

    #[error("blocking pool must have >= 1 thread (got {0})")]
    NoBlockingThreads(usize),

    #[error("metablock payload size must be > 0")]
    EmptyPayload,

    #[error("extent size {extent_size} holds no slot of {record_size} bytes")]
    ExtentTooSmall { extent_size: u64, record_size: u64 },
}

/// Thread-pool configuration.
///
/// The pool always runs `workers + 1` OS threads: `workers` data workers plus
/// one utility worker hosting the blocking-operation pool.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of data workers (>= 1). The utility worker comes on top.
    pub workers: usize,
    /// Pin worker `i` to CPU `i mod cpu_count` (Linux only).
    pub affinity: bool,
    /// Helper threads in the blocking-operation pool.
    pub blocking_threads: usize,
    /// Install the process-wide SIGINT/SIGTERM and SIGSEGV handlers.
    ///
    /// Handlers are process-global, so embedders (and tests) that run more
    /// than one pool per process must leave this off for all but one.
    pub install_signal_handlers: bool,
}

impl RuntimeConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers(self.workers));
        }
        if self.blocking_threads == 0 {
            return Err(ConfigError::NoBlockingThreads(self.blocking_threads));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            affinity: false,
            blocking_threads: DEFAULT_BLOCKING_THREADS,
            install_signal_handlers: true,
        }
    }
}

/// Geometry of the metablock region inside the database file.
#[derive(Debug, Clone)]
pub struct MetablockConfig {
    /// Size of one extent in bytes.
    pub extent_size: u64,
    /// Size of the opaque static header preceding the metablock region.
    pub static_header_size: u64,
    /// Size of the caller-owned metablock payload.
    pub payload_size: usize,
}

impl MetablockConfig {
    /// On-disk size of one `CrcMetablock` slot.
    pub fn record_size(&self) -> usize {
        record::RECORD_HEADER_SIZE + self.payload_size
    }

    /// Slots per extent. At least one after `validate()`.
    pub fn slots_per_extent(&self) -> usize {
        (self.extent_size / self.record_size() as u64) as usize
    }

    /// Total slots across all metablock extents.
    pub fn total_slots(&self) -> usize {
        MB_NEXTENTS * self.slots_per_extent()
    }

    /// Byte offset one past the furthest slot, counted from the start of the
    /// file. Used to pre-size the file before the recovery scan.
    pub fn region_end(&self) -> u64 {
        let last_extent_start = self.static_header_size
            + ((MB_NEXTENTS - 1) * MB_EXTENT_SEPARATION) as u64 * self.extent_size;
        last_extent_start + self.slots_per_extent() as u64 * self.record_size() as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_size == 0 {
            return Err(ConfigError::EmptyPayload);
        }
        if self.slots_per_extent() == 0 {
            return Err(ConfigError::ExtentTooSmall {
                extent_size: self.extent_size,
                record_size: self.record_size() as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_rejects_zero_workers() {
        let cfg = RuntimeConfig {
            workers: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoWorkers(0))));
    }

    #[test]
    fn runtime_config_default_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn metablock_geometry() {
        let cfg = MetablockConfig {
            extent_size: 4 * (record::RECORD_HEADER_SIZE as u64 + 16),
            static_header_size: 512,
            payload_size: 16,
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.record_size(), record::RECORD_HEADER_SIZE + 16);
        assert_eq!(cfg.slots_per_extent(), 4);
        assert_eq!(cfg.total_slots(), 8);

        // Last extent starts MB_EXTENT_SEPARATION extents past the first.
        let expected = 512
            + (MB_EXTENT_SEPARATION as u64) * cfg.extent_size
            + 4 * cfg.record_size() as u64;
        assert_eq!(cfg.region_end(), expected);
    }

    #[test]
    fn metablock_config_rejects_tiny_extent() {
        let cfg = MetablockConfig {
            extent_size: 8,
            static_header_size: 0,
            payload_size: 64,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ExtentTooSmall { .. })
        ));
    }
}
