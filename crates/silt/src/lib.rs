// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # silt: durability and scheduling core of a log-structured storage engine
//!
//! Two layers compose:
//!
//! - the **thread-per-core runtime**: a shared-nothing pool of event-loop
//!   workers with cross-thread message passing, per-worker timers, a
//!   blocking-operation delegation pool, and barrier-based lifecycle;
//! - the **metablock ring**: the on-disk record of the engine's "head of
//!   the world" pointer, written crash-atomically into a rotating set of
//!   CRC-protected slots and recovered by scanning for the newest valid
//!   record.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use silt::config::RuntimeConfig;
//! use silt::runtime::{message, ThreadPool};
//!
//! let pool = ThreadPool::start(RuntimeConfig::new(2))?;
//! let handle = pool.handle();
//!
//! handle.post(0, message(move |worker| {
//!     log::info!("hello from worker {}", worker.id());
//!     worker.handle().trigger_shutdown();
//! }));
//!
//! pool.run_until_shutdown();
//! # Ok::<(), silt::runtime::RuntimeError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                        Metablock layer                           |
//! |   MetablockManager -> DirectFile -> BlockingPool completions     |
//! +------------------------------------------------------------------+
//! |                         Runtime layer                            |
//! |   ThreadPool -> Worker event loops -> MessageHub / timers        |
//! +------------------------------------------------------------------+
//! ```

/// Runtime and metablock-region configuration.
pub mod config;
/// Extent reservation bookkeeping for the surrounding storage engine.
pub mod extent;
/// Asynchronous block I/O over the blocking-operation pool.
pub mod io;
/// The metablock ring protocol and its on-disk record.
pub mod metablock;
/// Shared-nothing thread-per-core runtime.
pub mod runtime;

pub use config::{MetablockConfig, RuntimeConfig};
pub use extent::ExtentManager;
pub use io::DirectFile;
pub use metablock::MetablockManager;
pub use runtime::{message, Message, PoolHandle, ThreadPool, Worker};
