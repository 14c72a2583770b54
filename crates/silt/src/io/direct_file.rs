// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Positional async file I/O.
//!
//! `DirectFile` turns synchronous positional reads and writes into
//! asynchronous operations: the call submits a job to the blocking pool and
//! returns; a helper thread performs the kernel call; the completion closure
//! is delivered as a message on the worker that submitted. Writes are
//! followed by a data sync, so a completed write is durable; the metablock
//! ring relies on that for its commit semantics.
//!
//! Buffers move into the operation and come back through the completion, so
//! a caller cannot touch a buffer while its I/O is in flight.

use crate::runtime::{message, BlockingPool, Worker};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Unbuffered positional file I/O with completions on the submitting worker.
#[derive(Clone)]
pub struct DirectFile {
    file: Arc<File>,
    pool: Arc<BlockingPool>,
}

impl DirectFile {
    /// Open (or create) the database file.
    pub fn open<P: AsRef<Path>>(path: P, pool: Arc<BlockingPool>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            pool,
        })
    }

    /// Wrap an already-open file.
    pub fn from_file(file: File, pool: Arc<BlockingPool>) -> Self {
        Self {
            file: Arc::new(file),
            pool,
        }
    }

    /// Read exactly `len` bytes at `offset`; the completion receives the
    /// filled buffer or the error.
    pub fn read_async<F>(&self, offset: u64, len: usize, completion: F)
    where
        F: FnOnce(io::Result<Vec<u8>>) + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        self.pool.submit(move || {
            let mut buf = vec![0u8; len];
            let result = file.read_exact_at(&mut buf, offset).map(|()| buf);
            message(move |_worker: &mut Worker| completion(result))
        });
    }

    /// Write `buf` at `offset` and sync file data; the completion receives
    /// the outcome and the buffer back.
    pub fn write_async<F>(&self, offset: u64, buf: Vec<u8>, completion: F)
    where
        F: FnOnce(io::Result<()>, Vec<u8>) + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        self.pool.submit(move || {
            let result = file
                .write_all_at(&buf, offset)
                .and_then(|()| file.sync_data());
            message(move |_worker: &mut Worker| completion(result, buf))
        });
    }

    /// Grow the file to at least `len` bytes (zero-filled). Never shrinks.
    pub fn allocate_async<F>(&self, len: u64, completion: F)
    where
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        self.pool.submit(move || {
            let result = file.metadata().and_then(|meta| {
                if meta.len() < len {
                    file.set_len(len)
                } else {
                    Ok(())
                }
            });
            message(move |_worker: &mut Worker| completion(result))
        });
    }
}
