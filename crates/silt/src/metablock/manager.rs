// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metablock manager: recovery scan and single-writer commits.
//!
//! The manager lives on one worker. `start` walks the ring to find the
//! newest valid record; `write_metablock` commits a new record one slot at a
//! time. There is a single in-flight I/O at any moment; extra write requests
//! queue in arrival order and drain FIFO on each completion.
//!
//! State machine:
//!
//! ```text
//! Unstarted -> Reading -> Ready <-> Writing -> ShutDown
//! ```
//!
//! A CRC mismatch during the scan is expected (unwritten or torn slots) and
//! simply skips the slot. I/O errors are fatal: the layers above assume the
//! storage device is consistent, and there is no retry here.

use crate::config::MetablockConfig;
use crate::extent::{ExtentError, ExtentManager};
use crate::io::DirectFile;
use crate::metablock::head::Head;
use crate::metablock::record::{CrcMetablock, MB_EXTENT_SEPARATION, MB_NEXTENTS};
use crate::runtime::current_worker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Invoked once when the recovery scan completes, with the newest payload or
/// `None` when no valid record exists anywhere in the ring.
pub type ReadCallback = Box<dyn FnOnce(Option<Vec<u8>>) + Send>;

/// Invoked once when a commit is durable on disk.
pub type WriteCallback = Box<dyn FnOnce() + Send>;

/// Errors surfaced by manager construction and startup.
#[derive(Debug, Error)]
pub enum MetablockError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("extent reservation failed: {0}")]
    Extent(#[from] ExtentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    Reading,
    Ready,
    Writing,
    ShutDown,
}

struct Inner {
    cfg: MetablockConfig,
    file: DirectFile,
    state: State,
    head: Head,
    /// Version of the newest record on disk; the next commit writes this + 1.
    version: u64,
    /// Worker the manager was started on; all calls must come from it.
    owner: Option<usize>,
    /// Present while no I/O holds it; a write moves it into the operation.
    scratch: Option<Vec<u8>>,
    queue: VecDeque<(Vec<u8>, WriteCallback)>,
    inflight_cb: Option<WriteCallback>,
    shutdown_pending: bool,
    best_version: u64,
    best_payload: Option<Vec<u8>>,
    read_cb: Option<ReadCallback>,
}

/// The metablock ring's single logical writer.
#[derive(Clone)]
pub struct MetablockManager {
    inner: Arc<Mutex<Inner>>,
}

impl MetablockManager {
    pub fn new(cfg: MetablockConfig, file: DirectFile) -> Result<Self, MetablockError> {
        cfg.validate()?;
        let slots_per_extent = cfg.slots_per_extent();
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                cfg,
                file,
                state: State::Unstarted,
                head: Head::new(slots_per_extent),
                version: 0,
                owner: None,
                scratch: None,
                queue: VecDeque::new(),
                inflight_cb: None,
                shutdown_pending: false,
                best_version: 0,
                best_payload: None,
                read_cb: None,
            })),
        })
    }

    /// Begin recovery. Reserves the metablock extents, pre-sizes the file,
    /// and scans the ring for the newest valid record. Returns `false`:
    /// the scan completes asynchronously through `cb`. Must be called on a
    /// pool worker; completions are delivered on that same worker.
    pub fn start(
        &self,
        extents: &mut ExtentManager,
        cb: ReadCallback,
    ) -> Result<bool, MetablockError> {
        let region_end;
        let file;
        {
            let mut inner = self.inner.lock();
            assert_eq!(
                inner.state,
                State::Unstarted,
                "[Metablock] start() from state {:?}",
                inner.state
            );
            let owner = current_worker()
                .expect("metablock manager must be started on a pool worker");

            for k in 0..MB_NEXTENTS {
                extents.reserve_extent((k * MB_EXTENT_SEPARATION) as u64)?;
            }

            inner.owner = Some(owner);
            inner.state = State::Reading;
            inner.read_cb = Some(cb);
            inner.head = Head::new(inner.cfg.slots_per_extent());
            region_end = inner.cfg.region_end();
            file = inner.file.clone();
            log::debug!(
                "[Metablock] recovery scan starting on worker {} ({} slots)",
                owner,
                inner.cfg.total_slots()
            );
        }

        let mgr = self.clone();
        file.allocate_async(region_end, move |result| {
            if let Err(e) = result {
                panic!("[Metablock] pre-sizing the metablock region failed: {}", e);
            }
            mgr.issue_scan_read();
        });
        Ok(false)
    }

    /// Commit `payload` as the new metablock. Queued FIFO behind any write
    /// already in flight; `cb` fires once this record is durable.
    pub fn write_metablock(&self, payload: &[u8], cb: WriteCallback) {
        let mut inner = self.inner.lock();
        assert_eq!(
            current_worker(),
            inner.owner,
            "[Metablock] write_metablock off the owning worker"
        );
        assert!(
            !inner.shutdown_pending && inner.state != State::ShutDown,
            "[Metablock] write_metablock after shutdown"
        );
        assert!(
            matches!(inner.state, State::Ready | State::Writing),
            "[Metablock] write_metablock from state {:?}",
            inner.state
        );
        assert_eq!(
            payload.len(),
            inner.cfg.payload_size,
            "[Metablock] payload size mismatch"
        );

        if inner.state == State::Writing {
            inner.queue.push_back((payload.to_vec(), cb));
            return;
        }
        self.start_write_locked(&mut inner, payload.to_vec(), cb);
    }

    /// Refuse new writes, finish queued ones, release the scratch buffer.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        assert_eq!(
            current_worker(),
            inner.owner,
            "[Metablock] shutdown off the owning worker"
        );
        match inner.state {
            State::Ready => {
                inner.state = State::ShutDown;
                inner.scratch = None;
                log::debug!("[Metablock] shut down");
            }
            State::Writing => {
                inner.shutdown_pending = true;
                log::debug!(
                    "[Metablock] shutdown deferred behind {} queued write(s)",
                    inner.queue.len() + 1
                );
            }
            other => panic!("[Metablock] shutdown from state {:?}", other),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().state == State::ShutDown
    }

    fn issue_scan_read(&self) {
        let (file, offset, len) = {
            let inner = self.inner.lock();
            debug_assert_eq!(inner.state, State::Reading);
            (
                inner.file.clone(),
                inner.head.offset(&inner.cfg),
                inner.cfg.record_size(),
            )
        };
        let mgr = self.clone();
        file.read_async(offset, len, move |result| mgr.on_scan_read(result));
    }

    /// One step of the recovery scan. Remembers the newest valid record via
    /// the head's push/pop snapshot and stops once every slot is proven:
    /// with a candidate, when the wrapped cursor reaches the candidate slot
    /// again; without one, when the cursor returns to the ring start.
    fn on_scan_read(&self, result: std::io::Result<Vec<u8>>) {
        let finished = {
            let mut inner = self.inner.lock();
            let buf = match result {
                Ok(buf) => buf,
                Err(e) => panic!("[Metablock] recovery read failed: {}", e),
            };
            let record = CrcMetablock::read(&mut &buf[..], inner.cfg.payload_size)
                .expect("slot buffer holds exactly one record");

            if record.is_valid()
                && (inner.best_payload.is_none() || record.version > inner.best_version)
            {
                log::trace!(
                    "[Metablock] candidate v{} at {:?}",
                    record.version,
                    inner.head.position()
                );
                inner.head.push();
                inner.best_version = record.version;
                inner.best_payload = Some(record.payload);
            }
            inner.head.advance();

            let done = if inner.best_payload.is_some() {
                inner.head.wrapped() && Some(inner.head.position()) == inner.head.saved()
            } else {
                inner.head.wrapped() && inner.head.position() == (0, 0)
            };
            if !done {
                None
            } else {
                let found = inner.best_payload.take();
                if found.is_some() {
                    // Restore the cursor to the newest record and step past
                    // it: the next commit must never overwrite the only
                    // record a crash could still recover from.
                    inner.head.pop();
                    inner.head.advance();
                    inner.version = inner.best_version;
                    log::debug!(
                        "[Metablock] recovery found v{}, next slot {:?}",
                        inner.version,
                        inner.head.position()
                    );
                } else {
                    inner.head = Head::new(inner.cfg.slots_per_extent());
                    inner.version = 0;
                    log::debug!("[Metablock] recovery found no valid metablock");
                }
                inner.scratch = Some(Vec::with_capacity(inner.cfg.record_size()));
                inner.state = State::Ready;
                let cb = inner
                    .read_cb
                    .take()
                    .expect("read callback armed for the whole scan");
                Some((cb, found))
            }
        };

        match finished {
            Some((cb, found)) => cb(found),
            None => self.issue_scan_read(),
        }
    }

    fn start_write_locked(&self, inner: &mut Inner, payload: Vec<u8>, cb: WriteCallback) {
        inner.version += 1;
        let mut scratch = inner
            .scratch
            .take()
            .expect("scratch buffer free when starting a write");
        scratch.clear();
        let record = CrcMetablock::new(inner.version, payload);
        record
            .write(&mut scratch)
            .expect("writing into a Vec is infallible");

        inner.state = State::Writing;
        inner.inflight_cb = Some(cb);
        let offset = inner.head.offset(&inner.cfg);
        log::trace!(
            "[Metablock] writing v{} at {:?} (offset {})",
            inner.version,
            inner.head.position(),
            offset
        );
        inner.head.advance();

        let file = inner.file.clone();
        let mgr = self.clone();
        file.write_async(offset, scratch, move |result, buf| {
            mgr.on_write_complete(result, buf);
        });
    }

    fn on_write_complete(&self, result: std::io::Result<()>, buf: Vec<u8>) {
        let cb = {
            let mut inner = self.inner.lock();
            if let Err(e) = result {
                panic!("[Metablock] metablock write failed: {}", e);
            }
            inner.scratch = Some(buf);
            inner.state = State::Ready;
            let cb = inner
                .inflight_cb
                .take()
                .expect("write completion with an in-flight callback");

            if let Some((payload, queued_cb)) = inner.queue.pop_front() {
                self.start_write_locked(&mut inner, payload, queued_cb);
            } else if inner.shutdown_pending {
                inner.shutdown_pending = false;
                inner.state = State::ShutDown;
                inner.scratch = None;
                log::debug!("[Metablock] shut down after draining queued writes");
            }
            cb
        };
        cb();
    }
}
