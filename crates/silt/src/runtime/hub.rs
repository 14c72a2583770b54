// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-worker message inbox.
//!
//! Each worker owns one hub. Worker-to-worker posts go through a dedicated
//! lock-free queue per source worker, which keeps delivery FIFO per
//! (source, target) pair without any lock on the hot path. Posts from
//! non-worker threads (main, signal path, blocking helpers) go through a
//! single mutex-guarded external inbox; that mutex is the only lock on the
//! message path.
//!
//! Wakeup follows the atomic fast-path pattern: posting sets a wake-pending
//! flag, and only the first setter pays for waking the target's poller. The
//! worker clears the flag before splicing, so a post that lands during
//! processing still produces a wake before the next blocking wait.

use crate::runtime::message::Message;
use crossbeam::queue::SegQueue;
use mio::Waker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

pub(crate) struct MessageHub {
    /// One deposit queue per source worker, indexed by source id.
    sources: Vec<SegQueue<Box<dyn Message>>>,
    /// Inbox for posts from threads outside the pool.
    external: Mutex<VecDeque<Box<dyn Message>>>,
    /// Set by the first poster since the worker last drained; the setter
    /// that flips false -> true wakes the poller.
    wake_pending: AtomicBool,
    /// Observed by the event loop between iterations.
    shutdown: AtomicBool,
    /// Installed by the owning worker before the startup barrier.
    waker: OnceLock<Waker>,
}

impl MessageHub {
    pub(crate) fn new(n_workers: usize) -> Self {
        Self {
            sources: (0..n_workers).map(|_| SegQueue::new()).collect(),
            external: Mutex::new(VecDeque::new()),
            wake_pending: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            waker: OnceLock::new(),
        }
    }

    pub(crate) fn set_waker(&self, waker: Waker) {
        if self.waker.set(waker).is_err() {
            log::debug!("[Hub] waker already installed, ignoring");
        }
    }

    pub(crate) fn post_from_worker(&self, source: usize, msg: Box<dyn Message>) {
        self.sources[source].push(msg);
        self.wake();
    }

    pub(crate) fn post_external(&self, msg: Box<dyn Message>) {
        self.external.lock().push_back(msg);
        self.wake();
    }

    fn wake(&self) {
        if !self.wake_pending.swap(true, Ordering::AcqRel) {
            if let Some(waker) = self.waker.get() {
                if let Err(e) = waker.wake() {
                    log::debug!("[Hub] waker write failed: {}", e);
                }
            }
        }
    }

    /// Called by the owning worker at the top of each loop iteration, before
    /// splicing. Clearing first guarantees a post racing with the splice
    /// issues a fresh wake.
    pub(crate) fn begin_drain(&self) {
        self.wake_pending.store(false, Ordering::Release);
    }

    /// Move every pending message into `out`, per-source FIFO preserved.
    pub(crate) fn splice_into(&self, out: &mut VecDeque<Box<dyn Message>>) {
        for queue in &self.sources {
            while let Some(msg) = queue.pop() {
                out.push_back(msg);
            }
        }
        let mut external = self.external.lock();
        while let Some(msg) = external.pop_front() {
            out.push_back(msg);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sources.iter().all(SegQueue::is_empty) && self.external.lock().is_empty()
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::message;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn noop() -> Box<dyn Message> {
        message(|_w| {})
    }

    #[test]
    fn splice_moves_every_pending_message() {
        // Per-pair FIFO needs a live worker to observe; the integration
        // suite covers it. Here: everything posted comes out, once.
        let hub = MessageHub::new(2);
        for _ in 0..4 {
            hub.post_from_worker(0, noop());
        }
        for _ in 0..2 {
            hub.post_from_worker(1, noop());
        }

        let mut out = VecDeque::new();
        hub.splice_into(&mut out);
        assert_eq!(out.len(), 6);
        assert!(hub.is_empty());

        out.clear();
        hub.splice_into(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn external_inbox_drains_after_worker_sources() {
        let hub = MessageHub::new(1);
        hub.post_external(noop());
        hub.post_from_worker(0, noop());
        assert!(!hub.is_empty());

        let mut out = VecDeque::new();
        hub.splice_into(&mut out);
        assert_eq!(out.len(), 2);
        assert!(hub.is_empty());
    }

    #[test]
    fn wake_pending_set_once_per_drain_cycle() {
        let hub = MessageHub::new(1);
        assert!(!hub.wake_pending.load(Ordering::Acquire));

        hub.post_external(noop());
        assert!(hub.wake_pending.load(Ordering::Acquire));
        hub.post_external(noop());
        assert!(hub.wake_pending.load(Ordering::Acquire));

        hub.begin_drain();
        assert!(!hub.wake_pending.load(Ordering::Acquire));
    }

    #[test]
    fn shutdown_flag_observable() {
        let hub = MessageHub::new(1);
        assert!(!hub.shutdown_requested());
        hub.request_shutdown();
        assert!(hub.shutdown_requested());
    }

    #[test]
    fn messages_survive_the_queue() {
        let hub = MessageHub::new(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        hub.post_external(message(move |_w| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        let mut out = VecDeque::new();
        hub.splice_into(&mut out);
        assert_eq!(out.len(), 1);
        // Not delivered without a worker; just proves ownership moved out.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
