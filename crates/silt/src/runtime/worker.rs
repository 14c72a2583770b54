// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The per-core event loop.
//!
//! One `Worker` runs on one OS thread for the pool's lifetime and drives a
//! mio poller. Each iteration splices externally posted messages into the
//! local queue, drains the local queue, blocks for at most the next timer
//! deadline, dispatches ready descriptors, and runs expired timers. The
//! local drain runs both before and after the poll wait to keep intra-core
//! message latency down.
//!
//! Handlers run to completion; the loop never preempts one. A handler that
//! wants to yield posts itself a continuation message, and the loop uses a
//! zero poll timeout while local work is pending so continuations never wait
//! behind a timer deadline.

use crate::runtime::hub::MessageHub;
use crate::runtime::message::Message;
use crate::runtime::pool::PoolHandle;
use crate::runtime::timer::{TimerId, TimerWheel};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token reserved for the hub's waker.
const WAKER_TOKEN: Token = Token(0);

/// First token handed to `watch` registrations.
const WATCH_TOKEN_START: usize = 1;

/// Upper bound on the poll wait when no timer is armed.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum events to process per poll.
const MAX_EVENTS: usize = 128;

/// Readiness of a watched descriptor, as reported to its handler.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Handler for a watched file descriptor.
pub trait IoHandler: Send {
    fn on_ready(&mut self, worker: &mut Worker, readiness: Readiness);
}

impl<F> IoHandler for F
where
    F: FnMut(&mut Worker, Readiness) + Send,
{
    fn on_ready(&mut self, worker: &mut Worker, readiness: Readiness) {
        self(worker, readiness)
    }
}

struct WatchEntry {
    fd: RawFd,
    handler: Box<dyn IoHandler>,
}

/// One event loop, owned by one pool thread.
pub struct Worker {
    id: usize,
    handle: PoolHandle,
    hub: Arc<MessageHub>,
    poll: Poll,
    events: Events,
    local: VecDeque<Box<dyn Message>>,
    timers: TimerWheel,
    watches: HashMap<Token, WatchEntry>,
    fd_tokens: HashMap<RawFd, Token>,
    next_token: usize,
}

impl Worker {
    pub(crate) fn new(id: usize, handle: PoolHandle) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let hub = handle.hub(id);
        hub.set_waker(waker);

        Ok(Self {
            id,
            handle,
            hub,
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            local: VecDeque::new(),
            timers: TimerWheel::new(),
            watches: HashMap::new(),
            fd_tokens: HashMap::new(),
            next_token: WATCH_TOKEN_START,
        })
    }

    /// Zero-based worker id. The utility worker has the highest index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Handle for posting to other workers and reaching the blocking pool.
    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    /// Monotonic time source used by the timer scheduler.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Enqueue a message for this worker. Only callable from code already
    /// running on this worker.
    pub fn post_local(&mut self, msg: Box<dyn Message>) {
        self.local.push_back(msg);
    }

    /// Deliver `msg` after `delay`.
    pub fn schedule(&mut self, delay: Duration, msg: Box<dyn Message>) -> TimerId {
        self.timers.schedule(Instant::now() + delay, msg)
    }

    /// Cancel a scheduled timer. Returns `false` if it already fired.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    /// Register interest in a descriptor. The descriptor must be unwatched
    /// on this same worker before it is closed.
    pub fn watch(
        &mut self,
        fd: RawFd,
        interest: Interest,
        handler: Box<dyn IoHandler>,
    ) -> io::Result<()> {
        if self.fd_tokens.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fd already watched on this worker",
            ));
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest)?;
        self.fd_tokens.insert(fd, token);
        self.watches.insert(token, WatchEntry { fd, handler });
        log::trace!("[Worker {}] watching fd {}", self.id, fd);
        Ok(())
    }

    /// Drop interest in a descriptor previously passed to `watch`.
    pub fn unwatch(&mut self, fd: RawFd) -> io::Result<()> {
        let token = self.fd_tokens.remove(&fd).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "fd not watched on this worker")
        })?;
        self.watches.remove(&token);
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        log::trace!("[Worker {}] unwatched fd {}", self.id, fd);
        Ok(())
    }

    /// Request this worker's loop to exit. Safe from any thread via
    /// [`PoolHandle::initiate_shutdown`]; this is the on-worker form.
    pub fn initiate_shutdown(&self) {
        self.hub.request_shutdown();
    }

    /// Drive the loop until shutdown is observed with empty queues.
    pub(crate) fn run(&mut self) {
        log::debug!("[Worker {}] event loop running", self.id);
        loop {
            self.hub.begin_drain();
            self.hub.splice_into(&mut self.local);
            self.drain_local();

            if self.hub.shutdown_requested() && self.local.is_empty() && self.hub.is_empty() {
                break;
            }

            let timeout = if self.local.is_empty() {
                self.timers
                    .until_next(Instant::now())
                    .map_or(DEFAULT_POLL_TIMEOUT, |d| d.min(DEFAULT_POLL_TIMEOUT))
            } else {
                Duration::ZERO
            };

            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("[Worker {}] poll failed: {}", self.id, e);
                    break;
                }
            }

            let ready: Vec<(Token, Readiness)> = self
                .events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(|event| {
                    (
                        event.token(),
                        Readiness {
                            readable: event.is_readable(),
                            writable: event.is_writable(),
                        },
                    )
                })
                .collect();
            for (token, readiness) in ready {
                self.dispatch_ready(token, readiness);
            }

            let now = Instant::now();
            while let Some(msg) = self.timers.pop_expired(now) {
                msg.deliver(self);
            }

            self.hub.splice_into(&mut self.local);
            self.drain_local();
        }
        log::debug!("[Worker {}] event loop exiting", self.id);
    }

    /// Drain the batch of local messages that exists right now. Messages
    /// posted during the drain land in the fresh queue and force a zero poll
    /// timeout on the next iteration.
    fn drain_local(&mut self) {
        let mut batch = std::mem::take(&mut self.local);
        while let Some(msg) = batch.pop_front() {
            msg.deliver(self);
        }
    }

    fn dispatch_ready(&mut self, token: Token, readiness: Readiness) {
        // The entry leaves the table for the duration of the call so the
        // handler can take &mut Worker; it goes back unless the handler
        // unwatched its own descriptor.
        if let Some(mut entry) = self.watches.remove(&token) {
            entry.handler.on_ready(self, readiness);
            if self.fd_tokens.get(&entry.fd) == Some(&token) {
                self.watches.insert(token, entry);
            }
        }
    }
}
