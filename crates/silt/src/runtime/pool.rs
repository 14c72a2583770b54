// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread-pool lifecycle.
//!
//! `ThreadPool::start` spawns `workers + 1` OS threads (data workers plus
//! the utility worker), releases them together through a startup barrier,
//! and returns a cloneable [`PoolHandle`] for posting messages from any
//! thread. Shutdown is condvar-driven: any thread calls
//! [`PoolHandle::trigger_shutdown`], the thread parked in
//! [`ThreadPool::run_until_shutdown`] wakes, tells every worker to exit,
//! meets them at the tail barrier, and joins them.
//!
//! The same barrier (arity `workers + 2`: all worker threads plus the
//! coordinating thread) is used at both ends of the pool's life. The utility
//! worker constructs the blocking pool before the first barrier so the other
//! workers can see it immediately after release.

use crate::config::RuntimeConfig;
use crate::runtime::blocking::BlockingPool;
use crate::runtime::hub::MessageHub;
use crate::runtime::message::Message;
use crate::runtime::signal;
use crate::runtime::worker::Worker;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::io;
use std::sync::{Arc, Barrier, OnceLock};
use std::thread::{self, JoinHandle};
use thiserror::Error;

thread_local! {
    /// Which pool worker this thread is. -1 on the main thread, signal
    /// threads, and blocking helpers.
    static CURRENT_WORKER: Cell<i32> = const { Cell::new(-1) };
}

/// Worker id of the current thread, `None` outside the pool.
pub fn current_worker() -> Option<usize> {
    let id = CURRENT_WORKER.with(Cell::get);
    usize::try_from(id).ok()
}

fn set_current_worker(id: i32) {
    CURRENT_WORKER.with(|c| c.set(id));
}

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("signal handler installation failed: {0}")]
    Signal(String),
}

/// Condvar latch the coordinating thread parks on until shutdown is asked.
struct ShutdownLatch {
    requested: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownLatch {
    fn new() -> Self {
        Self {
            requested: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn trigger(&self) {
        let mut requested = self.requested.lock();
        *requested = true;
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut requested = self.requested.lock();
        while !*requested {
            self.condvar.wait(&mut requested);
        }
    }
}

struct PoolShared {
    hubs: Vec<Arc<MessageHub>>,
    blocking: OnceLock<Arc<BlockingPool>>,
    latch: ShutdownLatch,
    /// Armed interrupt message; the signal path takes it with a single swap,
    /// so N deliveries while one is in flight enqueue exactly once.
    interrupt: Mutex<Option<Box<dyn Message>>>,
    data_workers: usize,
}

/// Cloneable handle to a running pool.
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<PoolShared>,
}

impl PoolHandle {
    /// Total worker loops, utility worker included.
    pub fn worker_count(&self) -> usize {
        self.shared.data_workers + 1
    }

    /// Id of the utility worker (highest index).
    pub fn utility_worker(&self) -> usize {
        self.shared.data_workers
    }

    /// Enqueue `msg` on worker `target`. Callable from any thread; posts
    /// from pool workers keep FIFO order per (source, target) pair.
    pub fn post(&self, target: usize, msg: Box<dyn Message>) {
        let hub = &self.shared.hubs[target];
        match current_worker() {
            Some(source) => hub.post_from_worker(source, msg),
            None => hub.post_external(msg),
        }
    }

    /// The blocking-operation pool hosted by the utility worker.
    pub fn blocking(&self) -> Arc<BlockingPool> {
        Arc::clone(
            self.shared
                .blocking
                .get()
                .expect("blocking pool is constructed before the startup barrier"),
        )
    }

    /// Arm the message the interrupt path will post to the utility worker.
    /// Replaces any message still armed.
    pub fn arm_interrupt(&self, msg: Box<dyn Message>) {
        *self.shared.interrupt.lock() = Some(msg);
    }

    /// Deliver the armed interrupt message to the utility worker. Repeated
    /// calls while the message is in flight are no-ops; re-arming makes the
    /// next call deliver again.
    pub fn raise_interrupt(&self) {
        let msg = self.shared.interrupt.lock().take();
        match msg {
            Some(msg) => {
                log::debug!("[Pool] interrupt raised, posting to utility worker");
                self.post(self.utility_worker(), msg);
            }
            None => log::debug!("[Pool] interrupt raised with none armed, ignoring"),
        }
    }

    /// Ask worker `target` to exit its loop. Safe from any thread.
    pub fn initiate_shutdown(&self, target: usize) {
        self.shared.hubs[target].request_shutdown();
    }

    /// Request pool shutdown: wakes the thread parked in
    /// [`ThreadPool::run_until_shutdown`].
    pub fn trigger_shutdown(&self) {
        self.shared.latch.trigger();
    }

    pub(crate) fn hub(&self, id: usize) -> Arc<MessageHub> {
        Arc::clone(&self.shared.hubs[id])
    }
}

/// The pool itself: owns the worker threads for their whole life.
pub struct ThreadPool {
    handle: PoolHandle,
    threads: Vec<JoinHandle<()>>,
    barrier: Arc<Barrier>,
    torn_down: bool,
}

impl ThreadPool {
    /// Spawn and release the workers. Returns once every worker has passed
    /// the startup barrier.
    pub fn start(cfg: RuntimeConfig) -> Result<Self, RuntimeError> {
        cfg.validate()?;

        let total = cfg.workers + 1;
        let shared = Arc::new(PoolShared {
            hubs: (0..total).map(|_| Arc::new(MessageHub::new(total))).collect(),
            blocking: OnceLock::new(),
            latch: ShutdownLatch::new(),
            interrupt: Mutex::new(None),
            data_workers: cfg.workers,
        });
        let handle = PoolHandle {
            shared: Arc::clone(&shared),
        };
        let barrier = Arc::new(Barrier::new(total + 1));

        let mut threads = Vec::with_capacity(total);
        for id in 0..total {
            let handle = handle.clone();
            let barrier = Arc::clone(&barrier);
            let cfg = cfg.clone();
            let thread = thread::Builder::new()
                .name(format!("silt-worker-{}", id))
                .spawn(move || worker_main(id, &cfg, handle, &barrier))
                .map_err(RuntimeError::Io)?;
            threads.push(thread);
        }

        barrier.wait();
        log::debug!(
            "[Pool] released {} data workers + utility worker",
            cfg.workers
        );

        let pool = Self {
            handle: handle.clone(),
            threads,
            barrier,
            torn_down: false,
        };

        if cfg.install_signal_handlers {
            signal::install_segv_handler();
            // On failure the pool drops here, which tears the workers down.
            signal::install_interrupt_handler(handle)
                .map_err(|e| RuntimeError::Signal(e.to_string()))?;
        }

        Ok(pool)
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Park until some thread calls [`PoolHandle::trigger_shutdown`], then
    /// stop every worker, meet them at the tail barrier, and join them.
    pub fn run_until_shutdown(mut self) {
        self.handle.shared.latch.wait();
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        log::debug!("[Pool] shutting down {} workers", self.handle.worker_count());
        for id in 0..self.handle.worker_count() {
            self.handle.initiate_shutdown(id);
        }
        self.barrier.wait();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("[Pool] worker thread panicked");
            }
        }
        if let Some(blocking) = self.handle.shared.blocking.get() {
            blocking.shutdown();
        }
        log::debug!("[Pool] shut down");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.handle.trigger_shutdown();
        self.teardown();
    }
}

fn worker_main(id: usize, cfg: &RuntimeConfig, handle: PoolHandle, barrier: &Barrier) {
    set_current_worker(id as i32);
    signal::mask_worker_signals();

    if cfg.affinity {
        let cpus = thread::available_parallelism().map_or(1, usize::from);
        if let Err(e) = set_thread_affinity(id % cpus) {
            log::warn!("[Pool] worker {}: {}", id, e);
        }
    }

    let _alt_stack = signal::SignalStack::install();
    let _guard = signal::GuardRegion::register_current_thread();

    // A worker without a poller cannot participate; die before the barrier.
    let mut worker = Worker::new(id, handle.clone())
        .unwrap_or_else(|e| panic!("[Pool] worker {} failed to build event loop: {}", id, e));

    if id == handle.utility_worker() {
        let blocking = BlockingPool::start(cfg.blocking_threads, id, handle.shared.hubs.clone());
        if handle.shared.blocking.set(blocking).is_err() {
            log::debug!("[Pool] blocking pool already installed");
        }
    }

    barrier.wait();
    worker.run();
    drop(worker);
    barrier.wait();
}

/// Pin the current thread to `core_id` (Linux only).
#[cfg(target_os = "linux")]
fn set_thread_affinity(core_id: usize) -> Result<(), String> {
    use std::mem;

    unsafe {
        let mut cpu_set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_SET(core_id, &mut cpu_set);

        let result = libc::sched_setaffinity(
            0, // current thread
            mem::size_of::<libc::cpu_set_t>(),
            &cpu_set,
        );

        if result == 0 {
            Ok(())
        } else {
            Err(format!("failed to set affinity to core {}", core_id))
        }
    }
}

/// Affinity stub for platforms without a portable API.
#[cfg(not(target_os = "linux"))]
fn set_thread_affinity(core_id: usize) -> Result<(), String> {
    Err(format!(
        "thread affinity not supported on this platform (core_id={})",
        core_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_worker_is_none_off_pool() {
        assert_eq!(current_worker(), None);
    }

    #[test]
    fn latch_releases_after_trigger() {
        let latch = Arc::new(ShutdownLatch::new());
        let l = Arc::clone(&latch);
        let waiter = thread::spawn(move || l.wait());
        latch.trigger();
        waiter.join().unwrap();
        // Re-waiting after trigger returns immediately.
        latch.wait();
    }
}
