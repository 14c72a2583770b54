// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking-operation delegation pool.
//!
//! A fixed set of helper OS threads attached to the utility worker. Workers
//! submit a synchronous closure; a helper runs it to completion (it may
//! block in kernel arbitrarily long) and posts the closure's continuation
//! message back to the submitting worker's hub. This keeps every truly
//! blocking kernel call off the event-loop threads.

use crate::runtime::hub::MessageHub;
use crate::runtime::message::Message;
use crate::runtime::pool::current_worker;
use crate::runtime::signal;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Job {
    run: Box<dyn FnOnce() -> Box<dyn Message> + Send>,
    reply_to: usize,
}

/// Helper threads for synchronous kernel calls.
pub struct BlockingPool {
    tx: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    owner: usize,
    hubs: Vec<Arc<MessageHub>>,
}

impl BlockingPool {
    /// Spawn `size` helper threads attached to worker `owner`. Called by the
    /// utility worker before the startup barrier so every worker sees the
    /// pool as soon as it is released.
    pub(crate) fn start(size: usize, owner: usize, hubs: Vec<Arc<MessageHub>>) -> Arc<Self> {
        let (tx, rx) = unbounded::<Job>();
        let pool = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            threads: Mutex::new(Vec::with_capacity(size)),
            owner,
            hubs,
        });

        let mut threads = pool.threads.lock();
        for i in 0..size {
            let rx: Receiver<Job> = rx.clone();
            let hubs = pool.hubs.clone();
            let handle = thread::Builder::new()
                .name(format!("silt-blocking-{}", i))
                .spawn(move || {
                    signal::mask_worker_signals();
                    while let Ok(job) = rx.recv() {
                        let msg = (job.run)();
                        hubs[job.reply_to].post_external(msg);
                    }
                    log::debug!("[BlockingPool] helper {} exiting", i);
                })
                .expect("spawning blocking helper thread failed");
            threads.push(handle);
        }
        drop(threads);

        log::debug!(
            "[BlockingPool] {} helpers attached to worker {}",
            size,
            owner
        );
        pool
    }

    /// Worker this pool is attached to.
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Run `f` on a helper thread and deliver the message it returns on the
    /// submitting worker. Submissions from outside the pool (no current
    /// worker) deliver on the owner worker instead.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() -> Box<dyn Message> + Send + 'static,
    {
        let reply_to = current_worker().unwrap_or(self.owner);
        let job = Job {
            run: Box::new(f),
            reply_to,
        };
        match self.tx.lock().as_ref() {
            Some(tx) => {
                // Receivers outlive the sender; send only fails after shutdown.
                if tx.send(job).is_err() {
                    log::warn!("[BlockingPool] submit after shutdown, job dropped");
                }
            }
            None => log::warn!("[BlockingPool] submit after shutdown, job dropped"),
        }
    }

    /// Stop accepting jobs, finish the queued ones, join the helpers.
    pub(crate) fn shutdown(&self) {
        let tx = self.tx.lock().take();
        drop(tx);
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                log::error!("[BlockingPool] helper thread panicked");
            }
        }
    }
}
