// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests for the thread-per-core pool: cross-worker message
//! ordering, timers, fd watches, blocking-pool completions, interrupt
//! delivery, and shutdown under load.

use silt::config::RuntimeConfig;
use silt::runtime::{message, current_worker, PoolHandle, ThreadPool, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn test_pool(workers: usize) -> ThreadPool {
    ThreadPool::start(RuntimeConfig {
        workers,
        affinity: false,
        blocking_threads: 2,
        install_signal_handlers: false,
    })
    .unwrap()
}

#[test]
fn cross_worker_messages_arrive_in_post_order() {
    let pool = test_pool(3);
    let handle = pool.handle();

    let received = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    let sink = Arc::clone(&received);
    handle.post(
        0,
        message(move |worker: &mut Worker| {
            assert_eq!(current_worker(), Some(0));
            for i in 0..1000usize {
                let sink = Arc::clone(&sink);
                let done_tx = done_tx.clone();
                worker.handle().post(
                    2,
                    message(move |_w: &mut Worker| {
                        let mut got = sink.lock().unwrap();
                        got.push(i);
                        if got.len() == 1000 {
                            done_tx.send(()).unwrap();
                        }
                    }),
                );
            }
        }),
    );

    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1000);
    assert!(
        got.iter().enumerate().all(|(i, &v)| i == v),
        "worker-0 -> worker-2 delivery must be FIFO"
    );
}

fn volley(worker: &mut Worker, remaining: usize, exchanged: Arc<AtomicUsize>) {
    exchanged.fetch_add(1, Ordering::SeqCst);
    if remaining == 0 {
        worker.handle().trigger_shutdown();
        return;
    }
    let peer = (worker.id() + 1) % 2;
    worker.handle().post(
        peer,
        message(move |w: &mut Worker| volley(w, remaining - 1, exchanged)),
    );
}

#[test]
fn worker_can_trigger_pool_shutdown() {
    let pool = test_pool(2);
    let handle = pool.handle();

    let exchanged = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exchanged);
    handle.post(
        0,
        message(move |worker: &mut Worker| volley(worker, 1000, counter)),
    );

    // Blocks until the volley triggers shutdown, then joins every worker.
    pool.run_until_shutdown();
    assert_eq!(exchanged.load(Ordering::SeqCst), 1001);
}

fn volley_forever(worker: &mut Worker, exchanged: Arc<AtomicUsize>) {
    exchanged.fetch_add(1, Ordering::SeqCst);
    let peer = (worker.id() + 1) % 2;
    worker.handle().post(
        peer,
        message(move |w: &mut Worker| volley_forever(w, exchanged)),
    );
}

#[test]
fn shutdown_while_workers_exchange_messages() {
    let pool = test_pool(2);
    let handle = pool.handle();

    let exchanged = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exchanged);
    handle.post(
        0,
        message(move |worker: &mut Worker| volley_forever(worker, counter)),
    );

    // Let the exchange run, then pull the plug mid-flight. Each worker
    // exits at its next loop turn once its own queues are momentarily
    // empty; the bouncing message dies with the pool.
    std::thread::sleep(Duration::from_millis(50));
    handle.trigger_shutdown();
    pool.run_until_shutdown();
    assert!(exchanged.load(Ordering::SeqCst) > 0);
}

#[test]
fn interrupt_message_enqueues_exactly_once() {
    let pool = test_pool(1);
    let handle = pool.handle();

    let hits = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let arm = |handle: &PoolHandle| {
        let hits = Arc::clone(&hits);
        let tx = tx.clone();
        handle.arm_interrupt(message(move |worker: &mut Worker| {
            assert_eq!(worker.id(), worker.handle().utility_worker());
            hits.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }));
    };

    arm(&handle);
    // Deliver the signal path five times; only the first takes the message.
    for _ in 0..5 {
        handle.raise_interrupt();
    }
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Raising with nothing armed stays a no-op.
    handle.raise_interrupt();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Re-arming makes the next delivery count again.
    arm(&handle);
    handle.raise_interrupt();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn blocking_job_completion_lands_on_submitting_worker() {
    let pool = test_pool(2);
    let handle = pool.handle();
    let (tx, rx) = mpsc::channel();

    handle.post(
        1,
        message(move |worker: &mut Worker| {
            let blocking = worker.handle().blocking();
            blocking.submit(move || {
                // Stands in for a kernel call that blocks.
                std::thread::sleep(Duration::from_millis(5));
                message(move |w: &mut Worker| {
                    tx.send((w.id(), current_worker())).unwrap();
                })
            });
        }),
    );

    let (worker_id, tls_id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(worker_id, 1);
    assert_eq!(tls_id, Some(1));
}

#[test]
fn timers_fire_after_their_deadline_and_cancel_cleanly() {
    let pool = test_pool(1);
    let handle = pool.handle();
    let (tx, rx) = mpsc::channel();
    let cancelled_fired = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&cancelled_fired);
    handle.post(
        0,
        message(move |worker: &mut Worker| {
            let start = Instant::now();

            let f = Arc::clone(&flag);
            let doomed = worker.schedule(
                Duration::from_millis(20),
                message(move |_w: &mut Worker| {
                    f.fetch_add(1, Ordering::SeqCst);
                }),
            );
            assert!(worker.cancel(doomed));

            worker.schedule(
                Duration::from_millis(50),
                message(move |_w: &mut Worker| {
                    tx.send(start.elapsed()).unwrap();
                }),
            );
        }),
    );

    let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(
        elapsed >= Duration::from_millis(45),
        "timer fired early: {:?}",
        elapsed
    );
    assert_eq!(cancelled_fired.load(Ordering::SeqCst), 0);
}

#[test]
fn watched_pipe_reports_readable() {
    let pool = test_pool(1);
    let handle = pool.handle();
    let (tx, rx) = mpsc::channel();

    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid two-element array for pipe(2).
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    handle.post(
        0,
        message(move |worker: &mut Worker| {
            worker
                .watch(
                    read_fd,
                    mio::Interest::READABLE,
                    Box::new(move |w: &mut Worker, readiness: silt::runtime::Readiness| {
                        assert!(readiness.readable);
                        let mut byte = [0u8; 1];
                        // SAFETY: read_fd is open and readable; one byte fits.
                        let n = unsafe {
                            libc::read(read_fd, byte.as_mut_ptr().cast(), 1)
                        };
                        assert_eq!(n, 1);
                        w.unwatch(read_fd).unwrap();
                        tx.send(byte[0]).unwrap();
                    }),
                )
                .unwrap();
        }),
    );

    // Give the watch a moment to register, then make the pipe readable.
    std::thread::sleep(Duration::from_millis(20));
    // SAFETY: write_fd is the open write end of the pipe.
    let n = unsafe { libc::write(write_fd, [0x5A_u8].as_ptr().cast(), 1) };
    assert_eq!(n, 1);

    let byte = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(byte, 0x5A);

    drop(pool);
    // SAFETY: both ends belong to this test and are closed exactly once.
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn utility_worker_has_highest_index() {
    let pool = test_pool(3);
    let handle = pool.handle();
    assert_eq!(handle.worker_count(), 4);
    assert_eq!(handle.utility_worker(), 3);

    let (tx, rx) = mpsc::channel();
    handle.post(
        3,
        message(move |worker: &mut Worker| {
            tx.send(worker.id()).unwrap();
        }),
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
}
