// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Work items delivered on a worker's event loop.
//!
//! A message is a one-shot callback. Enqueueing consumes the box, so a
//! message object can sit in at most one queue at a time; ownership moves to
//! the receiving worker and ends when `deliver` returns.

use crate::runtime::worker::Worker;

/// A unit of work delivered on a worker thread.
///
/// Handlers run to completion on the worker's event loop; a handler that
/// wants to yield posts itself a continuation with
/// [`Worker::post_local`].
pub trait Message: Send {
    fn deliver(self: Box<Self>, worker: &mut Worker);
}

impl<F> Message for F
where
    F: FnOnce(&mut Worker) + Send,
{
    fn deliver(self: Box<Self>, worker: &mut Worker) {
        (*self)(worker)
    }
}

/// Box a closure as a message.
pub fn message<F>(f: F) -> Box<dyn Message>
where
    F: FnOnce(&mut Worker) + Send + 'static,
{
    Box::new(f)
}
