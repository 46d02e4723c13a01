// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local event fan-out.
//!
//! The store's events stream is the durable record; this bus is the
//! in-process view a producer or worker exposes to its subscribers.
//! Bounded broadcast: slow subscribers lag and skip, they never block
//! the queue.

use conveyor_core::QueueEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Bounded broadcast channel of [`QueueEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Nobody listening is fine.
    pub fn publish(&self, event: QueueEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("queue event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
