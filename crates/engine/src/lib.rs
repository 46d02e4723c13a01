// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-engine: producer, worker, and scheduler façades.
//!
//! Producers enqueue through [`Queue`], workers claim and process
//! through [`Worker`], and one [`QueueScheduler`] per queue keeps
//! delayed promotion and stall recovery running. All shared state
//! lives in the store; the only in-process coupling is each object's
//! bounded event broadcast.

pub mod error;
pub mod events;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use error::{EngineError, ProcessError};
pub use events::EventBus;
pub use queue::{BulkJob, Queue, QueueOptions, RepeatableJob, DEFAULT_MAX_EVENTS};
pub use scheduler::{QueueScheduler, SchedulerOptions};
pub use worker::{JobHandle, Processor, Worker, WorkerOptions};
