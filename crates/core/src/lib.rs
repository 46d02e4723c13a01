// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-core: data model for the conveyor distributed job queue.
//!
//! Everything in this crate is pure: job records, options, key naming,
//! score packing, and return-code decoding. No I/O happens here; the
//! store adapter and engine crates build on these types.

pub mod macros;

pub mod clock;
pub mod codes;
pub mod event;
pub mod job;
pub mod keys;
pub mod limiter;
pub mod options;
pub mod score;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use codes::ScriptCode;
pub use event::QueueEvent;
#[cfg(any(test, feature = "test-support"))]
pub use job::JobBuilder;
pub use job::{Job, JobRecordError, JobState};
#[cfg(any(test, feature = "test-support"))]
pub use options::JobOptionsBuilder;
pub use options::{BackoffPolicy, JobOptions, KeepPolicy, ParentRef, RepeatOptions};
pub use keys::{KeySpace, DEFAULT_PREFIX};
pub use limiter::RateLimiterOptions;
pub use score::{delay_score, due_bound, score_timestamp, TIEBREAKER_BITS, TIEBREAKER_MASK};
