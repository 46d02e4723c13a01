// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-store: Redis adapter for the conveyor job queue.
//!
//! Three layers: [`StoreClient`] (connections, version probe, blocking
//! pops), [`ScriptRegistry`] (the embedded Lua transition scripts), and
//! [`Transitions`] (typed invocation and reply decoding). Every
//! multi-key state change happens inside a single server-side script.

pub mod client;
pub mod error;
pub mod scripts;
pub mod transitions;
pub mod version;

pub use client::StoreClient;
pub use error::StoreError;
pub use scripts::ScriptRegistry;
pub use transitions::{
    AddJob, ClaimArgs, CleanTarget, FinishArgs, Next, ReprocessSource, StallSweep, Transitions,
};
pub use version::ServerVersion;
