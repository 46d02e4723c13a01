// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level errors.

use thiserror::Error;

/// Errors surfaced by the queue, worker, and scheduler façades.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] conveyor_store::StoreError),
    #[error("worker is closed")]
    Closed,
}

/// A processor's failure report. The message becomes the job's
/// `failedReason` and drives the retry/backoff decision.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessError {
    pub message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<String> for ProcessError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ProcessError {
    fn from(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}
