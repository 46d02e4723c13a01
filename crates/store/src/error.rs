// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store-level errors.

use conveyor_core::ScriptCode;
use thiserror::Error;

/// Errors surfaced by the store adapter and the transition scripts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("unsupported server: {0}")]
    UnsupportedServer(String),
    #[error("job {0} does not exist")]
    MissingJob(String),
    #[error("lock for job {0} is missing or held by another worker")]
    LockLost(String),
    #[error("job {0} is not in the expected state")]
    WrongState(String),
    #[error("job {0} still has pending dependencies")]
    PendingDependencies(String),
    #[error("queue must be paused first")]
    NotPaused,
    #[error("queue has active jobs; pass force to override")]
    HasActiveJobs,
    #[error("job {id} is locked and cannot be removed")]
    Locked { id: String },
    #[error("invalid job record: {0}")]
    Record(#[from] conveyor_core::JobRecordError),
    #[error("encode job options: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unexpected script reply for {script}: {detail}")]
    BadReply { script: &'static str, detail: String },
}

impl StoreError {
    /// Map a decoded script code onto a typed error for `job_id`.
    ///
    /// `Ok`/`Noop` are not errors and must be handled by the caller;
    /// mapping them here is a logic bug reported as a bad reply.
    pub fn from_code(script: &'static str, code: ScriptCode, job_id: &str) -> StoreError {
        match code {
            ScriptCode::MissingKey => StoreError::MissingJob(job_id.to_string()),
            ScriptCode::MissingLock => StoreError::LockLost(job_id.to_string()),
            ScriptCode::WrongState => StoreError::WrongState(job_id.to_string()),
            ScriptCode::PendingDependencies => {
                StoreError::PendingDependencies(job_id.to_string())
            }
            other => StoreError::BadReply {
                script,
                detail: format!("code {} is not an error", other.code()),
            },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
