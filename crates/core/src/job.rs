// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job record: a typed view over the per-job hash.
//!
//! A `Job` value is read from the store and has no lifetime beyond the
//! call that produced it; all mutation goes through the transition
//! scripts. Payload and result are opaque bytes; callers decode them at
//! the API boundary.

use crate::options::JobOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// On-store hash field names.
pub mod fields {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const DATA: &str = "data";
    pub const OPTS: &str = "opts";
    pub const TIMESTAMP: &str = "timestamp";
    pub const DELAY: &str = "delay";
    pub const PRIORITY: &str = "priority";
    pub const ATTEMPTS_MADE: &str = "attemptsMade";
    pub const STALLED_COUNTER: &str = "stalledCounter";
    pub const PROCESSED_ON: &str = "processedOn";
    pub const FINISHED_ON: &str = "finishedOn";
    pub const RETURN_VALUE: &str = "returnvalue";
    pub const FAILED_REASON: &str = "failedReason";
    pub const PROGRESS: &str = "progress";
    /// Bare parent id, set when the job was added with a parent ref.
    pub const PARENT_ID: &str = "parentId";
    /// Parent queue key without trailing colon (`<prefix>:<queue>`).
    pub const PARENT_QUEUE: &str = "parentQueue";
    /// This job's own queue base (`<prefix>:<queue>:`), used for
    /// cross-queue child cleanup.
    pub const KEY_PREFIX: &str = "keyPrefix";
}

/// Logical set a job id currently inhabits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Waiting,
    WaitingChildren,
    Delayed,
    Active,
    Completed,
    Failed,
    Paused,
    Unknown,
}

impl JobState {
    /// Wire name used in scripts and the events stream.
    pub fn as_wire(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::WaitingChildren => "waiting-children",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Paused => "paused",
            JobState::Unknown => "unknown",
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "waiting" => JobState::Waiting,
            "waiting-children" => JobState::WaitingChildren,
            "delayed" => JobState::Delayed,
            "active" => JobState::Active,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            "paused" => JobState::Paused,
            _ => JobState::Unknown,
        }
    }

    /// Every real state, in the order counts are reported.
    pub fn all() -> [JobState; 7] {
        [
            JobState::Waiting,
            JobState::WaitingChildren,
            JobState::Delayed,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Paused,
        ]
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

crate::simple_display! {
    JobState {
        Waiting => "waiting",
        WaitingChildren => "waiting-children",
        Delayed => "delayed",
        Active => "active",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
        Unknown => "unknown",
    }
}

/// Errors decoding a job hash into a [`Job`].
#[derive(Debug, Error)]
pub enum JobRecordError {
    #[error("job hash is empty or missing")]
    Missing,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{field}' is not valid UTF-8")]
    BadUtf8 { field: &'static str },
    #[error("field '{field}' has invalid value '{value}'")]
    BadValue { field: &'static str, value: String },
    #[error("invalid opts JSON: {0}")]
    BadOpts(#[from] serde_json::Error),
}

/// A job as stored; values are views and never write back.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    pub opts: JobOptions,
    /// Creation time, ms since epoch.
    pub timestamp: u64,
    /// Remaining delay at add time, ms.
    pub delay: u64,
    pub priority: i64,
    /// Number of times a worker has claimed this job.
    pub attempts_made: u32,
    /// Number of times the job was recovered after a lost lock.
    pub stalled_counter: u32,
    pub processed_on: Option<u64>,
    pub finished_on: Option<u64>,
    /// Opaque progress bytes, if the processor reported any.
    pub progress: Option<Vec<u8>>,
    pub returnvalue: Option<Vec<u8>>,
    pub failed_reason: Option<String>,
}

fn utf8(field: &'static str, bytes: Vec<u8>) -> Result<String, JobRecordError> {
    String::from_utf8(bytes).map_err(|_| JobRecordError::BadUtf8 { field })
}

fn parse_num<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, JobRecordError> {
    value
        .parse()
        .map_err(|_| JobRecordError::BadValue { field, value: value.to_string() })
}

impl Job {
    /// Decode an `HGETALL` result. The `id` is passed separately because
    /// scripts return it alongside the field map.
    pub fn from_hash(
        id: impl Into<String>,
        mut hash: HashMap<String, Vec<u8>>,
    ) -> Result<Self, JobRecordError> {
        if hash.is_empty() {
            return Err(JobRecordError::Missing);
        }
        let mut take_str = |field: &'static str| -> Result<Option<String>, JobRecordError> {
            hash.remove(field).map(|v| utf8(field, v)).transpose()
        };

        let name = take_str(fields::NAME)?.ok_or(JobRecordError::MissingField(fields::NAME))?;
        let timestamp = take_str(fields::TIMESTAMP)?
            .map(|v| parse_num(fields::TIMESTAMP, &v))
            .transpose()?
            .unwrap_or(0);
        let delay = take_str(fields::DELAY)?
            .map(|v| parse_num(fields::DELAY, &v))
            .transpose()?
            .unwrap_or(0);
        let priority = take_str(fields::PRIORITY)?
            .map(|v| parse_num(fields::PRIORITY, &v))
            .transpose()?
            .unwrap_or(0);
        let attempts_made = take_str(fields::ATTEMPTS_MADE)?
            .map(|v| parse_num(fields::ATTEMPTS_MADE, &v))
            .transpose()?
            .unwrap_or(0);
        let stalled_counter = take_str(fields::STALLED_COUNTER)?
            .map(|v| parse_num(fields::STALLED_COUNTER, &v))
            .transpose()?
            .unwrap_or(0);
        let processed_on = take_str(fields::PROCESSED_ON)?
            .map(|v| parse_num(fields::PROCESSED_ON, &v))
            .transpose()?;
        let finished_on = take_str(fields::FINISHED_ON)?
            .map(|v| parse_num(fields::FINISHED_ON, &v))
            .transpose()?;
        let failed_reason = take_str(fields::FAILED_REASON)?;
        let opts = match take_str(fields::OPTS)? {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)?,
            _ => JobOptions::default(),
        };

        Ok(Self {
            id: id.into(),
            name,
            data: hash.remove(fields::DATA).unwrap_or_default(),
            opts,
            timestamp,
            delay,
            priority,
            attempts_made,
            stalled_counter,
            processed_on,
            finished_on,
            progress: hash.remove(fields::PROGRESS),
            returnvalue: hash.remove(fields::RETURN_VALUE),
            failed_reason,
        })
    }

    /// Decode the `[field, value, field, value, ...]` shape scripts return.
    pub fn from_flat_pairs(
        id: impl Into<String>,
        pairs: Vec<Vec<u8>>,
    ) -> Result<Self, JobRecordError> {
        let mut hash = HashMap::with_capacity(pairs.len() / 2);
        let mut iter = pairs.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            hash.insert(utf8("field name", field)?, value);
        }
        Self::from_hash(id, hash)
    }

    /// Numeric form of the id, if the queue allocated it.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    /// Rate-limit group carried in the id suffix, if any.
    pub fn group(&self) -> Option<&str> {
        self.opts.rate_limiter_key.as_deref()
    }

    /// Decode the payload as JSON.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// True once every allowed attempt has been consumed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.opts.attempts
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: String = "1",
            name: String = "test-job",
        }
        set {
            data: Vec<u8> = Vec::new(),
            opts: JobOptions = JobOptions::default(),
            timestamp: u64 = 1_000_000,
            delay: u64 = 0,
            priority: i64 = 0,
            attempts_made: u32 = 0,
            stalled_counter: u32 = 0,
        }
        option {
            processed_on: u64 = None,
            finished_on: u64 = None,
            progress: Vec<u8> = None,
            returnvalue: Vec<u8> = None,
            failed_reason: String = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
