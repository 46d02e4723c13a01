// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job options as stored in the job hash (`opts` field, JSON).

use serde::{Deserialize, Serialize};

/// What to do with a job's record once it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "KeepPolicyRepr", into = "KeepPolicyRepr")]
pub enum KeepPolicy {
    /// Keep the record in the completed/failed set indefinitely.
    #[default]
    KeepAll,
    /// Delete the job hash as part of the finishing transition.
    Remove,
    /// Keep only the N most recent finished records.
    Last(u64),
}

/// Wire shape: `false` keeps, `true` removes, a number keeps a window.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeepPolicyRepr {
    Flag(bool),
    Count(u64),
}

impl From<KeepPolicyRepr> for KeepPolicy {
    fn from(repr: KeepPolicyRepr) -> Self {
        match repr {
            KeepPolicyRepr::Flag(false) => KeepPolicy::KeepAll,
            KeepPolicyRepr::Flag(true) => KeepPolicy::Remove,
            KeepPolicyRepr::Count(n) => KeepPolicy::Last(n),
        }
    }
}

impl From<KeepPolicy> for KeepPolicyRepr {
    fn from(policy: KeepPolicy) -> Self {
        match policy {
            KeepPolicy::KeepAll => KeepPolicyRepr::Flag(false),
            KeepPolicy::Remove => KeepPolicyRepr::Flag(true),
            KeepPolicy::Last(n) => KeepPolicyRepr::Count(n),
        }
    }
}

impl KeepPolicy {
    /// Encode for script ARGV: (remove whole record, keep-window size).
    pub fn script_args(&self) -> (bool, Option<u64>) {
        match self {
            KeepPolicy::KeepAll => (false, None),
            KeepPolicy::Remove => (true, None),
            KeepPolicy::Last(n) => (false, Some(*n)),
        }
    }
}

/// Delay schedule applied between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Retry immediately.
    #[default]
    None,
    /// Constant delay between attempts.
    Fixed { delay: u64 },
    /// `delay * 2^(attempts_made - 1)` milliseconds.
    Exponential { delay: u64 },
}

impl BackoffPolicy {
    /// Delay in ms before the next attempt, given how many attempts ran.
    pub fn next_delay(&self, attempts_made: u32) -> u64 {
        match self {
            BackoffPolicy::None => 0,
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { delay } => {
                let shift = attempts_made.saturating_sub(1).min(32);
                delay.saturating_mul(1u64 << shift)
            }
        }
    }
}

/// Reference to a parent job in this or another queue under the same prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    /// Parent queue name (not the full key).
    pub queue: String,
}

/// Interval-repeat template options. Cron-expression schedules are
/// evaluated by an external scheduler and are not handled here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatOptions {
    /// Milliseconds between iterations.
    pub every: u64,
    /// Stop after this many iterations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Iteration counter, maintained by the queue.
    #[serde(default)]
    pub count: u64,
}

impl RepeatOptions {
    /// Registry member key for this template.
    pub fn template_key(&self, name: &str) -> String {
        format!("{}:::{}", name, self.every)
    }
}

fn default_attempts() -> u32 {
    1
}

fn is_default_attempts(v: &u32) -> bool {
    *v == default_attempts()
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_default_keep(v: &KeepPolicy) -> bool {
    *v == KeepPolicy::KeepAll
}

fn is_default_backoff(v: &BackoffPolicy) -> bool {
    *v == BackoffPolicy::None
}

/// Options supplied at `add` time and persisted with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Caller-supplied id; otherwise the queue allocates a numeric one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Lower value = more urgent; 0 means unprioritized.
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub priority: i64,
    /// Milliseconds to hold the job in `delayed` before it becomes ready.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub delay: u64,
    /// Push at the head of `wait` instead of the tail.
    #[serde(skip_serializing_if = "is_false")]
    pub lifo: bool,
    /// Override the creation timestamp (ms since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Total number of claims before the job is failed for good.
    #[serde(skip_serializing_if = "is_default_attempts")]
    pub attempts: u32,
    #[serde(skip_serializing_if = "is_default_backoff")]
    pub backoff: BackoffPolicy,
    #[serde(skip_serializing_if = "is_default_keep")]
    pub remove_on_complete: KeepPolicy,
    #[serde(skip_serializing_if = "is_default_keep")]
    pub remove_on_fail: KeepPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatOptions>,
    /// Resolved rate-limit group, appended to the job id as `:<group>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter_key: Option<String>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            priority: 0,
            delay: 0,
            lifo: false,
            timestamp: None,
            attempts: default_attempts(),
            backoff: BackoffPolicy::default(),
            remove_on_complete: KeepPolicy::default(),
            remove_on_fail: KeepPolicy::default(),
            parent: None,
            repeat: None,
            rate_limiter_key: None,
        }
    }
}

impl JobOptions {
    /// Keep policy for the given finish target set.
    pub fn keep_policy(&self, failed: bool) -> KeepPolicy {
        if failed {
            self.remove_on_fail
        } else {
            self.remove_on_complete
        }
    }
}

crate::builder! {
    pub struct JobOptionsBuilder => JobOptions {
        set {
            priority: i64 = 0,
            delay: u64 = 0,
            lifo: bool = false,
            attempts: u32 = 1,
            backoff: BackoffPolicy = BackoffPolicy::None,
            remove_on_complete: KeepPolicy = KeepPolicy::KeepAll,
            remove_on_fail: KeepPolicy = KeepPolicy::KeepAll,
        }
        option {
            job_id: String = None,
            timestamp: u64 = None,
            parent: ParentRef = None,
            repeat: RepeatOptions = None,
            rate_limiter_key: String = None,
        }
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
