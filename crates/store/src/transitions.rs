// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed wrappers for the atomic transition set.
//!
//! This is the only layer that writes the queue's state sets. Each
//! method marshals keys and arguments for one script, runs it, and
//! decodes the reply; no transition is ever assembled from client-side
//! pipelines.

use crate::client::StoreClient;
use crate::error::StoreError;
use crate::scripts::ScriptRegistry;
use conveyor_core::{
    Job, JobOptions, JobState, KeySpace, RateLimiterOptions, ScriptCode,
};
use redis::aio::ConnectionManager;
use redis::Value;

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum Next {
    /// A job was claimed; the lock is held under the caller's token.
    Job(Job),
    /// The rate limit window is exhausted for this many milliseconds.
    RateLimited(u64),
    /// Nothing is ready.
    Empty,
}

/// Inputs for `add`.
#[derive(Debug)]
pub struct AddJob<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub opts: &'a JobOptions,
    /// Creation time (ms); delayed jobs become due at `timestamp + delay`.
    pub timestamp: u64,
    /// Park in waiting-children until the dependency set empties.
    pub wait_children: bool,
}

/// Claim parameters shared by `move_to_active` and the fused fetch-next.
#[derive(Debug, Clone, Copy)]
pub struct ClaimArgs<'a> {
    pub token: &'a str,
    pub lock_duration_ms: u64,
    pub now_ms: u64,
    pub limiter: Option<&'a RateLimiterOptions>,
}

/// Inputs for `move_to_finished`.
#[derive(Debug)]
pub struct FinishArgs<'a> {
    pub job_id: &'a str,
    /// `None` skips lock verification (stall-recovery paths only).
    pub token: Option<&'a str>,
    /// Target `failed` instead of `completed`.
    pub failed: bool,
    /// Return value or failure reason, opaque bytes.
    pub result: &'a [u8],
    pub finished_on: u64,
    pub keep: conveyor_core::KeepPolicy,
    /// Claim the next ready job in the same script call.
    pub fetch_next: bool,
    pub claim: ClaimArgs<'a>,
}

/// Result of one stall sweep.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StallSweep {
    /// Jobs failed for stalling past the allowed limit.
    pub failed: Vec<String>,
    /// Jobs returned to the ready list.
    pub recovered: Vec<String>,
}

/// Containers `clean` can sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    Completed,
    Failed,
    Delayed,
    Wait,
    Paused,
    Active,
}

impl CleanTarget {
    pub fn wire_name(&self) -> &'static str {
        match self {
            CleanTarget::Completed => "completed",
            CleanTarget::Failed => "failed",
            CleanTarget::Delayed => "delayed",
            CleanTarget::Wait => "wait",
            CleanTarget::Paused => "paused",
            CleanTarget::Active => "active",
        }
    }

    fn key(&self, keys: &KeySpace) -> String {
        match self {
            CleanTarget::Completed => keys.completed(),
            CleanTarget::Failed => keys.failed(),
            CleanTarget::Delayed => keys.delayed(),
            CleanTarget::Wait => keys.wait(),
            CleanTarget::Paused => keys.paused(),
            CleanTarget::Active => keys.active(),
        }
    }
}

/// Source set for `reprocess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessSource {
    Completed,
    Failed,
}

impl ReprocessSource {
    fn key(&self, keys: &KeySpace) -> String {
        match self {
            ReprocessSource::Completed => keys.completed(),
            ReprocessSource::Failed => keys.failed(),
        }
    }

    fn cleared_field(&self) -> &'static str {
        match self {
            ReprocessSource::Completed => "returnvalue",
            ReprocessSource::Failed => "failedReason",
        }
    }
}

/// The transition runner for one queue.
#[derive(Clone)]
pub struct Transitions {
    keys: KeySpace,
    scripts: ScriptRegistry,
    conn: ConnectionManager,
    max_events: u64,
}

impl Transitions {
    pub fn new(client: &StoreClient, keys: KeySpace, max_events: u64) -> Self {
        Self {
            keys,
            scripts: ScriptRegistry::for_version(client.version()),
            conn: client.connection(),
            max_events,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn max_events(&self) -> u64 {
        self.max_events
    }

    /// Add a job; returns the id under which it was stored.
    pub async fn add(&self, job: AddJob<'_>) -> Result<String, StoreError> {
        let opts_json = serde_json::to_string(job.opts)?;
        let (parent_id, parent_queue) = match &job.opts.parent {
            Some(parent) => (
                parent.id.clone(),
                format!("{}:{}", self.keys.prefix(), parent.queue),
            ),
            None => (String::new(), String::new()),
        };

        let mut conn = self.conn.clone();
        let mut inv = self.scripts.add_job.prepare_invoke();
        inv.key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.meta())
            .key(self.keys.delayed())
            .key(self.keys.priority())
            .key(self.keys.events())
            .key(self.keys.delay_marker())
            .arg(self.keys.base())
            .arg(job.opts.job_id.as_deref().unwrap_or(""))
            .arg(job.name)
            .arg(job.timestamp)
            .arg(job.data)
            .arg(opts_json)
            .arg(job.opts.delay)
            .arg(job.opts.priority)
            .arg(flag(job.opts.lifo))
            .arg(self.max_events)
            .arg(parent_id)
            .arg(parent_queue)
            .arg(flag(job.wait_children))
            .arg(job.opts.rate_limiter_key.as_deref().unwrap_or(""));
        let id: String = inv.invoke_async(&mut conn).await?;
        Ok(id)
    }

    /// Claim the next ready job. `fetched_id` carries an id the blocking
    /// arm already moved into `active`; selection is still reconciled
    /// against the priority set.
    pub async fn move_to_active(
        &self,
        claim: &ClaimArgs<'_>,
        fetched_id: Option<&str>,
    ) -> Result<Next, StoreError> {
        let (limiter_max, limiter_duration) = limiter_args(claim.limiter);
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.move_to_active.prepare_invoke();
        inv.key(self.keys.wait())
            .key(self.keys.active())
            .key(self.keys.priority())
            .key(self.keys.events())
            .key(self.keys.stalled())
            .key(self.keys.limiter(None))
            .arg(self.keys.base())
            .arg(claim.token)
            .arg(claim.lock_duration_ms)
            .arg(claim.now_ms)
            .arg(self.max_events)
            .arg(limiter_max)
            .arg(limiter_duration)
            .arg(fetched_id.unwrap_or(""));
        let value: Value = inv.invoke_async(&mut conn).await?;
        decode_claim("move_to_active", value, fetched_id.unwrap_or(""))
    }

    /// Refresh a lock TTL; `false` means the lock was lost and the
    /// worker must abort processing.
    pub async fn extend_lock(
        &self,
        job_id: &str,
        token: &str,
        duration_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.extend_lock.prepare_invoke();
        inv.key(self.keys.lock(job_id)).arg(token).arg(duration_ms);
        let refreshed: i64 = inv.invoke_async(&mut conn).await?;
        Ok(refreshed == 1)
    }

    /// Finish an active job; optionally returns the next claimed job.
    pub async fn move_to_finished(&self, args: &FinishArgs<'_>) -> Result<Next, StoreError> {
        let (remove, keep_count) = args.keep.script_args();
        let (limiter_max, limiter_duration) = limiter_args(args.claim.limiter);
        let target = if args.failed { self.keys.failed() } else { self.keys.completed() };
        let (result_field, event_name) = if args.failed {
            ("failedReason", "failed")
        } else {
            ("returnvalue", "completed")
        };

        let mut conn = self.conn.clone();
        let mut inv = self.scripts.move_to_finished.prepare_invoke();
        inv.key(self.keys.active())
            .key(target)
            .key(self.keys.events())
            .key(self.keys.wait())
            .key(self.keys.priority())
            .key(self.keys.stalled())
            .key(self.keys.limiter(None))
            .arg(self.keys.base())
            .arg(args.job_id)
            .arg(args.token.unwrap_or(""))
            .arg(args.finished_on)
            .arg(result_field)
            .arg(args.result)
            .arg(event_name)
            .arg(flag(remove))
            .arg(keep_count.map(|n| n.to_string()).unwrap_or_default())
            .arg(flag(args.fetch_next))
            .arg(self.max_events)
            .arg(args.claim.lock_duration_ms)
            .arg(limiter_max)
            .arg(limiter_duration);
        let value: Value = inv.invoke_async(&mut conn).await?;
        decode_claim("move_to_finished", value, args.job_id)
    }

    /// Park an active job until `due_at_ms`.
    pub async fn move_to_delayed(
        &self,
        job_id: &str,
        due_at_ms: u64,
        token: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.move_to_delayed.prepare_invoke();
        inv.key(self.keys.active())
            .key(self.keys.delayed())
            .key(self.keys.events())
            .key(self.keys.delay_marker())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(due_at_ms)
            .arg(token.unwrap_or(""))
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        require_ok("move_to_delayed", code, job_id).map(|_| ())
    }

    /// Park an active job until its children finish. `false` means the
    /// dependency set was already empty and the job stayed active.
    pub async fn move_to_waiting_children(
        &self,
        job_id: &str,
        token: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.move_to_waiting_children.prepare_invoke();
        inv.key(self.keys.active())
            .key(self.keys.waiting_children())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(token)
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        Ok(require_ok("move_to_waiting_children", code, job_id)? == ScriptCode::Ok)
    }

    /// Move a delayed job into the ready list ahead of schedule.
    pub async fn promote(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.promote.prepare_invoke();
        inv.key(self.keys.delayed())
            .key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.meta())
            .key(self.keys.priority())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        require_ok("promote", code, job_id).map(|_| ())
    }

    /// Promote every due delayed job; returns the next-due composite
    /// score, or `None` when the delayed set is empty.
    pub async fn update_delay_set(&self, now_ms: u64) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.update_delay_set.prepare_invoke();
        inv.key(self.keys.delayed())
            .key(self.keys.wait())
            .key(self.keys.priority())
            .key(self.keys.paused())
            .key(self.keys.meta())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(now_ms)
            .arg(self.max_events);
        let value: Value = inv.invoke_async(&mut conn).await?;
        decode_next_due("update_delay_set", value)
    }

    /// Pause (`true`) or resume (`false`) the queue.
    pub async fn pause(&self, pause: bool) -> Result<(), StoreError> {
        let (src, dst, event) = if pause {
            (self.keys.wait(), self.keys.paused(), "paused")
        } else {
            (self.keys.paused(), self.keys.wait(), "resumed")
        };
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.pause.prepare_invoke();
        inv.key(src)
            .key(dst)
            .key(self.keys.meta())
            .key(self.keys.events())
            .arg(event)
            .arg(self.max_events);
        let _: i64 = inv.invoke_async(&mut conn).await?;
        Ok(())
    }

    /// Remove a job and its descendants. Refuses while any job in the
    /// tree is locked.
    pub async fn remove(&self, job_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.remove_job.prepare_invoke();
        inv.arg(self.keys.base()).arg(job_id).arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        match code {
            1 => Ok(()),
            -1 => Err(StoreError::Locked { id: job_id.to_string() }),
            other => Err(StoreError::BadReply {
                script: "remove_job",
                detail: format!("code {}", other),
            }),
        }
    }

    /// Sweep one container for records older than `cutoff_ms`.
    pub async fn clean(
        &self,
        target: CleanTarget,
        cutoff_ms: u64,
        limit: u64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.clean_jobs_in_set.prepare_invoke();
        inv.key(target.key(&self.keys))
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(cutoff_ms)
            .arg(limit)
            .arg(target.wire_name())
            .arg(self.max_events);
        let removed: Vec<String> = inv.invoke_async(&mut conn).await?;
        Ok(removed)
    }

    /// Delete up to `count` records; returns 0 once the queue is gone.
    /// The queue must be paused, and free of active jobs unless forced.
    pub async fn obliterate(&self, count: u64, force: bool) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.obliterate.prepare_invoke();
        inv.arg(self.keys.base()).arg(count.max(1)).arg(flag(force));
        let code: i64 = inv.invoke_async(&mut conn).await?;
        match code {
            -1 => Err(StoreError::NotPaused),
            -2 => Err(StoreError::HasActiveJobs),
            n if n >= 0 => Ok(n as u64),
            other => Err(StoreError::BadReply {
                script: "obliterate",
                detail: format!("code {}", other),
            }),
        }
    }

    /// Move a finished job back into the ready list.
    pub async fn reprocess(
        &self,
        job_id: &str,
        source: ReprocessSource,
        lifo: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.reprocess_job.prepare_invoke();
        inv.key(source.key(&self.keys))
            .key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.meta())
            .key(self.keys.priority())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(push_command(lifo))
            .arg(source.cleared_field())
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        match code {
            1 => Ok(()),
            0 => Err(StoreError::MissingJob(job_id.to_string())),
            -1 => Err(StoreError::Locked { id: job_id.to_string() }),
            -2 => Err(StoreError::WrongState(job_id.to_string())),
            other => Err(StoreError::BadReply {
                script: "reprocess_job",
                detail: format!("code {}", other),
            }),
        }
    }

    /// Requeue an active job for another attempt, without delay.
    pub async fn retry(
        &self,
        job_id: &str,
        token: Option<&str>,
        lifo: bool,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.retry_job.prepare_invoke();
        inv.key(self.keys.active())
            .key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.meta())
            .key(self.keys.priority())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(token.unwrap_or(""))
            .arg(push_command(lifo))
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        require_ok("retry_job", code, job_id).map(|_| ())
    }

    /// One stall-check cycle. Guarded server-side so concurrent
    /// monitors perform a single sweep per interval.
    pub async fn sweep_stalled(
        &self,
        max_stalled_count: u32,
        now_ms: u64,
        interval_ms: u64,
    ) -> Result<StallSweep, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.move_stalled_jobs_to_wait.prepare_invoke();
        inv.key(self.keys.stalled())
            .key(self.keys.wait())
            .key(self.keys.active())
            .key(self.keys.failed())
            .key(self.keys.stalled_check())
            .key(self.keys.meta())
            .key(self.keys.paused())
            .key(self.keys.priority())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(max_stalled_count)
            .arg(now_ms)
            .arg(interval_ms)
            .arg(self.max_events);
        let (failed, recovered): (Vec<String>, Vec<String>) =
            inv.invoke_async(&mut conn).await?;
        Ok(StallSweep { failed, recovered })
    }

    /// Which logical set currently holds the id.
    pub async fn get_state(&self, job_id: &str) -> Result<JobState, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.get_state.prepare_invoke();
        inv.key(self.keys.completed())
            .key(self.keys.failed())
            .key(self.keys.delayed())
            .key(self.keys.active())
            .key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.waiting_children())
            .arg(job_id);
        let state: String = inv.invoke_async(&mut conn).await?;
        Ok(JobState::from_wire(&state))
    }

    /// Atomically discard every queued-but-unstarted job.
    pub async fn drain(&self, include_delayed: bool) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.drain.prepare_invoke();
        inv.key(self.keys.wait())
            .key(self.keys.paused())
            .key(self.keys.priority())
            .key(self.keys.delayed())
            .key(self.keys.events())
            .arg(self.keys.base())
            .arg(flag(include_delayed))
            .arg(self.max_events);
        let discarded: u64 = inv.invoke_async(&mut conn).await?;
        Ok(discarded)
    }

    /// Record processor progress and emit the matching event.
    pub async fn update_progress(
        &self,
        job_id: &str,
        progress: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut inv = self.scripts.update_progress.prepare_invoke();
        inv.key(self.keys.events())
            .arg(self.keys.base())
            .arg(job_id)
            .arg(progress)
            .arg(self.max_events);
        let code: i64 = inv.invoke_async(&mut conn).await?;
        require_ok("update_progress", code, job_id).map(|_| ())
    }
}

fn push_command(lifo: bool) -> &'static str {
    if lifo {
        "RPUSH"
    } else {
        "LPUSH"
    }
}

fn limiter_args(limiter: Option<&RateLimiterOptions>) -> (u32, u64) {
    match limiter {
        Some(l) => (l.max, l.duration_ms),
        None => (0, 0),
    }
}

/// Map a plain integer reply onto [`ScriptCode`], surfacing errors.
pub(crate) fn require_ok(
    script: &'static str,
    raw: i64,
    job_id: &str,
) -> Result<ScriptCode, StoreError> {
    let code = ScriptCode::from_i64(raw).ok_or_else(|| StoreError::BadReply {
        script,
        detail: format!("code {}", raw),
    })?;
    if code.is_err() {
        return Err(StoreError::from_code(script, code, job_id));
    }
    Ok(code)
}

fn string_of(value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
        Value::SimpleString(s) => Some(s),
        _ => None,
    }
}

/// Decode the shared claim reply shape: nil (nothing ready), a
/// non-negative integer (rate-limit delay in ms), a negative integer
/// (error code), or `{jobId, fields}`.
pub(crate) fn decode_claim(
    script: &'static str,
    value: Value,
    job_id: &str,
) -> Result<Next, StoreError> {
    match value {
        Value::Nil => Ok(Next::Empty),
        Value::Int(n) if n >= 0 => Ok(Next::RateLimited(n as u64)),
        Value::Int(n) => {
            let code = ScriptCode::from_i64(n).ok_or_else(|| StoreError::BadReply {
                script,
                detail: format!("code {}", n),
            })?;
            Err(StoreError::from_code(script, code, job_id))
        }
        Value::Array(mut items) if items.len() == 2 => {
            let fields = items.pop().unwrap_or(Value::Nil);
            let id = items.pop().and_then(string_of).ok_or_else(|| StoreError::BadReply {
                script,
                detail: "non-string job id".to_string(),
            })?;
            let pairs = match fields {
                Value::Array(values) => values
                    .into_iter()
                    .map(|v| match v {
                        Value::BulkString(bytes) => Ok(bytes),
                        Value::SimpleString(s) => Ok(s.into_bytes()),
                        Value::Int(n) => Ok(n.to_string().into_bytes()),
                        other => Err(StoreError::BadReply {
                            script,
                            detail: format!("unexpected field value {:?}", other),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => {
                    return Err(StoreError::BadReply {
                        script,
                        detail: format!("unexpected fields reply {:?}", other),
                    })
                }
            };
            Ok(Next::Job(Job::from_flat_pairs(id, pairs)?))
        }
        other => Err(StoreError::BadReply {
            script,
            detail: format!("unexpected reply {:?}", other),
        }),
    }
}

/// Decode `update_delay_set`'s reply: -1 for an empty set, otherwise
/// the next-due composite score (an integer, or a string once the
/// score exceeds the server's integer formatting range).
pub(crate) fn decode_next_due(
    script: &'static str,
    value: Value,
) -> Result<Option<u64>, StoreError> {
    match value {
        Value::Int(n) if n < 0 => Ok(None),
        Value::Int(n) => Ok(Some(n as u64)),
        Value::BulkString(bytes) => {
            let raw = String::from_utf8_lossy(&bytes).to_string();
            raw.parse::<f64>()
                .map(|score| Some(score as u64))
                .map_err(|_| StoreError::BadReply {
                    script,
                    detail: format!("unparsable score '{}'", raw),
                })
        }
        other => Err(StoreError::BadReply {
            script,
            detail: format!("unexpected reply {:?}", other),
        }),
    }
}

#[cfg(test)]
#[path = "transitions_tests.rs"]
mod tests;
