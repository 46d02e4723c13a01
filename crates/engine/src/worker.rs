// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker: claim, process, renew, finish.
//!
//! Each concurrency slot runs an independent loop: claim via
//! `move_to_active`, fall back to the blocking pop when nothing is
//! ready, process under a periodically renewed lock, then finish with
//! the fused fetch-next so a busy queue needs one round-trip per job.
//! A lost lock aborts processing and discards the outcome; the stall
//! monitor owns the job from that point.

use crate::error::{EngineError, ProcessError};
use crate::events::EventBus;
use async_trait::async_trait;
use conveyor_core::{
    Clock, Job, JobOptions, KeySpace, QueueEvent, RateLimiterOptions, RepeatOptions, SystemClock,
    DEFAULT_PREFIX,
};
use conveyor_store::{AddJob, ClaimArgs, FinishArgs, Next, StoreClient, Transitions};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Job processor implemented by the application.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Process one job. The returned bytes become `returnvalue`; an
    /// error becomes `failedReason` and drives retry/backoff.
    async fn process(&self, job: &Job, handle: &JobHandle) -> Result<Vec<u8>, ProcessError>;
}

/// Per-job handle passed to the processor.
pub struct JobHandle {
    transitions: Transitions,
    events: EventBus,
    job_id: String,
    /// Cancelled when the job's lock is lost or the worker shuts down.
    abort: CancellationToken,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// True once processing should stop; the outcome would be discarded.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Record progress on the job and emit a `progress` event.
    pub async fn report_progress(&self, progress: &[u8]) -> Result<(), EngineError> {
        self.transitions.update_progress(&self.job_id, progress).await?;
        self.events.publish(QueueEvent::Progress {
            job_id: self.job_id.clone(),
            progress: String::from_utf8_lossy(progress).to_string(),
        });
        Ok(())
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub prefix: String,
    pub max_len_events: u64,
    /// Parallel processing slots.
    pub concurrency: usize,
    /// Lock TTL; a crashed worker delays recovery at most this long.
    pub lock_duration_ms: u64,
    /// Interval between lock renewals. Defaults to half the lock TTL.
    pub lock_renew_time_ms: Option<u64>,
    /// How long each blocking pop waits before re-checking.
    pub drain_delay_secs: f64,
    pub limiter: Option<RateLimiterOptions>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            max_len_events: crate::queue::DEFAULT_MAX_EVENTS,
            concurrency: 1,
            lock_duration_ms: 30_000,
            lock_renew_time_ms: None,
            drain_delay_secs: 5.0,
            limiter: None,
        }
    }
}

impl WorkerOptions {
    conveyor_core::setters! {
        into {
            prefix: String,
        }
        set {
            max_len_events: u64,
            concurrency: usize,
            lock_duration_ms: u64,
            drain_delay_secs: f64,
        }
        option {
            lock_renew_time_ms: u64,
            limiter: RateLimiterOptions,
        }
    }

    pub(crate) fn renew_interval_ms(&self) -> u64 {
        self.lock_renew_time_ms.unwrap_or(self.lock_duration_ms / 2).max(1)
    }
}

struct WorkerInner<C: Clock> {
    keys: KeySpace,
    client: StoreClient,
    transitions: Transitions,
    processor: Arc<dyn Processor>,
    opts: WorkerOptions,
    events: EventBus,
    shutdown: CancellationToken,
    clock: C,
}

/// A processing endpoint for one queue.
pub struct Worker<C: Clock = SystemClock> {
    inner: Arc<WorkerInner<C>>,
}

impl Worker<SystemClock> {
    pub fn new(
        client: &StoreClient,
        queue_name: &str,
        processor: Arc<dyn Processor>,
        opts: WorkerOptions,
    ) -> Self {
        Self::with_clock(client, queue_name, processor, opts, SystemClock)
    }
}

impl<C: Clock + 'static> Worker<C> {
    pub fn with_clock(
        client: &StoreClient,
        queue_name: &str,
        processor: Arc<dyn Processor>,
        opts: WorkerOptions,
        clock: C,
    ) -> Self {
        let keys = KeySpace::new(opts.prefix.clone(), queue_name);
        let transitions = Transitions::new(client, keys.clone(), opts.max_len_events);
        Self {
            inner: Arc::new(WorkerInner {
                keys,
                client: client.clone(),
                transitions,
                processor,
                opts,
                events: EventBus::new(),
                shutdown: CancellationToken::new(),
                clock,
            }),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Run until [`Worker::close`] is called. Closing cancels blocking
    /// pops and abandons in-flight jobs; their locks expire and the
    /// stall monitor returns them to the ready list.
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut slots = JoinSet::new();
        for slot in 0..self.inner.opts.concurrency.max(1) {
            let inner = Arc::clone(&self.inner);
            slots.spawn(async move { inner.slot_loop(slot).await });
        }
        while let Some(result) = slots.join_next().await {
            if let Err(err) = result {
                tracing::error!(error = %err, "worker slot panicked");
            }
        }
        Ok(())
    }

    /// Signal shutdown; `run` returns shortly after.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl<C: Clock + 'static> WorkerInner<C> {
    fn claim_args<'a>(&'a self, token: &'a str) -> ClaimArgs<'a> {
        ClaimArgs {
            token,
            lock_duration_ms: self.opts.lock_duration_ms,
            now_ms: self.clock.epoch_ms(),
            limiter: self.opts.limiter.as_ref(),
        }
    }

    async fn slot_loop(&self, slot: usize) {
        let mut blocking = loop {
            match self.client.blocking_connection().await {
                Ok(conn) => break conn,
                Err(err) => {
                    tracing::warn!(slot, error = %err, "blocking connection failed; retrying");
                    if self.sleep_or_shutdown(1_000).await {
                        return;
                    }
                }
            }
        };

        let mut drained = false;
        while !self.shutdown.is_cancelled() {
            let token = Uuid::new_v4().to_string();
            match self.claim_next(&token, &mut blocking).await {
                Ok(Some(job)) => {
                    drained = false;
                    self.process_chain(job, &token).await;
                }
                Ok(None) => {
                    if !drained {
                        drained = true;
                        self.events.publish(QueueEvent::Drained);
                    }
                }
                Err(err) => {
                    tracing::warn!(slot, error = %err, "claim failed; backing off");
                    if self.sleep_or_shutdown(1_000).await {
                        return;
                    }
                }
            }
        }
    }

    /// One claim round: direct pop, then the blocking arm as the
    /// wake-up signal with selection still reconciled by the script.
    async fn claim_next(
        &self,
        token: &str,
        blocking: &mut ConnectionManager,
    ) -> Result<Option<Job>, EngineError> {
        match self.transitions.move_to_active(&self.claim_args(token), None).await? {
            Next::Job(job) => return Ok(Some(job)),
            Next::RateLimited(delay_ms) => {
                self.sleep_or_shutdown(delay_ms).await;
                return Ok(None);
            }
            Next::Empty => {}
        }

        let wait_key = self.keys.wait();
        let active_key = self.keys.active();
        let moved = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            moved = StoreClient::brpoplpush(
                blocking,
                &wait_key,
                &active_key,
                self.opts.drain_delay_secs,
            ) => moved?,
        };

        let Some(job_id) = moved else {
            return Ok(None);
        };
        match self.transitions.move_to_active(&self.claim_args(token), Some(&job_id)).await? {
            Next::Job(job) => Ok(Some(job)),
            Next::RateLimited(delay_ms) => {
                self.sleep_or_shutdown(delay_ms).await;
                Ok(None)
            }
            Next::Empty => Ok(None),
        }
    }

    /// Process a job, then keep going with whatever the fused
    /// finish-and-fetch hands back.
    async fn process_chain(&self, mut job: Job, token: &str) {
        loop {
            match self.process_one(job, token).await {
                Some(next) => job = next,
                None => return,
            }
        }
    }

    async fn process_one(&self, job: Job, token: &str) -> Option<Job> {
        self.events.publish(QueueEvent::Active { job_id: job.id.clone() });

        let abort = CancellationToken::new();
        let renewal = self.spawn_lock_renewal(&job.id, token, abort.clone());
        let handle = JobHandle {
            transitions: self.transitions.clone(),
            events: self.events.clone(),
            job_id: job.id.clone(),
            abort: abort.clone(),
        };

        let outcome = tokio::select! {
            _ = abort.cancelled() => None,
            _ = self.shutdown.cancelled() => None,
            result = self.processor.process(&job, &handle) => Some(result),
        };

        renewal.abort();

        let Some(result) = outcome else {
            // lock lost or worker closing: the outcome is discarded, the
            // lock expires, and the stall monitor recovers the job
            tracing::warn!(job_id = %job.id, "processing abandoned");
            return None;
        };

        match result {
            Ok(value) => self.finish_completed(&job, token, &value).await,
            Err(err) => {
                self.handle_failure(&job, token, &err).await;
                None
            }
        }
    }

    fn spawn_lock_renewal(
        &self,
        job_id: &str,
        token: &str,
        abort: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let transitions = self.transitions.clone();
        let job_id = job_id.to_string();
        let token = token.to_string();
        let interval = self.opts.renew_interval_ms();
        let lock_duration = self.opts.lock_duration_ms;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(interval)).await;
                if abort.is_cancelled() {
                    return;
                }
                match transitions.extend_lock(&job_id, &token, lock_duration).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, "lock lost; aborting processing");
                        abort.cancel();
                        return;
                    }
                    Err(err) => {
                        // transient store trouble: keep trying while the
                        // TTL still has headroom
                        tracing::warn!(job_id = %job_id, error = %err, "lock renewal failed");
                    }
                }
            }
        })
    }

    async fn finish_completed(&self, job: &Job, token: &str, value: &[u8]) -> Option<Job> {
        let fetch_next = !self.shutdown.is_cancelled();
        let finished = self
            .transitions
            .move_to_finished(&FinishArgs {
                job_id: &job.id,
                token: Some(token),
                failed: false,
                result: value,
                finished_on: self.clock.epoch_ms(),
                keep: job.opts.keep_policy(false),
                fetch_next,
                claim: self.claim_args(token),
            })
            .await;

        match finished {
            Ok(next) => {
                self.events.publish(QueueEvent::Completed {
                    job_id: job.id.clone(),
                    returnvalue: String::from_utf8_lossy(value).to_string(),
                });
                self.schedule_repeat_successor(job).await;
                match next {
                    Next::Job(next_job) => Some(next_job),
                    Next::RateLimited(delay_ms) => {
                        self.sleep_or_shutdown(delay_ms).await;
                        None
                    }
                    Next::Empty => None,
                }
            }
            Err(err) => {
                // the job may have been reclaimed by stall recovery; its
                // outcome is whatever the new owner reports
                tracing::warn!(job_id = %job.id, error = %err, "finishing job failed");
                None
            }
        }
    }

    async fn handle_failure(&self, job: &Job, token: &str, err: &ProcessError) {
        if should_retry(&job.opts, job.attempts_made) {
            let delay = job.opts.backoff.next_delay(job.attempts_made);
            let retried = if delay == 0 {
                self.transitions.retry(&job.id, Some(token), job.opts.lifo).await
            } else {
                let due = self.clock.epoch_ms() + delay;
                self.transitions.move_to_delayed(&job.id, due, Some(token)).await
            };
            if let Err(store_err) = retried {
                tracing::warn!(job_id = %job.id, error = %store_err, "retry scheduling failed");
            }
            return;
        }

        let finished = self
            .transitions
            .move_to_finished(&FinishArgs {
                job_id: &job.id,
                token: Some(token),
                failed: true,
                result: err.message.as_bytes(),
                finished_on: self.clock.epoch_ms(),
                keep: job.opts.keep_policy(true),
                fetch_next: false,
                claim: self.claim_args(token),
            })
            .await;
        if let Err(store_err) = finished {
            tracing::warn!(job_id = %job.id, error = %store_err, "failing job failed");
        }
        self.events.publish(QueueEvent::Failed {
            job_id: job.id.clone(),
            failed_reason: err.message.clone(),
        });
        self.schedule_repeat_successor(job).await;
    }

    /// Enqueue the next iteration of a repeatable job.
    async fn schedule_repeat_successor(&self, job: &Job) {
        let Some(repeat) = &job.opts.repeat else {
            return;
        };
        let Some(next) = next_iteration(repeat, self.clock.epoch_ms()) else {
            return;
        };

        let mut opts = job.opts.clone();
        opts.repeat =
            Some(RepeatOptions { every: repeat.every, limit: repeat.limit, count: repeat.count + 1 });
        opts.delay = next.delay;
        opts.job_id = Some(format!("repeat:{}:{}", job.name, next.due_at));

        let now = self.clock.epoch_ms();
        let added = self
            .transitions
            .add(AddJob {
                name: &job.name,
                data: &job.data,
                opts: &opts,
                timestamp: now,
                wait_children: false,
            })
            .await;
        match added {
            Ok(_) => {
                let member = repeat.template_key(&job.name);
                if let Err(err) =
                    self.client.zset_add(&self.keys.repeat(), &member, next.due_at as f64).await
                {
                    tracing::warn!(error = %err, "repeat registry update failed");
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, error = %err, "repeat successor add failed")
            }
        }
    }

    /// Sleep unless shutdown fires first; returns true on shutdown.
    async fn sleep_or_shutdown(&self, ms: u64) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => false,
        }
    }
}

/// Next iteration schedule for a repeat template, or `None` when the
/// iteration limit is reached.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NextIteration {
    pub due_at: u64,
    pub delay: u64,
}

pub(crate) fn next_iteration(repeat: &RepeatOptions, now: u64) -> Option<NextIteration> {
    if repeat.every == 0 {
        return None;
    }
    if let Some(limit) = repeat.limit {
        if repeat.count + 1 >= limit {
            return None;
        }
    }
    let due_at = now - (now % repeat.every) + repeat.every;
    Some(NextIteration { due_at, delay: due_at - now })
}

/// Whether a failure should be retried, given the claim-time attempt
/// accounting (`attemptsMade` counts this attempt already).
pub(crate) fn should_retry(opts: &JobOptions, attempts_made: u32) -> bool {
    attempts_made < opts.attempts
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
