// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producer façade over the transition layer.

use crate::error::EngineError;
use crate::events::EventBus;
use conveyor_core::{
    Clock, Job, JobOptions, JobState, KeySpace, QueueEvent, RateLimiterOptions, RepeatOptions,
    SystemClock, DEFAULT_PREFIX,
};
use conveyor_store::{AddJob, CleanTarget, ReprocessSource, StoreClient, Transitions};
use std::collections::HashMap;

/// Default approximate cap on the events stream.
pub const DEFAULT_MAX_EVENTS: u64 = 10_000;

/// Queue-wide configuration.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub prefix: String,
    /// Approximate cap on the events stream, persisted into `meta` at
    /// queue init.
    pub max_len_events: u64,
    /// Needed at add time when jobs are grouped for rate limiting.
    pub limiter: Option<RateLimiterOptions>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            max_len_events: DEFAULT_MAX_EVENTS,
            limiter: None,
        }
    }
}

impl QueueOptions {
    conveyor_core::setters! {
        into {
            prefix: String,
        }
        set {
            max_len_events: u64,
        }
        option {
            limiter: RateLimiterOptions,
        }
    }
}

/// One entry of an `add_bulk` call.
#[derive(Debug, Clone)]
pub struct BulkJob {
    pub name: String,
    pub data: Vec<u8>,
    pub opts: JobOptions,
}

/// A repeatable-job template registered in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatableJob {
    pub name: String,
    pub every_ms: u64,
    pub next_ms: u64,
}

/// Producer handle for one queue.
pub struct Queue<C: Clock = SystemClock> {
    keys: KeySpace,
    client: StoreClient,
    transitions: Transitions,
    limiter: Option<RateLimiterOptions>,
    events: EventBus,
    clock: C,
}

impl Queue<SystemClock> {
    /// Open the queue and persist its stream cap into `meta`.
    pub async fn new(
        client: &StoreClient,
        name: &str,
        opts: QueueOptions,
    ) -> Result<Self, EngineError> {
        Self::with_clock(client, name, opts, SystemClock).await
    }
}

impl<C: Clock> Queue<C> {
    pub async fn with_clock(
        client: &StoreClient,
        name: &str,
        opts: QueueOptions,
        clock: C,
    ) -> Result<Self, EngineError> {
        let keys = KeySpace::new(opts.prefix.clone(), name);
        let transitions = Transitions::new(client, keys.clone(), opts.max_len_events);
        client
            .hash_set(&keys.meta(), "opts.maxLenEvents", &opts.max_len_events.to_string())
            .await?;
        Ok(Self {
            keys,
            client: client.clone(),
            transitions,
            limiter: opts.limiter,
            events: EventBus::new(),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        self.keys.queue()
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn transitions(&self) -> &Transitions {
        &self.transitions
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Add a job. Returns the id under which it was stored.
    pub async fn add(
        &self,
        name: &str,
        data: &[u8],
        opts: JobOptions,
    ) -> Result<String, EngineError> {
        self.add_inner(name, data, opts, false).await
    }

    /// Add a parent job that stays in waiting-children until every job
    /// added with `opts.parent` pointing at it has completed.
    pub async fn add_parent(
        &self,
        name: &str,
        data: &[u8],
        opts: JobOptions,
    ) -> Result<String, EngineError> {
        self.add_inner(name, data, opts, true).await
    }

    async fn add_inner(
        &self,
        name: &str,
        data: &[u8],
        mut opts: JobOptions,
        wait_children: bool,
    ) -> Result<String, EngineError> {
        if opts.rate_limiter_key.is_none() {
            opts.rate_limiter_key = resolve_group_key(self.limiter.as_ref(), data);
        }
        if let Some(repeat) = opts.repeat.clone() {
            self.schedule_repeat_template(name, &mut opts, &repeat).await?;
        }
        let timestamp = opts.timestamp.unwrap_or_else(|| self.clock.epoch_ms());
        let id = self
            .transitions
            .add(AddJob { name, data, opts: &opts, timestamp, wait_children })
            .await?;
        self.events.publish(QueueEvent::Added { job_id: id.clone(), name: name.to_string() });
        Ok(id)
    }

    /// Add several jobs; each add is individually atomic.
    pub async fn add_bulk(&self, jobs: Vec<BulkJob>) -> Result<Vec<String>, EngineError> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.add(&job.name, &job.data, job.opts).await?);
        }
        Ok(ids)
    }

    /// Turn a repeat template into a concrete delayed iteration and
    /// track it in the repeat registry.
    async fn schedule_repeat_template(
        &self,
        name: &str,
        opts: &mut JobOptions,
        repeat: &RepeatOptions,
    ) -> Result<(), EngineError> {
        let now = self.clock.epoch_ms();
        let next = next_repeat_ms(now, repeat.every);
        opts.delay = next.saturating_sub(now);
        opts.job_id = Some(format!("repeat:{}:{}", name, next));
        self.client
            .zset_add(&self.keys.repeat(), &repeat.template_key(name), next as f64)
            .await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.transitions.pause(true).await?;
        self.events.publish(QueueEvent::Paused);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.transitions.pause(false).await?;
        self.events.publish(QueueEvent::Resumed);
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, EngineError> {
        Ok(self.client.hash_exists(&self.keys.meta(), "paused").await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, EngineError> {
        let hash = self.client.hash_all(&self.keys.job(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        let job = Job::from_hash(id, hash).map_err(conveyor_store::StoreError::Record)?;
        Ok(Some(job))
    }

    pub async fn get_state(&self, id: &str) -> Result<JobState, EngineError> {
        Ok(self.transitions.get_state(id).await?)
    }

    /// Page through the ids of one state, oldest-first when `ascending`.
    async fn state_ids(&self, state: JobState) -> Result<Vec<String>, EngineError> {
        let ids = match state {
            JobState::Waiting => {
                // head of the list is the newest entry
                let mut ids = self.client.list_range(&self.keys.wait(), 0, -1).await?;
                ids.reverse();
                ids
            }
            JobState::Paused => {
                let mut ids = self.client.list_range(&self.keys.paused(), 0, -1).await?;
                ids.reverse();
                ids
            }
            JobState::Active => {
                let mut ids = self.client.list_range(&self.keys.active(), 0, -1).await?;
                ids.reverse();
                ids
            }
            JobState::Delayed => self.client.zset_range(&self.keys.delayed(), 0, -1, true).await?,
            JobState::Completed => {
                self.client.zset_range(&self.keys.completed(), 0, -1, true).await?
            }
            JobState::Failed => self.client.zset_range(&self.keys.failed(), 0, -1, true).await?,
            JobState::WaitingChildren => {
                self.client.set_members(&self.keys.waiting_children()).await?
            }
            JobState::Unknown => Vec::new(),
        };
        Ok(ids)
    }

    /// Fetch jobs across states, sliced to `[start, end]` inclusive.
    pub async fn get_jobs(
        &self,
        states: &[JobState],
        start: usize,
        end: usize,
        ascending: bool,
    ) -> Result<Vec<Job>, EngineError> {
        let mut ids = Vec::new();
        for state in states {
            ids.extend(self.state_ids(*state).await?);
        }
        if !ascending {
            ids.reverse();
        }
        let slice: Vec<String> =
            ids.into_iter().skip(start).take(end.saturating_sub(start) + 1).collect();

        let mut jobs = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(job) = self.get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Count the members of each requested state, one round-trip.
    pub async fn get_job_counts(
        &self,
        states: &[JobState],
    ) -> Result<HashMap<JobState, u64>, EngineError> {
        let countable: Vec<JobState> =
            states.iter().copied().filter(|s| *s != JobState::Unknown).collect();
        let mut pipe = redis::pipe();
        for state in &countable {
            match state {
                JobState::Waiting => pipe.llen(self.keys.wait()),
                JobState::Paused => pipe.llen(self.keys.paused()),
                JobState::Active => pipe.llen(self.keys.active()),
                JobState::Delayed => pipe.zcard(self.keys.delayed()),
                JobState::Completed => pipe.zcard(self.keys.completed()),
                JobState::Failed => pipe.zcard(self.keys.failed()),
                JobState::WaitingChildren => pipe.scard(self.keys.waiting_children()),
                JobState::Unknown => unreachable!("filtered above"),
            };
        }
        let counts: Vec<u64> = self.client.query_pipeline(&pipe).await?;
        Ok(countable.into_iter().zip(counts).collect())
    }

    /// Remove records older than `grace_ms` from one container.
    pub async fn clean(
        &self,
        grace_ms: u64,
        limit: u64,
        target: CleanTarget,
    ) -> Result<Vec<String>, EngineError> {
        let cutoff = self.clock.epoch_ms().saturating_sub(grace_ms);
        let removed = self.transitions.clean(target, cutoff, limit).await?;
        self.events.publish(QueueEvent::Cleaned { count: removed.len() as u64 });
        Ok(removed)
    }

    /// Atomically discard every queued-but-unstarted job.
    pub async fn drain(&self, include_delayed: bool) -> Result<u64, EngineError> {
        let discarded = self.transitions.drain(include_delayed).await?;
        self.events.publish(QueueEvent::Drained);
        Ok(discarded)
    }

    /// Destroy the queue. Loops the bounded deletion script until the
    /// cursor reports nothing left.
    pub async fn obliterate(&self, force: bool, count: u64) -> Result<(), EngineError> {
        loop {
            if self.transitions.obliterate(count, force).await? == 0 {
                return Ok(());
            }
        }
    }

    /// Approximate-trim the events stream.
    pub async fn trim_events(&self, max_len: u64) -> Result<(), EngineError> {
        Ok(self.client.trim_stream(&self.keys.events(), max_len).await?)
    }

    /// Remove a job and its descendants.
    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.transitions.remove(id).await?)
    }

    /// Move a delayed job into the ready list ahead of schedule.
    pub async fn promote(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.transitions.promote(id).await?)
    }

    /// Put a finished job back on the ready list.
    pub async fn reprocess(&self, id: &str, source: ReprocessSource) -> Result<(), EngineError> {
        let lifo = match self.get_job(id).await? {
            Some(job) => job.opts.lifo,
            None => false,
        };
        Ok(self.transitions.reprocess(id, source, lifo).await?)
    }

    /// List registered repeat templates.
    pub async fn get_repeatable_jobs(&self) -> Result<Vec<RepeatableJob>, EngineError> {
        let entries = self.client.zset_entries(&self.keys.repeat()).await?;
        let mut templates = Vec::with_capacity(entries.len());
        for (member, score) in entries {
            if let Some((name, every)) = parse_repeat_key(&member) {
                templates.push(RepeatableJob { name, every_ms: every, next_ms: score as u64 });
            }
        }
        Ok(templates)
    }

    /// Deregister a repeat template; future iterations stop.
    pub async fn remove_repeatable(&self, name: &str, every_ms: u64) -> Result<bool, EngineError> {
        let member = format!("{}:::{}", name, every_ms);
        Ok(self.client.zset_remove(&self.keys.repeat(), &member).await?)
    }
}

/// Resolve the limiter group for a payload, when grouping applies.
pub(crate) fn resolve_group_key(
    limiter: Option<&RateLimiterOptions>,
    data: &[u8],
) -> Option<String> {
    let limiter = limiter?;
    limiter.group_path.as_ref()?;
    let payload: serde_json::Value = serde_json::from_slice(data).ok()?;
    limiter.resolve_group(&payload)
}

/// Next interval boundary strictly after `now`.
pub(crate) fn next_repeat_ms(now: u64, every: u64) -> u64 {
    if every == 0 {
        return now;
    }
    now - (now % every) + every
}

/// Split a `name:::every` registry member.
pub(crate) fn parse_repeat_key(member: &str) -> Option<(String, u64)> {
    let (name, every) = member.rsplit_once(":::")?;
    Some((name.to_string(), every.parse().ok()?))
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
