// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue scheduler: the delay pump and the stall monitor.
//!
//! One scheduler per queue is enough; concurrent schedulers are safe
//! (the sweep is guarded server-side and promotion is atomic), just
//! wasteful.

use crate::error::EngineError;
use crate::events::EventBus;
use conveyor_core::{score_timestamp, Clock, KeySpace, QueueEvent, SystemClock, DEFAULT_PREFIX};
use conveyor_store::{StoreClient, Transitions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How long the pump dozes when the delayed set is empty. New earlier
/// entries wake it through the marker key well before this elapses.
const IDLE_PUMP_MS: u64 = 5_000;

/// Floor for blocking-pop timeouts; zero would block forever.
const MIN_BLOCK_MS: u64 = 10;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub prefix: String,
    pub max_len_events: u64,
    /// Interval between stall sweeps. Keep at or below half the
    /// workers' lock duration.
    pub stalled_interval_ms: u64,
    /// Stall recoveries allowed before a job is failed outright.
    pub max_stalled_count: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            max_len_events: crate::queue::DEFAULT_MAX_EVENTS,
            stalled_interval_ms: 30_000,
            max_stalled_count: 1,
        }
    }
}

impl SchedulerOptions {
    conveyor_core::setters! {
        into {
            prefix: String,
        }
        set {
            max_len_events: u64,
            stalled_interval_ms: u64,
            max_stalled_count: u32,
        }
    }
}

struct SchedulerInner<C: Clock> {
    keys: KeySpace,
    client: StoreClient,
    transitions: Transitions,
    opts: SchedulerOptions,
    events: EventBus,
    shutdown: CancellationToken,
    clock: C,
}

/// Owns the background loops that feed `wait`.
pub struct QueueScheduler<C: Clock = SystemClock> {
    inner: Arc<SchedulerInner<C>>,
}

impl QueueScheduler<SystemClock> {
    pub fn new(client: &StoreClient, queue_name: &str, opts: SchedulerOptions) -> Self {
        Self::with_clock(client, queue_name, opts, SystemClock)
    }
}

impl<C: Clock + 'static> QueueScheduler<C> {
    pub fn with_clock(
        client: &StoreClient,
        queue_name: &str,
        opts: SchedulerOptions,
        clock: C,
    ) -> Self {
        let keys = KeySpace::new(opts.prefix.clone(), queue_name);
        let transitions = Transitions::new(client, keys.clone(), opts.max_len_events);
        Self {
            inner: Arc::new(SchedulerInner {
                keys,
                client: client.clone(),
                transitions,
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

    /// Run both loops until [`QueueScheduler::close`].
    pub async fn run(&self) -> Result<(), EngineError> {
        let pump = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.delay_pump().await })
        };
        let monitor = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.stall_monitor().await })
        };
        let (pump_result, monitor_result) = tokio::join!(pump, monitor);
        for result in [pump_result, monitor_result] {
            if let Err(err) = result {
                tracing::error!(error = %err, "scheduler loop panicked");
            }
        }
        Ok(())
    }

    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }
}

impl<C: Clock + 'static> SchedulerInner<C> {
    /// Promote due delayed jobs, then sleep until the next one is due.
    /// An `add` that creates a new earliest entry pushes the marker key
    /// and cuts the sleep short.
    async fn delay_pump(&self) {
        let mut blocking = loop {
            match self.client.blocking_connection().await {
                Ok(conn) => break conn,
                Err(err) => {
                    tracing::warn!(error = %err, "delay pump connection failed; retrying");
                    if self.sleep_or_shutdown(1_000).await {
                        return;
                    }
                }
            }
        };

        while !self.shutdown.is_cancelled() {
            let now = self.clock.epoch_ms();
            let next_due = match self.transitions.update_delay_set(now).await {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(error = %err, "delay promotion failed; backing off");
                    if self.sleep_or_shutdown(1_000).await {
                        return;
                    }
                    continue;
                }
            };

            let sleep_ms = pump_sleep_ms(next_due, now);
            if sleep_ms == 0 {
                continue;
            }

            let delay_marker_key = self.keys.delay_marker();
            let woke = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                popped = StoreClient::blpop(
                    &mut blocking,
                    &delay_marker_key,
                    sleep_ms as f64 / 1_000.0,
                ) => popped,
            };
            if let Err(err) = woke {
                tracing::warn!(error = %err, "delay marker wait failed");
                if self.sleep_or_shutdown(1_000).await {
                    return;
                }
            }
        }
    }

    /// Sweep for expired locks every interval. The PX-guarded check key
    /// keeps concurrent monitors down to one sweep per interval.
    async fn stall_monitor(&self) {
        while !self.shutdown.is_cancelled() {
            if self.sleep_or_shutdown(self.opts.stalled_interval_ms).await {
                return;
            }
            let sweep = self
                .transitions
                .sweep_stalled(
                    self.opts.max_stalled_count,
                    self.clock.epoch_ms(),
                    self.opts.stalled_interval_ms,
                )
                .await;
            match sweep {
                Ok(sweep) => {
                    for job_id in &sweep.recovered {
                        tracing::info!(job_id = %job_id, "stalled job recovered");
                        self.events.publish(QueueEvent::Stalled { job_id: job_id.clone() });
                    }
                    for job_id in &sweep.failed {
                        tracing::warn!(job_id = %job_id, "job stalled past the limit");
                        self.events.publish(QueueEvent::Failed {
                            job_id: job_id.clone(),
                            failed_reason: "job stalled more than allowable limit".to_string(),
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stall sweep failed");
                }
            }
        }
    }

    async fn sleep_or_shutdown(&self, ms: u64) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => false,
        }
    }
}

/// How long the pump may sleep given the next-due score. Zero means
/// work is already due and the caller should promote again right away.
pub(crate) fn pump_sleep_ms(next_due_score: Option<u64>, now_ms: u64) -> u64 {
    match next_due_score {
        Some(score) => {
            let due = score_timestamp(score);
            if due <= now_ms {
                0
            } else {
                (due - now_ms).max(MIN_BLOCK_MS)
            }
        }
        None => IDLE_PUMP_MS,
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
