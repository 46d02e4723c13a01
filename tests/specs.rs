// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end queue behavior against a live Redis.
//!
//! Every test is skipped unless `REDIS_URL` is set. Each one works in
//! its own uniquely named queue under the `cvtest` prefix and deletes
//! its keys on the way out.

use conveyor_core::{
    BackoffPolicy, Clock, JobOptions, JobState, KeepPolicy, KeySpace, ParentRef, SystemClock,
};
use conveyor_engine::{
    Processor, ProcessError, Queue, QueueOptions, QueueScheduler, SchedulerOptions, Worker,
    WorkerOptions,
};
use conveyor_engine::JobHandle;
use conveyor_store::{
    AddJob, ClaimArgs, CleanTarget, FinishArgs, Next, ReprocessSource, StoreClient, StoreError,
    Transitions,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

const PREFIX: &str = "cvtest";

async fn store() -> Option<StoreClient> {
    let url = std::env::var("REDIS_URL").ok()?;
    match StoreClient::connect(&url).await {
        Ok(client) => Some(client),
        Err(err) => panic!("REDIS_URL is set but unusable: {}", err),
    }
}

fn now() -> u64 {
    SystemClock.epoch_ms()
}

fn unique(tag: &str) -> String {
    format!("{}-{}", tag, uuid::Uuid::new_v4().simple())
}

fn queue_keys(name: &str) -> KeySpace {
    KeySpace::new(PREFIX, name)
}

fn transitions(client: &StoreClient, name: &str) -> Transitions {
    Transitions::new(client, queue_keys(name), 1_000)
}

fn claim_args(token: &str) -> ClaimArgs<'_> {
    ClaimArgs { token, lock_duration_ms: 30_000, now_ms: now(), limiter: None }
}

fn finish_args<'a>(job_id: &'a str, token: &'a str, failed: bool, result: &'a [u8]) -> FinishArgs<'a> {
    FinishArgs {
        job_id,
        token: Some(token),
        failed,
        result,
        finished_on: now(),
        keep: KeepPolicy::KeepAll,
        fetch_next: false,
        claim: claim_args(token),
    }
}

async fn cleanup(client: &StoreClient, name: &str) {
    let pattern = format!("{}*", queue_keys(name).base());
    if let Ok(keys) = client.scan_keys(&pattern).await {
        let _ = client.delete_keys(&keys).await;
    }
}

async fn add_plain(tr: &Transitions, name: &str, opts: &JobOptions) -> String {
    tr.add(AddJob { name, data: b"{}", opts, timestamp: now(), wait_children: false })
        .await
        .expect("add job")
}

fn expect_job(next: Next) -> conveyor_core::Job {
    match next {
        Next::Job(job) => job,
        other => panic!("expected a claimed job, got {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn priority_order_wins_over_insertion() {
    let Some(client) = store().await else { return };
    let name = unique("prio");
    let tr = transitions(&client, &name);

    // A(priority 2), B(priority 1), C(priority 1): expect B, C, A
    let a = add_plain(&tr, "a", &JobOptions { priority: 2, ..JobOptions::default() }).await;
    let b = add_plain(&tr, "b", &JobOptions { priority: 1, ..JobOptions::default() }).await;
    let c = add_plain(&tr, "c", &JobOptions { priority: 1, ..JobOptions::default() }).await;

    let first = expect_job(tr.move_to_active(&claim_args("t1"), None).await.unwrap());
    let second = expect_job(tr.move_to_active(&claim_args("t2"), None).await.unwrap());
    let third = expect_job(tr.move_to_active(&claim_args("t3"), None).await.unwrap());

    assert_eq!(first.id, b);
    assert_eq!(second.id, c);
    assert_eq!(third.id, a);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn delayed_jobs_become_ready_on_schedule() {
    let Some(client) = store().await else { return };
    let name = unique("delay");
    let tr = transitions(&client, &name);

    let id =
        add_plain(&tr, "d", &JobOptions { delay: 150, ..JobOptions::default() }).await;

    // before the deadline: not ready, and the set reports when it will be
    let next_due = tr.update_delay_set(now()).await.unwrap().expect("a delayed entry");
    let due_at = conveyor_core::score_timestamp(next_due);
    assert!(due_at > now());
    assert!(due_at <= now() + 150);
    assert!(matches!(tr.move_to_active(&claim_args("t"), None).await.unwrap(), Next::Empty));

    tokio::time::sleep(Duration::from_millis(170)).await;
    assert_eq!(tr.update_delay_set(now()).await.unwrap(), None);

    let job = expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    assert_eq!(job.id, id);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn stalled_job_is_recovered_with_counter() {
    let Some(client) = store().await else { return };
    let name = unique("stall");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "e", &JobOptions::default()).await;
    let crashed = ClaimArgs {
        token: "tok1",
        lock_duration_ms: 50,
        now_ms: now(),
        limiter: None,
    };
    expect_job(tr.move_to_active(&crashed, None).await.unwrap());

    // let the lock expire, then run the two sweep phases
    tokio::time::sleep(Duration::from_millis(80)).await;
    let first = tr.sweep_stalled(1, now(), 60).await.unwrap();
    assert!(first.recovered.is_empty());
    tokio::time::sleep(Duration::from_millis(70)).await;
    let second = tr.sweep_stalled(1, now(), 60).await.unwrap();
    assert_eq!(second.recovered, vec![id.clone()]);
    assert!(second.failed.is_empty());

    assert_eq!(tr.get_state(&id).await.unwrap(), JobState::Waiting);
    let job = expect_job(tr.move_to_active(&claim_args("tok2"), None).await.unwrap());
    assert_eq!(job.stalled_counter, 1);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn second_stall_past_the_limit_fails_the_job() {
    let Some(client) = store().await else { return };
    let name = unique("stall2");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "e", &JobOptions::default()).await;
    for round in 0..2 {
        let crashed = ClaimArgs {
            token: "tok",
            lock_duration_ms: 50,
            now_ms: now(),
            limiter: None,
        };
        expect_job(tr.move_to_active(&crashed, None).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        tr.sweep_stalled(1, now(), 60).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        let sweep = tr.sweep_stalled(1, now(), 60).await.unwrap();
        if round == 0 {
            assert_eq!(sweep.recovered, vec![id.clone()]);
        } else {
            assert_eq!(sweep.failed, vec![id.clone()]);
        }
        tokio::time::sleep(Duration::from_millis(70)).await;
    }

    assert_eq!(tr.get_state(&id).await.unwrap(), JobState::Failed);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn failing_with_attempts_left_goes_through_delayed() {
    let Some(client) = store().await else { return };
    let name = unique("retry");
    let tr = transitions(&client, &name);

    let opts = JobOptions {
        attempts: 2,
        backoff: BackoffPolicy::Fixed { delay: 100 },
        ..JobOptions::default()
    };
    let id = add_plain(&tr, "f", &opts).await;

    // first attempt fails: schedule the retry through delayed
    let job = expect_job(tr.move_to_active(&claim_args("t1"), None).await.unwrap());
    assert_eq!(job.attempts_made, 1);
    let delay = job.opts.backoff.next_delay(job.attempts_made);
    tr.move_to_delayed(&id, now() + delay, Some("t1")).await.unwrap();
    assert_eq!(tr.get_state(&id).await.unwrap(), JobState::Delayed);

    tokio::time::sleep(Duration::from_millis(120)).await;
    tr.update_delay_set(now()).await.unwrap();

    // second attempt fails for good
    let job = expect_job(tr.move_to_active(&claim_args("t2"), None).await.unwrap());
    assert_eq!(job.attempts_made, 2);
    let finished = tr.move_to_finished(&finish_args(&id, "t2", true, b"boom")).await.unwrap();
    assert!(matches!(finished, Next::Empty));
    assert_eq!(tr.get_state(&id).await.unwrap(), JobState::Failed);

    let stored = client.hash_all(&queue_keys(&name).job(&id)).await.unwrap();
    let job = conveyor_core::Job::from_hash(id.clone(), stored).unwrap();
    assert_eq!(job.failed_reason.as_deref(), Some("boom"));

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn finishing_the_last_child_releases_the_parent() {
    let Some(client) = store().await else { return };
    let name = unique("flow");
    let tr = transitions(&client, &name);
    let keys = queue_keys(&name);

    let parent_opts = JobOptions { job_id: Some("p1".into()), ..JobOptions::default() };
    let child_opts = JobOptions {
        parent: Some(ParentRef { id: "p1".into(), queue: name.clone() }),
        ..JobOptions::default()
    };

    let child = add_plain(&tr, "c1", &child_opts).await;
    let parent = tr
        .add(AddJob {
            name: "p",
            data: b"{}",
            opts: &parent_opts,
            timestamp: now(),
            wait_children: true,
        })
        .await
        .unwrap();

    assert_eq!(tr.get_state(&parent).await.unwrap(), JobState::WaitingChildren);
    assert_eq!(client.set_len(&keys.dependencies(&parent)).await.unwrap(), 1);

    // processing the child completes the dependency
    let job = expect_job(tr.move_to_active(&claim_args("tc"), None).await.unwrap());
    assert_eq!(job.id, child);
    tr.move_to_finished(&finish_args(&child, "tc", false, b"\"done\"")).await.unwrap();

    assert_eq!(client.set_len(&keys.dependencies(&parent)).await.unwrap(), 0);
    assert_eq!(client.set_len(&keys.processed(&parent)).await.unwrap(), 1);
    assert_eq!(tr.get_state(&parent).await.unwrap(), JobState::Waiting);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn completing_with_pending_children_is_refused() {
    let Some(client) = store().await else { return };
    let name = unique("deps");
    let tr = transitions(&client, &name);

    let parent_opts = JobOptions { job_id: Some("p1".into()), ..JobOptions::default() };
    let child_opts = JobOptions {
        parent: Some(ParentRef { id: "p1".into(), queue: name.clone() }),
        delay: 60_000,
        ..JobOptions::default()
    };

    // the parent is claimable because it was added without wait_children
    let parent = add_plain(&tr, "p", &parent_opts).await;
    add_plain(&tr, "c1", &child_opts).await;

    let job = expect_job(tr.move_to_active(&claim_args("tp"), None).await.unwrap());
    assert_eq!(job.id, parent);
    let err = tr.move_to_finished(&finish_args(&parent, "tp", false, b"1")).await.unwrap_err();
    assert!(matches!(err, StoreError::PendingDependencies(_)));

    // parking it instead succeeds
    assert!(tr.move_to_waiting_children(&parent, "tp").await.unwrap());
    assert_eq!(tr.get_state(&parent).await.unwrap(), JobState::WaitingChildren);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn obliterate_refuses_then_succeeds() {
    let Some(client) = store().await else { return };
    let name = unique("oblit");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "g", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());

    // not paused
    assert!(matches!(tr.obliterate(1_000, false).await.unwrap_err(), StoreError::NotPaused));

    tr.pause(true).await.unwrap();
    // paused but still active
    assert!(matches!(tr.obliterate(1_000, false).await.unwrap_err(), StoreError::HasActiveJobs));

    // drain the active job, then obliterate completes
    tr.move_to_finished(&finish_args(&id, "t", false, b"1")).await.unwrap();
    let mut guard = 0;
    while tr.obliterate(10, false).await.unwrap() != 0 {
        guard += 1;
        assert!(guard < 100, "obliterate did not converge");
    }

    let leftover = client.scan_keys(&format!("{}*", queue_keys(&name).base())).await.unwrap();
    assert!(leftover.is_empty(), "keys left behind: {:?}", leftover);
}

#[tokio::test]
#[serial]
async fn pause_holds_new_and_claimed_work() {
    let Some(client) = store().await else { return };
    let name = unique("pause");
    let tr = transitions(&client, &name);

    let before = add_plain(&tr, "h", &JobOptions::default()).await;
    tr.pause(true).await.unwrap();

    let during = add_plain(&tr, "h2", &JobOptions::default()).await;
    assert_eq!(tr.get_state(&before).await.unwrap(), JobState::Paused);
    assert_eq!(tr.get_state(&during).await.unwrap(), JobState::Paused);
    assert!(matches!(tr.move_to_active(&claim_args("t"), None).await.unwrap(), Next::Empty));

    tr.pause(false).await.unwrap();
    assert_eq!(tr.get_state(&before).await.unwrap(), JobState::Waiting);
    let first = expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    assert_eq!(first.id, before, "resume must preserve order");

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn remove_leaves_no_trace() {
    let Some(client) = store().await else { return };
    let name = unique("rm");
    let tr = transitions(&client, &name);
    let keys = queue_keys(&name);

    let id = add_plain(&tr, "i", &JobOptions { priority: 3, ..JobOptions::default() }).await;
    tr.remove(&id).await.unwrap();

    let pattern = format!("{}*", keys.base());
    let left = client.scan_keys(&pattern).await.unwrap();
    // meta (id counter) and the events stream are the only survivors
    for key in &left {
        assert!(
            *key == keys.meta() || *key == keys.events(),
            "unexpected surviving key {}",
            key
        );
    }

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn locked_jobs_cannot_be_removed() {
    let Some(client) = store().await else { return };
    let name = unique("rmlock");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "j", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    assert!(matches!(tr.remove(&id).await.unwrap_err(), StoreError::Locked { .. }));

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn stale_tokens_cannot_extend_or_finish() {
    let Some(client) = store().await else { return };
    let name = unique("lock");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "k", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("owner"), None).await.unwrap());

    assert!(tr.extend_lock(&id, "owner", 30_000).await.unwrap());
    assert!(!tr.extend_lock(&id, "impostor", 30_000).await.unwrap());

    let err = tr.move_to_finished(&finish_args(&id, "impostor", false, b"1")).await.unwrap_err();
    assert!(matches!(err, StoreError::LockLost(_)));

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn lifo_jobs_jump_the_line() {
    let Some(client) = store().await else { return };
    let name = unique("lifo");
    let tr = transitions(&client, &name);

    add_plain(&tr, "first", &JobOptions::default()).await;
    let urgent =
        add_plain(&tr, "urgent", &JobOptions { lifo: true, ..JobOptions::default() }).await;

    let job = expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    assert_eq!(job.id, urgent);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn rate_limited_claims_report_the_wait() {
    let Some(client) = store().await else { return };
    let name = unique("limit");
    let tr = transitions(&client, &name);
    let limiter = conveyor_core::RateLimiterOptions::new(1, 60_000);

    add_plain(&tr, "l1", &JobOptions::default()).await;
    add_plain(&tr, "l2", &JobOptions::default()).await;

    let gated = ClaimArgs {
        token: "t",
        lock_duration_ms: 30_000,
        now_ms: now(),
        limiter: Some(&limiter),
    };
    expect_job(tr.move_to_active(&gated, None).await.unwrap());
    match tr.move_to_active(&gated, None).await.unwrap() {
        Next::RateLimited(wait) => assert!(wait > 0 && wait <= 60_000),
        other => panic!("expected a rate-limit delay, got {:?}", other),
    }
    // the second job stayed queued
    assert_eq!(client.list_len(&queue_keys(&name).wait()).await.unwrap(), 1);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn reprocess_returns_a_failed_job_to_wait() {
    let Some(client) = store().await else { return };
    let name = unique("reproc");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "m", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    tr.move_to_finished(&finish_args(&id, "t", true, b"boom")).await.unwrap();

    tr.reprocess(&id, ReprocessSource::Failed, false).await.unwrap();
    assert_eq!(tr.get_state(&id).await.unwrap(), JobState::Waiting);

    let job = expect_job(tr.move_to_active(&claim_args("t2"), None).await.unwrap());
    assert_eq!(job.id, id);
    assert!(job.failed_reason.is_some(), "reason is history, not state");
    assert!(job.finished_on.is_none());

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn clean_sweeps_old_finished_jobs() {
    let Some(client) = store().await else { return };
    let name = unique("clean");
    let tr = transitions(&client, &name);

    let id = add_plain(&tr, "n", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    tr.move_to_finished(&finish_args(&id, "t", false, b"1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let removed = tr.clean(CleanTarget::Completed, now(), 100).await.unwrap();
    assert_eq!(removed, vec![id.clone()]);
    assert!(client.hash_all(&queue_keys(&name).job(&id)).await.unwrap().is_empty());

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn drain_discards_ready_but_not_active() {
    let Some(client) = store().await else { return };
    let name = unique("drain");
    let tr = transitions(&client, &name);

    let running = add_plain(&tr, "o1", &JobOptions::default()).await;
    expect_job(tr.move_to_active(&claim_args("t"), None).await.unwrap());
    add_plain(&tr, "o2", &JobOptions::default()).await;
    add_plain(&tr, "o3", &JobOptions { delay: 60_000, ..JobOptions::default() }).await;

    let discarded = tr.drain(false).await.unwrap();
    assert_eq!(discarded, 1);
    assert_eq!(tr.get_state(&running).await.unwrap(), JobState::Active);
    assert_eq!(client.zset_len(&queue_keys(&name).delayed()).await.unwrap(), 1);

    let discarded = tr.drain(true).await.unwrap();
    assert_eq!(discarded, 1);
    assert_eq!(client.zset_len(&queue_keys(&name).delayed()).await.unwrap(), 0);

    cleanup(&client, &name).await;
}

#[tokio::test]
#[serial]
async fn duplicate_custom_ids_are_not_overwritten() {
    let Some(client) = store().await else { return };
    let name = unique("dup");
    let tr = transitions(&client, &name);

    let opts = JobOptions { job_id: Some("once".into()), ..JobOptions::default() };
    let first = add_plain(&tr, "original", &opts).await;
    let second = add_plain(&tr, "usurper", &opts).await;
    assert_eq!(first, second);

    let stored = client.hash_all(&queue_keys(&name).job("once")).await.unwrap();
    let job = conveyor_core::Job::from_hash("once", stored).unwrap();
    assert_eq!(job.name, "original");
    assert_eq!(client.list_len(&queue_keys(&name).wait()).await.unwrap(), 1);

    cleanup(&client, &name).await;
}

struct Doubler;

#[async_trait::async_trait]
impl Processor for Doubler {
    async fn process(&self, job: &conveyor_core::Job, _handle: &JobHandle) -> Result<Vec<u8>, ProcessError> {
        let n: i64 = job.data_as().map_err(|e| ProcessError::new(e.to_string()))?;
        Ok((n * 2).to_string().into_bytes())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn worker_processes_jobs_end_to_end() {
    let Some(client) = store().await else { return };
    let name = unique("e2e");

    let queue = Queue::new(&client, &name, QueueOptions::default().prefix(PREFIX))
        .await
        .unwrap();
    let worker = Worker::new(
        &client,
        &name,
        Arc::new(Doubler),
        WorkerOptions::default().prefix(PREFIX).concurrency(2).drain_delay_secs(0.2),
    );

    let mut ids = Vec::new();
    for n in 1..=5 {
        ids.push(queue.add("double", n.to_string().as_bytes(), JobOptions::default()).await.unwrap());
    }

    let worker = Arc::new(worker);
    let runner = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    // wait until everything is completed
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let counts = queue.get_job_counts(&[JobState::Completed]).await.unwrap();
        if counts.get(&JobState::Completed).copied().unwrap_or(0) == 5 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not complete in time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let job = queue.get_job(&ids[0]).await.unwrap().unwrap();
    assert_eq!(job.returnvalue.as_deref(), Some(b"2".as_slice()));

    worker.close();
    runner.await.unwrap().unwrap();
    cleanup(&client, &name).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn scheduler_promotes_delayed_jobs_for_the_worker() {
    let Some(client) = store().await else { return };
    let name = unique("sched");

    let queue = Queue::new(&client, &name, QueueOptions::default().prefix(PREFIX))
        .await
        .unwrap();
    let scheduler = Arc::new(QueueScheduler::new(
        &client,
        &name,
        SchedulerOptions::default().prefix(PREFIX).stalled_interval_ms(500),
    ));
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    let id = queue
        .add("later", b"1", JobOptions { delay: 200, ..JobOptions::default() })
        .await
        .unwrap();
    assert_eq!(queue.get_state(&id).await.unwrap(), JobState::Delayed);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if queue.get_state(&id).await.unwrap() == JobState::Waiting {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "delayed job was not promoted");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    scheduler.close();
    runner.await.unwrap().unwrap();
    cleanup(&client, &name).await;
}
