// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use conveyor_core::delay_score;

#[test]
fn default_options() {
    let opts = SchedulerOptions::default();
    assert_eq!(opts.stalled_interval_ms, 30_000);
    assert_eq!(opts.max_stalled_count, 1);
}

#[test]
fn empty_delay_set_dozes() {
    assert_eq!(pump_sleep_ms(None, 1_000), IDLE_PUMP_MS);
}

#[test]
fn due_work_does_not_sleep() {
    let now = 50_000;
    let score = delay_score(now - 10, "1");
    assert_eq!(pump_sleep_ms(Some(score), now), 0);
}

#[test]
fn future_work_sleeps_until_due() {
    let now = 50_000;
    let score = delay_score(now + 1_234, "1");
    assert_eq!(pump_sleep_ms(Some(score), now), 1_234);
}

#[test]
fn imminent_work_still_blocks_briefly() {
    let now = 50_000;
    let score = delay_score(now + 1, "1");
    assert_eq!(pump_sleep_ms(Some(score), now), MIN_BLOCK_MS);
}
