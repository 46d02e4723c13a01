// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

#[test]
fn score_packs_timestamp_and_id_bits() {
    assert_eq!(delay_score(1_000, "3"), 1_000 * 4096 + 3);
    assert_eq!(delay_score(0, "0"), 0);
}

#[test]
fn id_contributes_only_low_twelve_bits() {
    // 4096 wraps to 0, 4099 wraps to 3
    assert_eq!(delay_score(10, "4096"), 10 * 4096);
    assert_eq!(delay_score(10, "4099"), 10 * 4096 + 3);
}

#[test]
fn custom_ids_sort_first_within_a_millisecond() {
    let custom = delay_score(500, "report-nightly");
    let numeric = delay_score(500, "1");
    assert!(custom < numeric);
    assert_eq!(score_timestamp(custom), 500);
}

#[test]
fn due_bound_covers_whole_millisecond() {
    let now = 12_345;
    assert_eq!(due_bound(now), delay_score(now, "4095"));
    assert!(due_bound(now) < delay_score(now + 1, "0"));
}

#[yare::parameterized(
    same_ms_fifo     = { 100, "1", 100, "2" },
    earlier_ms_wins  = { 100, "4000", 101, "1" },
    zero_ts          = { 0, "5", 1, "0" },
)]
fn earlier_entry_scores_lower(ts_a: u64, id_a: &str, ts_b: u64, id_b: &str) {
    assert!(delay_score(ts_a, id_a) < delay_score(ts_b, id_b));
}

proptest! {
    #[test]
    fn timestamp_round_trips_through_score(ts in 0u64..=4_000_000_000_000, id in 0u64..100_000) {
        let score = delay_score(ts, &id.to_string());
        prop_assert_eq!(score_timestamp(score), ts);
        prop_assert!(score <= due_bound(ts));
    }
}
