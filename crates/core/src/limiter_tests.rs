// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn no_group_path_resolves_nothing() {
    let limiter = RateLimiterOptions::new(10, 1_000);
    assert_eq!(limiter.resolve_group(&json!({"tenant": "a"})), None);
}

#[yare::parameterized(
    top_level = { "tenant", json!({"tenant": "acme"}), Some("acme") },
    nested    = { "meta.tenant.id", json!({"meta": {"tenant": {"id": "x1"}}}), Some("x1") },
    number    = { "shard", json!({"shard": 7}), Some("7") },
    missing   = { "tenant", json!({"other": 1}), None },
    non_leaf  = { "meta", json!({"meta": {"tenant": "a"}}), None },
    bool_leaf = { "flag", json!({"flag": true}), None },
)]
fn group_resolution(path: &str, payload: serde_json::Value, expected: Option<&str>) {
    let limiter = RateLimiterOptions::new(5, 1_000).group_path(path);
    assert_eq!(limiter.resolve_group(&payload).as_deref(), expected);
}

#[test]
fn suffixed_ids_round_trip() {
    let id = group_suffixed_id("42", "acme");
    assert_eq!(id, "42:acme");
    assert_eq!(group_of_id(&id), Some("acme"));
}

#[test]
fn plain_ids_have_no_group() {
    assert_eq!(group_of_id("42"), None);
    assert_eq!(group_of_id("42:"), None);
}

#[test]
fn limiter_options_serde() {
    let limiter = RateLimiterOptions::new(100, 60_000).group_path("user.id");
    let json = serde_json::to_string(&limiter).unwrap();
    let parsed: RateLimiterOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, limiter);
}
