// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn round_trip(event: QueueEvent) {
    let map: HashMap<String, String> =
        event.fields().into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    assert_eq!(QueueEvent::from_fields(&map), Some(event));
}

#[test]
fn per_job_events_round_trip() {
    round_trip(QueueEvent::Added { job_id: "1".into(), name: "send".into() });
    round_trip(QueueEvent::Waiting { job_id: "1".into() });
    round_trip(QueueEvent::Active { job_id: "1".into() });
    round_trip(QueueEvent::Completed { job_id: "1".into(), returnvalue: "\"ok\"".into() });
    round_trip(QueueEvent::Failed { job_id: "1".into(), failed_reason: "boom".into() });
    round_trip(QueueEvent::Delayed { job_id: "1".into(), delay_until_ms: 1234 });
    round_trip(QueueEvent::WaitingChildren { job_id: "p".into() });
    round_trip(QueueEvent::Stalled { job_id: "1".into() });
    round_trip(QueueEvent::Removed { job_id: "1".into() });
}

#[test]
fn queue_level_events_round_trip() {
    round_trip(QueueEvent::Drained);
    round_trip(QueueEvent::Paused);
    round_trip(QueueEvent::Resumed);
    round_trip(QueueEvent::Cleaned { count: 12 });
}

#[test]
fn fields_always_lead_with_event_name() {
    let fields = QueueEvent::Failed { job_id: "9".into(), failed_reason: "x".into() }.fields();
    assert_eq!(fields[0], ("event", "failed".to_string()));
    assert_eq!(fields[1], ("jobId", "9".to_string()));
}

#[test]
fn unknown_event_name_decodes_to_none() {
    let mut map = HashMap::new();
    map.insert("event".to_string(), "mystery".to_string());
    assert_eq!(QueueEvent::from_fields(&map), None);
}

#[test]
fn missing_event_field_decodes_to_none() {
    assert_eq!(QueueEvent::from_fields(&HashMap::new()), None);
}
