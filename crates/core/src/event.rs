// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State-change records.
//!
//! The authoritative copy of every event is appended to the `events`
//! stream by the transition scripts. This enum is the in-process view:
//! what the worker and scheduler broadcast locally, and what a parsed
//! stream record decodes into.

use std::collections::HashMap;

/// One state change in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Added { job_id: String, name: String },
    Waiting { job_id: String },
    Active { job_id: String },
    Completed { job_id: String, returnvalue: String },
    Failed { job_id: String, failed_reason: String },
    Delayed { job_id: String, delay_until_ms: u64 },
    WaitingChildren { job_id: String },
    Progress { job_id: String, progress: String },
    Stalled { job_id: String },
    Removed { job_id: String },
    Cleaned { count: u64 },
    Drained,
    Paused,
    Resumed,
}

impl QueueEvent {
    /// Wire name, matching what the scripts write into the stream.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Added { .. } => "added",
            QueueEvent::Waiting { .. } => "waiting",
            QueueEvent::Active { .. } => "active",
            QueueEvent::Completed { .. } => "completed",
            QueueEvent::Failed { .. } => "failed",
            QueueEvent::Delayed { .. } => "delayed",
            QueueEvent::WaitingChildren { .. } => "waiting-children",
            QueueEvent::Progress { .. } => "progress",
            QueueEvent::Stalled { .. } => "stalled",
            QueueEvent::Removed { .. } => "removed",
            QueueEvent::Cleaned { .. } => "cleaned",
            QueueEvent::Drained => "drained",
            QueueEvent::Paused => "paused",
            QueueEvent::Resumed => "resumed",
        }
    }

    /// Subject job, when the event concerns a single job.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::Added { job_id, .. }
            | QueueEvent::Waiting { job_id }
            | QueueEvent::Active { job_id }
            | QueueEvent::Completed { job_id, .. }
            | QueueEvent::Failed { job_id, .. }
            | QueueEvent::Delayed { job_id, .. }
            | QueueEvent::WaitingChildren { job_id }
            | QueueEvent::Progress { job_id, .. }
            | QueueEvent::Stalled { job_id }
            | QueueEvent::Removed { job_id } => Some(job_id),
            _ => None,
        }
    }

    /// Flat field pairs, the shape stored in the stream record.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("event", self.name().to_string())];
        if let Some(id) = self.job_id() {
            out.push(("jobId", id.to_string()));
        }
        match self {
            QueueEvent::Added { name, .. } => out.push(("name", name.clone())),
            QueueEvent::Completed { returnvalue, .. } => {
                out.push(("returnvalue", returnvalue.clone()))
            }
            QueueEvent::Failed { failed_reason, .. } => {
                out.push(("failedReason", failed_reason.clone()))
            }
            QueueEvent::Delayed { delay_until_ms, .. } => {
                out.push(("delay", delay_until_ms.to_string()))
            }
            QueueEvent::Progress { progress, .. } => out.push(("data", progress.clone())),
            QueueEvent::Cleaned { count } => out.push(("count", count.to_string())),
            _ => {}
        }
        out
    }

    /// Decode a stream record's field map back into an event.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let event = fields.get("event")?.as_str();
        let job_id = || fields.get("jobId").cloned().unwrap_or_default();
        let some = match event {
            "added" => QueueEvent::Added {
                job_id: job_id(),
                name: fields.get("name").cloned().unwrap_or_default(),
            },
            "waiting" => QueueEvent::Waiting { job_id: job_id() },
            "active" => QueueEvent::Active { job_id: job_id() },
            "completed" => QueueEvent::Completed {
                job_id: job_id(),
                returnvalue: fields.get("returnvalue").cloned().unwrap_or_default(),
            },
            "failed" => QueueEvent::Failed {
                job_id: job_id(),
                failed_reason: fields.get("failedReason").cloned().unwrap_or_default(),
            },
            "delayed" => QueueEvent::Delayed {
                job_id: job_id(),
                delay_until_ms: fields.get("delay").and_then(|d| d.parse().ok()).unwrap_or(0),
            },
            "waiting-children" => QueueEvent::WaitingChildren { job_id: job_id() },
            "progress" => QueueEvent::Progress {
                job_id: job_id(),
                progress: fields.get("data").cloned().unwrap_or_default(),
            },
            "stalled" => QueueEvent::Stalled { job_id: job_id() },
            "removed" => QueueEvent::Removed { job_id: job_id() },
            "cleaned" => QueueEvent::Cleaned {
                count: fields.get("count").and_then(|c| c.parse().ok()).unwrap_or(0),
            },
            "drained" => QueueEvent::Drained,
            "paused" => QueueEvent::Paused,
            "resumed" => QueueEvent::Resumed,
            _ => return None,
        };
        Some(some)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
